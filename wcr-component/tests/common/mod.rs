//! A scripted core engine for integration tests.
//!
//! Modules are registered under their "binary" bytes; `compile` looks the
//! key up and `instantiate` runs the registered factory, which receives the
//! import resolver and assembles an instance out of closures over a
//! [`SimpleMemory`].

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use wcr_component::canonical_abi::{bump_realloc, SimpleMemory};
use wcr_component::engine::{
    CompiledModule, CoreEngine, CoreFunc, CoreMemory, ImportResolver, ModuleInstanceHandle,
};
use wcr_component::{Error, Result};
use wcr_foundation::types::{CoreFuncType, CoreValType, ModuleType};

type Factory = Rc<dyn Fn(&mut dyn ImportResolver) -> Result<Rc<MockInstance>>>;

struct CompiledMock {
    ty: Rc<ModuleType>,
}

impl CompiledModule for CompiledMock {
    fn module_type(&self) -> Rc<ModuleType> {
        self.ty.clone()
    }
}

/// An engine whose modules are closures registered by the test
#[derive(Default)]
pub struct MockEngine {
    registry: RefCell<HashMap<Vec<u8>, (Rc<ModuleType>, Factory)>>,
    compiled: RefCell<Vec<(Rc<CompiledMock>, Factory)>>,
}

impl MockEngine {
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    /// Register a module under its "binary" key
    pub fn register(
        &self,
        key: &[u8],
        ty: ModuleType,
        factory: impl Fn(&mut dyn ImportResolver) -> Result<Rc<MockInstance>> + 'static,
    ) {
        self.registry
            .borrow_mut()
            .insert(key.to_vec(), (Rc::new(ty), Rc::new(factory)));
    }
}

impl CoreEngine for MockEngine {
    fn compile(&self, bytes: &[u8]) -> Result<Rc<dyn CompiledModule>> {
        let registry = self.registry.borrow();
        let (ty, factory) = registry
            .get(bytes)
            .ok_or_else(|| Error::runtime_error("unknown module binary"))?;
        let compiled = Rc::new(CompiledMock { ty: ty.clone() });
        self.compiled
            .borrow_mut()
            .push((compiled.clone(), factory.clone()));
        Ok(compiled)
    }

    fn instantiate(
        &self,
        module: &Rc<dyn CompiledModule>,
        _name: &str,
        resolver: &mut dyn ImportResolver,
    ) -> Result<Rc<dyn ModuleInstanceHandle>> {
        let wanted = Rc::as_ptr(module) as *const ();
        let factory = self
            .compiled
            .borrow()
            .iter()
            .find(|(candidate, _)| Rc::as_ptr(candidate) as *const () == wanted)
            .map(|(_, factory)| factory.clone())
            .ok_or_else(|| Error::runtime_error("module was not compiled by this engine"))?;
        let instance = factory(resolver)?;
        Ok(instance as Rc<dyn ModuleInstanceHandle>)
    }
}

/// A scripted module instance: named closures and memories
#[derive(Default)]
pub struct MockInstance {
    functions: RefCell<HashMap<String, CoreFunc>>,
    memories: RefCell<HashMap<String, Rc<dyn CoreMemory>>>,
}

impl MockInstance {
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    pub fn add_function(&self, name: &str, func: CoreFunc) {
        self.functions.borrow_mut().insert(name.to_string(), func);
    }

    pub fn add_memory(&self, name: &str, memory: Rc<dyn CoreMemory>) {
        self.memories.borrow_mut().insert(name.to_string(), memory);
    }
}

impl ModuleInstanceHandle for MockInstance {
    fn function(&self, name: &str) -> Option<CoreFunc> {
        self.functions.borrow().get(name).cloned()
    }

    fn memory(&self, name: &str) -> Option<Rc<dyn CoreMemory>> {
        self.memories.borrow().get(name).cloned()
    }

    fn global(&self, _name: &str) -> Option<Rc<dyn wcr_component::engine::CoreGlobal>> {
        None
    }

    fn table(&self, _name: &str) -> Option<Rc<dyn wcr_component::engine::CoreTable>> {
        None
    }
}

/// Short signature helper
pub fn sig(params: &[CoreValType], results: &[CoreValType]) -> CoreFuncType {
    CoreFuncType::new(params, results)
}

/// A memory/realloc pair for guest modules: memory exported as `mem`,
/// realloc as `realloc`, heap starting at 4096
pub fn guest_memory() -> (Rc<SimpleMemory>, CoreFunc) {
    let memory = SimpleMemory::new(1 << 16);
    let realloc = bump_realloc(&memory, 4096);
    (memory, realloc)
}
