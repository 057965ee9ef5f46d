//! Interface to the embedded core WebAssembly engine.
//!
//! The component runtime never interprets core wasm itself; it drives an
//! external engine through these traits. The engine compiles core modules,
//! instantiates them against an import resolver, and exposes exported
//! functions, memories, globals and tables by name.

use crate::prelude::*;

/// The host-provided core WebAssembly engine
pub trait CoreEngine {
    /// Compile a core module from its binary encoding
    fn compile(&self, bytes: &[u8]) -> Result<Rc<dyn CompiledModule>>;

    /// Instantiate a compiled module, resolving each imported module name
    /// through `resolver`
    fn instantiate(
        &self,
        module: &Rc<dyn CompiledModule>,
        name: &str,
        resolver: &mut dyn ImportResolver,
    ) -> Result<Rc<dyn ModuleInstanceHandle>>;
}

/// A compiled core module exposing its import/export signatures
pub trait CompiledModule {
    /// Imported and exported function, memory, table and global types
    fn module_type(&self) -> Rc<ModuleType>;
}

/// Resolves a core import module name to the instance satisfying it
pub trait ImportResolver {
    /// The instance whose exports satisfy imports from `module`, if any
    fn resolve(&mut self, module: &str) -> Option<CoreInstanceVal>;
}

impl<F> ImportResolver for F
where
    F: FnMut(&str) -> Option<CoreInstanceVal>,
{
    fn resolve(&mut self, module: &str) -> Option<CoreInstanceVal> {
        self(module)
    }
}

/// A live core module instance held by the engine
pub trait ModuleInstanceHandle {
    /// Exported function by name
    fn function(&self, name: &str) -> Option<CoreFunc>;
    /// Exported memory by name
    fn memory(&self, name: &str) -> Option<Rc<dyn CoreMemory>>;
    /// Exported global by name
    fn global(&self, name: &str) -> Option<Rc<dyn CoreGlobal>>;
    /// Exported table by name
    fn table(&self, name: &str) -> Option<Rc<dyn CoreTable>>;
}

/// A core linear memory.
///
/// The little-endian accessors are defaulted on top of `read`/`write` so an
/// engine only supplies the byte-level operations.
pub trait CoreMemory {
    /// The memory's type
    fn memory_type(&self) -> CoreMemoryType;

    /// Read `len` bytes at `offset`
    fn read(&self, offset: u32, len: u32) -> Result<Vec<u8>>;

    /// Write bytes at `offset`
    fn write(&self, offset: u32, data: &[u8]) -> Result<()>;

    /// Current size in bytes
    fn size(&self) -> u32;

    /// Read a single byte
    fn read_u8(&self, offset: u32) -> Result<u8> {
        let bytes = self.read(offset, 1)?;
        Ok(bytes[0])
    }

    /// Write a single byte
    fn write_u8(&self, offset: u32, value: u8) -> Result<()> {
        self.write(offset, &[value])
    }

    /// Read a little-endian u16
    fn read_u16_le(&self, offset: u32) -> Result<u16> {
        let bytes = self.read(offset, 2)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    /// Write a little-endian u16
    fn write_u16_le(&self, offset: u32, value: u16) -> Result<()> {
        self.write(offset, &value.to_le_bytes())
    }

    /// Read a little-endian u32
    fn read_u32_le(&self, offset: u32) -> Result<u32> {
        let bytes = self.read(offset, 4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Write a little-endian u32
    fn write_u32_le(&self, offset: u32, value: u32) -> Result<()> {
        self.write(offset, &value.to_le_bytes())
    }

    /// Read a little-endian u64
    fn read_u64_le(&self, offset: u32) -> Result<u64> {
        let bytes = self.read(offset, 8)?;
        Ok(u64::from_le_bytes([
            bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
        ]))
    }

    /// Write a little-endian u64
    fn write_u64_le(&self, offset: u32, value: u64) -> Result<()> {
        self.write(offset, &value.to_le_bytes())
    }
}

/// A core global held by the engine
pub trait CoreGlobal {
    /// The global's type
    fn global_type(&self) -> CoreGlobalType;
    /// Current value
    fn get(&self) -> Result<CoreValue>;
    /// Set the value; fails on immutable globals
    fn set(&self, value: CoreValue) -> Result<()>;
}

/// A core table held by the engine; opaque to the component layer
pub trait CoreTable {
    /// The table's type
    fn table_type(&self) -> CoreTableType;
}

/// A callable core function: an engine export or a host-synthesised adapter
#[derive(Clone)]
pub struct CoreFunc {
    ty: Rc<CoreFuncType>,
    callee: Rc<dyn Fn(&[CoreValue]) -> Result<Vec<CoreValue>>>,
}

impl CoreFunc {
    /// Wrap a callable with its signature
    pub fn new(
        ty: CoreFuncType,
        callee: impl Fn(&[CoreValue]) -> Result<Vec<CoreValue>> + 'static,
    ) -> Self {
        Self { ty: Rc::new(ty), callee: Rc::new(callee) }
    }

    /// The function's signature
    pub fn func_type(&self) -> &CoreFuncType {
        &self.ty
    }

    /// Invoke with flat core values; arity is checked against the signature
    pub fn call(&self, args: &[CoreValue]) -> Result<Vec<CoreValue>> {
        if args.len() != self.ty.params.len() {
            return Err(Error::function_call_failed(format!(
                "core call expects {} arguments, got {}",
                self.ty.params.len(),
                args.len()
            )));
        }
        (self.callee)(args)
    }
}

impl Debug for CoreFunc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CoreFunc({})", self.ty)
    }
}

/// A compiled core module paired with its type
#[derive(Clone)]
pub struct CoreModuleVal {
    /// The engine's compiled artefact
    pub compiled: Rc<dyn CompiledModule>,
    /// Import/export signatures
    pub ty: Rc<ModuleType>,
}

impl Debug for CoreModuleVal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoreModuleVal").field("ty", &self.ty).finish()
    }
}

/// A single core module export value
#[derive(Clone, Debug)]
pub enum CoreExtern {
    /// A core function
    Func(CoreFunc),
    /// A linear memory
    Memory(Rc<dyn CoreMemory>),
    /// A global
    Global(Rc<dyn CoreGlobal>),
    /// A table
    Table(Rc<dyn CoreTable>),
}

impl Debug for dyn CoreMemory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CoreMemory({} bytes)", self.size())
    }
}

impl Debug for dyn CoreGlobal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CoreGlobal({:?})", self.global_type())
    }
}

impl Debug for dyn CoreTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CoreTable({:?})", self.table_type())
    }
}

impl CoreExtern {
    /// The extern's core type
    pub fn extern_type(&self) -> CoreExternType {
        match self {
            CoreExtern::Func(f) => CoreExternType::Func(f.func_type().clone()),
            CoreExtern::Memory(m) => CoreExternType::Memory(m.memory_type()),
            CoreExtern::Global(g) => CoreExternType::Global(g.global_type()),
            CoreExtern::Table(t) => CoreExternType::Table(t.table_type()),
        }
    }

    /// Short kind name for messages
    pub fn kind(&self) -> &'static str {
        match self {
            CoreExtern::Func(_) => "func",
            CoreExtern::Memory(_) => "memory",
            CoreExtern::Global(_) => "global",
            CoreExtern::Table(_) => "table",
        }
    }
}

enum CoreInstanceInner {
    /// Backed by an engine instantiation
    Module(Rc<dyn ModuleInstanceHandle>),
    /// Synthesised from existing definitions (core inline exports)
    Synthetic(Vec<(String, CoreExtern)>),
}

/// A core instance value: an engine-backed instantiation or a synthetic
/// re-export of existing items under new names
#[derive(Clone)]
pub struct CoreInstanceVal {
    inner: Rc<CoreInstanceInner>,
}

impl CoreInstanceVal {
    /// Wrap an engine instantiation
    pub fn from_module(handle: Rc<dyn ModuleInstanceHandle>) -> Self {
        Self { inner: Rc::new(CoreInstanceInner::Module(handle)) }
    }

    /// Build a synthetic instance exporting the given items
    pub fn from_exports(exports: Vec<(String, CoreExtern)>) -> Self {
        Self { inner: Rc::new(CoreInstanceInner::Synthetic(exports)) }
    }

    /// Look up an export by name
    pub fn get(&self, name: &str) -> Option<CoreExtern> {
        match &*self.inner {
            CoreInstanceInner::Module(handle) => handle
                .function(name)
                .map(CoreExtern::Func)
                .or_else(|| handle.memory(name).map(CoreExtern::Memory))
                .or_else(|| handle.global(name).map(CoreExtern::Global))
                .or_else(|| handle.table(name).map(CoreExtern::Table)),
            CoreInstanceInner::Synthetic(exports) => exports
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, e)| e.clone()),
        }
    }

    /// Exported function by name, or a type mismatch error
    pub fn function(&self, name: &str) -> Result<CoreFunc> {
        match self.get(name) {
            Some(CoreExtern::Func(f)) => Ok(f),
            Some(other) => Err(Error::type_mismatch(format!(
                "core export `{name}` is a {}, expected func",
                other.kind()
            ))),
            None => Err(Error::index_out_of_range(format!(
                "no core export named `{name}`"
            ))),
        }
    }

    /// Exported memory by name, or a type mismatch error
    pub fn memory(&self, name: &str) -> Result<Rc<dyn CoreMemory>> {
        match self.get(name) {
            Some(CoreExtern::Memory(m)) => Ok(m),
            Some(other) => Err(Error::type_mismatch(format!(
                "core export `{name}` is a {}, expected memory",
                other.kind()
            ))),
            None => Err(Error::index_out_of_range(format!(
                "no core export named `{name}`"
            ))),
        }
    }
}

impl Debug for CoreInstanceVal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &*self.inner {
            CoreInstanceInner::Module(_) => f.write_str("CoreInstanceVal(module)"),
            CoreInstanceInner::Synthetic(exports) => {
                write!(f, "CoreInstanceVal(synthetic, {} exports)", exports.len())
            }
        }
    }
}
