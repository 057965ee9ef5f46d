//! Host-synthesised instances.
//!
//! `InstanceBuilder` assembles an instance from host-provided parts: types,
//! functions, nested instances, core modules, and host resource types.
//! Function exports are registered through a factory closure invoked after
//! the instance exists, so host functions can close over the very instance
//! they are exported from.

use crate::context::Context;
use crate::definitions::Sort;
use crate::engine::CoreModuleVal;
use crate::instance::{ComponentExtern, ComponentFunc, ExportSpec, Instance};
use crate::prelude::*;
use crate::resources::HandleRep;
use crate::types::{FuncType, RepKind, ResourceDtor, ResourceType, Type};
use crate::values::Value;

/// A host function body
pub type HostFn = Rc<dyn Fn(Vec<Value>) -> Result<Vec<Value>>>;

/// Factory producing a host function once its instance exists
type HostFnFactory = Box<dyn FnOnce(&Rc<Instance>) -> HostFn>;

enum PendingExport {
    Type {
        name: String,
        ty: Type,
    },
    Func {
        name: String,
        ty: Rc<FuncType>,
        factory: HostFnFactory,
    },
    Instance {
        name: String,
        instance: Rc<Instance>,
    },
    CoreModule {
        name: String,
        module: CoreModuleVal,
    },
}

/// Builder for host-synthesised instances
#[derive(Default)]
pub struct InstanceBuilder {
    exports: Vec<PendingExport>,
    resources: Vec<Rc<ResourceType>>,
}

impl InstanceBuilder {
    /// Create an empty builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Export a type under `name`
    pub fn add_type_export(&mut self, name: &str, ty: Type) -> &mut Self {
        self.exports.push(PendingExport::Type { name: name.to_string(), ty });
        self
    }

    /// Export a function under `name`.
    ///
    /// The factory runs after the instance is constructed and receives it,
    /// so the body can call back into sibling exports.
    pub fn add_function_export(
        &mut self,
        name: &str,
        ty: Rc<FuncType>,
        factory: impl FnOnce(&Rc<Instance>) -> HostFn + 'static,
    ) -> &mut Self {
        self.exports.push(PendingExport::Func {
            name: name.to_string(),
            ty,
            factory: Box::new(factory),
        });
        self
    }

    /// Export an existing instance under `name`
    pub fn add_instance_export(&mut self, name: &str, instance: Rc<Instance>) -> &mut Self {
        self.exports.push(PendingExport::Instance {
            name: name.to_string(),
            instance,
        });
        self
    }

    /// Export a compiled core module under `name`
    pub fn add_core_module_export(&mut self, name: &str, module: CoreModuleVal) -> &mut Self {
        self.exports.push(PendingExport::CoreModule {
            name: name.to_string(),
            module,
        });
        self
    }

    /// Create a resource type owned by the instance under construction.
    ///
    /// The returned type can be referenced from exported function types (as
    /// `own`/`borrow`) and exported with [`InstanceBuilder::add_type_export`].
    pub fn create_resource_type(
        &mut self,
        rep: RepKind,
        dtor: Option<Rc<dyn Fn(&HandleRep) -> Result<()>>>,
    ) -> Rc<ResourceType> {
        let resource = ResourceType::fresh(rep);
        if let Some(dtor) = dtor {
            resource.set_dtor(ResourceDtor::Host(dtor));
        }
        self.resources.push(resource.clone());
        resource
    }

    /// Construct the instance, claiming resource ownership and running the
    /// function factories
    pub fn build(self, cx: &Context) -> Result<Rc<Instance>> {
        let instance = Instance::new(cx);
        for resource in &self.resources {
            resource.set_owner(&instance);
        }
        for export in self.exports {
            match export {
                PendingExport::Type { name, ty } => {
                    instance.add_export(
                        &name,
                        ComponentExtern::Type(ty.clone()),
                        ExportSpec { sort: Sort::Type, ty },
                    )?;
                }
                PendingExport::Func { name, ty, factory } => {
                    let body = factory(&instance);
                    let func = ComponentFunc::new(ty.clone(), move |args| body(args));
                    instance.add_export(
                        &name,
                        ComponentExtern::Func(func),
                        ExportSpec { sort: Sort::Func, ty: Type::Func(ty) },
                    )?;
                }
                PendingExport::Instance { name, instance: inner } => {
                    let ty = Type::Instance(inner.instance_type()?);
                    instance.add_export(
                        &name,
                        ComponentExtern::Instance(inner),
                        ExportSpec { sort: Sort::Instance, ty },
                    )?;
                }
                PendingExport::CoreModule { name, module } => {
                    let ty = Type::CoreModule(module.ty.clone());
                    instance.add_export(
                        &name,
                        ComponentExtern::CoreModule(module),
                        ExportSpec { sort: Sort::CoreModule, ty },
                    )?;
                }
            }
        }
        Ok(instance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::CoreEngine;
    use crate::types::ValType;

    struct NoEngine;
    impl CoreEngine for NoEngine {
        fn compile(&self, _: &[u8]) -> Result<Rc<dyn crate::engine::CompiledModule>> {
            Err(Error::runtime_error("no engine"))
        }
        fn instantiate(
            &self,
            _: &Rc<dyn crate::engine::CompiledModule>,
            _: &str,
            _: &mut dyn crate::engine::ImportResolver,
        ) -> Result<Rc<dyn crate::engine::ModuleInstanceHandle>> {
            Err(Error::runtime_error("no engine"))
        }
    }

    #[test]
    fn function_factory_closes_over_instance() {
        let cx = Context::new(Rc::new(NoEngine));
        let mut builder = InstanceBuilder::new();
        let ty = FuncType::new_host(vec![], vec![ValType::U32]).unwrap();
        builder.add_function_export("export-count", ty, |instance| {
            let instance = instance.clone();
            Rc::new(move |_args| Ok(vec![Value::U32(instance.export_names().len() as u32)]))
        });
        let instance = builder.build(&cx).unwrap();

        let Some(ComponentExtern::Func(func)) = instance.export("export-count") else {
            panic!("missing function export");
        };
        let results = func.call(vec![]).unwrap();
        assert_eq!(results, vec![Value::U32(1)]);
    }

    #[test]
    fn resource_type_owned_by_built_instance() {
        let cx = Context::new(Rc::new(NoEngine));
        let mut builder = InstanceBuilder::new();
        let resource = builder.create_resource_type(RepKind::U32, None);
        builder.add_type_export("r", Type::Resource(resource.clone()));
        let instance = builder.build(&cx).unwrap();
        assert!(resource
            .owner()
            .is_some_and(|owner| Rc::ptr_eq(&owner, &instance)));
    }
}
