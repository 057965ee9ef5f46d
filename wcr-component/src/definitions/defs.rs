//! Per-sort definition kinds.
//!
//! Each sort has a closed enum of definition kinds with two operations:
//! pure type construction against the definition scope, and deferred value
//! construction against an instance scope. Value construction may reach the
//! engine (compiling and instantiating core modules); type construction
//! never does.

use super::scope::{DefinitionScope, InstanceScope};
use super::type_eval::{self, TypeEnv, TypeEvalCx};
use super::{Sort, SortIdx};
use crate::ast;
use crate::canon;
use crate::component::{Component, ComponentVal};
use crate::context::Context;
use crate::engine::{
    CompiledModule, CoreExtern, CoreFunc, CoreInstanceVal, CoreModuleVal,
};
use crate::instance::{ComponentExtern, ComponentFunc, ExportSpec, Instance};
use crate::prelude::*;
use crate::type_check::{core_extern_compatible, TypeChecker};
use crate::types::{ComponentType, FuncType, InstanceType, Type};

/// The static type of a component-level definition reference
pub(crate) fn static_extern_type(
    tcx: &mut TypeEvalCx<'_>,
    scope: &Rc<DefinitionScope>,
    si: SortIdx,
) -> Result<Type> {
    match si.sort {
        Sort::Func => Ok(Type::Func(scope.func(si.idx)?.static_ty(tcx, scope)?)),
        Sort::Type => scope.type_def(si.idx)?.static_ty(tcx, scope),
        Sort::Instance => Ok(Type::Instance(
            scope.instance(si.idx)?.static_ty(tcx, scope)?,
        )),
        Sort::Component => Ok(Type::Component(
            scope.component(si.idx)?.static_ty(tcx, scope)?,
        )),
        Sort::CoreModule => Ok(Type::CoreModule(
            scope.core_module(si.idx)?.static_ty(tcx, scope)?,
        )),
        other => Err(Error::validation_error(format!(
            "{other} is not a component-level sort"
        ))),
    }
}

// ---------------------------------------------------------------------------
// core func

/// Core function definitions
#[derive(Debug)]
pub enum CoreFuncDef {
    /// A named export of a core instance
    Alias {
        /// Core instance index
        instance_idx: u32,
        /// Export name
        name: String,
    },
    /// A canon-lowered component function
    Lower {
        /// Component function index
        func_idx: u32,
        /// Canonical ABI options
        opts: Vec<ast::CanonOpt>,
    },
    /// The `resource.new` builtin for a local resource type
    ResourceNew {
        /// Resource type index
        type_idx: u32,
    },
    /// The `resource.drop` builtin
    ResourceDrop {
        /// Resource type index
        type_idx: u32,
    },
    /// The `resource.rep` builtin for a local resource type
    ResourceRep {
        /// Resource type index
        type_idx: u32,
    },
}

impl CoreFuncDef {
    /// The core signature, constructed purely
    pub fn static_ty(
        &self,
        tcx: &mut TypeEvalCx<'_>,
        scope: &Rc<DefinitionScope>,
    ) -> Result<Rc<CoreFuncType>> {
        match self {
            CoreFuncDef::Alias { instance_idx, name } => {
                let instance = scope.core_instance(*instance_idx)?;
                let ty = instance.static_ty(tcx, scope)?;
                match ty.export(name) {
                    Some(CoreExternType::Func(sig)) => Ok(Rc::new(sig.clone())),
                    Some(other) => Err(Error::type_mismatch(format!(
                        "core export `{name}` is a {}, expected func",
                        other.kind()
                    ))),
                    None => Err(Error::index_out_of_range(format!(
                        "no core export named `{name}`"
                    ))),
                }
            }
            CoreFuncDef::Lower { func_idx, .. } => {
                let func = scope.func(*func_idx)?;
                let ty = func.static_ty(tcx, scope)?;
                Ok(Rc::new(
                    crate::canonical_abi::flatten_signature(&ty).core_type(),
                ))
            }
            CoreFuncDef::ResourceNew { .. } => Ok(Rc::new(canon::resource_new_signature())),
            CoreFuncDef::ResourceDrop { .. } => Ok(Rc::new(canon::resource_drop_signature())),
            CoreFuncDef::ResourceRep { .. } => Ok(Rc::new(canon::resource_rep_signature())),
        }
    }

    /// Construct the core function value
    pub fn resolve(&self, cx: &Context, scope: &Rc<InstanceScope>) -> Result<CoreFunc> {
        match self {
            CoreFuncDef::Alias { instance_idx, name } => {
                let instance = scope.resolve_core_instance(cx, *instance_idx)?;
                instance.function(name)
            }
            CoreFuncDef::Lower { func_idx, opts } => {
                canon::lower_func(cx, scope, *func_idx, opts)
            }
            CoreFuncDef::ResourceNew { type_idx } => {
                canon::resource_new_func(cx, scope, *type_idx)
            }
            CoreFuncDef::ResourceDrop { type_idx } => {
                canon::resource_drop_func(cx, scope, *type_idx)
            }
            CoreFuncDef::ResourceRep { type_idx } => {
                canon::resource_rep_func(cx, scope, *type_idx)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// core memory / table / global

macro_rules! core_extern_alias_def {
    ($def:ident, $ty:ty, $variant:ident, $kind:literal) => {
        /// Definitions of this core sort; only export aliases exist
        #[derive(Debug)]
        pub enum $def {
            /// A named export of a core instance
            Alias {
                /// Core instance index
                instance_idx: u32,
                /// Export name
                name: String,
            },
        }

        impl $def {
            /// The extern type, constructed purely
            pub fn static_ty(
                &self,
                tcx: &mut TypeEvalCx<'_>,
                scope: &Rc<DefinitionScope>,
            ) -> Result<$ty> {
                let $def::Alias { instance_idx, name } = self;
                let instance = scope.core_instance(*instance_idx)?;
                let ty = instance.static_ty(tcx, scope)?;
                match ty.export(name) {
                    Some(CoreExternType::$variant(t)) => Ok(*t),
                    Some(other) => Err(Error::type_mismatch(format!(
                        "core export `{name}` is a {}, expected {}",
                        other.kind(),
                        $kind
                    ))),
                    None => Err(Error::index_out_of_range(format!(
                        "no core export named `{name}`"
                    ))),
                }
            }

            /// Fetch the extern value from the aliased instance
            pub fn resolve(
                &self,
                cx: &Context,
                scope: &Rc<InstanceScope>,
            ) -> Result<CoreExtern> {
                let $def::Alias { instance_idx, name } = self;
                let instance = scope.resolve_core_instance(cx, *instance_idx)?;
                match instance.get(name) {
                    Some(e @ CoreExtern::$variant(_)) => Ok(e),
                    Some(other) => Err(Error::type_mismatch(format!(
                        "core export `{name}` is a {}, expected {}",
                        other.kind(),
                        $kind
                    ))),
                    None => Err(Error::index_out_of_range(format!(
                        "no core export named `{name}`"
                    ))),
                }
            }
        }
    };
}

core_extern_alias_def!(CoreMemoryDef, CoreMemoryType, Memory, "memory");
core_extern_alias_def!(CoreTableDef, CoreTableType, Table, "table");
core_extern_alias_def!(CoreGlobalDef, CoreGlobalType, Global, "global");

// ---------------------------------------------------------------------------
// core type

/// A resolved core type
#[derive(Debug, Clone)]
pub enum CoreType {
    /// A core function signature
    Func(Rc<CoreFuncType>),
    /// A core module type
    Module(Rc<ModuleType>),
}

/// Kinds of core type definition
#[derive(Debug)]
pub enum CoreTypeDefKind {
    /// A declared core type
    Declared(ast::CoreTypeExpr),
    /// A core type in an enclosing scope
    Outer {
        /// Scopes to walk
        count: u32,
        /// Core type index in the target scope
        idx: u32,
    },
}

/// A core type definition with its memoised construction
#[derive(Debug)]
pub struct CoreTypeDef {
    kind: CoreTypeDefKind,
    memo: RefCell<Option<CoreType>>,
}

impl CoreTypeDef {
    /// A declared core type
    pub fn declared(expr: ast::CoreTypeExpr) -> Self {
        Self { kind: CoreTypeDefKind::Declared(expr), memo: RefCell::new(None) }
    }

    /// An outer alias
    pub fn outer(count: u32, idx: u32) -> Self {
        Self { kind: CoreTypeDefKind::Outer { count, idx }, memo: RefCell::new(None) }
    }

    fn eval_declared(expr: &ast::CoreTypeExpr) -> Result<CoreType> {
        match expr {
            ast::CoreTypeExpr::Func(sig) => Ok(CoreType::Func(Rc::new(sig.clone()))),
            ast::CoreTypeExpr::Module(module) => {
                let mut seen_imports: Vec<(&String, &String)> = Vec::new();
                for ((m, n), _) in &module.imports {
                    if seen_imports.contains(&(m, n)) {
                        return Err(Error::duplicate_name(format!(
                            "duplicate core module import `{m}`.`{n}`"
                        )));
                    }
                    seen_imports.push((m, n));
                }
                let mut seen_exports: Vec<&String> = Vec::new();
                for (name, _) in &module.exports {
                    if seen_exports.contains(&name) {
                        return Err(Error::duplicate_name(format!(
                            "duplicate core module export `{name}`"
                        )));
                    }
                    seen_exports.push(name);
                }
                Ok(CoreType::Module(Rc::new(ModuleType {
                    imports: module.imports.clone(),
                    exports: module.exports.clone(),
                })))
            }
        }
    }

    /// The core type, constructed purely and memoised
    pub fn static_ty(&self, scope: &Rc<DefinitionScope>) -> Result<CoreType> {
        if let Some(ty) = self.memo.borrow().as_ref() {
            return Ok(ty.clone());
        }
        let ty = match &self.kind {
            CoreTypeDefKind::Declared(expr) => Self::eval_declared(expr)?,
            CoreTypeDefKind::Outer { count, idx } => {
                let target = scope.walk_outer(*count)?;
                target.core_type(*idx)?.static_ty(&target)?
            }
        };
        *self.memo.borrow_mut() = Some(ty.clone());
        Ok(ty)
    }

    /// Construct the core type for an instantiation
    pub fn resolve(&self, cx: &Context, scope: &Rc<InstanceScope>) -> Result<CoreType> {
        match &self.kind {
            CoreTypeDefKind::Declared(expr) => Self::eval_declared(expr),
            CoreTypeDefKind::Outer { count, idx } => {
                let target = scope.walk_outer(*count)?;
                target.resolve_core_type(cx, *idx)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// core module

/// Core module definitions
pub enum CoreModuleDef {
    /// A module compiled from its binary at build time
    Compiled {
        /// The engine's compiled artefact
        compiled: Rc<dyn CompiledModule>,
        /// Import/export signatures
        ty: Rc<ModuleType>,
    },
    /// A component-level core module import
    Import {
        /// Import name
        name: String,
        /// Core type index of the declared module type
        ty_idx: u32,
    },
    /// A core module in an enclosing scope
    Outer {
        /// Scopes to walk
        count: u32,
        /// Core module index in the target scope
        idx: u32,
    },
    /// A host-provided module value
    Static(CoreModuleVal),
    /// Another core module index in this scope (an export re-index)
    Ref(u32),
}

impl Debug for CoreModuleDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoreModuleDef::Compiled { ty, .. } => {
                f.debug_struct("Compiled").field("ty", ty).finish()
            }
            CoreModuleDef::Import { name, ty_idx } => f
                .debug_struct("Import")
                .field("name", name)
                .field("ty_idx", ty_idx)
                .finish(),
            CoreModuleDef::Outer { count, idx } => f
                .debug_struct("Outer")
                .field("count", count)
                .field("idx", idx)
                .finish(),
            CoreModuleDef::Static(v) => f.debug_tuple("Static").field(v).finish(),
            CoreModuleDef::Ref(i) => f.debug_tuple("Ref").field(i).finish(),
        }
    }
}

impl CoreModuleDef {
    /// The module type, constructed purely
    pub fn static_ty(
        &self,
        tcx: &mut TypeEvalCx<'_>,
        scope: &Rc<DefinitionScope>,
    ) -> Result<Rc<ModuleType>> {
        match self {
            CoreModuleDef::Compiled { ty, .. } => Ok(ty.clone()),
            CoreModuleDef::Import { ty_idx, .. } => {
                match scope.core_type(*ty_idx)?.static_ty(scope)? {
                    CoreType::Module(ty) => Ok(ty),
                    CoreType::Func(_) => Err(Error::type_mismatch(
                        "core module import needs a module type",
                    )),
                }
            }
            CoreModuleDef::Outer { count, idx } => {
                let target = scope.walk_outer(*count)?;
                target.core_module(*idx)?.static_ty(tcx, &target)
            }
            CoreModuleDef::Static(v) => Ok(v.ty.clone()),
            CoreModuleDef::Ref(idx) => scope.core_module(*idx)?.static_ty(tcx, scope),
        }
    }

    /// Construct the module value
    pub fn resolve(&self, cx: &Context, scope: &Rc<InstanceScope>) -> Result<CoreModuleVal> {
        match self {
            CoreModuleDef::Compiled { compiled, ty } => {
                Ok(CoreModuleVal { compiled: compiled.clone(), ty: ty.clone() })
            }
            CoreModuleDef::Import { name, ty_idx } => {
                let declared = match scope.defs().core_type(*ty_idx)?.static_ty(scope.defs())? {
                    CoreType::Module(ty) => ty,
                    CoreType::Func(_) => {
                        return Err(Error::type_mismatch(
                            "core module import needs a module type",
                        ));
                    }
                };
                match scope.argument(name) {
                    Some(ComponentExtern::CoreModule(module)) => {
                        TypeChecker::new().check(
                            &Type::CoreModule(declared),
                            &Type::CoreModule(module.ty.clone()),
                        )?;
                        Ok(module)
                    }
                    Some(other) => Err(Error::type_mismatch(format!(
                        "argument `{name}` is a {}, expected a core module",
                        other.kind()
                    ))),
                    None => Err(Error::missing_argument(format!(
                        "no argument named `{name}`"
                    ))),
                }
            }
            CoreModuleDef::Outer { count, idx } => {
                let target = scope.walk_outer(*count)?;
                target.resolve_core_module(cx, *idx)
            }
            CoreModuleDef::Static(v) => Ok(v.clone()),
            CoreModuleDef::Ref(idx) => scope.resolve_core_module(cx, *idx),
        }
    }
}

// ---------------------------------------------------------------------------
// core instance

/// Core instance definitions
#[derive(Debug)]
pub enum CoreInstanceDef {
    /// Instantiate a core module through the engine
    Instantiate {
        /// Core module index
        module_idx: u32,
        /// Named arguments, each a core instance
        args: Vec<ast::CoreInstantiateArg>,
    },
    /// Synthesise an instance re-exporting existing core items
    InlineExports(Vec<ast::CoreInlineExport>),
}

impl CoreInstanceDef {
    /// The instance type, constructed purely
    pub fn static_ty(
        &self,
        tcx: &mut TypeEvalCx<'_>,
        scope: &Rc<DefinitionScope>,
    ) -> Result<Rc<CoreInstanceType>> {
        match self {
            CoreInstanceDef::Instantiate { module_idx, .. } => {
                let ty = scope.core_module(*module_idx)?.static_ty(tcx, scope)?;
                Ok(Rc::new(CoreInstanceType { exports: ty.exports.clone() }))
            }
            CoreInstanceDef::InlineExports(items) => {
                let mut exports = Vec::with_capacity(items.len());
                for item in items {
                    let ty = match item.sort {
                        Sort::CoreFunc => CoreExternType::Func(
                            (*scope.core_func(item.idx)?.static_ty(tcx, scope)?).clone(),
                        ),
                        Sort::CoreMemory => CoreExternType::Memory(
                            scope.core_memory(item.idx)?.static_ty(tcx, scope)?,
                        ),
                        Sort::CoreTable => CoreExternType::Table(
                            scope.core_table(item.idx)?.static_ty(tcx, scope)?,
                        ),
                        Sort::CoreGlobal => CoreExternType::Global(
                            scope.core_global(item.idx)?.static_ty(tcx, scope)?,
                        ),
                        other => {
                            return Err(Error::validation_error(format!(
                                "{other} cannot be exported by a core instance"
                            )));
                        }
                    };
                    exports.push((item.name.clone(), ty));
                }
                Ok(Rc::new(CoreInstanceType { exports }))
            }
        }
    }

    /// Construct the core instance, instantiating through the engine
    pub fn resolve(&self, cx: &Context, scope: &Rc<InstanceScope>) -> Result<CoreInstanceVal> {
        match self {
            CoreInstanceDef::Instantiate { module_idx, args } => {
                cx.check_cancelled()?;
                let module = scope.resolve_core_module(cx, *module_idx)?;
                let mut resolved: BTreeMap<String, CoreInstanceVal> = BTreeMap::new();
                for arg in args {
                    let value = scope.resolve_core_instance(cx, arg.instance_idx)?;
                    if resolved.insert(arg.name.clone(), value).is_some() {
                        return Err(Error::duplicate_name(format!(
                            "duplicate instantiation argument `{}`",
                            arg.name
                        )));
                    }
                }
                for ((import_module, import_name), expected) in &module.ty.imports {
                    let supplier = resolved.get(import_module).ok_or_else(|| {
                        Error::missing_argument(format!(
                            "no argument satisfies core import `{import_module}`"
                        ))
                    })?;
                    let actual = supplier.get(import_name).ok_or_else(|| {
                        Error::missing_argument(format!(
                            "argument `{import_module}` lacks export `{import_name}`"
                        ))
                    })?;
                    core_extern_compatible(expected, &actual.extern_type())?;
                }
                let handle = cx.engine().instantiate(
                    &module.compiled,
                    "core-instance",
                    &mut |name: &str| resolved.get(name).cloned(),
                )?;
                Ok(CoreInstanceVal::from_module(handle))
            }
            CoreInstanceDef::InlineExports(items) => {
                let mut exports = Vec::with_capacity(items.len());
                for item in items {
                    let value = match item.sort {
                        Sort::CoreFunc => {
                            CoreExtern::Func(scope.resolve_core_func(cx, item.idx)?)
                        }
                        Sort::CoreMemory => scope.resolve_core_memory(cx, item.idx)?,
                        Sort::CoreTable => scope.resolve_core_table(cx, item.idx)?,
                        Sort::CoreGlobal => scope.resolve_core_global(cx, item.idx)?,
                        other => {
                            return Err(Error::validation_error(format!(
                                "{other} cannot be exported by a core instance"
                            )));
                        }
                    };
                    exports.push((item.name.clone(), value));
                }
                Ok(CoreInstanceVal::from_exports(exports))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// func

/// Component function definitions
pub enum FuncDef {
    /// A canon-lifted core function
    Lift {
        /// Core function index
        core_func_idx: u32,
        /// Component function type index
        type_idx: u32,
        /// Canonical ABI options
        opts: Vec<ast::CanonOpt>,
    },
    /// A named export of an instance
    Alias {
        /// Instance index
        instance_idx: u32,
        /// Export name
        name: String,
    },
    /// A component-level function import
    Import {
        /// Import name
        name: String,
        /// Type index of the declared function type
        ty_idx: u32,
    },
    /// A host-provided function
    Static(ComponentFunc),
    /// Another function index in this scope (an export re-index)
    Ref(u32),
}

impl Debug for FuncDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FuncDef::Lift { core_func_idx, type_idx, .. } => f
                .debug_struct("Lift")
                .field("core_func_idx", core_func_idx)
                .field("type_idx", type_idx)
                .finish(),
            FuncDef::Alias { instance_idx, name } => f
                .debug_struct("Alias")
                .field("instance_idx", instance_idx)
                .field("name", name)
                .finish(),
            FuncDef::Import { name, ty_idx } => f
                .debug_struct("Import")
                .field("name", name)
                .field("ty_idx", ty_idx)
                .finish(),
            FuncDef::Static(func) => f.debug_tuple("Static").field(func).finish(),
            FuncDef::Ref(idx) => f.debug_tuple("Ref").field(idx).finish(),
        }
    }
}

impl FuncDef {
    /// The function type, constructed purely
    pub fn static_ty(
        &self,
        tcx: &mut TypeEvalCx<'_>,
        scope: &Rc<DefinitionScope>,
    ) -> Result<Rc<FuncType>> {
        let expect_func = |ty: Type| match ty {
            Type::Func(f) => Ok(f),
            other => Err(Error::type_mismatch(format!(
                "expected a function type, got {}",
                other.type_name()
            ))),
        };
        match self {
            FuncDef::Lift { type_idx, .. } => {
                expect_func(scope.type_def(*type_idx)?.static_ty(tcx, scope)?)
            }
            FuncDef::Alias { instance_idx, name } => {
                let ty = scope.instance(*instance_idx)?.static_ty(tcx, scope)?;
                match ty.export(name) {
                    Some(export_ty) => expect_func(export_ty.clone()),
                    None => Err(Error::index_out_of_range(format!(
                        "instance has no export named `{name}`"
                    ))),
                }
            }
            FuncDef::Import { ty_idx, .. } => {
                expect_func(scope.type_def(*ty_idx)?.static_ty(tcx, scope)?)
            }
            FuncDef::Static(func) => Ok(func.func_type().clone()),
            FuncDef::Ref(idx) => scope.func(*idx)?.static_ty(tcx, scope),
        }
    }

    /// Construct the function value
    pub fn resolve(&self, cx: &Context, scope: &Rc<InstanceScope>) -> Result<ComponentFunc> {
        match self {
            FuncDef::Lift { core_func_idx, type_idx, opts } => {
                canon::lift_func(cx, scope, *core_func_idx, *type_idx, opts)
            }
            FuncDef::Alias { instance_idx, name } => {
                let instance = scope.resolve_instance(cx, *instance_idx)?;
                match instance.export(name) {
                    Some(ComponentExtern::Func(func)) => Ok(func),
                    Some(other) => Err(Error::type_mismatch(format!(
                        "export `{name}` is a {}, expected a function",
                        other.kind()
                    ))),
                    None => Err(Error::index_out_of_range(format!(
                        "instance has no export named `{name}`"
                    ))),
                }
            }
            FuncDef::Import { name, ty_idx } => {
                let declared = match scope.resolve_type(cx, *ty_idx)? {
                    Type::Func(f) => f,
                    other => {
                        return Err(Error::type_mismatch(format!(
                            "function import declared as {}",
                            other.type_name()
                        )));
                    }
                };
                match scope.argument(name) {
                    Some(ComponentExtern::Func(func)) => {
                        TypeChecker::new().check(
                            &Type::Func(declared),
                            &Type::Func(func.func_type().clone()),
                        )?;
                        Ok(func)
                    }
                    Some(other) => Err(Error::type_mismatch(format!(
                        "argument `{name}` is a {}, expected a function",
                        other.kind()
                    ))),
                    None => Err(Error::missing_argument(format!(
                        "no argument named `{name}`"
                    ))),
                }
            }
            FuncDef::Static(func) => Ok(func.clone()),
            FuncDef::Ref(idx) => scope.resolve_func(cx, *idx),
        }
    }
}

// ---------------------------------------------------------------------------
// type

/// Kinds of component-level type definition
#[derive(Debug)]
pub enum TypeDefKind {
    /// A declared type expression
    Declared(ast::TypeExpr),
    /// A component-level type import
    Import {
        /// Import name
        name: String,
        /// Declared bound
        bound: ast::TypeBound,
    },
    /// A named type export of an instance
    AliasExport {
        /// Instance index
        instance_idx: u32,
        /// Export name
        name: String,
    },
    /// A type in an enclosing scope
    AliasOuter {
        /// Scopes to walk
        count: u32,
        /// Type index in the target scope
        idx: u32,
    },
    /// A concrete type value
    Static(Type),
    /// Another type index in this scope (an export re-index)
    Ref(u32),
}

/// A component-level type definition with its memoised static construction
#[derive(Debug)]
pub struct TypeDef {
    kind: TypeDefKind,
    static_memo: RefCell<Option<Type>>,
}

impl TypeDef {
    /// A declared type expression
    pub fn declared(expr: ast::TypeExpr) -> Self {
        Self::from_kind(TypeDefKind::Declared(expr))
    }

    /// A type import
    pub fn import(name: String, bound: ast::TypeBound) -> Self {
        Self::from_kind(TypeDefKind::Import { name, bound })
    }

    /// An instance type-export alias
    pub fn alias_export(instance_idx: u32, name: String) -> Self {
        Self::from_kind(TypeDefKind::AliasExport { instance_idx, name })
    }

    /// An outer alias
    pub fn alias_outer(count: u32, idx: u32) -> Self {
        Self::from_kind(TypeDefKind::AliasOuter { count, idx })
    }

    /// A concrete type value
    pub fn from_static(ty: Type) -> Self {
        Self::from_kind(TypeDefKind::Static(ty))
    }

    /// A re-index of an existing type definition
    pub fn reference(idx: u32) -> Self {
        Self::from_kind(TypeDefKind::Ref(idx))
    }

    fn from_kind(kind: TypeDefKind) -> Self {
        Self { kind, static_memo: RefCell::new(None) }
    }

    /// The definition's kind
    pub fn kind(&self) -> &TypeDefKind {
        &self.kind
    }

    /// The type, constructed purely with placeholder resources and memoised
    pub fn static_ty(
        &self,
        tcx: &mut TypeEvalCx<'_>,
        scope: &Rc<DefinitionScope>,
    ) -> Result<Type> {
        if let Some(ty) = self.static_memo.borrow().as_ref() {
            return Ok(ty.clone());
        }
        tcx.descend()?;
        let outcome = self.static_ty_uncached(tcx, scope);
        tcx.ascend();
        let ty = outcome?;
        *self.static_memo.borrow_mut() = Some(ty.clone());
        Ok(ty)
    }

    fn static_ty_uncached(
        &self,
        tcx: &mut TypeEvalCx<'_>,
        scope: &Rc<DefinitionScope>,
    ) -> Result<Type> {
        match &self.kind {
            TypeDefKind::Declared(expr) => {
                type_eval::eval_type_expr(tcx, &TypeEnv::Defs(scope.clone()), expr)
            }
            TypeDefKind::Import { bound, .. } => match bound {
                ast::TypeBound::Eq(idx) => scope.type_def(*idx)?.static_ty(tcx, scope),
                ast::TypeBound::SubResource => {
                    Ok(Type::Resource(crate::types::ResourceType::bound_marker()))
                }
            },
            TypeDefKind::AliasExport { instance_idx, name } => {
                let ty = scope.instance(*instance_idx)?.static_ty(tcx, scope)?;
                ty.export(name).cloned().ok_or_else(|| {
                    Error::index_out_of_range(format!(
                        "instance type has no export named `{name}`"
                    ))
                })
            }
            TypeDefKind::AliasOuter { count, idx } => {
                type_eval::outer_type(tcx, &TypeEnv::Defs(scope.clone()), *count, *idx)
            }
            TypeDefKind::Static(ty) => Ok(ty.clone()),
            TypeDefKind::Ref(idx) => scope.type_def(*idx)?.static_ty(tcx, scope),
        }
    }

    /// Construct the type for an instantiation, with concrete resources
    pub fn resolve_runtime(
        &self,
        tcx: &mut TypeEvalCx<'_>,
        scope: &Rc<InstanceScope>,
    ) -> Result<Type> {
        match &self.kind {
            TypeDefKind::Declared(expr) => {
                type_eval::eval_type_expr(tcx, &TypeEnv::Inst(scope.clone()), expr)
            }
            TypeDefKind::Import { name, bound } => match scope.argument(name) {
                Some(ComponentExtern::Type(ty)) => {
                    match bound {
                        ast::TypeBound::Eq(idx) => {
                            let declared = scope.resolve_type_rec(tcx, *idx)?;
                            TypeChecker::new().check(&declared, &ty)?;
                        }
                        ast::TypeBound::SubResource => {
                            if !matches!(ty, Type::Resource(_)) {
                                return Err(Error::type_mismatch(format!(
                                    "argument `{name}` must be a resource type"
                                )));
                            }
                        }
                    }
                    Ok(ty)
                }
                Some(other) => Err(Error::type_mismatch(format!(
                    "argument `{name}` is a {}, expected a type",
                    other.kind()
                ))),
                None => match bound {
                    // A static type needs no supplied argument
                    ast::TypeBound::Eq(idx) => {
                        let declared = scope.resolve_type_rec(tcx, *idx)?;
                        if declared.contains_resource() {
                            Err(Error::missing_argument(format!(
                                "no argument named `{name}`"
                            )))
                        } else {
                            Ok(declared)
                        }
                    }
                    ast::TypeBound::SubResource => Err(Error::missing_argument(format!(
                        "no argument named `{name}`"
                    ))),
                },
            },
            TypeDefKind::AliasExport { instance_idx, name } => {
                let ctx = tcx.ctx().ok_or_else(|| {
                    Error::validation_error("type alias resolution needs a call context")
                })?;
                let instance = scope.resolve_instance(ctx, *instance_idx)?;
                match instance.export(name) {
                    Some(ComponentExtern::Type(ty)) => Ok(ty),
                    Some(other) => Err(Error::type_mismatch(format!(
                        "export `{name}` is a {}, expected a type",
                        other.kind()
                    ))),
                    None => match instance.export_spec(name) {
                        Some(spec) => Ok(spec.ty),
                        None => Err(Error::index_out_of_range(format!(
                            "instance has no export named `{name}`"
                        ))),
                    },
                }
            }
            TypeDefKind::AliasOuter { count, idx } => {
                let target = scope.walk_outer(*count)?;
                let ty = target.resolve_type_rec(tcx, *idx)?;
                if *count >= 1 && ty.contains_resource() {
                    return Err(Error::alias_resource_escape(
                        "alias refers to resources not defined in the current component",
                    ));
                }
                Ok(ty)
            }
            TypeDefKind::Static(ty) => Ok(ty.clone()),
            TypeDefKind::Ref(idx) => scope.resolve_type_rec(tcx, *idx),
        }
    }
}

// ---------------------------------------------------------------------------
// component

/// Component definitions
pub enum ComponentDef {
    /// A nested component built from its declarations
    Nested(Rc<Component>),
    /// A component-level component import
    Import {
        /// Import name
        name: String,
        /// Type index of the declared component type
        ty_idx: u32,
    },
    /// A named component export of an instance
    AliasExport {
        /// Instance index
        instance_idx: u32,
        /// Export name
        name: String,
    },
    /// A component in an enclosing scope
    Outer {
        /// Scopes to walk
        count: u32,
        /// Component index in the target scope
        idx: u32,
    },
    /// A host-provided component value
    Static(ComponentVal),
    /// Another component index in this scope (an export re-index)
    Ref(u32),
}

impl Debug for ComponentDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComponentDef::Nested(c) => f.debug_tuple("Nested").field(&c.id()).finish(),
            ComponentDef::Import { name, ty_idx } => f
                .debug_struct("Import")
                .field("name", name)
                .field("ty_idx", ty_idx)
                .finish(),
            ComponentDef::AliasExport { instance_idx, name } => f
                .debug_struct("AliasExport")
                .field("instance_idx", instance_idx)
                .field("name", name)
                .finish(),
            ComponentDef::Outer { count, idx } => f
                .debug_struct("Outer")
                .field("count", count)
                .field("idx", idx)
                .finish(),
            ComponentDef::Static(_) => f.write_str("Static"),
            ComponentDef::Ref(idx) => f.debug_tuple("Ref").field(idx).finish(),
        }
    }
}

impl ComponentDef {
    /// The component type, constructed purely
    pub fn static_ty(
        &self,
        tcx: &mut TypeEvalCx<'_>,
        scope: &Rc<DefinitionScope>,
    ) -> Result<Rc<ComponentType>> {
        match self {
            ComponentDef::Nested(component) => component.component_type(),
            ComponentDef::Import { ty_idx, .. } => {
                match scope.type_def(*ty_idx)?.static_ty(tcx, scope)? {
                    Type::Component(ty) => Ok(ty),
                    other => Err(Error::type_mismatch(format!(
                        "component import declared as {}",
                        other.type_name()
                    ))),
                }
            }
            ComponentDef::AliasExport { instance_idx, name } => {
                let ty = scope.instance(*instance_idx)?.static_ty(tcx, scope)?;
                match ty.export(name) {
                    Some(Type::Component(ty)) => Ok(ty.clone()),
                    Some(other) => Err(Error::type_mismatch(format!(
                        "export `{name}` is a {}, expected a component",
                        other.type_name()
                    ))),
                    None => Err(Error::index_out_of_range(format!(
                        "instance type has no export named `{name}`"
                    ))),
                }
            }
            ComponentDef::Outer { count, idx } => {
                let target = scope.walk_outer(*count)?;
                target.component(*idx)?.static_ty(tcx, &target)
            }
            ComponentDef::Static(val) => val.component.component_type(),
            ComponentDef::Ref(idx) => scope.component(*idx)?.static_ty(tcx, scope),
        }
    }

    /// Construct the component value, closing over the defining scope
    pub fn resolve(&self, cx: &Context, scope: &Rc<InstanceScope>) -> Result<ComponentVal> {
        match self {
            ComponentDef::Nested(component) => Ok(ComponentVal {
                component: component.clone(),
                env: Some(scope.clone()),
            }),
            ComponentDef::AliasExport { instance_idx, name } => {
                let instance = scope.resolve_instance(cx, *instance_idx)?;
                match instance.export(name) {
                    Some(ComponentExtern::Component(val)) => Ok(val),
                    Some(other) => Err(Error::type_mismatch(format!(
                        "export `{name}` is a {}, expected a component",
                        other.kind()
                    ))),
                    None => Err(Error::index_out_of_range(format!(
                        "instance has no export named `{name}`"
                    ))),
                }
            }
            ComponentDef::Import { name, ty_idx } => {
                let declared = match scope.resolve_type(cx, *ty_idx)? {
                    Type::Component(ty) => ty,
                    other => {
                        return Err(Error::type_mismatch(format!(
                            "component import declared as {}",
                            other.type_name()
                        )));
                    }
                };
                match scope.argument(name) {
                    Some(ComponentExtern::Component(val)) => {
                        TypeChecker::new().check(
                            &Type::Component(declared),
                            &Type::Component(val.component.component_type()?),
                        )?;
                        Ok(val)
                    }
                    Some(other) => Err(Error::type_mismatch(format!(
                        "argument `{name}` is a {}, expected a component",
                        other.kind()
                    ))),
                    None => Err(Error::missing_argument(format!(
                        "no argument named `{name}`"
                    ))),
                }
            }
            ComponentDef::Outer { count, idx } => {
                let target = scope.walk_outer(*count)?;
                target.resolve_component(cx, *idx)
            }
            ComponentDef::Static(val) => Ok(val.clone()),
            ComponentDef::Ref(idx) => scope.resolve_component(cx, *idx),
        }
    }
}

// ---------------------------------------------------------------------------
// instance

/// Component instance definitions
#[derive(Debug)]
pub enum InstanceDef {
    /// Instantiate a component with named arguments
    Instantiate {
        /// Component index
        component_idx: u32,
        /// Named arguments drawn from this scope
        args: Vec<ast::InstantiateArg>,
    },
    /// Synthesise an instance exporting existing definitions
    InlineExports(Vec<ast::InlineExport>),
    /// A component-level instance import
    Import {
        /// Import name
        name: String,
        /// Type index of the declared instance type
        ty_idx: u32,
    },
    /// A named instance export of another instance
    AliasExport {
        /// Instance index
        instance_idx: u32,
        /// Export name
        name: String,
    },
    /// A host-provided instance
    Static(Rc<Instance>),
    /// Another instance index in this scope (an export re-index)
    Ref(u32),
}

impl InstanceDef {
    /// The instance type, constructed purely
    pub fn static_ty(
        &self,
        tcx: &mut TypeEvalCx<'_>,
        scope: &Rc<DefinitionScope>,
    ) -> Result<Rc<InstanceType>> {
        match self {
            InstanceDef::Instantiate { component_idx, .. } => {
                let ty = scope.component(*component_idx)?.static_ty(tcx, scope)?;
                InstanceType::new(ty.exports.clone())
            }
            InstanceDef::InlineExports(items) => {
                let mut exports = Vec::with_capacity(items.len());
                for item in items {
                    let ty = match item.sort {
                        Sort::Func => {
                            Type::Func(scope.func(item.idx)?.static_ty(tcx, scope)?)
                        }
                        Sort::Type => scope.type_def(item.idx)?.static_ty(tcx, scope)?,
                        Sort::Instance => {
                            Type::Instance(scope.instance(item.idx)?.static_ty(tcx, scope)?)
                        }
                        Sort::Component => Type::Component(
                            scope.component(item.idx)?.static_ty(tcx, scope)?,
                        ),
                        Sort::CoreModule => Type::CoreModule(
                            scope.core_module(item.idx)?.static_ty(tcx, scope)?,
                        ),
                        other => {
                            return Err(Error::validation_error(format!(
                                "{other} cannot be exported by an instance"
                            )));
                        }
                    };
                    exports.push((item.name.clone(), ty));
                }
                InstanceType::new(exports)
            }
            InstanceDef::Import { ty_idx, .. } => {
                match scope.type_def(*ty_idx)?.static_ty(tcx, scope)? {
                    Type::Instance(ty) => Ok(ty),
                    other => Err(Error::type_mismatch(format!(
                        "instance import declared as {}",
                        other.type_name()
                    ))),
                }
            }
            InstanceDef::AliasExport { instance_idx, name } => {
                let ty = scope.instance(*instance_idx)?.static_ty(tcx, scope)?;
                match ty.export(name) {
                    Some(Type::Instance(ty)) => Ok(ty.clone()),
                    Some(other) => Err(Error::type_mismatch(format!(
                        "export `{name}` is a {}, expected an instance",
                        other.type_name()
                    ))),
                    None => Err(Error::index_out_of_range(format!(
                        "instance type has no export named `{name}`"
                    ))),
                }
            }
            InstanceDef::Static(instance) => instance.instance_type(),
            InstanceDef::Ref(idx) => scope.instance(*idx)?.static_ty(tcx, scope),
        }
    }

    /// Construct the instance value
    pub fn resolve(&self, cx: &Context, scope: &Rc<InstanceScope>) -> Result<Rc<Instance>> {
        match self {
            InstanceDef::Instantiate { component_idx, args } => {
                let component = scope.resolve_component(cx, *component_idx)?;
                let mut resolved = BTreeMap::new();
                for arg in args {
                    let value =
                        scope.resolve_extern(cx, SortIdx::new(arg.sort, arg.idx))?;
                    if resolved.insert(arg.name.clone(), value).is_some() {
                        return Err(Error::duplicate_name(format!(
                            "duplicate instantiation argument `{}`",
                            arg.name
                        )));
                    }
                }
                component
                    .component
                    .instantiate_with_env(cx, component.env.clone(), resolved)
            }
            InstanceDef::InlineExports(items) => {
                let instance = Instance::new(cx);
                for item in items {
                    let value =
                        scope.resolve_extern(cx, SortIdx::new(item.sort, item.idx))?;
                    let ty = value.extern_type()?;
                    instance.add_export(&item.name, value, ExportSpec { sort: item.sort, ty })?;
                }
                Ok(instance)
            }
            InstanceDef::Import { name, ty_idx } => {
                let expected = match scope.resolve_type(cx, *ty_idx)? {
                    Type::Instance(ty) => ty,
                    other => {
                        return Err(Error::type_mismatch(format!(
                            "instance import declared as {}",
                            other.type_name()
                        )));
                    }
                };
                match scope.argument(name) {
                    Some(ComponentExtern::Instance(instance)) => {
                        let actual = instance.instance_type()?;
                        TypeChecker::new().check(
                            &Type::Instance(expected.clone()),
                            &Type::Instance(actual),
                        )?;
                        // Statically-known type exports the argument lacks are
                        // synthesised as-is
                        for (export_name, export_ty) in &expected.exports {
                            if instance.export(export_name).is_none()
                                && export_ty.statically_known()
                            {
                                instance.add_export(
                                    export_name,
                                    ComponentExtern::Type(export_ty.clone()),
                                    ExportSpec { sort: Sort::Type, ty: export_ty.clone() },
                                )?;
                            }
                        }
                        Ok(instance)
                    }
                    Some(other) => Err(Error::type_mismatch(format!(
                        "argument `{name}` is a {}, expected an instance",
                        other.kind()
                    ))),
                    None => {
                        // An instance type whose every export is statically
                        // known is synthesised as an empty instance carrying
                        // the expected types verbatim
                        if !expected
                            .exports
                            .iter()
                            .all(|(_, ty)| ty.statically_known())
                        {
                            return Err(Error::missing_argument(format!(
                                "no argument named `{name}`"
                            )));
                        }
                        let instance = Instance::new(cx);
                        for (export_name, export_ty) in &expected.exports {
                            instance.add_export(
                                export_name,
                                ComponentExtern::Type(export_ty.clone()),
                                ExportSpec { sort: Sort::Type, ty: export_ty.clone() },
                            )?;
                        }
                        Ok(instance)
                    }
                }
            }
            InstanceDef::AliasExport { instance_idx, name } => {
                let instance = scope.resolve_instance(cx, *instance_idx)?;
                match instance.export(name) {
                    Some(ComponentExtern::Instance(inner)) => Ok(inner),
                    Some(other) => Err(Error::type_mismatch(format!(
                        "export `{name}` is a {}, expected an instance",
                        other.kind()
                    ))),
                    None => Err(Error::index_out_of_range(format!(
                        "instance has no export named `{name}`"
                    ))),
                }
            }
            InstanceDef::Static(instance) => Ok(instance.clone()),
            InstanceDef::Ref(idx) => scope.resolve_instance(cx, *idx),
        }
    }
}
