//! Type expression evaluation.
//!
//! Type expressions are evaluated against an environment chain: the
//! component's definition scope (static, build-time), an instance scope
//! (runtime, concrete resource identities), or a local scope opened for a
//! component/instance type expression. Static evaluation represents every
//! resource as a bound marker; runtime evaluation creates fresh concrete
//! identities owned by the instance under construction.

use super::scope::{DefinitionScope, InstanceScope};
use crate::ast::{
    AliasDecl, AliasTarget, ComponentTypeDecl, DefValTypeExpr, ExternDesc, FuncTypeExpr,
    InstanceTypeDecl, PrimValType, TypeBound, TypeExpr, ValTypeRef,
};
use crate::context::Context;
use crate::prelude::*;
use crate::types::{
    ComponentType, EnumType, FlagsType, FuncType, InstanceType, RecordType, RepKind,
    ResourceDtor, ResourceType, ResultType, TupleType, Type, ValType, VariantType,
};

/// Limit on the type-resolution recursion depth
pub const MAX_TYPE_RECURSION_DEPTH: u32 = 100;

/// State of one type-evaluation pass
pub struct TypeEvalCx<'a> {
    ctx: Option<&'a Context>,
    depth: u32,
}

impl<'a> TypeEvalCx<'a> {
    /// Static evaluation: no engine, resources become bound markers
    pub fn new_static() -> Self {
        Self { ctx: None, depth: 0 }
    }

    /// Runtime evaluation: fresh resource identities, engine reachable
    pub fn new_runtime(ctx: &'a Context) -> Self {
        Self { ctx: Some(ctx), depth: 0 }
    }

    /// The call context in runtime mode
    pub fn ctx(&self) -> Option<&'a Context> {
        self.ctx
    }

    pub(crate) fn descend(&mut self) -> Result<()> {
        self.depth += 1;
        if self.depth > MAX_TYPE_RECURSION_DEPTH {
            return Err(Error::recursion_depth_exceeded(format!(
                "type resolution exceeded {MAX_TYPE_RECURSION_DEPTH} levels"
            )));
        }
        Ok(())
    }

    pub(crate) fn ascend(&mut self) {
        self.depth -= 1;
    }
}

/// A scope opened for the body of a component or instance type expression
pub struct LocalTypeScope {
    parent: TypeEnv,
    types: RefCell<Vec<Type>>,
}

impl LocalTypeScope {
    /// Open a local scope under `parent`
    pub fn new(parent: TypeEnv) -> Rc<Self> {
        Rc::new(Self { parent, types: RefCell::new(Vec::new()) })
    }

    /// Append a local type, returning its index
    pub fn push_type(&self, ty: Type) -> u32 {
        let mut types = self.types.borrow_mut();
        types.push(ty);
        (types.len() - 1) as u32
    }

    /// The local type at `idx`
    pub fn type_at(&self, idx: u32) -> Result<Type> {
        self.types
            .borrow()
            .get(idx as usize)
            .cloned()
            .ok_or_else(|| {
                Error::index_out_of_range(format!("type index {idx} out of range"))
            })
    }
}

/// An environment against which type indices resolve
#[derive(Clone)]
pub enum TypeEnv {
    /// A component's definition scope (static evaluation)
    Defs(Rc<DefinitionScope>),
    /// A per-instantiation scope (runtime evaluation)
    Inst(Rc<InstanceScope>),
    /// The body of a component or instance type expression
    Local(Rc<LocalTypeScope>),
}

impl TypeEnv {
    /// Resolve a type index in this environment
    pub fn lookup_type(&self, tcx: &mut TypeEvalCx<'_>, idx: u32) -> Result<Type> {
        match self {
            TypeEnv::Defs(scope) => {
                let def = scope.type_def(idx)?;
                def.static_ty(tcx, scope)
            }
            TypeEnv::Inst(scope) => scope.resolve_type_rec(tcx, idx),
            TypeEnv::Local(local) => local.type_at(idx),
        }
    }

    /// Resolve a core type index in this environment
    pub fn lookup_core_type(
        &self,
        tcx: &mut TypeEvalCx<'_>,
        idx: u32,
    ) -> Result<super::defs::CoreType> {
        match self {
            TypeEnv::Defs(scope) => {
                let def = scope.core_type(idx)?;
                def.static_ty(scope)
            }
            TypeEnv::Inst(scope) => {
                let ctx = tcx.ctx().ok_or_else(|| {
                    Error::validation_error("core type lookup needs a call context")
                })?;
                scope.resolve_core_type(ctx, idx)
            }
            TypeEnv::Local(local) => local.parent.lookup_core_type(tcx, idx),
        }
    }

    /// Walk one enclosing scope
    pub fn outer(&self) -> Result<TypeEnv> {
        match self {
            TypeEnv::Defs(scope) => scope
                .parent()
                .cloned()
                .map(TypeEnv::Defs)
                .ok_or_else(|| {
                    Error::scope_depth_exceeded("outer count exceeds the scope chain")
                }),
            TypeEnv::Inst(scope) => scope
                .parent()
                .cloned()
                .map(TypeEnv::Inst)
                .ok_or_else(|| {
                    Error::scope_depth_exceeded("outer count exceeds the scope chain")
                }),
            TypeEnv::Local(local) => Ok(local.parent.clone()),
        }
    }

    /// The instance under construction, reachable in runtime evaluation
    fn current_instance(&self) -> Option<Rc<crate::instance::Instance>> {
        match self {
            TypeEnv::Defs(_) => None,
            TypeEnv::Inst(scope) => Some(scope.current().clone()),
            TypeEnv::Local(local) => local.parent.current_instance(),
        }
    }

    /// The instance scope backing this environment, if any
    fn instance_scope(&self) -> Option<Rc<InstanceScope>> {
        match self {
            TypeEnv::Defs(_) => None,
            TypeEnv::Inst(scope) => Some(scope.clone()),
            TypeEnv::Local(local) => local.parent.instance_scope(),
        }
    }
}

/// Resolve an outer type alias, refusing to expose resources across a
/// component boundary
pub fn outer_type(
    tcx: &mut TypeEvalCx<'_>,
    env: &TypeEnv,
    count: u32,
    idx: u32,
) -> Result<Type> {
    let mut target = env.clone();
    for _ in 0..count {
        target = target.outer()?;
    }
    let ty = target.lookup_type(tcx, idx)?;
    if count >= 1 && ty.contains_resource() {
        return Err(Error::alias_resource_escape(
            "alias refers to resources not defined in the current component",
        ));
    }
    Ok(ty)
}

/// Evaluate a type expression
pub fn eval_type_expr(
    tcx: &mut TypeEvalCx<'_>,
    env: &TypeEnv,
    expr: &TypeExpr,
) -> Result<Type> {
    match expr {
        TypeExpr::Defined(defval) => Ok(Type::Val(eval_defval(tcx, env, defval)?)),
        TypeExpr::Func(func) => Ok(Type::Func(eval_functype(tcx, env, func)?)),
        TypeExpr::Component(decls) => {
            Ok(Type::Component(eval_component_type(tcx, env, decls)?))
        }
        TypeExpr::Instance(decls) => {
            Ok(Type::Instance(eval_instance_type(tcx, env, decls)?))
        }
        TypeExpr::Resource { dtor } => {
            if tcx.ctx().is_some() {
                let resource = ResourceType::fresh(RepKind::U32);
                if let Some(instance) = env.current_instance() {
                    resource.set_owner(&instance);
                }
                if let Some(dtor_idx) = dtor {
                    let scope = env.instance_scope().ok_or_else(|| {
                        Error::validation_error(
                            "resource destructor is only valid at component level",
                        )
                    })?;
                    let ctx = tcx.ctx().ok_or_else(|| {
                        Error::validation_error("resource destructor needs a call context")
                    })?;
                    let func = scope.resolve_core_func(ctx, *dtor_idx)?;
                    let expected =
                        CoreFuncType::new(&[CoreValType::I32], &[]);
                    if *func.func_type() != expected {
                        return Err(Error::validation_error(format!(
                            "resource destructor must have signature (i32) -> (), got {}",
                            func.func_type()
                        )));
                    }
                    resource.set_dtor(ResourceDtor::Core(func));
                }
                Ok(Type::Resource(resource))
            } else {
                Ok(Type::Resource(ResourceType::bound_marker()))
            }
        }
    }
}

fn prim_valtype(prim: PrimValType) -> ValType {
    match prim {
        PrimValType::Bool => ValType::Bool,
        PrimValType::S8 => ValType::S8,
        PrimValType::U8 => ValType::U8,
        PrimValType::S16 => ValType::S16,
        PrimValType::U16 => ValType::U16,
        PrimValType::S32 => ValType::S32,
        PrimValType::U32 => ValType::U32,
        PrimValType::S64 => ValType::S64,
        PrimValType::U64 => ValType::U64,
        PrimValType::F32 => ValType::F32,
        PrimValType::F64 => ValType::F64,
        PrimValType::Char => ValType::Char,
        PrimValType::String => ValType::String,
    }
}

/// Evaluate a value-type reference
pub fn eval_valtype_ref(
    tcx: &mut TypeEvalCx<'_>,
    env: &TypeEnv,
    r: &ValTypeRef,
) -> Result<ValType> {
    match r {
        ValTypeRef::Prim(prim) => Ok(prim_valtype(*prim)),
        ValTypeRef::Idx(idx) => {
            tcx.descend()?;
            let ty = env.lookup_type(tcx, *idx);
            tcx.ascend();
            match ty? {
                Type::Val(v) => Ok(v),
                other => Err(Error::type_mismatch(format!(
                    "type index {idx} is a {}, not a value type",
                    other.type_name()
                ))),
            }
        }
    }
}

fn lookup_resource(
    tcx: &mut TypeEvalCx<'_>,
    env: &TypeEnv,
    idx: u32,
) -> Result<Rc<ResourceType>> {
    tcx.descend()?;
    let ty = env.lookup_type(tcx, idx);
    tcx.ascend();
    match ty? {
        Type::Resource(resource) => Ok(resource),
        other => Err(Error::type_mismatch(format!(
            "type index {idx} is a {}, not a resource",
            other.type_name()
        ))),
    }
}

fn eval_defval(
    tcx: &mut TypeEvalCx<'_>,
    env: &TypeEnv,
    expr: &DefValTypeExpr,
) -> Result<ValType> {
    match expr {
        DefValTypeExpr::Prim(prim) => Ok(prim_valtype(*prim)),
        DefValTypeExpr::Record(fields) => {
            let mut out = Vec::with_capacity(fields.len());
            for (name, r) in fields {
                out.push((name.clone(), eval_valtype_ref(tcx, env, r)?));
            }
            Ok(ValType::Record(RecordType::new(out)?))
        }
        DefValTypeExpr::Variant(cases) => {
            let mut out = Vec::with_capacity(cases.len());
            for (name, payload) in cases {
                let payload = match payload {
                    Some(r) => Some(eval_valtype_ref(tcx, env, r)?),
                    None => None,
                };
                out.push((name.clone(), payload));
            }
            Ok(ValType::Variant(VariantType::new(out)?))
        }
        DefValTypeExpr::List(elem) => {
            let elem = eval_valtype_ref(tcx, env, elem)?;
            // list<u8> is kept as the dedicated byte-array kind
            if matches!(elem, ValType::U8) {
                Ok(ValType::ByteArray)
            } else {
                let ty = ValType::List(Rc::new(elem));
                crate::types::check_valtype_budgets(&ty)?;
                Ok(ty)
            }
        }
        DefValTypeExpr::Tuple(types) => {
            let mut out = Vec::with_capacity(types.len());
            for r in types {
                out.push(eval_valtype_ref(tcx, env, r)?);
            }
            Ok(ValType::Tuple(TupleType::new(out)?))
        }
        DefValTypeExpr::Flags(labels) => Ok(ValType::Flags(FlagsType::new(labels.clone())?)),
        DefValTypeExpr::Enum(cases) => Ok(ValType::Enum(EnumType::new(cases.clone())?)),
        DefValTypeExpr::Option(inner) => {
            let ty = ValType::Option(Rc::new(eval_valtype_ref(tcx, env, inner)?));
            crate::types::check_valtype_budgets(&ty)?;
            Ok(ty)
        }
        DefValTypeExpr::Result { ok, err } => {
            let ok = match ok {
                Some(r) => Some(eval_valtype_ref(tcx, env, r)?),
                None => None,
            };
            let err = match err {
                Some(r) => Some(eval_valtype_ref(tcx, env, r)?),
                None => None,
            };
            Ok(ValType::Result(ResultType::new(ok, err)?))
        }
        DefValTypeExpr::Own(idx) => Ok(ValType::Own(lookup_resource(tcx, env, *idx)?)),
        DefValTypeExpr::Borrow(idx) => Ok(ValType::Borrow(lookup_resource(tcx, env, *idx)?)),
    }
}

fn eval_functype(
    tcx: &mut TypeEvalCx<'_>,
    env: &TypeEnv,
    expr: &FuncTypeExpr,
) -> Result<Rc<FuncType>> {
    let mut params = Vec::with_capacity(expr.params.len());
    for (name, r) in &expr.params {
        params.push((name.clone(), eval_valtype_ref(tcx, env, r)?));
    }
    let mut results = Vec::with_capacity(expr.results.len());
    for r in &expr.results {
        results.push(eval_valtype_ref(tcx, env, r)?);
    }
    FuncType::new(params, results)
}

/// Evaluate the shape declared by an import or export description
pub fn eval_extern_desc(
    tcx: &mut TypeEvalCx<'_>,
    env: &TypeEnv,
    desc: &ExternDesc,
) -> Result<Type> {
    match desc {
        ExternDesc::CoreModule(idx) => match env.lookup_core_type(tcx, *idx)? {
            super::defs::CoreType::Module(module) => Ok(Type::CoreModule(module)),
            super::defs::CoreType::Func(_) => Err(Error::type_mismatch(format!(
                "core type index {idx} is a function type, not a module type"
            ))),
        },
        ExternDesc::Func(idx) => match env.lookup_type(tcx, *idx)? {
            ty @ Type::Func(_) => Ok(ty),
            other => Err(Error::type_mismatch(format!(
                "type index {idx} is a {}, not a function type",
                other.type_name()
            ))),
        },
        ExternDesc::Instance(idx) => match env.lookup_type(tcx, *idx)? {
            ty @ Type::Instance(_) => Ok(ty),
            other => Err(Error::type_mismatch(format!(
                "type index {idx} is a {}, not an instance type",
                other.type_name()
            ))),
        },
        ExternDesc::Component(idx) => match env.lookup_type(tcx, *idx)? {
            ty @ Type::Component(_) => Ok(ty),
            other => Err(Error::type_mismatch(format!(
                "type index {idx} is a {}, not a component type",
                other.type_name()
            ))),
        },
        ExternDesc::Type(TypeBound::Eq(idx)) => env.lookup_type(tcx, *idx),
        ExternDesc::Type(TypeBound::SubResource) => {
            Ok(Type::Resource(ResourceType::bound_marker()))
        }
    }
}

fn eval_local_alias(
    tcx: &mut TypeEvalCx<'_>,
    local: &Rc<LocalTypeScope>,
    alias: &AliasDecl,
) -> Result<Type> {
    match (&alias.sort, &alias.target) {
        (super::Sort::Type, AliasTarget::Outer { count, idx }) => {
            outer_type(tcx, &TypeEnv::Local(local.clone()), *count, *idx)
        }
        _ => Err(Error::unknown_definition(
            "only outer type aliases are valid inside type expressions",
        )),
    }
}

/// Evaluate a component type expression
pub fn eval_component_type(
    tcx: &mut TypeEvalCx<'_>,
    env: &TypeEnv,
    decls: &[ComponentTypeDecl],
) -> Result<Rc<ComponentType>> {
    let local = LocalTypeScope::new(env.clone());
    let local_env = TypeEnv::Local(local.clone());
    let mut imports = Vec::new();
    let mut exports = Vec::new();
    for decl in decls {
        match decl {
            ComponentTypeDecl::Type(expr) => {
                let ty = eval_type_expr(tcx, &local_env, expr)?;
                local.push_type(ty);
            }
            ComponentTypeDecl::Alias(alias) => {
                let ty = eval_local_alias(tcx, &local, alias)?;
                local.push_type(ty);
            }
            ComponentTypeDecl::Import { name, desc } => {
                let ty = eval_extern_desc(tcx, &local_env, desc)?;
                if matches!(desc, ExternDesc::Type(_)) {
                    local.push_type(ty.clone());
                }
                imports.push((name.clone(), ty));
            }
            ComponentTypeDecl::Export { name, desc } => {
                let ty = eval_extern_desc(tcx, &local_env, desc)?;
                if matches!(desc, ExternDesc::Type(_)) {
                    local.push_type(ty.clone());
                }
                exports.push((name.clone(), ty));
            }
        }
    }
    ComponentType::new(imports, exports)
}

/// Evaluate an instance type expression
pub fn eval_instance_type(
    tcx: &mut TypeEvalCx<'_>,
    env: &TypeEnv,
    decls: &[InstanceTypeDecl],
) -> Result<Rc<InstanceType>> {
    let local = LocalTypeScope::new(env.clone());
    let local_env = TypeEnv::Local(local.clone());
    let mut exports = Vec::new();
    for decl in decls {
        match decl {
            InstanceTypeDecl::Type(expr) => {
                let ty = eval_type_expr(tcx, &local_env, expr)?;
                local.push_type(ty);
            }
            InstanceTypeDecl::Alias(alias) => {
                let ty = eval_local_alias(tcx, &local, alias)?;
                local.push_type(ty);
            }
            InstanceTypeDecl::Export { name, desc } => {
                let ty = eval_extern_desc(tcx, &local_env, desc)?;
                if matches!(desc, ExternDesc::Type(_)) {
                    local.push_type(ty.clone());
                }
                exports.push((name.clone(), ty));
            }
        }
    }
    InstanceType::new(exports)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definitions::TypeDef;

    fn static_env() -> (TypeEnv, Rc<DefinitionScope>) {
        let scope = DefinitionScope::new(None);
        (TypeEnv::Defs(scope.clone()), scope)
    }

    #[test]
    fn primitives_and_composites_evaluate() {
        let (env, _scope) = static_env();
        let mut tcx = TypeEvalCx::new_static();
        let expr = TypeExpr::Defined(DefValTypeExpr::Record(vec![
            ("x".to_string(), ValTypeRef::Prim(PrimValType::U32)),
            ("y".to_string(), ValTypeRef::Prim(PrimValType::String)),
        ]));
        let ty = eval_type_expr(&mut tcx, &env, &expr).unwrap();
        assert!(matches!(ty, Type::Val(ValType::Record(_))));
    }

    #[test]
    fn list_of_u8_becomes_byte_array() {
        let (env, _scope) = static_env();
        let mut tcx = TypeEvalCx::new_static();
        let expr = TypeExpr::Defined(DefValTypeExpr::List(ValTypeRef::Prim(PrimValType::U8)));
        let ty = eval_type_expr(&mut tcx, &env, &expr).unwrap();
        assert!(matches!(ty, Type::Val(ValType::ByteArray)));
    }

    #[test]
    fn static_resource_is_bound_marker() {
        let (env, _scope) = static_env();
        let mut tcx = TypeEvalCx::new_static();
        let ty = eval_type_expr(&mut tcx, &env, &TypeExpr::Resource { dtor: None }).unwrap();
        let Type::Resource(resource) = ty else {
            panic!("expected a resource type");
        };
        assert!(resource.is_bound());
    }

    #[test]
    fn own_requires_resource_target() {
        let (env, scope) = static_env();
        scope.push_type(TypeDef::declared(TypeExpr::Defined(DefValTypeExpr::Prim(
            PrimValType::U32,
        ))));
        let mut tcx = TypeEvalCx::new_static();
        let err = eval_type_expr(
            &mut tcx,
            &env,
            &TypeExpr::Defined(DefValTypeExpr::Own(0)),
        )
        .unwrap_err();
        assert_eq!(err.code, codes::TYPE_MISMATCH);
    }

    #[test]
    fn outer_alias_refuses_resource_escape() {
        let root = DefinitionScope::new(None);
        root.push_type(TypeDef::declared(TypeExpr::Resource { dtor: None }));
        let child = DefinitionScope::new(Some(root));
        let env = TypeEnv::Defs(child);
        let mut tcx = TypeEvalCx::new_static();
        let err = outer_type(&mut tcx, &env, 1, 0).unwrap_err();
        assert_eq!(err.code, codes::ALIAS_RESOURCE_ESCAPE);
        assert!(err.message.contains("not defined in the current component"));
    }

    #[test]
    fn instance_type_with_local_declarations() {
        let (env, _scope) = static_env();
        let mut tcx = TypeEvalCx::new_static();
        let decls = vec![
            InstanceTypeDecl::Type(TypeExpr::Defined(DefValTypeExpr::Prim(
                PrimValType::U32,
            ))),
            InstanceTypeDecl::Type(TypeExpr::Func(FuncTypeExpr {
                params: vec![("v".to_string(), ValTypeRef::Idx(0))],
                results: vec![ValTypeRef::Idx(0)],
            })),
            InstanceTypeDecl::Export {
                name: "get".to_string(),
                desc: ExternDesc::Func(1),
            },
        ];
        let ty = eval_instance_type(&mut tcx, &env, &decls).unwrap();
        assert_eq!(ty.exports.len(), 1);
        assert!(matches!(ty.exports[0].1, Type::Func(_)));
    }
}
