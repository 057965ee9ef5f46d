//! The component builder.
//!
//! Walks a parsed component tree in source order, translating every
//! declaration into exactly one sort-indexed definition in its scope.
//! Validation runs before and immediately after each append: index ranges,
//! option combinations, strongly-unique names, and an eager static type
//! construction that catches size/depth violations and resource escapes at
//! build time. Nested components recurse with the enclosing scope as parent.

use log::debug;

use crate::ast::{
    AliasDecl, AliasTarget, CanonDecl, ComponentAst, CoreInstanceDecl, Decl, ExportDecl,
    ExternDesc, ImportDecl, InstanceDecl,
};
use crate::canonical_abi::options::{validate_opt_decls, AdapterDirection};
use crate::component::{Component, ComponentExport};
use crate::context::Context;
use crate::definitions::{
    eval_extern_desc, static_extern_type, ComponentDef, CoreFuncDef, CoreGlobalDef,
    CoreInstanceDef, CoreMemoryDef, CoreModuleDef, CoreTableDef, CoreTypeDef, DefinitionScope,
    FuncDef, InstanceDef, Sort, SortIdx, TypeDef, TypeEnv, TypeEvalCx,
};
use crate::prelude::*;
use crate::type_check::check_compatible;
use crate::types::{check_strongly_unique_pair, Type};

/// Build a component from its parsed tree
pub fn build(cx: &Context, ast: &ComponentAst) -> Result<Rc<Component>> {
    build_component(cx, ast, None)
}

pub(crate) fn build_component(
    cx: &Context,
    ast: &ComponentAst,
    parent: Option<Rc<DefinitionScope>>,
) -> Result<Rc<Component>> {
    let scope = DefinitionScope::new(parent);
    let mut imports: Vec<(String, SortIdx)> = Vec::new();
    let mut exports: Vec<ComponentExport> = Vec::new();

    for decl in &ast.decls {
        match decl {
            Decl::CoreModule(module) => {
                let compiled = cx.engine().compile(&module.bytes)?;
                let ty = compiled.module_type();
                let idx = scope.push_core_module(CoreModuleDef::Compiled { compiled, ty });
                debug!("built core module {idx}");
            }

            Decl::CoreInstance(decl) => {
                match decl {
                    CoreInstanceDecl::Instantiate { module_idx, args } => {
                        scope.check_index(SortIdx::new(Sort::CoreModule, *module_idx))?;
                        let mut seen: Vec<&str> = Vec::new();
                        for arg in args {
                            if seen.contains(&arg.name.as_str()) {
                                return Err(Error::duplicate_name(format!(
                                    "duplicate instantiation argument `{}`",
                                    arg.name
                                )));
                            }
                            seen.push(&arg.name);
                            scope.check_index(SortIdx::new(
                                Sort::CoreInstance,
                                arg.instance_idx,
                            ))?;
                        }
                        scope.push_core_instance(CoreInstanceDef::Instantiate {
                            module_idx: *module_idx,
                            args: args.clone(),
                        });
                    }
                    CoreInstanceDecl::InlineExports(items) => {
                        let mut seen: Vec<&str> = Vec::new();
                        for item in items {
                            if seen.contains(&item.name.as_str()) {
                                return Err(Error::duplicate_name(format!(
                                    "duplicate core instance export `{}`",
                                    item.name
                                )));
                            }
                            seen.push(&item.name);
                            scope.check_index(SortIdx::new(item.sort, item.idx))?;
                        }
                        scope.push_core_instance(CoreInstanceDef::InlineExports(items.clone()));
                    }
                }
                let idx = scope.count(Sort::CoreInstance) - 1;
                let mut tcx = TypeEvalCx::new_static();
                scope.core_instance(idx)?.static_ty(&mut tcx, &scope)?;
            }

            Decl::CoreType(expr) => {
                let idx = scope.push_core_type(CoreTypeDef::declared(expr.clone()));
                scope.core_type(idx)?.static_ty(&scope)?;
            }

            Decl::Component(nested) => {
                let component = build_component(cx, nested, Some(scope.clone()))?;
                scope.push_component(ComponentDef::Nested(component));
            }

            Decl::Instance(decl) => {
                match decl {
                    InstanceDecl::Instantiate { component_idx, args } => {
                        scope.check_index(SortIdx::new(Sort::Component, *component_idx))?;
                        let mut seen: Vec<&str> = Vec::new();
                        for arg in args {
                            if seen.contains(&arg.name.as_str()) {
                                return Err(Error::duplicate_name(format!(
                                    "duplicate instantiation argument `{}`",
                                    arg.name
                                )));
                            }
                            seen.push(&arg.name);
                            scope.check_index(SortIdx::new(arg.sort, arg.idx))?;
                        }
                        scope.push_instance(InstanceDef::Instantiate {
                            component_idx: *component_idx,
                            args: args.clone(),
                        });
                    }
                    InstanceDecl::InlineExports(items) => {
                        let mut seen: Vec<&str> = Vec::new();
                        for item in items {
                            if seen.contains(&item.name.as_str()) {
                                return Err(Error::duplicate_name(format!(
                                    "duplicate instance export `{}`",
                                    item.name
                                )));
                            }
                            seen.push(&item.name);
                            scope.check_index(SortIdx::new(item.sort, item.idx))?;
                        }
                        scope.push_instance(InstanceDef::InlineExports(items.clone()));
                    }
                }
                let idx = scope.count(Sort::Instance) - 1;
                let mut tcx = TypeEvalCx::new_static();
                scope.instance(idx)?.static_ty(&mut tcx, &scope)?;
            }

            Decl::Alias(alias) => build_alias(&scope, alias)?,

            Decl::Type(expr) => {
                let idx = scope.push_type(TypeDef::declared(expr.clone()));
                let mut tcx = TypeEvalCx::new_static();
                scope.type_def(idx)?.static_ty(&mut tcx, &scope)?;
            }

            Decl::Canon(canon) => build_canon(&scope, canon)?,

            Decl::Import(import) => {
                let si = build_import(&scope, import, &imports)?;
                imports.push((import.name.clone(), si));
            }

            Decl::Export(export) => {
                let component_export = build_export(&scope, export, &exports)?;
                exports.push(component_export);
            }
        }
    }

    Ok(Component::new(cx, scope, imports, exports))
}

fn build_alias(scope: &Rc<DefinitionScope>, alias: &AliasDecl) -> Result<()> {
    match (&alias.target, alias.sort) {
        (AliasTarget::InstanceExport { instance_idx, name }, sort) => {
            scope.check_index(SortIdx::new(Sort::Instance, *instance_idx))?;
            match sort {
                Sort::Func => {
                    scope.push_func(FuncDef::Alias {
                        instance_idx: *instance_idx,
                        name: name.clone(),
                    });
                    let mut tcx = TypeEvalCx::new_static();
                    scope
                        .func(scope.count(Sort::Func) - 1)?
                        .static_ty(&mut tcx, scope)?;
                }
                Sort::Type => {
                    scope.push_type(TypeDef::alias_export(*instance_idx, name.clone()));
                    let mut tcx = TypeEvalCx::new_static();
                    scope
                        .type_def(scope.count(Sort::Type) - 1)?
                        .static_ty(&mut tcx, scope)?;
                }
                Sort::Instance => {
                    scope.push_instance(InstanceDef::AliasExport {
                        instance_idx: *instance_idx,
                        name: name.clone(),
                    });
                    let mut tcx = TypeEvalCx::new_static();
                    scope
                        .instance(scope.count(Sort::Instance) - 1)?
                        .static_ty(&mut tcx, scope)?;
                }
                Sort::Component => {
                    scope.push_component(ComponentDef::AliasExport {
                        instance_idx: *instance_idx,
                        name: name.clone(),
                    });
                    let mut tcx = TypeEvalCx::new_static();
                    scope
                        .component(scope.count(Sort::Component) - 1)?
                        .static_ty(&mut tcx, scope)?;
                }
                other => {
                    return Err(Error::unknown_definition(format!(
                        "cannot alias a {other} from an instance export"
                    )));
                }
            }
        }
        (AliasTarget::CoreInstanceExport { instance_idx, name }, sort) => {
            scope.check_index(SortIdx::new(Sort::CoreInstance, *instance_idx))?;
            let mut tcx = TypeEvalCx::new_static();
            match sort {
                Sort::CoreFunc => {
                    scope.push_core_func(CoreFuncDef::Alias {
                        instance_idx: *instance_idx,
                        name: name.clone(),
                    });
                    scope
                        .core_func(scope.count(Sort::CoreFunc) - 1)?
                        .static_ty(&mut tcx, scope)?;
                }
                Sort::CoreMemory => {
                    scope.push_core_memory(CoreMemoryDef::Alias {
                        instance_idx: *instance_idx,
                        name: name.clone(),
                    });
                    scope
                        .core_memory(scope.count(Sort::CoreMemory) - 1)?
                        .static_ty(&mut tcx, scope)?;
                }
                Sort::CoreTable => {
                    scope.push_core_table(CoreTableDef::Alias {
                        instance_idx: *instance_idx,
                        name: name.clone(),
                    });
                    scope
                        .core_table(scope.count(Sort::CoreTable) - 1)?
                        .static_ty(&mut tcx, scope)?;
                }
                Sort::CoreGlobal => {
                    scope.push_core_global(CoreGlobalDef::Alias {
                        instance_idx: *instance_idx,
                        name: name.clone(),
                    });
                    scope
                        .core_global(scope.count(Sort::CoreGlobal) - 1)?
                        .static_ty(&mut tcx, scope)?;
                }
                other => {
                    return Err(Error::unknown_definition(format!(
                        "cannot alias a {other} from a core instance export"
                    )));
                }
            }
        }
        (AliasTarget::Outer { count, idx }, sort) => {
            let target = scope.walk_outer(*count)?;
            match sort {
                Sort::Type => {
                    target.check_index(SortIdx::new(Sort::Type, *idx))?;
                    scope.push_type(TypeDef::alias_outer(*count, *idx));
                    let mut tcx = TypeEvalCx::new_static();
                    scope
                        .type_def(scope.count(Sort::Type) - 1)?
                        .static_ty(&mut tcx, scope)?;
                }
                Sort::CoreType => {
                    target.check_index(SortIdx::new(Sort::CoreType, *idx))?;
                    scope.push_core_type(CoreTypeDef::outer(*count, *idx));
                    scope
                        .core_type(scope.count(Sort::CoreType) - 1)?
                        .static_ty(scope)?;
                }
                Sort::CoreModule => {
                    target.check_index(SortIdx::new(Sort::CoreModule, *idx))?;
                    scope.push_core_module(CoreModuleDef::Outer { count: *count, idx: *idx });
                }
                Sort::Component => {
                    target.check_index(SortIdx::new(Sort::Component, *idx))?;
                    scope.push_component(ComponentDef::Outer { count: *count, idx: *idx });
                }
                other => {
                    return Err(Error::unknown_definition(format!(
                        "cannot alias a {other} from an enclosing scope"
                    )));
                }
            }
        }
    }
    Ok(())
}

fn build_canon(scope: &Rc<DefinitionScope>, canon: &CanonDecl) -> Result<()> {
    let mut tcx = TypeEvalCx::new_static();
    match canon {
        CanonDecl::Lift { core_func_idx, type_idx, opts } => {
            validate_opt_decls(opts, AdapterDirection::Lift)?;
            scope.check_index(SortIdx::new(Sort::CoreFunc, *core_func_idx))?;
            scope.check_index(SortIdx::new(Sort::Type, *type_idx))?;
            let idx = scope.push_func(FuncDef::Lift {
                core_func_idx: *core_func_idx,
                type_idx: *type_idx,
                opts: opts.clone(),
            });
            scope.func(idx)?.static_ty(&mut tcx, scope)?;
        }
        CanonDecl::Lower { func_idx, opts } => {
            validate_opt_decls(opts, AdapterDirection::Lower)?;
            scope.check_index(SortIdx::new(Sort::Func, *func_idx))?;
            let idx = scope.push_core_func(CoreFuncDef::Lower {
                func_idx: *func_idx,
                opts: opts.clone(),
            });
            scope.core_func(idx)?.static_ty(&mut tcx, scope)?;
        }
        CanonDecl::ResourceNew { type_idx }
        | CanonDecl::ResourceDrop { type_idx }
        | CanonDecl::ResourceRep { type_idx } => {
            scope.check_index(SortIdx::new(Sort::Type, *type_idx))?;
            let ty = scope.type_def(*type_idx)?.static_ty(&mut tcx, scope)?;
            if !matches!(ty, Type::Resource(_)) {
                return Err(Error::type_mismatch(format!(
                    "resource builtin on a {}, expected a resource type",
                    ty.type_name()
                )));
            }
            let def = match canon {
                CanonDecl::ResourceNew { .. } => CoreFuncDef::ResourceNew { type_idx: *type_idx },
                CanonDecl::ResourceDrop { .. } => {
                    CoreFuncDef::ResourceDrop { type_idx: *type_idx }
                }
                _ => CoreFuncDef::ResourceRep { type_idx: *type_idx },
            };
            scope.push_core_func(def);
        }
    }
    Ok(())
}

fn build_import(
    scope: &Rc<DefinitionScope>,
    import: &ImportDecl,
    prior: &[(String, SortIdx)],
) -> Result<SortIdx> {
    for (name, _) in prior {
        check_strongly_unique_pair("import", name, &import.name)?;
    }
    let mut tcx = TypeEvalCx::new_static();
    let si = match &import.desc {
        ExternDesc::Func(ty_idx) => {
            scope.check_index(SortIdx::new(Sort::Type, *ty_idx))?;
            let idx = scope.push_func(FuncDef::Import {
                name: import.name.clone(),
                ty_idx: *ty_idx,
            });
            scope.func(idx)?.static_ty(&mut tcx, scope)?;
            SortIdx::new(Sort::Func, idx)
        }
        ExternDesc::Instance(ty_idx) => {
            scope.check_index(SortIdx::new(Sort::Type, *ty_idx))?;
            let idx = scope.push_instance(InstanceDef::Import {
                name: import.name.clone(),
                ty_idx: *ty_idx,
            });
            scope.instance(idx)?.static_ty(&mut tcx, scope)?;
            SortIdx::new(Sort::Instance, idx)
        }
        ExternDesc::Component(ty_idx) => {
            scope.check_index(SortIdx::new(Sort::Type, *ty_idx))?;
            let idx = scope.push_component(ComponentDef::Import {
                name: import.name.clone(),
                ty_idx: *ty_idx,
            });
            scope.component(idx)?.static_ty(&mut tcx, scope)?;
            SortIdx::new(Sort::Component, idx)
        }
        ExternDesc::CoreModule(ty_idx) => {
            scope.check_index(SortIdx::new(Sort::CoreType, *ty_idx))?;
            let idx = scope.push_core_module(CoreModuleDef::Import {
                name: import.name.clone(),
                ty_idx: *ty_idx,
            });
            scope.core_module(idx)?.static_ty(&mut tcx, scope)?;
            SortIdx::new(Sort::CoreModule, idx)
        }
        ExternDesc::Type(bound) => {
            if let crate::ast::TypeBound::Eq(ty_idx) = bound {
                scope.check_index(SortIdx::new(Sort::Type, *ty_idx))?;
            }
            let idx = scope.push_type(TypeDef::import(import.name.clone(), bound.clone()));
            scope.type_def(idx)?.static_ty(&mut tcx, scope)?;
            SortIdx::new(Sort::Type, idx)
        }
    };
    Ok(si)
}

fn build_export(
    scope: &Rc<DefinitionScope>,
    export: &ExportDecl,
    prior: &[ComponentExport],
) -> Result<ComponentExport> {
    for existing in prior {
        check_strongly_unique_pair("export", &existing.name, &export.name)?;
    }
    let si = SortIdx::new(export.sort, export.idx);
    scope.check_index(si)?;
    let mut tcx = TypeEvalCx::new_static();
    let static_ty = static_extern_type(&mut tcx, scope, si)?;
    let ascribed = match &export.desc {
        Some(desc) => {
            let ascribed = eval_extern_desc(&mut tcx, &TypeEnv::Defs(scope.clone()), desc)?;
            check_compatible(&ascribed, &static_ty)?;
            Some(ascribed)
        }
        None => None,
    };
    // An export introduces a fresh index in its sort's space
    match export.sort {
        Sort::Func => {
            scope.push_func(FuncDef::Ref(export.idx));
        }
        Sort::Type => {
            scope.push_type(TypeDef::reference(export.idx));
        }
        Sort::Instance => {
            scope.push_instance(InstanceDef::Ref(export.idx));
        }
        Sort::Component => {
            scope.push_component(ComponentDef::Ref(export.idx));
        }
        Sort::CoreModule => {
            scope.push_core_module(CoreModuleDef::Ref(export.idx));
        }
        other => {
            return Err(Error::validation_error(format!(
                "a component cannot export a {other}"
            )));
        }
    }
    Ok(ComponentExport { name: export.name.clone(), sort_idx: si, ascribed })
}
