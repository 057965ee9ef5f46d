//! End-to-end build/instantiate tests over the scripted engine.

mod common;

use std::collections::BTreeMap;
use std::rc::Rc;

use common::{guest_memory, sig, MockEngine, MockInstance};
use wcr_component::ast::{
    AliasDecl, AliasTarget, CanonDecl, CanonOpt, ComponentAst, CoreInstanceDecl,
    CoreInstantiateArg, CoreModuleDecl, Decl, ExportDecl, ExternDesc, FuncTypeExpr, ImportDecl,
    InstanceDecl, InstanceTypeDecl, PrimValType, TypeBound, TypeExpr, ValTypeRef,
};
use wcr_component::definitions::Sort;
use wcr_component::engine::{CoreFunc, CoreMemory};
use wcr_component::types::{FuncType, ValType};
use wcr_component::{build, ComponentExtern, Context, Error, InstanceBuilder, Type, Value};
use wcr_error::codes;
use wcr_foundation::types::{
    CoreExternType, CoreMemoryType, CoreValType, Limits, ModuleType,
};
use wcr_foundation::values::CoreValue;

fn core_module(bytes: &[u8]) -> Decl {
    Decl::CoreModule(CoreModuleDecl { bytes: bytes.to_vec() })
}

fn alias_core_export(instance_idx: u32, name: &str, sort: Sort) -> Decl {
    Decl::Alias(AliasDecl {
        sort,
        target: AliasTarget::CoreInstanceExport {
            instance_idx,
            name: name.to_string(),
        },
    })
}

fn export(name: &str, sort: Sort, idx: u32) -> Decl {
    Decl::Export(ExportDecl { name: name.to_string(), sort, idx, desc: None })
}

fn memory_export() -> (String, CoreExternType) {
    (
        "mem".to_string(),
        CoreExternType::Memory(CoreMemoryType {
            limits: Limits { min: 1, max: Some(1) },
            shared: false,
        }),
    )
}

fn realloc_export() -> (String, CoreExternType) {
    (
        "realloc".to_string(),
        CoreExternType::Func(sig(
            &[
                CoreValType::I32,
                CoreValType::I32,
                CoreValType::I32,
                CoreValType::I32,
            ],
            &[CoreValType::I32],
        )),
    )
}

fn register_greeter(engine: &Rc<MockEngine>) {
    let greet_sig = sig(
        &[CoreValType::I32, CoreValType::I32, CoreValType::I32],
        &[],
    );
    let ty = ModuleType {
        imports: vec![],
        exports: vec![
            memory_export(),
            realloc_export(),
            ("greet".to_string(), CoreExternType::Func(greet_sig.clone())),
        ],
    };
    engine.register(b"greeter", ty, move |_resolver| {
        let instance = MockInstance::new();
        let (memory, realloc) = guest_memory();
        instance.add_memory("mem", memory.clone());
        instance.add_function("realloc", realloc.clone());
        let greet_sig = sig(
            &[CoreValType::I32, CoreValType::I32, CoreValType::I32],
            &[],
        );
        instance.add_function(
            "greet",
            CoreFunc::new(greet_sig, move |args| {
                let ptr = args[0].as_u32()?;
                let len = args[1].as_u32()?;
                let retptr = args[2].as_u32()?;
                let name = String::from_utf8(memory.read(ptr, len)?)
                    .map_err(|_| Error::runtime_error("guest read invalid utf-8"))?;
                let reply = format!("hello {name}");
                let allocated = realloc.call(&[
                    CoreValue::I32(0),
                    CoreValue::I32(0),
                    CoreValue::I32(1),
                    CoreValue::I32(reply.len() as i32),
                ])?;
                let out_ptr = allocated[0].as_u32()?;
                memory.write(out_ptr, reply.as_bytes())?;
                memory.write_u32_le(retptr, out_ptr)?;
                memory.write_u32_le(retptr + 4, reply.len() as u32)?;
                Ok(vec![])
            }),
        );
        Ok(instance)
    });
}

/// A component that lifts a string-to-string guest function
fn greeter_ast() -> ComponentAst {
    ComponentAst {
        name: Some("greeter".to_string()),
        decls: vec![
            core_module(b"greeter"),
            Decl::CoreInstance(CoreInstanceDecl::Instantiate { module_idx: 0, args: vec![] }),
            alias_core_export(0, "mem", Sort::CoreMemory),
            alias_core_export(0, "realloc", Sort::CoreFunc),
            alias_core_export(0, "greet", Sort::CoreFunc),
            Decl::Type(TypeExpr::Func(FuncTypeExpr {
                params: vec![("name".to_string(), ValTypeRef::Prim(PrimValType::String))],
                results: vec![ValTypeRef::Prim(PrimValType::String)],
            })),
            Decl::Canon(CanonDecl::Lift {
                core_func_idx: 1,
                type_idx: 0,
                opts: vec![CanonOpt::StringUtf8, CanonOpt::Memory(0), CanonOpt::Realloc(0)],
            }),
            export("greet", Sort::Func, 0),
        ],
    }
}

#[test]
fn string_function_roundtrips_through_guest_memory() {
    let engine = MockEngine::new();
    register_greeter(&engine);
    let cx = Context::new(engine);
    let component = build(&cx, &greeter_ast()).unwrap();
    let instance = component.instantiate(&cx, BTreeMap::new()).unwrap();

    let Some(ComponentExtern::Func(greet)) = instance.export("greet") else {
        panic!("missing greet export");
    };
    let results = greet.call(vec![Value::String("héllo".to_string())]).unwrap();
    assert_eq!(results, vec![Value::String("hello héllo".to_string())]);

    // The instance is re-enterable after the call returns
    let results = greet.call(vec![Value::String("again".to_string())]).unwrap();
    assert_eq!(results, vec![Value::String("hello again".to_string())]);
}

#[test]
fn seventeen_parameters_travel_through_memory() {
    let engine = MockEngine::new();
    let sum_sig = sig(&[CoreValType::I32], &[CoreValType::I32]);
    let ty = ModuleType {
        imports: vec![],
        exports: vec![
            memory_export(),
            realloc_export(),
            ("sum".to_string(), CoreExternType::Func(sum_sig.clone())),
        ],
    };
    engine.register(b"sum17", ty, move |_resolver| {
        let instance = MockInstance::new();
        let (memory, realloc) = guest_memory();
        instance.add_memory("mem", memory.clone());
        instance.add_function("realloc", realloc);
        instance.add_function(
            "sum",
            CoreFunc::new(sig(&[CoreValType::I32], &[CoreValType::I32]), move |args| {
                let ptr = args[0].as_u32()?;
                let mut total: u32 = 0;
                for i in 0..17 {
                    total = total.wrapping_add(memory.read_u32_le(ptr + i * 4)?);
                }
                Ok(vec![CoreValue::I32(total as i32)])
            }),
        );
        Ok(instance)
    });

    let params: Vec<(String, ValTypeRef)> = (0..17)
        .map(|i| (format!("p{i}"), ValTypeRef::Prim(PrimValType::U32)))
        .collect();
    let ast = ComponentAst {
        name: None,
        decls: vec![
            core_module(b"sum17"),
            Decl::CoreInstance(CoreInstanceDecl::Instantiate { module_idx: 0, args: vec![] }),
            alias_core_export(0, "mem", Sort::CoreMemory),
            alias_core_export(0, "realloc", Sort::CoreFunc),
            alias_core_export(0, "sum", Sort::CoreFunc),
            Decl::Type(TypeExpr::Func(FuncTypeExpr {
                params,
                results: vec![ValTypeRef::Prim(PrimValType::U32)],
            })),
            Decl::Canon(CanonDecl::Lift {
                core_func_idx: 1,
                type_idx: 0,
                opts: vec![CanonOpt::Memory(0), CanonOpt::Realloc(0)],
            }),
            export("sum", Sort::Func, 0),
        ],
    };

    let cx = Context::new(engine);
    let component = build(&cx, &ast).unwrap();
    let instance = component.instantiate(&cx, BTreeMap::new()).unwrap();
    let Some(ComponentExtern::Func(sum)) = instance.export("sum") else {
        panic!("missing sum export");
    };
    let args: Vec<Value> = (1..=17).map(Value::U32).collect();
    let results = sum.call(args).unwrap();
    assert_eq!(results, vec![Value::U32((1..=17).sum())]);
}

fn clock_import_ast(import_name: &str) -> ComponentAst {
    ComponentAst {
        name: None,
        decls: vec![
            Decl::Type(TypeExpr::Instance(vec![
                InstanceTypeDecl::Type(TypeExpr::Func(FuncTypeExpr {
                    params: vec![],
                    results: vec![ValTypeRef::Prim(PrimValType::U64)],
                })),
                InstanceTypeDecl::Export {
                    name: "now".to_string(),
                    desc: ExternDesc::Func(0),
                },
            ])),
            Decl::Import(ImportDecl {
                name: import_name.to_string(),
                desc: ExternDesc::Instance(0),
            }),
            Decl::Alias(AliasDecl {
                sort: Sort::Func,
                target: AliasTarget::InstanceExport {
                    instance_idx: 0,
                    name: "now".to_string(),
                },
            }),
            export("now", Sort::Func, 0),
        ],
    }
}

#[test]
fn version_qualified_import_resolution() {
    let engine = MockEngine::new();
    let cx = Context::new(engine);
    let component = build(&cx, &clock_import_ast("wasi:clocks/wall-clock@0.2.0")).unwrap();

    let mut builder = InstanceBuilder::new();
    let ty = FuncType::new_host(vec![], vec![ValType::U64]).unwrap();
    builder.add_function_export("now", ty, |_instance| {
        Rc::new(|_args| Ok(vec![Value::U64(1_234_567)]))
    });
    let clock = builder.build(&cx).unwrap();

    let mut args = BTreeMap::new();
    args.insert(
        "wasi:clocks/wall-clock@0.2.3".to_string(),
        ComponentExtern::Instance(clock),
    );
    let instance = component.instantiate(&cx, args).unwrap();
    let Some(ComponentExtern::Func(now)) = instance.export("now") else {
        panic!("missing now export");
    };
    assert_eq!(now.call(vec![]).unwrap(), vec![Value::U64(1_234_567)]);
}

#[test]
fn incompatible_version_is_rejected() {
    let engine = MockEngine::new();
    let cx = Context::new(engine);
    let component = build(&cx, &clock_import_ast("wasi:clocks/wall-clock@0.2.0")).unwrap();

    let mut builder = InstanceBuilder::new();
    let ty = FuncType::new_host(vec![], vec![ValType::U64]).unwrap();
    builder.add_function_export("now", ty, |_instance| Rc::new(|_args| Ok(vec![Value::U64(0)])));
    let clock = builder.build(&cx).unwrap();

    let mut args = BTreeMap::new();
    args.insert(
        "wasi:clocks/wall-clock@0.3.0".to_string(),
        ComponentExtern::Instance(clock),
    );
    let err = component.instantiate(&cx, args).unwrap_err();
    assert_eq!(err.code, codes::MISSING_ARGUMENT);
}

#[test]
fn statically_known_instance_import_is_synthesised() {
    let engine = MockEngine::new();
    let cx = Context::new(engine);
    let ast = ComponentAst {
        name: None,
        decls: vec![
            Decl::Type(TypeExpr::Instance(vec![
                InstanceTypeDecl::Type(TypeExpr::Defined(
                    wcr_component::ast::DefValTypeExpr::Prim(PrimValType::U32),
                )),
                InstanceTypeDecl::Export {
                    name: "t".to_string(),
                    desc: ExternDesc::Type(TypeBound::Eq(0)),
                },
            ])),
            Decl::Import(ImportDecl {
                name: "config".to_string(),
                desc: ExternDesc::Instance(0),
            }),
            Decl::Alias(AliasDecl {
                sort: Sort::Type,
                target: AliasTarget::InstanceExport {
                    instance_idx: 0,
                    name: "t".to_string(),
                },
            }),
            export("t", Sort::Type, 1),
        ],
    };
    let component = build(&cx, &ast).unwrap();
    // No argument supplied: the resource-free instance type is synthesised
    let instance = component.instantiate(&cx, BTreeMap::new()).unwrap();
    let Some(ComponentExtern::Type(ty)) = instance.export("t") else {
        panic!("missing type export");
    };
    assert!(matches!(ty, Type::Val(ValType::U32)));
}

#[test]
fn repeated_resolution_returns_the_same_instance() {
    let engine = MockEngine::new();
    let cx = Context::new(engine);
    let ast = ComponentAst {
        name: None,
        decls: vec![
            Decl::Instance(InstanceDecl::InlineExports(vec![])),
            export("a", Sort::Instance, 0),
            export("b", Sort::Instance, 0),
        ],
    };
    let component = build(&cx, &ast).unwrap();
    let instance = component.instantiate(&cx, BTreeMap::new()).unwrap();
    let Some(ComponentExtern::Instance(a)) = instance.export("a") else {
        panic!("missing export a");
    };
    let Some(ComponentExtern::Instance(b)) = instance.export("b") else {
        panic!("missing export b");
    };
    assert!(Rc::ptr_eq(&a, &b));
}

#[test]
fn outer_alias_cannot_expose_nested_resources() {
    let engine = MockEngine::new();
    let cx = Context::new(engine);
    let nested = ComponentAst {
        name: None,
        decls: vec![Decl::Alias(AliasDecl {
            sort: Sort::Type,
            target: AliasTarget::Outer { count: 1, idx: 0 },
        })],
    };
    let ast = ComponentAst {
        name: None,
        decls: vec![
            Decl::Type(TypeExpr::Resource { dtor: None }),
            Decl::Component(Box::new(nested)),
        ],
    };
    let err = build(&cx, &ast).unwrap_err();
    assert_eq!(err.code, codes::ALIAS_RESOURCE_ESCAPE);
    assert!(err
        .message
        .contains("resources not defined in the current component"));
}

#[test]
fn core_instantiation_requires_every_import() {
    let engine = MockEngine::new();
    let ty = ModuleType {
        imports: vec![(
            ("env".to_string(), "f".to_string()),
            CoreExternType::Func(sig(&[CoreValType::I32], &[])),
        )],
        exports: vec![],
    };
    engine.register(b"needy", ty, |_resolver| Ok(MockInstance::new()));

    let cx = Context::new(engine);
    let ast = ComponentAst {
        name: None,
        decls: vec![
            core_module(b"needy"),
            Decl::CoreInstance(CoreInstanceDecl::Instantiate { module_idx: 0, args: vec![] }),
        ],
    };
    let component = build(&cx, &ast).unwrap();
    let err = component.instantiate(&cx, BTreeMap::new()).unwrap_err();
    assert_eq!(err.code, codes::MISSING_ARGUMENT);
}

#[test]
fn satisfied_core_imports_link_between_modules() {
    let engine = MockEngine::new();
    let double_sig = sig(&[CoreValType::I32], &[CoreValType::I32]);
    let ty = ModuleType {
        imports: vec![(
            ("env".to_string(), "double".to_string()),
            CoreExternType::Func(double_sig.clone()),
        )],
        exports: vec![(
            "quadruple".to_string(),
            CoreExternType::Func(double_sig.clone()),
        )],
    };
    engine.register(b"quad", ty, move |resolver| {
        let env = resolver
            .resolve("env")
            .ok_or_else(|| Error::missing_argument("no env module"))?;
        let double = env.function("double")?;
        let instance = MockInstance::new();
        instance.add_function(
            "quadruple",
            CoreFunc::new(
                sig(&[CoreValType::I32], &[CoreValType::I32]),
                move |args| {
                    let once = double.call(args)?;
                    double.call(&once)
                },
            ),
        );
        Ok(instance)
    });

    let provider_ty = ModuleType {
        imports: vec![],
        exports: vec![(
            "double".to_string(),
            CoreExternType::Func(double_sig.clone()),
        )],
    };
    engine.register(b"doubler", provider_ty, |_resolver| {
        let instance = MockInstance::new();
        instance.add_function(
            "double",
            CoreFunc::new(
                sig(&[CoreValType::I32], &[CoreValType::I32]),
                |args| Ok(vec![CoreValue::I32(args[0].as_i32()? * 2)]),
            ),
        );
        Ok(instance)
    });

    let ast = ComponentAst {
        name: None,
        decls: vec![
            core_module(b"doubler"),
            core_module(b"quad"),
            Decl::CoreInstance(CoreInstanceDecl::Instantiate { module_idx: 0, args: vec![] }),
            Decl::CoreInstance(CoreInstanceDecl::Instantiate {
                module_idx: 1,
                args: vec![CoreInstantiateArg {
                    name: "env".to_string(),
                    instance_idx: 0,
                }],
            }),
            alias_core_export(1, "quadruple", Sort::CoreFunc),
            Decl::Type(TypeExpr::Func(FuncTypeExpr {
                params: vec![("v".to_string(), ValTypeRef::Prim(PrimValType::U32))],
                results: vec![ValTypeRef::Prim(PrimValType::U32)],
            })),
            Decl::Canon(CanonDecl::Lift { core_func_idx: 0, type_idx: 0, opts: vec![] }),
            export("quadruple", Sort::Func, 0),
        ],
    };
    let cx = Context::new(engine);
    let component = build(&cx, &ast).unwrap();
    let instance = component.instantiate(&cx, BTreeMap::new()).unwrap();
    let Some(ComponentExtern::Func(quadruple)) = instance.export("quadruple") else {
        panic!("missing quadruple export");
    };
    assert_eq!(quadruple.call(vec![Value::U32(3)]).unwrap(), vec![Value::U32(12)]);
}

#[test]
fn component_lists_declared_imports() {
    let engine = MockEngine::new();
    let cx = Context::new(engine);
    let component = build(&cx, &clock_import_ast("wasi:clocks/wall-clock@0.2.0")).unwrap();
    let imports = component.imports().unwrap();
    assert_eq!(imports.len(), 1);
    assert_eq!(imports[0].0, "wasi:clocks/wall-clock@0.2.0");
    assert!(matches!(imports[0].1, Type::Instance(_)));
    let exports = component.exports().unwrap();
    assert_eq!(exports.len(), 1);
    assert_eq!(exports[0].0, "now");
}
