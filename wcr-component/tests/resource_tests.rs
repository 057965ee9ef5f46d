//! Resource and handle discipline, from the canonical layer up to a full
//! component whose guest drives the resource builtins.

mod common;

use std::collections::BTreeMap;
use std::rc::Rc;

use common::{sig, MockEngine, MockInstance};
use wcr_component::ast::{
    AliasDecl, AliasTarget, CanonDecl, ComponentAst, CoreInlineExport, CoreInstanceDecl,
    CoreInstantiateArg, CoreModuleDecl, Decl, DefValTypeExpr, ExportDecl, FuncTypeExpr,
    PrimValType, TypeExpr, ValTypeRef,
};
use wcr_component::canonical_abi::{CanonOpts, FlatReader, LiftLowerCx};
use wcr_component::definitions::Sort;
use wcr_component::engine::CoreFunc;
use wcr_component::resources::{HandleRep, OwnedHandle};
use wcr_component::types::{RepKind, ValType};
use wcr_component::{build, ComponentExtern, Context, Error, Instance, InstanceBuilder, Value};
use wcr_error::codes;
use wcr_foundation::types::{CoreExternType, CoreValType, ModuleType};
use wcr_foundation::values::CoreValue;

fn owner_with_resource(cx: &Context) -> (Rc<Instance>, Rc<wcr_component::ResourceType>) {
    let mut builder = InstanceBuilder::new();
    let resource = builder.create_resource_type(RepKind::U32, None);
    let owner = builder.build(cx).unwrap();
    (owner, resource)
}

#[test]
fn own_transfer_is_single_shot() {
    let cx = Context::new(MockEngine::new());
    let (_owner, resource) = owner_with_resource(&cx);
    let caller = Instance::new(&cx);
    let opts = CanonOpts::default();
    let mut llcx = LiftLowerCx::new(&opts, caller.clone());

    let handle = OwnedHandle::new(resource.clone(), HandleRep::U32(42)).unwrap();
    let ty = ValType::Own(resource.clone());
    let mut words = Vec::new();
    ty.lower_flat(&mut llcx, &Value::Own(handle), &mut words).unwrap();

    let mut reader = FlatReader::new(&words);
    let lifted = ty.lift_flat(&mut llcx, &mut reader).unwrap();
    let Value::Own(own) = lifted else {
        panic!("expected an own handle");
    };
    assert_eq!(own.rep_u32().unwrap(), 42);

    // The table entry moved out with the first lift
    let mut reader = FlatReader::new(&words);
    let err = ty.lift_flat(&mut llcx, &mut reader).unwrap_err();
    assert_eq!(err.code, codes::HANDLE_MISUSE);
}

#[test]
fn lent_borrow_blocks_drop_until_released() {
    let cx = Context::new(MockEngine::new());
    let (owner, resource) = owner_with_resource(&cx);
    let caller = Instance::new(&cx);
    let opts = CanonOpts::default();
    let mut llcx = LiftLowerCx::new(&opts, caller.clone());

    let handle = OwnedHandle::new(resource.clone(), HandleRep::U32(7)).unwrap();
    let own_ty = ValType::Own(resource.clone());
    let borrow_ty = ValType::Borrow(resource.clone());

    let mut words = Vec::new();
    own_ty
        .lower_flat(&mut llcx, &Value::Own(handle.clone()), &mut words)
        .unwrap();

    // Lift the same table index as a borrow: the entry is read, not removed
    let mut reader = FlatReader::new(&words);
    let borrowed = borrow_ty.lift_flat(&mut llcx, &mut reader).unwrap();
    let Value::Borrow(borrow) = borrowed else {
        panic!("expected a borrow handle");
    };
    assert_eq!(borrow.rep_u32().unwrap(), 7);
    assert_eq!(handle.num_lends(), 1);
    assert_eq!(owner.borrow_count(), 1);

    // The owner cannot be dropped while the lend is outstanding
    let err = handle.drop_handle().unwrap_err();
    assert_eq!(err.code, codes::HANDLE_MISUSE);

    // Context exit releases the lend exactly once
    llcx.release_lent().unwrap();
    assert_eq!(handle.num_lends(), 0);
    assert_eq!(owner.borrow_count(), 0);
    assert!(borrow.is_dropped());
    handle.drop_handle().unwrap();
}

fn register_res_user(engine: &Rc<MockEngine>) {
    let unary = sig(&[CoreValType::I32], &[CoreValType::I32]);
    let drop_sig = sig(&[CoreValType::I32], &[]);
    let ty = ModuleType {
        imports: vec![
            (
                ("env".to_string(), "new".to_string()),
                CoreExternType::Func(unary.clone()),
            ),
            (
                ("env".to_string(), "drop".to_string()),
                CoreExternType::Func(drop_sig.clone()),
            ),
            (
                ("env".to_string(), "rep".to_string()),
                CoreExternType::Func(unary.clone()),
            ),
        ],
        exports: vec![
            ("make".to_string(), CoreExternType::Func(unary.clone())),
            ("consume".to_string(), CoreExternType::Func(unary.clone())),
            ("peek".to_string(), CoreExternType::Func(unary.clone())),
        ],
    };
    engine.register(b"res-user", ty, move |resolver| {
        let env = resolver
            .resolve("env")
            .ok_or_else(|| Error::missing_argument("no env module"))?;
        let new = env.function("new")?;
        let drop = env.function("drop")?;
        let rep = env.function("rep")?;
        let instance = MockInstance::new();
        let unary = sig(&[CoreValType::I32], &[CoreValType::I32]);
        instance.add_function(
            "make",
            CoreFunc::new(unary.clone(), move |args| new.call(args)),
        );
        instance.add_function(
            "consume",
            CoreFunc::new(unary.clone(), move |args| {
                let out = rep.call(args)?;
                drop.call(args)?;
                Ok(out)
            }),
        );
        // Borrow parameters inside the owning component arrive as the raw
        // representation
        instance.add_function(
            "peek",
            CoreFunc::new(unary, move |args| Ok(vec![args[0]])),
        );
        Ok(instance)
    });
}

fn res_user_ast() -> ComponentAst {
    ComponentAst {
        name: Some("res-user".to_string()),
        decls: vec![
            // type 0: the resource
            Decl::Type(TypeExpr::Resource { dtor: None }),
            // core funcs 0..2: the builtins
            Decl::Canon(CanonDecl::ResourceNew { type_idx: 0 }),
            Decl::Canon(CanonDecl::ResourceDrop { type_idx: 0 }),
            Decl::Canon(CanonDecl::ResourceRep { type_idx: 0 }),
            // core instance 0: the env module for the guest
            Decl::CoreInstance(CoreInstanceDecl::InlineExports(vec![
                CoreInlineExport { name: "new".to_string(), sort: Sort::CoreFunc, idx: 0 },
                CoreInlineExport { name: "drop".to_string(), sort: Sort::CoreFunc, idx: 1 },
                CoreInlineExport { name: "rep".to_string(), sort: Sort::CoreFunc, idx: 2 },
            ])),
            core_module(b"res-user"),
            Decl::CoreInstance(CoreInstanceDecl::Instantiate {
                module_idx: 0,
                args: vec![CoreInstantiateArg {
                    name: "env".to_string(),
                    instance_idx: 0,
                }],
            }),
            // core funcs 3..5
            alias_core_export(1, "make", Sort::CoreFunc),
            alias_core_export(1, "consume", Sort::CoreFunc),
            alias_core_export(1, "peek", Sort::CoreFunc),
            // types 1..2: own and borrow of the resource
            Decl::Type(TypeExpr::Defined(DefValTypeExpr::Own(0))),
            Decl::Type(TypeExpr::Defined(DefValTypeExpr::Borrow(0))),
            // type 3 + func 0: make
            Decl::Type(TypeExpr::Func(FuncTypeExpr {
                params: vec![("rep".to_string(), ValTypeRef::Prim(PrimValType::U32))],
                results: vec![ValTypeRef::Idx(1)],
            })),
            Decl::Canon(CanonDecl::Lift { core_func_idx: 3, type_idx: 3, opts: vec![] }),
            // type 4 + func 1: consume
            Decl::Type(TypeExpr::Func(FuncTypeExpr {
                params: vec![("h".to_string(), ValTypeRef::Idx(1))],
                results: vec![ValTypeRef::Prim(PrimValType::U32)],
            })),
            Decl::Canon(CanonDecl::Lift { core_func_idx: 4, type_idx: 4, opts: vec![] }),
            // type 5 + func 2: peek over a borrow
            Decl::Type(TypeExpr::Func(FuncTypeExpr {
                params: vec![("h".to_string(), ValTypeRef::Idx(2))],
                results: vec![ValTypeRef::Prim(PrimValType::U32)],
            })),
            Decl::Canon(CanonDecl::Lift { core_func_idx: 5, type_idx: 5, opts: vec![] }),
            export("make", Sort::Func, 0),
            export("consume", Sort::Func, 1),
            export("peek", Sort::Func, 2),
        ],
    }
}

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

#[test]
fn guest_resources_flow_through_the_builtins() {
    let engine = MockEngine::new();
    register_res_user(&engine);
    let cx = Context::new(engine);
    let component = build(&cx, &res_user_ast()).unwrap();
    let instance = component.instantiate(&cx, BTreeMap::new()).unwrap();

    let func = |name: &str| match instance.export(name) {
        Some(ComponentExtern::Func(f)) => f,
        other => panic!("export `{name}` is {other:?}"),
    };
    let make = func("make");
    let consume = func("consume");
    let peek = func("peek");

    // resource.new inside the guest hands ownership out through the lift
    let results = make.call(vec![Value::U32(42)]).unwrap();
    let Some(Value::Own(handle)) = results.into_iter().next() else {
        panic!("make did not return an own handle");
    };
    assert_eq!(handle.rep_u32().unwrap(), 42);

    // A borrow parameter lends the handle for the duration of the call
    let results = peek.call(vec![Value::Own(handle.clone())]).unwrap();
    assert_eq!(results, vec![Value::U32(42)]);
    assert_eq!(handle.num_lends(), 0);
    assert_eq!(instance.borrow_count(), 0);

    // consume takes ownership back into the guest and drops there
    let results = consume.call(vec![Value::Own(handle.clone())]).unwrap();
    assert_eq!(results, vec![Value::U32(42)]);
    assert!(handle.is_dropped());

    // The handle is gone: passing it again is refused
    let err = consume.call(vec![Value::Own(handle)]).unwrap_err();
    assert_eq!(err.code, codes::HANDLE_MISUSE);
}

#[test]
fn destructor_runs_in_owner_context_on_drop() {
    let cx = Context::new(MockEngine::new());
    let dropped = Rc::new(std::cell::Cell::new(0u32));
    let mut builder = InstanceBuilder::new();
    let observed = dropped.clone();
    let resource = builder.create_resource_type(
        RepKind::U32,
        Some(Rc::new(move |rep: &HandleRep| {
            observed.set(rep.as_u32()?);
            Ok(())
        })),
    );
    let _owner = builder.build(&cx).unwrap();

    let handle = OwnedHandle::new(resource, HandleRep::U32(99)).unwrap();
    handle.drop_handle().unwrap();
    assert_eq!(dropped.get(), 99);
    // Idempotent: the destructor does not run twice
    handle.drop_handle().unwrap();
    assert_eq!(dropped.get(), 99);
}
