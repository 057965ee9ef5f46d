//! Lift/lower round-trip benchmarks.

use std::collections::BTreeMap;
use std::rc::Rc;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use wcr_component::canonical_abi::{bump_realloc, CanonOpts, FlatReader, LiftLowerCx, SimpleMemory};
use wcr_component::engine::{CompiledModule, CoreEngine, ImportResolver, ModuleInstanceHandle};
use wcr_component::types::{RecordType, ValType};
use wcr_component::{Context, Instance, Result, Value};

struct NoEngine;

impl CoreEngine for NoEngine {
    fn compile(&self, _: &[u8]) -> Result<Rc<dyn CompiledModule>> {
        unimplemented!("benchmarks never reach the engine")
    }
    fn instantiate(
        &self,
        _: &Rc<dyn CompiledModule>,
        _: &str,
        _: &mut dyn ImportResolver,
    ) -> Result<Rc<dyn ModuleInstanceHandle>> {
        unimplemented!("benchmarks never reach the engine")
    }
}

fn setup() -> (CanonOpts, Rc<Instance>) {
    let cx = Context::new(Rc::new(NoEngine));
    let instance = Instance::new(&cx);
    let memory = SimpleMemory::new(1 << 20);
    let opts = CanonOpts {
        memory: Some(memory.clone()),
        realloc: Some(bump_realloc(&memory, 4096)),
        ..CanonOpts::default()
    };
    (opts, instance)
}

fn record_ty() -> ValType {
    ValType::Record(
        RecordType::new(vec![
            ("id".to_string(), ValType::U64),
            ("name".to_string(), ValType::String),
            ("tags".to_string(), ValType::List(Rc::new(ValType::U32))),
        ])
        .unwrap(),
    )
}

fn record_value() -> Value {
    Value::Record(vec![
        Value::U64(7),
        Value::String("a reasonably sized payload".to_string()),
        Value::List((0..16).map(Value::U32).collect()),
    ])
}

fn bench_flat_roundtrip(c: &mut Criterion) {
    let ty = record_ty();
    let value = record_value();
    c.bench_function("lower_lift_flat_record", |b| {
        b.iter(|| {
            let (opts, instance) = setup();
            let mut cx = LiftLowerCx::new(&opts, instance);
            let mut words = Vec::new();
            ty.lower_flat(&mut cx, black_box(&value), &mut words).unwrap();
            let mut reader = FlatReader::new(&words);
            let back = ty.lift_flat(&mut cx, &mut reader).unwrap();
            black_box(back);
        });
    });
}

fn bench_memory_roundtrip(c: &mut Criterion) {
    let ty = record_ty();
    let value = record_value();
    c.bench_function("store_load_record", |b| {
        b.iter(|| {
            let (opts, instance) = setup();
            let mut cx = LiftLowerCx::new(&opts, instance);
            let ptr = cx.alloc(ty.elem_size(), ty.alignment()).unwrap();
            ty.store(&mut cx, ptr, black_box(&value)).unwrap();
            let back = ty.load(&mut cx, ptr).unwrap();
            black_box(back);
        });
    });
}

fn bench_instantiate_empty(c: &mut Criterion) {
    c.bench_function("instantiate_empty_component", |b| {
        let cx = Context::new(Rc::new(NoEngine));
        let ast = wcr_component::ast::ComponentAst::default();
        let component = wcr_component::build(&cx, &ast).unwrap();
        b.iter(|| {
            let instance = component.instantiate(&cx, BTreeMap::new()).unwrap();
            black_box(instance);
        });
    });
}

criterion_group!(
    benches,
    bench_flat_roundtrip,
    bench_memory_roundtrip,
    bench_instantiate_empty
);
criterion_main!(benches);
