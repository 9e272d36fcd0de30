use corelib::codec::{Format, ObjectRef, SerializationEngine, Shape, TypeRegistry, TypeSchema, Value};
use criterion::{black_box, criterion_group, criterion_main, Criterion};

fn chain(len: usize) -> Value {
    let head = ObjectRef::new("Node").with("id", 0i64).with("next", Value::Null);
    let mut tail = head.clone();
    for id in 1..len {
        let node = ObjectRef::new("Node").with("id", id as i64).with("next", Value::Null);
        tail.set("next", node.clone());
        tail = node;
    }
    head.into()
}

fn bench_codec(c: &mut Criterion) {
    let registry = TypeRegistry::builder()
        .object(
            TypeSchema::new("Node")
                .field("id", Shape::Int)
                .field("next", Shape::optional(Shape::object("Node"))),
        )
        .build()
        .expect("valid registry");
    let engine = SerializationEngine::new(registry);
    let shape = Shape::object("Node");
    let graph = chain(256);

    for format in [Format::Ordinal, Format::Named] {
        let bytes = engine.encode_as(&graph, &shape, format).expect("encodes");

        c.bench_function(&format!("encode_chain_256_{}", format), |b| {
            b.iter(|| engine.encode_as(black_box(&graph), &shape, format))
        });
        c.bench_function(&format!("decode_chain_256_{}", format), |b| {
            b.iter(|| engine.decode(black_box(&bytes), &shape, format))
        });
    }
}

criterion_group!(benches, bench_codec);
criterion_main!(benches);
