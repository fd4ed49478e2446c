use criterion::{black_box, criterion_group, criterion_main, Criterion};

use cachescope_core::{deserialize, serialize, snapshot_digest, DehydratedState, QueryKey, Value};
use cachescope_testkit::fixtures::DeviceFixture;

fn wide_value(n: usize) -> Value {
    let shared = Value::object([("id", Value::from(1)), ("name", Value::from("shared"))]);
    Value::array((0..n).map(|i| {
        Value::object([
            ("index", Value::from(i as u64)),
            ("at", Value::date_millis(i as i64 * 1000).unwrap_or(Value::Null)),
            ("owner", shared.clone()),
            ("tags", Value::set([Value::from("a"), Value::from("b")])),
        ])
    }))
}

fn bench_serialize(c: &mut Criterion) {
    let value = wide_value(500);
    c.bench_function("serialize 500 rows", |b| b.iter(|| serialize(black_box(&value))));

    let payload = serialize(&value);
    c.bench_function("deserialize 500 rows", |b| {
        b.iter(|| deserialize(black_box(&payload)))
    });
}

fn bench_snapshot(c: &mut Criterion) {
    let device = DeviceFixture::with_id("bench", "Bench");
    for i in 0..200 {
        device.put_query(QueryKey::new([Value::from("item"), Value::from(i as u64)]), wide_value(5));
    }
    let payload = match device.snapshot() {
        cachescope_sync::SyncMessage::DehydratedState(envelope) => envelope.state,
    };

    c.bench_function("snapshot digest 200 queries", |b| {
        b.iter(|| snapshot_digest(black_box(&payload)))
    });
    c.bench_function("snapshot decode 200 queries", |b| {
        b.iter(|| DehydratedState::from_payload(black_box(&payload)))
    });
}

criterion_group!(benches, bench_serialize, bench_snapshot);
criterion_main!(benches);
