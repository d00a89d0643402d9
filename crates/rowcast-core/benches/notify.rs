//! Notification fan-out benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rowcast_core::{
    record_data, NotificationEngine, Operation, RecordId, RelationDef, Schema, SubscriptionId,
};
use serde_json::json;

fn blog_engine(subscribers: u64) -> NotificationEngine {
    let schema = Schema::new()
        .with_type("User")
        .with_type("Post")
        .with_type("Comment")
        .with_relation(RelationDef::has_many("User", "Post"))
        .with_relation(RelationDef::has_many("Post", "Comment"));
    let engine = NotificationEngine::new(&schema).unwrap();

    for i in 0..subscribers {
        let id = SubscriptionId::from(i);
        engine.add_subscription("Comment", &id, None).unwrap();
        engine
            .add_subscription("Post", &id, Some(&RecordId::from("p1")))
            .unwrap();
    }
    engine
}

fn bench_notify(c: &mut Criterion) {
    let mut group = c.benchmark_group("engine/notify");

    for subscribers in [1u64, 10, 100, 1000] {
        let engine = blog_engine(subscribers);
        let comment = record_data(json!({"id": "c1", "PostId": "p1", "text": "hi"}));
        let fields = vec!["text".to_string()];

        group.bench_with_input(
            BenchmarkId::new("create_with_cascade", subscribers),
            &subscribers,
            |b, _| {
                b.iter(|| {
                    black_box(
                        engine
                            .notify("Comment", Operation::Create, &fields, &comment)
                            .unwrap(),
                    );
                });
            },
        );
    }

    group.bench_function("no_subscribers", |b| {
        let engine = blog_engine(0);
        let user = record_data(json!({"id": "u1"}));

        b.iter(|| {
            black_box(engine.notify("User", Operation::Update, &[], &user).unwrap());
        });
    });

    group.finish();
}

fn bench_registry(c: &mut Criterion) {
    let mut group = c.benchmark_group("engine/registry");

    group.bench_function("add_remove", |b| {
        let engine = blog_engine(100);
        let id = SubscriptionId::from("bench");
        let record = RecordId::from("p42");

        b.iter(|| {
            engine.add_subscription("Post", &id, Some(&record)).unwrap();
            engine
                .remove_subscription("Post", &id, Some(&record))
                .unwrap();
        });
    });

    group.finish();
}

criterion_group!(benches, bench_notify, bench_registry);
criterion_main!(benches);
