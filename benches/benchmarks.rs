// benches/benchmarks.rs — Performance benchmarks (criterion)
//
// The store mutates the streaming tail in place; this tracks the cost of
// applying a long run of text deltas to one message.

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use dealgenie::conversation::{ConversationStore, Message};
use dealgenie::transport::StreamEvent;

fn bench_delta_application(c: &mut Criterion) {
    c.bench_function("apply_10k_text_deltas", |b| {
        b.iter(|| {
            let mut store = ConversationStore::new();
            store.push(Message::user("any deals?"));
            store.push(Message::placeholder());
            for _ in 0..10_000 {
                store.apply(StreamEvent::Text {
                    content: "delta ".into(),
                });
            }
            black_box(store.messages().last().unwrap().content.len())
        })
    });

    c.bench_function("apply_deals_replacement", |b| {
        let deals: Vec<serde_json::Value> = (0..50)
            .map(|i| serde_json::json!({"id": i, "title": format!("deal {i}")}))
            .collect();
        b.iter(|| {
            let mut store = ConversationStore::new();
            store.push(Message::placeholder());
            for _ in 0..100 {
                store.apply(StreamEvent::Deals {
                    deals: deals.clone(),
                });
            }
            black_box(store.deals().len())
        })
    });
}

criterion_group!(benches, bench_delta_application);
criterion_main!(benches);
