use criterion::{black_box, criterion_group, criterion_main, Criterion};
use scribe_collab::hub::Hub;
use scribe_collab::pad::Pad;
use scribe_collab::protocol::{ClientMessage, ServerMessage};
use scribe_collab::settings::Settings;
use scribe_collab::storage::{DataStore, MemoryDataStore};
use scribe_core::{make_splice, Attribute, PoolJson};
use std::sync::Arc;
use uuid::Uuid;

fn fresh_pad() -> Pad {
    let store: Arc<dyn DataStore> = Arc::new(MemoryDataStore::new());
    let text = "the quick brown fox jumps over the lazy dog\n".repeat(40);
    Pad::load_or_create("bench", store, Arc::new(Settings::default()), Some(&text), None).unwrap()
}

fn bench_user_changes_decode(c: &mut Criterion) {
    let msg = ClientMessage::UserChanges {
        base_rev: 41,
        changeset: "Z:1a>5=k*0+5$hello".into(),
        apool: PoolJson::default(),
    };
    let encoded = msg.encode().unwrap();

    c.bench_function("user_changes_decode", |b| {
        b.iter(|| black_box(ClientMessage::decode(black_box(&encoded)).unwrap()))
    });
}

fn bench_new_changes_encode(c: &mut Criterion) {
    let msg = ServerMessage::NewChanges {
        new_rev: 42,
        changeset: "Z:1a>5=k*0+5$hello".into(),
        apool: PoolJson::default(),
        author: Some("a.0123456789abcdef".into()),
        time: 1_700_000_000_000,
    };

    c.bench_function("new_changes_encode", |b| {
        b.iter(|| black_box(black_box(&msg).encode().unwrap()))
    });
}

fn bench_append_revision(c: &mut Criterion) {
    let mut pad = fresh_pad();

    c.bench_function("append_revision_1_char", |b| {
        b.iter(|| {
            let mut pool = pad.pool().clone();
            let cs = make_splice(
                pad.text(),
                100,
                0,
                "x",
                &[Attribute::author("a.bench")],
                &mut pool,
            )
            .unwrap();
            *pad.pool_mut() = pool;
            black_box(pad.append_revision(&cs, Some("a.bench")).unwrap());
        })
    });
}

fn bench_changeset_between(c: &mut Criterion) {
    let mut pad = fresh_pad();
    for i in 0..100 {
        pad.splice_text(i * 3, 1, "ab", Some("a.bench")).unwrap();
    }

    c.bench_function("changeset_between_100_revs", |b| {
        b.iter(|| black_box(pad.get_changeset_between(black_box(0), black_box(100)).unwrap()))
    });
}

fn bench_hub_fan_out(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("hub_broadcast_100_conns", |b| {
        b.iter(|| {
            rt.block_on(async {
                let hub = Hub::new(16, 200);

                // Add 100 connections
                let mut receivers = Vec::new();
                for _ in 0..100 {
                    let conn = Uuid::new_v4();
                    receivers.push(hub.connect(conn).await);
                    hub.join("bench", conn).await;
                }

                // Broadcast 1 message
                let msg: Arc<str> = Arc::from("{\"type\":\"COLLABROOM\"}");
                black_box(hub.broadcast("bench", black_box(msg)).await);
            });
        })
    });
}

fn bench_hub_1000_messages(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("hub_1000_msgs_100_conns", |b| {
        b.iter(|| {
            rt.block_on(async {
                let hub = Hub::new(1024, 200);

                let mut receivers = Vec::new();
                for _ in 0..100 {
                    let conn = Uuid::new_v4();
                    receivers.push(hub.connect(conn).await);
                    hub.join("bench", conn).await;
                }

                // Broadcast 1000 messages
                for i in 0..1000u64 {
                    let msg: Arc<str> = Arc::from(i.to_string());
                    hub.broadcast("bench", black_box(msg)).await;
                }
            });
        })
    });
}

criterion_group!(
    benches,
    bench_user_changes_decode,
    bench_new_changes_encode,
    bench_append_revision,
    bench_changeset_between,
    bench_hub_fan_out,
    bench_hub_1000_messages,
);
criterion_main!(benches);
