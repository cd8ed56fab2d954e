//! Benchmarks for tickroom state queries

use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};

use tickroom_core::{Post, PostName, RoomId};
use tickroom_state::{ReconciliationEngine, RoomConfig, SimulationFns};

type Sim = SimulationFns<u64, u64, u64>;

fn sim() -> Sim {
    SimulationFns::new(
        0u64,
        |s| s.wrapping_mul(31).wrapping_add(1),
        |e: &u64, s| s ^ e,
        |_past, current| current,
    )
}

/// Engine at 20 Hz with one post every `every` ticks up to `ticks`
fn populated(config: RoomConfig, ticks: i64, every: i64) -> ReconciliationEngine<Sim> {
    let mut engine = ReconciliationEngine::new(sim(), config);
    let room = RoomId::new("bench");
    for (index, tick) in (0..ticks).step_by(every as usize).enumerate() {
        let time = tick * 50;
        engine.add_room_post(Post::confirmed(
            room.clone(),
            index as u64,
            time,
            time,
            PostName::new(format!("p{index}")),
            index as u64,
        ));
    }
    engine
}

fn bench_state_at_cached(c: &mut Criterion) {
    let mut engine = populated(RoomConfig::new(20, 300), 10_000, 4);
    engine.state_at(9_999);

    c.bench_function("state_at_cached_warm", |b| {
        b.iter(|| black_box(engine.state_at(black_box(9_999))))
    });
}

fn bench_state_at_uncached(c: &mut Criterion) {
    let engine = populated(RoomConfig::new(20, 300).with_cache(false), 10_000, 4);

    c.bench_function("state_at_uncached", |b| {
        b.iter(|| black_box(engine.state_at_uncached(black_box(9_999))))
    });
}

fn bench_late_post_invalidation(c: &mut Criterion) {
    c.bench_function("late_post_then_query", |b| {
        b.iter_batched(
            || {
                let mut engine = populated(RoomConfig::new(20, 300), 10_000, 4);
                engine.state_at(9_999);
                engine
            },
            |mut engine| {
                engine.add_room_post(Post::confirmed(
                    RoomId::new("bench"),
                    1_000_000,
                    9_000 * 50,
                    9_000 * 50,
                    PostName::new("late"),
                    7,
                ));
                black_box(engine.state_at(9_999))
            },
            BatchSize::LargeInput,
        )
    });
}

fn bench_render_state(c: &mut Criterion) {
    let mut engine = populated(RoomConfig::new(20, 300), 10_000, 4);
    engine.state_at(9_999);

    c.bench_function("render_state", |b| {
        b.iter(|| black_box(engine.render_state(black_box(9_999), Some(120))))
    });
}

criterion_group!(
    benches,
    bench_state_at_cached,
    bench_state_at_uncached,
    bench_late_post_invalidation,
    bench_render_state,
);
criterion_main!(benches);
