use criterion::{criterion_group, criterion_main, Criterion};
use danmaku_overlay::lanes::LaneAllocator;
use danmaku_overlay::surface::{SurfaceController, SurfaceRect};
use danmaku_overlay::DanmakuRecord;
use std::sync::Arc;
use std::time::{Duration, Instant};

fn bench_lane_allocation(c: &mut Criterion) {
    let mut lanes = LaneAllocator::new(2160, 1.0);
    c.bench_function("lane_next_4k", |b| b.iter(|| lanes.next(27)));
}

fn bench_surface_tick(c: &mut Criterion) {
    let monitors = [SurfaceRect::new(0, 0, 3840, 2160)];
    let mut controller = SurfaceController::new(0, &monitors, 1.0).unwrap();
    for i in 0..1_000 {
        let record = DanmakuRecord::builder(format!("message {i}"))
            .speed(1)
            .build()
            .unwrap();
        controller.handle_spawn(Arc::new(record));
    }
    let t0 = Instant::now();
    controller.tick(t0);
    let mut offset = 0u64;
    c.bench_function("surface_tick_1k", |b| {
        b.iter(|| {
            offset += 1;
            controller.tick(t0 + Duration::from_micros(offset))
        })
    });
}

criterion_group!(benches, bench_lane_allocation, bench_surface_tick);
criterion_main!(benches);
