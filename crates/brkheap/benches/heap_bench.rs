//! Heap benchmarks against the system allocator.

use std::alloc::{GlobalAlloc, Layout, System};
use std::hint::black_box;

use brkheap::{Heap, HeapConfig, ReservedSegment};
use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};

fn heap() -> Heap<ReservedSegment> {
    let config = HeapConfig::DEFAULT
        .with_large_threshold(128 * 1024)
        .without_journal();
    Heap::try_with_config(ReservedSegment::new(1 << 30).unwrap(), config).unwrap()
}

fn bench_acquire_release_cycle(c: &mut Criterion) {
    let sizes: &[usize] = &[16, 64, 256, 1024, 4096, 32768, 262_144];
    let mut group = c.benchmark_group("acquire_release_cycle");
    let heap = heap();

    for &size in sizes {
        let layout = Layout::from_size_align(size, 16).unwrap();
        group.bench_with_input(BenchmarkId::new("brkheap", size), &layout, |b, &layout| {
            b.iter(|| unsafe {
                let p = heap.alloc(layout);
                black_box(p);
                heap.dealloc(p, layout);
            });
        });
        group.bench_with_input(BenchmarkId::new("system", size), &layout, |b, &layout| {
            b.iter(|| unsafe {
                let p = System.alloc(layout);
                black_box(p);
                System.dealloc(p, layout);
            });
        });
    }
    group.finish();
}

fn bench_interior_reuse(c: &mut Criterion) {
    let mut group = c.benchmark_group("interior_reuse");
    let heap = heap();
    // Pin the top so released blocks stay listed and get reused.
    let pinned: Vec<_> = (0..64).map(|_| heap.acquire(512).unwrap()).collect();
    let _top = heap.acquire(16).unwrap();
    for p in pinned {
        unsafe { heap.release(p).unwrap() };
    }

    group.bench_function("first_fit_hit", |b| {
        b.iter(|| {
            let p = heap.acquire(black_box(256)).unwrap();
            unsafe { heap.release(p).unwrap() };
        });
    });
    group.finish();
}

fn bench_burst(c: &mut Criterion) {
    let mut group = c.benchmark_group("burst");
    let heap = heap();

    group.bench_function("brkheap_256x64B", |b| {
        b.iter(|| {
            let blocks: Vec<_> = (0..256).map(|_| heap.acquire(64).unwrap()).collect();
            for p in blocks.into_iter().rev() {
                unsafe { heap.release(p).unwrap() };
            }
        });
    });

    group.bench_function("system_256x64B", |b| {
        let layout = Layout::from_size_align(64, 16).unwrap();
        b.iter(|| {
            let blocks: Vec<_> = (0..256).map(|_| unsafe { System.alloc(layout) }).collect();
            for p in blocks.into_iter().rev() {
                unsafe { System.dealloc(p, layout) };
            }
        });
    });

    group.finish();
}

criterion_group!(benches, bench_acquire_release_cycle, bench_interior_reuse, bench_burst);
criterion_main!(benches);
