use std::sync::Arc;
use std::thread;

use criterion::{criterion_group, criterion_main, Criterion};

use cadence_core::{InterpolationTimingCorrector, SwapBufferConfig, SwapBufferGuard};

fn bench_swap_uncontended(c: &mut Criterion) {
    let buffer: SwapBufferGuard<[u64; 16]> = SwapBufferGuard::new(SwapBufferConfig {
        slots: 3,
        repeated_reads: true,
        repeated_writes: false,
    })
    .expect("valid config");

    c.bench_function("swap_write_read_cycle", |b| {
        let mut sequence = 0u64;
        b.iter(|| {
            sequence += 1;
            if let Some(mut write) = buffer.write() {
                write[0] = sequence;
            }
            if let Some(read) = buffer.read() {
                criterion::black_box(read[0]);
            }
        });
    });
}

fn bench_swap_contended(c: &mut Criterion) {
    c.bench_function("swap_write_under_reader", |b| {
        let buffer: Arc<SwapBufferGuard<[u64; 16]>> = Arc::new(
            SwapBufferGuard::new(SwapBufferConfig {
                slots: 3,
                repeated_reads: true,
                repeated_writes: false,
            })
            .expect("valid config"),
        );
        let stop = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let reader = {
            let buffer = Arc::clone(&buffer);
            let stop = Arc::clone(&stop);
            thread::spawn(move || {
                while !stop.load(std::sync::atomic::Ordering::Relaxed) {
                    if let Some(read) = buffer.read() {
                        criterion::black_box(read[0]);
                    }
                }
            })
        };

        let mut sequence = 0u64;
        b.iter(|| {
            sequence += 1;
            if let Some(mut write) = buffer.write() {
                write[0] = sequence;
            }
        });

        stop.store(true, std::sync::atomic::Ordering::Relaxed);
        reader.join().expect("reader panicked");
    });
}

fn bench_timing_correction(c: &mut Criterion) {
    c.bench_function("timing_correct", |b| {
        let mut itc = InterpolationTimingCorrector::new();
        let mut time = 1_000_000u64;
        b.iter(|| {
            time += 50_000;
            criterion::black_box(itc.correct(time, time + 12_345, 50_000));
        });
    });
}

criterion_group!(
    benches,
    bench_swap_uncontended,
    bench_swap_contended,
    bench_timing_correction
);
criterion_main!(benches);
