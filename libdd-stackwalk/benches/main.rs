// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use criterion::{criterion_group, criterion_main, Criterion};


#[cfg(all(unix, feature = "benchmarking"))]
fn active_benches(c: &mut Criterion) {
    unwind_bench::unwind_benches(c);
}

#[cfg(any(windows, not(feature = "benchmarking")))]
fn active_benches(_: &mut Criterion) {
    println!("Benchmarks are disabled.");
}

criterion_group!(benches, active_benches);
criterion_main!(benches);
