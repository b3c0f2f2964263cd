//! Handle allocation/release throughput.

use criterion::{Criterion, black_box, criterion_group, criterion_main};

use sable_runtime::handle::{
    sable_runtime_destroy, sable_runtime_new, sable_value_new_int, sable_value_release,
};
use sable_runtime::sequence::{sable_sequence_append, sable_sequence_new};

fn bench_cell_churn(c: &mut Criterion) {
    c.bench_function("alloc_release_1000_ints", |b| {
        let runtime = sable_runtime_new();
        b.iter(|| unsafe {
            for i in 0..1000i64 {
                let h = sable_value_new_int(runtime, black_box(i));
                sable_value_release(runtime, h);
            }
        });
        unsafe { sable_runtime_destroy(runtime) };
    });

    c.bench_function("append_1000_then_release", |b| {
        let runtime = sable_runtime_new();
        b.iter(|| unsafe {
            let seq = sable_sequence_new(runtime, 0);
            for i in 0..1000i64 {
                let h = sable_value_new_int(runtime, black_box(i));
                sable_sequence_append(runtime, seq, h);
                sable_value_release(runtime, h);
            }
            sable_value_release(runtime, seq);
        });
        unsafe { sable_runtime_destroy(runtime) };
    });
}

criterion_group!(benches, bench_cell_churn);
criterion_main!(benches);
