use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use std::time::Duration;

use burn::prelude::*;
use burn::tensor::TensorData;
use burn_ndarray::NdArray;

use tabular_widedeep::widedeep::models::attention::Attention;
use tabular_widedeep::widedeep::models::attention::full_attention::MultiHeadAttention;
use tabular_widedeep::widedeep::models::config::{BlockKind, ColumnIndex, TabTransformerConfig};
use tabular_widedeep::widedeep::models::init::RngContext;

type BenchBackend = NdArray<f32>;

fn model_config(n_cat: usize, n_cont: usize, width: usize, block_kind: BlockKind) -> TabTransformerConfig {
    let cat: Vec<String> = (0..n_cat).map(|i| format!("cat_{i}")).collect();
    let cont: Vec<String> = (0..n_cont).map(|i| format!("cont_{i}")).collect();
    let column_idx = ColumnIndex::from_names(cat.iter().chain(cont.iter()).cloned()).unwrap();

    TabTransformerConfig::new(column_idx, cat.into_iter().map(|name| (name, 10)).collect())
        .with_continuous_cols(Some(cont))
        .with_input_dim(width)
        .with_n_heads(4)
        .with_n_blocks(2)
        .with_ff_hidden_dim(width * 4)
        .with_block_kind(block_kind)
}

fn input(batch: usize, width: usize, device: &<BenchBackend as Backend>::Device) -> Tensor<BenchBackend, 2> {
    let data: Vec<f32> = (0..batch * width).map(|i| (i % 10) as f32).collect();
    Tensor::from_data(TensorData::new(data, [batch, width]), device)
}

fn benchmark_model_forward(c: &mut Criterion) {
    let device = Default::default();

    let configs = vec![
        // (name, n_cat, n_cont, width, batch)
        ("small", 4, 2, 16, 64),
        ("medium", 8, 4, 32, 256),
        ("large", 16, 8, 32, 512),
    ];

    let mut group = c.benchmark_group("tabular_forward");
    group.measurement_time(Duration::from_secs(10));
    group.sample_size(30);

    for (name, n_cat, n_cont, width, batch) in configs {
        for block_kind in [BlockKind::Standard, BlockKind::Dual] {
            let model = model_config(n_cat, n_cont, width, block_kind)
                .init::<BenchBackend>(&device)
                .unwrap();
            let x = input(batch, n_cat + n_cont, &device);

            group.bench_with_input(
                BenchmarkId::new(format!("{block_kind:?}"), name),
                &x,
                |b, x| b.iter(|| black_box(model.forward(black_box(x.clone())))),
            );
        }
    }

    group.finish();
}

fn benchmark_attention(c: &mut Criterion) {
    let device: <BenchBackend as Backend>::Device = Default::default();
    let rng = RngContext::<BenchBackend>::new(42, device.clone());

    let mut group = c.benchmark_group("attention_forward");
    group.measurement_time(Duration::from_secs(5));

    for tokens in [8, 32, 128] {
        let attention = MultiHeadAttention::new(32, 4, 0.0, &rng);
        let data: Vec<f32> = (0..64 * tokens * 32).map(|i| (i as f32 * 0.01).sin()).collect();
        let x = Tensor::<BenchBackend, 3>::from_data(TensorData::new(data, [64, tokens, 32]), &device);

        group.bench_with_input(BenchmarkId::new("tokens", tokens), &x, |b, x| {
            b.iter(|| black_box(attention.attend(black_box(x.clone()))))
        });
    }

    group.finish();
}

criterion_group!(benches, benchmark_model_forward, benchmark_attention);
criterion_main!(benches);
