use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rand::prelude::*;
use rand::rng;
use rust_autograd_lib::nn::{Dropout, Linear, Sequential};
use rust_autograd_lib::{ops, CpuBackend, CpuTensor, Module, Tensor};

fn create_random(shape: &[usize], requires_grad: bool) -> CpuTensor {
    let size = shape.iter().product();
    let mut rng_instance = rng();
    let data: Vec<f32> = (0..size).map(|_| rng_instance.random::<f32>()).collect();
    Tensor::<CpuBackend>::from_vec(data, shape, requires_grad).unwrap()
}

fn bench_mlp_backward(c: &mut Criterion) {
    let sizes = [(32, 64), (128, 256), (256, 1024)];
    let mut group = c.benchmark_group("mlp_forward_backward");

    for &(batch, hidden) in sizes.iter() {
        let model: Sequential<CpuBackend> = Sequential::new(vec![
            Box::new(Linear::new(hidden, hidden, true).unwrap()),
            Box::new(Dropout::new(0.1).unwrap()),
            Box::new(Linear::new(hidden, 1, true).unwrap()),
        ])
        .unwrap();
        let x = create_random(&[batch, hidden], false);

        group.bench_function(format!("mlp_{}x{}", batch, hidden), |bencher| {
            bencher.iter(|| {
                model.zero_grad();
                let out = model.forward(black_box(&x)).unwrap();
                let loss = ops::mean(&ops::mul(&out, &out).unwrap(), None).unwrap();
                loss.backward().unwrap();
                black_box(loss)
            });
        });
    }
    group.finish();
}

fn bench_transpose(c: &mut Criterion) {
    let shapes: [(&[usize], &[usize], &str); 3] = [
        (&[256, 256], &[1, 0], "256x256"),
        (&[32, 64, 128], &[2, 0, 1], "32x64x128"),
        (&[16, 16, 16, 16], &[3, 1, 2, 0], "16x16x16x16"),
    ];
    let mut group = c.benchmark_group("transpose");

    for (shape, axes, label) in shapes.iter() {
        let x = create_random(shape, true);

        group.bench_function(format!("forward_{}", label), |bencher| {
            bencher.iter(|| black_box(ops::transpose(black_box(&x), Some(*axes)).unwrap()));
        });

        group.bench_function(format!("backward_{}", label), |bencher| {
            bencher.iter(|| {
                x.zero_grad();
                let y = ops::transpose(&x, Some(*axes)).unwrap();
                ops::sum(&y, None).unwrap().backward().unwrap();
            });
        });
    }
    group.finish();
}

fn bench_diamond_graph(c: &mut Criterion) {
    let mut group = c.benchmark_group("graph_depth");

    for depth in [16usize, 128, 512].iter() {
        let x = create_random(&[64], true);

        group.bench_function(format!("diamond_chain_{}", depth), |bencher| {
            bencher.iter(|| {
                x.zero_grad();
                let mut y = x.clone();
                for _ in 0..*depth {
                    // two paths into every node exercise gradient accumulation
                    y = ops::add(&ops::mul_scalar(&y, 0.5).unwrap(), &ops::mul_scalar(&y, 0.5).unwrap())
                        .unwrap();
                }
                ops::sum(&y, None).unwrap().backward().unwrap();
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_mlp_backward, bench_transpose, bench_diamond_graph);
criterion_main!(benches);
