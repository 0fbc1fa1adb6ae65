use conformal_intervals::booster::GradientBooster;
use conformal_intervals::conformal::quantile::conformal_quantile;
use conformal_intervals::conformal::transductive::TransductiveConformal;
use conformal_intervals::conformal::{ConformalMethod, ConformalParams, ConformalPredictor};
use conformal_intervals::data::Matrix;
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Duration;

fn create_data(n_samples: usize, n_features: usize) -> (Vec<f64>, Vec<f64>) {
    let mut rng = StdRng::seed_from_u64(1903);
    let x: Vec<f64> = (0..n_samples * n_features).map(|_| rng.gen::<f64>()).collect();
    let r: Vec<f64> = (0..n_samples)
        .map(|i| (rng.gen::<f64>() * 2.0 - 1.0) * (0.1 + x[i]))
        .collect();
    (x, r)
}

pub fn conformal_benchmarks(c: &mut Criterion) {
    let (x, r) = create_data(800, 5);
    let data = Matrix::new(&x, 800, 5);

    c.bench_function("conformal_quantile", |b| {
        b.iter(|| conformal_quantile(black_box(&r), black_box(0.1)))
    });

    let mut tcp = TransductiveConformal::new(0.05).set_parallel(false);
    tcp.fit(&data, &r).unwrap();
    c.bench_function("TCP Predict (Single Threaded)", |b| {
        b.iter(|| tcp.predict_with_rank(black_box(&data)))
    });
    let tcp_parallel = tcp.clone().set_parallel(true);
    c.bench_function("TCP Predict (Multi Threaded)", |b| {
        b.iter(|| tcp_parallel.predict_with_rank(black_box(&data)))
    });

    let mut fit_group = c.benchmark_group("fit_predictor");
    fit_group.warm_up_time(Duration::from_secs(5));
    fit_group.sample_size(20);
    let params = ConformalParams {
        n_features: 5,
        booster: GradientBooster::default().set_iterations(20).set_parallel(false),
        ..Default::default()
    };
    for method in [ConformalMethod::CQR, ConformalMethod::CondHist] {
        fit_group.bench_function(method.name(), |b| {
            b.iter(|| {
                let mut predictor = ConformalPredictor::new(method, &params);
                predictor.fit(black_box(&data), black_box(&r)).unwrap();
            })
        });
    }
    fit_group.finish();
}

criterion_group!(benches, conformal_benchmarks);
criterion_main!(benches);
