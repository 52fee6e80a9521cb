use chronostruct::data::GenotypeData;
use chronostruct::{Cavi, CaviConfig};
use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Three sampling times, each drawn from a two-population mixture with
/// population frequencies that differ per locus.
fn synthetic_data(individuals_per_step: usize, nloci: usize) -> GenotypeData {
    let mut rng = StdRng::seed_from_u64(0x5EED_CAF1 + nloci as u64);
    let freqs: Vec<[f64; 2]> = (0..nloci)
        .map(|_| [rng.gen_range(0.05..0.95), rng.gen_range(0.05..0.95)])
        .collect();
    let blocks = (0..3)
        .map(|_| {
            Array2::from_shape_fn((individuals_per_step, nloci), |(d, l)| {
                let p = freqs[l][d % 2];
                u8::from(rng.gen_bool(p)) + u8::from(rng.gen_bool(p))
            })
        })
        .collect();
    GenotypeData::from_blocks(vec![0, 20, 40], blocks).expect("consistent synthetic blocks")
}

fn benchmark_epoch(c: &mut Criterion) {
    let mut group = c.benchmark_group("cavi_epoch");
    group.sample_size(10);
    for &nloci in &[200_usize, 1000] {
        let data = synthetic_data(30, nloci);
        group.throughput(Throughput::Elements(nloci as u64));
        group.bench_with_input(BenchmarkId::new("single_epoch", nloci), &data, |b, input| {
            b.iter(|| {
                let mut config = CaviConfig::new(2, vec![1.0, 1.0], 1000.0);
                config.max_epochs = 1;
                let mut rng = StdRng::seed_from_u64(7);
                let mut cavi = Cavi::new(config, input, None, &mut rng).expect("valid input");
                black_box(cavi.run_stochastic());
            });
        });
    }
    group.finish();
}

criterion_group!(benches, benchmark_epoch);
criterion_main!(benches);
