use chronostruct::data::{GenotypeData, GenotypeSource, read_pop_labels, read_snp_matrix};
use chronostruct::{Cavi, CaviConfig, CaviError, ConvergenceCheck, FitProgressObserver};
use flate2::Compression;
use flate2::write::GzEncoder;
use ndarray::array;
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::fs;
use std::io::Write;
use tempfile::tempdir;

fn small_scenario() -> GenotypeData {
    GenotypeData::from_blocks(
        vec![100, 120],
        vec![array![[2, 0, 1], [0, 2, 1]], array![[2, 1, 0], [0, 2, 2]]],
    )
    .unwrap()
}

#[test]
fn small_scenario_terminates_with_consistent_parameters() {
    let data = small_scenario();
    let config = CaviConfig::new(2, vec![1.0, 1.0], 500.0);
    let mut rng = StdRng::seed_from_u64(2024);
    let mut cavi = Cavi::new(config, &data, None, &mut rng).unwrap();

    let initial_sums: Vec<f64> = (0..2)
        .flat_map(|t| (0..2).map(move |d| (t, d)))
        .map(|(t, d)| cavi.theta().individual(t, d).sum())
        .collect();

    let summary = cavi.run_stochastic();
    assert!(summary.epochs >= 1 && summary.epochs <= 100);
    assert!(summary.converged || summary.epochs == 100);

    // Every target has mass Σα + 2·n_obs = 2 + 2·3, and each step is a convex
    // combination, so the total mass stays between the start and the target.
    let evidence_mass = 2.0 + 2.0 * 3.0;
    for (i, (t, d)) in [(0, 0), (0, 1), (1, 0), (1, 1)].into_iter().enumerate() {
        let theta = cavi.theta().individual(t, d);
        assert!(theta.iter().all(|&v| v > 0.0));
        let low = initial_sums[i].min(evidence_mass) - 1e-9;
        let high = initial_sums[i].max(evidence_mass) + 1e-9;
        let sum = theta.sum();
        assert!(sum >= low && sum <= high, "sum {sum} outside [{low}, {high}]");
    }
    assert!(
        cavi.freqs()
            .mean
            .iter()
            .all(|&m| (0.0..=1.0).contains(&m))
    );
}

#[test]
fn skipping_unchanged_loci_does_not_change_the_fit() {
    let data = small_scenario();
    let mut fitted = Vec::new();
    for skip in [true, false] {
        let mut config = CaviConfig::new(2, vec![1.0, 1.0], 500.0);
        config.skip_unchanged_loci = skip;
        config.max_epochs = 30;
        let mut rng = StdRng::seed_from_u64(99);
        let mut cavi = Cavi::new(config, &data, None, &mut rng).unwrap();
        cavi.run_stochastic();
        fitted.push(cavi.theta().clone());
    }
    for (a, b) in fitted[0].iter().zip(fitted[1].iter()) {
        for (x, y) in a.iter().zip(b.iter()) {
            assert!((x - y).abs() < 1e-3 * y.abs().max(1.0), "{x} vs {y}");
        }
    }
}

#[derive(Default)]
struct RecordingProgress {
    started: Vec<(usize, usize)>,
    advanced: usize,
    finished: Vec<ConvergenceCheck>,
}

impl FitProgressObserver for RecordingProgress {
    fn on_epoch_start(&mut self, epoch: usize, total_loci: usize) {
        self.started.push((epoch, total_loci));
    }

    fn on_locus_advance(&mut self, _: usize, _: usize) {
        self.advanced += 1;
    }

    fn on_epoch_finish(&mut self, _: usize, check: &ConvergenceCheck) {
        self.finished.push(*check);
    }
}

#[test]
fn progress_observer_sees_every_epoch_and_locus() {
    let data = small_scenario();
    let mut config = CaviConfig::new(2, vec![1.0, 1.0], 500.0);
    config.max_epochs = 4;
    config.tolerance = 1e-300;
    let mut rng = StdRng::seed_from_u64(5);
    let mut cavi = Cavi::new(config, &data, None, &mut rng).unwrap();
    let mut progress = RecordingProgress::default();
    let summary = cavi.run_stochastic_with_progress(&mut progress);

    assert_eq!(summary.epochs, 4);
    assert!(!summary.converged);
    assert_eq!(progress.started, vec![(0, 3), (1, 3), (2, 3), (3, 3)]);
    assert_eq!(progress.advanced, 12);
    assert_eq!(progress.finished.len(), 4);
    assert_eq!(progress.finished[3].change, summary.change);
}

#[test]
fn files_on_disk_drive_a_supervised_fit() {
    let dir = tempdir().unwrap();
    let generations = dir.path().join("samples.gen");
    let genotypes = dir.path().join("genotypes.txt.gz");
    let labels = dir.path().join("labels.txt");
    fs::write(&generations, "30\n10\n10\n30\n").unwrap();
    let mut encoder = GzEncoder::new(fs::File::create(&genotypes).unwrap(), Compression::default());
    encoder
        .write_all(b"2 2 0 0\n2 1 0 9\n0 0 2 2\n0 1 2 2\n")
        .unwrap();
    encoder.finish().unwrap();
    // Column order is 30, 10, 10, 30, so the label lines describe (t, d) =
    // (0, 0), (0, 1), (1, 0), (1, 1).
    fs::write(&labels, "0\n-1\n-1\n1\n").unwrap();

    let data = read_snp_matrix(&genotypes, &generations, Some(4)).unwrap();
    assert_eq!(data.generations(), &[10, 30]);
    assert_eq!(data.total_loci(), 4);
    let labels = read_pop_labels(&labels, &data).unwrap();
    assert_eq!(labels.get(0, 0), Some(0));
    assert_eq!(labels.get(1, 1), Some(1));

    let config = CaviConfig::new(2, vec![0.5, 0.5], 1000.0);
    let mut rng = StdRng::seed_from_u64(11);
    let mut cavi = Cavi::new(config, &data, Some(labels), &mut rng).unwrap();
    let clamped = cavi.theta().individual(0, 0).to_owned();
    cavi.run_stochastic();
    assert_eq!(cavi.theta().individual(0, 0), clamped);

    let prefix = dir.path().join("run");
    let paths = cavi.write_results(&prefix).unwrap();
    let theta_table = fs::read_to_string(&paths.theta).unwrap();
    assert_eq!(theta_table.lines().count(), 1 + 4);
    assert!(theta_table.starts_with("#GENERATION\tINDIVIDUAL\tSAMPLE\tPOP1\tPOP2\n"));
    let freq_table = fs::read_to_string(&paths.freqs).unwrap();
    assert_eq!(freq_table.lines().count(), 1 + 4);
    assert!(freq_table.starts_with("#LOCUS\tG10_POP1\tG10_POP2\tG30_POP1\tG30_POP2\n"));

    let variance_table = fs::read_to_string(&paths.freq_variances).unwrap();
    let mut rows = variance_table.lines();
    assert_eq!(rows.next(), freq_table.lines().next());
    let mut data_rows = 0;
    for (l, row) in rows.enumerate() {
        let fields: Vec<&str> = row.split('\t').collect();
        assert_eq!(fields.len(), 1 + 4, "row {row}");
        assert_eq!(fields[0], (l + 1).to_string());
        for field in &fields[1..] {
            let variance: f64 = field.parse().unwrap();
            assert!((1e-12..=0.25).contains(&variance), "variance {variance}");
        }
        data_rows += 1;
    }
    assert_eq!(data_rows, 4);

    // Each variance matches the fitted tensor at the same (generation, population).
    let first_row: Vec<f64> = variance_table
        .lines()
        .nth(1)
        .unwrap()
        .split('\t')
        .skip(1)
        .map(|field| field.parse().unwrap())
        .collect();
    let variance = &cavi.freqs().variance;
    let expected = [
        variance[[0, 0, 0]],
        variance[[0, 1, 0]],
        variance[[1, 0, 0]],
        variance[[1, 1, 0]],
    ];
    for (written, fitted) in first_row.iter().zip(expected) {
        assert_eq!(*written, fitted);
    }
}

#[test]
fn labels_out_of_range_fail_construction() {
    let dir = tempdir().unwrap();
    let labels_path = dir.path().join("labels.txt");
    fs::write(&labels_path, "0\n3\n-1\n-1\n").unwrap();
    let data = small_scenario();
    let labels = read_pop_labels(&labels_path, &data).unwrap();
    let mut rng = StdRng::seed_from_u64(0);
    let result = Cavi::new(
        CaviConfig::new(2, vec![1.0, 1.0], 100.0),
        &data,
        Some(labels),
        &mut rng,
    );
    assert!(matches!(result, Err(CaviError::InvalidInput(_))));
}

#[test]
fn held_out_bound_is_finite_after_fitting() {
    let mut data = small_scenario();
    let withheld = data.hold_out(0.5, 17).unwrap();
    assert!(withheld > 0, "seed 17 must withhold at least one call");
    assert_eq!(data.held_out().len(), withheld);
    let mut rng = StdRng::seed_from_u64(8);
    let mut cavi = Cavi::new(CaviConfig::new(2, vec![1.0, 1.0], 500.0), &data, None, &mut rng)
        .unwrap();
    cavi.run_stochastic();
    let bound = cavi.compute_ho_log_likelihood();
    assert!(bound.is_finite() && bound < 0.0);
    assert_eq!(bound, cavi.compute_ho_log_likelihood());
}
