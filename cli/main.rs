#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]

use chronostruct::data::{GenotypeSource, read_pop_labels, read_snp_matrix};
use chronostruct::output::with_suffix;
use chronostruct::{Cavi, CaviConfig, ConvergenceCheck, FitProgressObserver, StepSchedule};
use clap::Parser;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::error::Error;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::process;

#[derive(Parser)]
#[command(
    name = "chronostruct",
    about = "Temporal population structure from time-sampled genotypes",
    long_about = "Fits mixture proportions and drifting population allele frequencies to \
                 genotypes sampled at several generations, using stochastic coordinate \
                 ascent variational inference."
)]
struct Cli {
    /// Genotype matrix: one line per locus, one 0/1/2/9 entry per sample (.gz accepted)
    #[arg(long, value_name = "FILE")]
    genotypes: PathBuf,

    /// Generation of each sample, one integer per line in column order
    #[arg(long, value_name = "FILE")]
    generations: PathBuf,

    /// Prefix for the result files
    #[arg(long, value_name = "PREFIX")]
    output: PathBuf,

    /// Number of ancestral populations
    #[arg(long, value_name = "K", required_unless_present = "config")]
    npops: Option<usize>,

    /// Fixed effective population size
    #[arg(long, value_name = "N", required_unless_present = "config")]
    pop_size: Option<f64>,

    /// Expected number of loci; a mismatch with the genotype file is reported
    #[arg(long, value_name = "L")]
    loci: Option<usize>,

    /// Seed for initialization (random when omitted; the value used is logged)
    #[arg(long)]
    seed: Option<u64>,

    /// Dirichlet prior over populations, comma separated (defaults to 1/K each)
    #[arg(long, value_delimiter = ',', value_name = "A1,A2,...")]
    prior: Option<Vec<f64>>,

    /// Known population of each sample, one integer per line; negative means unknown
    #[arg(long, value_name = "FILE")]
    labels: Option<PathBuf>,

    /// Fraction of observed genotypes withheld to evaluate the fit
    #[arg(long, default_value = "0", allow_negative_numbers = true)]
    hold_out_fraction: f64,

    /// Seed for choosing the withheld genotypes
    #[arg(long, default_value = "28")]
    hold_out_seed: u64,

    /// Maximum number of epochs
    #[arg(long)]
    epochs: Option<usize>,

    /// Convergence tolerance on the mean change of mixture proportions
    #[arg(long)]
    tolerance: Option<f64>,

    /// Offset of the step size schedule
    #[arg(long)]
    step_offset: Option<f64>,

    /// Decay rate of the step size schedule
    #[arg(long)]
    step_decay: Option<f64>,

    /// Re-smooth every locus in every epoch
    #[arg(long)]
    no_skip_unchanged: bool,

    /// Load the fit configuration from a TOML file; other flags override it
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn Error>> {
    let config = build_config(&cli)?;

    let mut data = read_snp_matrix(&cli.genotypes, &cli.generations, cli.loci)?;
    data.hold_out(cli.hold_out_fraction, cli.hold_out_seed)?;
    let labels = cli
        .labels
        .as_deref()
        .map(|path| read_pop_labels(path, &data))
        .transpose()?;

    let seed = cli.seed.unwrap_or_else(rand::random);
    log::info!("Initialization seed: {seed}");
    let mut rng = StdRng::seed_from_u64(seed);

    let mut cavi = Cavi::new(config, &data, labels, &mut rng)?;
    let mut progress = EpochProgress::new(cavi.config().max_epochs);
    let summary = cavi.run_stochastic_with_progress(&mut progress);
    progress.finish();

    println!(
        "> Finished after {} epochs ({}; last change {:.3e})",
        summary.epochs,
        if summary.converged {
            "converged"
        } else {
            "epoch cap reached"
        },
        summary.change
    );
    if !data.held_out().is_empty() {
        println!(
            "> Held-out log-likelihood bound over {} genotypes: {:.6}",
            data.held_out().len(),
            cavi.compute_ho_log_likelihood()
        );
    }

    let paths = cavi.write_results(&cli.output)?;
    let config_path = with_suffix(&cli.output, "_config.toml");
    cavi.config().save(&config_path)?;
    for path in [&paths.theta, &paths.freqs, &paths.freq_variances, &config_path] {
        println!("> Wrote {}", path.display());
    }
    Ok(())
}

/// Starts from `--config` when given, otherwise from `--npops`/`--pop-size`,
/// then applies every explicitly supplied flag.
fn build_config(cli: &Cli) -> Result<CaviConfig, Box<dyn Error>> {
    let mut config = match &cli.config {
        Some(path) => CaviConfig::load(path)?,
        None => {
            let npops = cli.npops.ok_or("--npops is required without --config")?;
            let pop_size = cli.pop_size.ok_or("--pop-size is required without --config")?;
            CaviConfig::new(npops, CaviConfig::symmetric_prior(npops), pop_size)
        }
    };

    if let Some(npops) = cli.npops {
        if npops != config.npops {
            config.npops = npops;
            config.mixture_prior = CaviConfig::symmetric_prior(npops);
        }
    }
    if let Some(pop_size) = cli.pop_size {
        config.pop_size = pop_size;
    }
    if let Some(prior) = &cli.prior {
        config.mixture_prior = prior.clone();
    }
    if let Some(epochs) = cli.epochs {
        config.max_epochs = epochs;
    }
    if let Some(tolerance) = cli.tolerance {
        config.tolerance = tolerance;
    }
    config.step_schedule = StepSchedule {
        offset: cli.step_offset.unwrap_or(config.step_schedule.offset),
        decay: cli.step_decay.unwrap_or(config.step_schedule.decay),
    };
    if cli.no_skip_unchanged {
        config.skip_unchanged_loci = false;
    }
    config.validate()?;
    Ok(config)
}

/// Per-epoch progress bar on stderr, hidden when stderr is not a terminal.
struct EpochProgress {
    bar: ProgressBar,
    max_epochs: usize,
}

impl EpochProgress {
    fn new(max_epochs: usize) -> Self {
        let draw_target = if std::io::stderr().is_terminal() {
            ProgressDrawTarget::stderr_with_hz(20)
        } else {
            ProgressDrawTarget::hidden()
        };
        let bar = ProgressBar::with_draw_target(Some(0), draw_target);
        let style = ProgressStyle::with_template(
            "\n> [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}",
        )
        .map(|style| style.progress_chars("█▉▊▋▌▍▎▏  "))
        .unwrap_or_else(|_| ProgressStyle::default_bar());
        bar.set_style(style);
        Self { bar, max_epochs }
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl FitProgressObserver for EpochProgress {
    fn on_epoch_start(&mut self, epoch: usize, total_loci: usize) {
        self.bar.set_length(total_loci as u64);
        self.bar.set_position(0);
        self.bar
            .set_message(format!("Epoch {}/{}", epoch + 1, self.max_epochs));
    }

    fn on_locus_advance(&mut self, _: usize, processed_loci: usize) {
        self.bar.set_position(processed_loci as u64);
    }

    fn on_epoch_finish(&mut self, epoch: usize, check: &ConvergenceCheck) {
        self.bar.println(format!(
            "> Epoch {}: change {:.3e}{}",
            epoch + 1,
            check.change,
            if check.converged { " (converged)" } else { "" }
        ));
    }
}
