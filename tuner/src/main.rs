//! Coordinate-descent weight tuner.
//!
//! Reads `<fen> <target>` lines (target in [0, 1], white-oriented), then
//! minimizes the mean squared difference between the target and the
//! sigmoid of the white-oriented evaluation, plus an L1 penalty. One
//! evaluation worker runs per CPU, pulling sample indices from a shared
//! atomic counter; each worker owns its own evaluator instance.
//!
//! Output is a one-line error comment followed by a weight-vector literal
//! ready to paste into the evaluator.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use sable_core::Position;
use sable_engine::Eval;

/// Sigmoid scale: about one pawn of advantage moves the expected score
/// from 0.5 to 0.68.
const SIGMOID_SCALE: f64 = 135.0;

/// EMA period for the stopping rule.
const EMA_PERIOD: f64 = 3.0;

/// Tuning stops once the EMA of per-iteration error decrease drops below
/// this threshold.
const STOP_ERROR_CHANGE: f64 = 4e-5;

#[derive(Debug, Parser)]
#[command(name = "tuner", about = "Tune sable's evaluation weights")]
struct Args {
    /// Training file: one `<fen> <target>` entry per line.
    training_file: PathBuf,

    /// L1 regularization weight.
    #[arg(long, default_value_t = 0.0)]
    lambda: f64,
}

/// A training-file line that could not be used.
#[derive(Debug, thiserror::Error)]
enum TuneError {
    /// The line does not split into a FEN and a target.
    #[error("line {line_no}: expected '<fen> <target>', got \"{line}\"")]
    BadLine {
        /// 1-based line number.
        line_no: usize,
        /// The offending line.
        line: String,
    },
    /// The FEN part failed to parse.
    #[error("line {line_no}: invalid FEN \"{fen}\"")]
    BadFen {
        /// 1-based line number.
        line_no: usize,
        /// The offending FEN.
        fen: String,
    },
    /// The target is not a number in [0, 1].
    #[error("line {line_no}: target \"{target}\" not in [0, 1]")]
    BadTarget {
        /// 1-based line number.
        line_no: usize,
        /// The offending target field.
        target: String,
    },
}

/// One labeled position.
struct Sample {
    /// Expected game result from white's perspective, in [0, 1].
    target: f64,
    position: Position,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    anyhow::ensure!(args.lambda >= 0.0, "lambda must be non-negative");

    info!("tune started");
    let samples = read_samples(&args.training_file)
        .with_context(|| format!("reading {}", args.training_file.display()))?;
    anyhow::ensure!(!samples.is_empty(), "no usable samples in training file");
    info!(count = samples.len(), "loaded samples");

    let workers = std::thread::available_parallelism().map_or(1, |n| n.get());
    let mut tuner = Tuner::new(samples, args.lambda, workers);

    let mut weights = Eval::new().weights();
    info!(params = weights.len(), "tuning weight vector");
    let error = tuner.coordinate_descent(&mut weights);
    info!("tune finished");

    println!("// Error: {error:.6}");
    println!(
        "pub const TUNED_WEIGHTS: [i32; {}] = {:?};",
        weights.len(),
        weights
    );
    Ok(())
}

fn read_samples(path: &Path) -> anyhow::Result<Vec<Sample>> {
    let file = File::open(path)?;
    let mut samples = Vec::new();
    for (index, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let sample = parse_sample(index + 1, &line)?;
        // Positions in check are useless to a static evaluator
        if !sample.position.is_check() {
            samples.push(sample);
        }
    }
    Ok(samples)
}

fn parse_sample(line_no: usize, line: &str) -> Result<Sample, TuneError> {
    let Some((fen, target_text)) = line.rsplit_once(' ') else {
        return Err(TuneError::BadLine {
            line_no,
            line: line.to_string(),
        });
    };
    let target: f64 = target_text.parse().map_err(|_| TuneError::BadTarget {
        line_no,
        target: target_text.to_string(),
    })?;
    if !(0.0..=1.0).contains(&target) {
        return Err(TuneError::BadTarget {
            line_no,
            target: target_text.to_string(),
        });
    }
    let position = fen.trim().parse().map_err(|_| TuneError::BadFen {
        line_no,
        fen: fen.to_string(),
    })?;
    Ok(Sample { target, position })
}

fn sigmoid(s: f64) -> f64 {
    1.0 / (1.0 + (-s / SIGMOID_SCALE).exp())
}

/// The tuning state: samples, penalty weight, and one evaluator per worker.
struct Tuner {
    samples: Vec<Sample>,
    lambda: f64,
    evaluators: Vec<Eval>,
}

impl Tuner {
    fn new(samples: Vec<Sample>, lambda: f64, workers: usize) -> Self {
        Self {
            samples,
            lambda,
            evaluators: (0..workers.max(1)).map(|_| Eval::new()).collect(),
        }
    }

    /// Mean squared error over all samples plus the L1 penalty, computed
    /// by all workers pulling indices from a shared counter.
    fn compute_error(&mut self, weights: &[i32]) -> f64 {
        let samples = &self.samples;
        let index = AtomicUsize::new(0);

        let sum: f64 = std::thread::scope(|scope| {
            let handles: Vec<_> = self
                .evaluators
                .iter_mut()
                .map(|evaluator| {
                    let index = &index;
                    scope.spawn(move || {
                        evaluator.set_weights(weights);
                        let mut sum = 0.0;
                        loop {
                            let i = index.fetch_add(1, Ordering::Relaxed);
                            if i >= samples.len() {
                                return sum;
                            }
                            let sample = &samples[i];
                            let mut eval = evaluator.evaluate(&sample.position);
                            if !sample.position.white_to_move() {
                                eval = -eval;
                            }
                            let diff = sample.target - sigmoid(f64::from(eval));
                            sum += diff * diff;
                        }
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|handle| handle.join().expect("tuner worker panicked"))
                .sum()
        });

        sum / self.samples.len() as f64 + self.regularization(weights)
    }

    fn regularization(&self, weights: &[i32]) -> f64 {
        self.lambda * weights.iter().map(|&w| f64::from(w.abs())).sum::<f64>()
    }

    /// Coordinate descent: step each weight in turn, doubling the step on
    /// improvement and flipping its sign on failure. Returns the final
    /// error once the stopping rule fires.
    fn coordinate_descent(&mut self, weights: &mut [i32]) -> f64 {
        let mut best_error = self.compute_error(weights);
        let mut steps = vec![1i32; weights.len()];
        let mut stop = StopRule::new(EMA_PERIOD, STOP_ERROR_CHANGE);

        let mut iteration = 0usize;
        loop {
            if stop.should_break(best_error) {
                return best_error;
            }
            iteration += 1;

            for i in 0..weights.len() {
                let old_value = weights[i];
                weights[i] = old_value + steps[i];
                let error = self.compute_error(weights);
                if error < best_error {
                    best_error = error;
                    steps[i] *= 2;
                } else {
                    weights[i] = old_value;
                    steps[i] = if steps[i] > 0 { -1 } else { 1 };
                }
            }

            info!(iteration, error = format!("{best_error:.6}"), "tuning iteration");
        }
    }
}

/// Stopping rule: an exponential moving average of the per-iteration error
/// decrease. The first call primes the previous error, the second seeds
/// the EMA, later calls update it.
struct StopRule {
    period: f64,
    threshold: f64,
    iteration: i64,
    ema: f64,
    prev_error: f64,
}

impl StopRule {
    fn new(period: f64, threshold: f64) -> Self {
        Self {
            period,
            threshold,
            iteration: -1,
            ema: 0.0,
            prev_error: 0.0,
        }
    }

    fn should_break(&mut self, error: f64) -> bool {
        self.iteration += 1;
        if self.iteration == 0 {
            self.prev_error = error;
            return false;
        }
        let change = self.prev_error - error;
        self.prev_error = error;
        if self.iteration == 1 {
            self.ema = change;
            return false;
        }
        self.ema += (change - self.ema) / self.period;
        self.ema < self.threshold
    }
}
