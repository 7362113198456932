//! Lumen Application
//!
//! Command-line front end for radiance-field training.
//!
//! Commands:
//! - `train`: select views, train, validate, save parameters, render an orbit
//! - `render`: load saved parameters and render an orbit

mod pipeline;

use clap::{Args, Parser, Subcommand};
use lumen_data::{Background, SampleMode};
use lumen_train::{Norm, ScheduleKind, TrainConfig};
use std::path::PathBuf;

/// Lumen - radiance fields from sparse posed images
#[derive(Parser, Debug)]
#[command(name = "lumen")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Log level used when RUST_LOG is not set
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Train on a scene and evaluate on its validation split
    Train(TrainArgs),
    /// Render an orbit from saved parameters
    Render(RenderArgs),
}

#[derive(Args, Debug)]
struct TrainArgs {
    /// Scene directory containing transforms_{train,val}.json
    #[arg(short, long)]
    scene: PathBuf,

    /// JSON training configuration; flags below override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory receiving run outputs
    #[arg(short, long, default_value = "runs")]
    out_dir: PathBuf,

    /// Training views kept by the view selector
    #[arg(long)]
    n_imgs: Option<usize>,

    #[arg(long)]
    iterations: Option<usize>,

    #[arg(long)]
    batch_size: Option<usize>,

    /// Initial learning rate
    #[arg(long)]
    lr: Option<f32>,

    /// Learning-rate schedule (constant, exponential)
    #[arg(long)]
    schedule: Option<String>,

    #[arg(long)]
    decay_rate: Option<f32>,

    #[arg(long)]
    decay_steps: Option<usize>,

    /// Validate every N iterations
    #[arg(long)]
    val_period: Option<usize>,

    /// Disable periodic validation
    #[arg(long)]
    no_val: bool,

    /// Chunks the perceptual metric is split into; raise on resource exhaustion
    #[arg(long)]
    perceptual_chunks: Option<usize>,

    /// Held-out sets smaller than this are scored perceptually in one pass
    #[arg(long)]
    single_pass_limit: Option<usize>,

    /// Composite against black instead of white
    #[arg(long)]
    transparent: bool,

    /// Batch whole images instead of rays
    #[arg(long)]
    img_mode: bool,

    /// Occlusion regularizer weight
    #[arg(long)]
    beta: Option<f32>,

    /// Samples per ray penalized by the occlusion regularizer
    #[arg(long, default_value_t = 10)]
    occ_range: usize,

    /// Frequency regularizer floor; enables the regularizer
    #[arg(long)]
    a0: Option<f32>,

    /// Fraction of iterations the frequency regularizer is active
    #[arg(long, default_value_t = 0.5)]
    reg_ratio: f32,

    /// Frequency regularizer norm (l1, l2)
    #[arg(long, default_value = "l1")]
    reg: String,

    #[arg(long)]
    seed: Option<u64>,
}

#[derive(Args, Debug)]
struct RenderArgs {
    /// Scene directory; its training intrinsics define the frame size
    #[arg(short, long)]
    scene: PathBuf,

    /// Run directory written by `train`
    #[arg(short, long)]
    run: PathBuf,

    /// Number of orbit frames
    #[arg(long)]
    frames: Option<usize>,
}

impl TrainArgs {
    fn resolve_config(&self) -> Result<TrainConfig, Box<dyn std::error::Error>> {
        let mut config = match &self.config {
            Some(path) => TrainConfig::from_json_file(path)?,
            None => TrainConfig::default(),
        };

        if let Some(n) = self.n_imgs {
            config.n_imgs = n;
        }
        if let Some(n) = self.iterations {
            config.iterations = n;
        }
        if let Some(n) = self.batch_size {
            config.batch_size = n;
        }
        if let Some(lr) = self.lr {
            config.learning_rate = lr;
        }
        if let Some(schedule) = &self.schedule {
            config.schedule = match schedule.as_str() {
                "const" | "constant" => ScheduleKind::Constant,
                "exp" | "exponential" => ScheduleKind::ExponentialDecay,
                other => return Err(format!("Unknown schedule: {}", other).into()),
            };
        }
        if let Some(rate) = self.decay_rate {
            config.decay_rate = rate;
        }
        if let Some(steps) = self.decay_steps {
            config.decay_steps = steps;
        }
        if let Some(period) = self.val_period {
            config.validation_period = period;
        }
        if self.no_val {
            config.no_validation = true;
        }
        if let Some(chunks) = self.perceptual_chunks {
            config.perceptual_chunks = chunks;
        }
        if let Some(limit) = self.single_pass_limit {
            config.perceptual_single_pass_limit = limit;
        }
        if self.transparent {
            config.background = Background::Transparent;
        }
        if self.img_mode {
            config.sample_mode = SampleMode::Images;
        }
        if let Some(beta) = self.beta {
            config.occlusion = Some(lumen_train::OcclusionConfig {
                beta,
                range: self.occ_range,
            });
        }
        if let Some(a0) = self.a0 {
            let norm = match self.reg.as_str() {
                "l1" => Norm::L1,
                "l2" => Norm::L2,
                other => return Err(format!("Unknown regularizer norm: {}", other).into()),
            };
            config.frequency = Some(lumen_train::FrequencyConfig {
                a0,
                activation_ratio: self.reg_ratio,
                norm,
            });
        }
        if let Some(seed) = self.seed {
            config.seed = seed;
        }

        config.validate()?;
        Ok(config)
    }
}

fn init_logging(level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .with_target(false)
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    let result = match cli.command {
        Command::Train(args) => args
            .resolve_config()
            .and_then(|config| pipeline::train(&args.scene, &args.out_dir, &config)),
        Command::Render(args) => pipeline::render(&args.scene, &args.run, args.frames),
    };

    if let Err(e) = result {
        eprintln!("Application error: {}", e);
        std::process::exit(1);
    }
}
