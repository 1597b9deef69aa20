//! Linear regression whose learning rate can be steered while it trains.
//!
//! ```text
//! cargo run --example linear_regression -- --lr 0.05 --headless
//! ```
//!
//! Without `--headless` the driver starts `trainctl serve` as the control
//! panel; open it and submit `set_lr` to change the learning rate live.

use std::path::PathBuf;
use std::process::ExitCode;

use candle_core::{DType, Device, Tensor};
use candle_nn::{Module, Optimizer, VarBuilder, VarMap, SGD};
use clap::Parser;
use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;
use trainctl::{Configuration, Control, Driver, OwnedState, Settings};

const SCRIPT: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/demos/linear_regression.rs");

#[derive(Parser, Serialize, Debug)]
#[command(about = "Fit y = 2a - 3b + 0.5c + 1 under remote control")]
struct Args {
    #[arg(long, default_value = "linear regression")]
    experiment_name: String,

    #[arg(long, default_value_t = 0.05)]
    lr: f64,

    #[arg(long, default_value_t = 256)]
    samples: usize,

    #[arg(long, default_value_t = 20_000)]
    steps: u64,

    // region maintenance args
    #[arg(long)]
    resume_path: Option<String>,

    #[arg(long)]
    settings: Option<PathBuf>,

    #[arg(long)]
    headless: bool,
    // endregion
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    trainctl::exit_code(run(Args::parse()))
}

fn run(args: Args) -> trainctl::Result<()> {
    let device = Device::Cpu;
    let config = Configuration::from_serializable(&args)?;

    let mut settings = Settings::load(args.settings.as_deref())?;
    if args.headless {
        settings.controller = None;
        settings.dashboard = None;
    }

    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
    let model = candle_nn::linear(3, 1, vb.pp("linear"))?;

    let mut driver = Driver::builder(config, SCRIPT)
        .settings(settings)
        .device(device.clone())
        .state("model", OwnedState::stateful(varmap.clone()))
        .control(Control::input(
            "set_lr",
            "Set the learning rate",
            args.lr.to_string(),
            |ctx, value| {
                let lr: f64 = value.trim().parse()?;
                anyhow::ensure!(lr > 0.0, "learning rate must be positive, got {lr}");
                ctx.config.set("lr", lr);
                Ok(format!("lr = {lr} from step {}", ctx.global_step()))
            },
        ))
        .control(Control::action("save_best", "Save the current weights as 'best'", |ctx| {
            let dir = ctx.save_checkpoint("best")?;
            Ok(format!("saved {}", dir.display()))
        }))
        .control(Control::action("step", "Report the current step", |ctx| {
            Ok(ctx.global_step())
        }))
        .build()?;

    driver.register()?;
    driver.load_checkpoint(args.resume_path.as_deref())?;

    let inputs = Tensor::randn(0f32, 1., (args.samples, 3), &device)?;
    let weights = Tensor::new(&[[2f32], [-3.], [0.5]], &device)?;
    let targets = inputs.matmul(&weights)?.broadcast_add(&Tensor::new(&[1f32], &device)?)?;

    let mut sgd = SGD::new(varmap.all_vars(), args.lr)?;
    let mut scope = driver.serve()?;
    while scope.global_step() < args.steps {
        let lr = scope.config().get_f64("lr").unwrap_or(args.lr);
        if lr != sgd.learning_rate() {
            info!("Learning rate {} -> {}", sgd.learning_rate(), lr);
            sgd.set_learning_rate(lr);
        }

        let loss = candle_nn::loss::mse(&model.forward(&inputs)?, &targets)?;
        sgd.backward_step(&loss)?;

        let report = scope.step()?;
        if report.global_step % 1000 == 0 {
            info!("step {} loss {:.6}", report.global_step, loss.to_scalar::<f32>()?);
        }
    }

    scope.finish()
}
