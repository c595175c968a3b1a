use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use burn::backend::ndarray::{NdArray, NdArrayDevice};
use clap::{Parser, Subcommand};
use tracing::info;

use sectionreg_registration::{
    CallerTag, MeanSquaresEngine, NamingStrategy, RegistrationPipeline, RunSpec, TimestampNaming,
};

mod logging;

#[derive(Parser)]
#[command(name = "sectionreg")]
#[command(about = "Register serial tissue sections: linear alignment followed by B-spline refinement")]
struct Cli {
    /// Emit JSON log lines
    #[arg(long, global = true)]
    json_logs: bool,

    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register the source image of a run spec onto its target
    Register {
        /// YAML run spec
        spec: PathBuf,

        /// Run tag; overrides the spec's tag and the timestamp default
        #[arg(long)]
        tag: Option<String>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose, cli.json_logs);

    match cli.command {
        Commands::Register { spec, tag } => register(&spec, tag),
    }
}

fn register(spec_path: &Path, tag: Option<String>) -> Result<()> {
    let spec = RunSpec::from_yaml_file(spec_path)
        .with_context(|| format!("Failed to load run spec {}", spec_path.display()))?;

    let naming: Box<dyn NamingStrategy> = match tag.or_else(|| spec.tag.clone()) {
        Some(tag) => Box::new(CallerTag(tag)),
        None => Box::new(TimestampNaming::now()),
    };

    let device = NdArrayDevice::default();
    let pipeline = RegistrationPipeline::<NdArray<f32>, _>::new(MeanSquaresEngine::new(), device);
    let report = pipeline.run(&spec.to_request(), naming.as_ref())?;

    info!(
        tag = %report.tag,
        image = %report.final_image.display(),
        extent = ?report.final_extent,
        "registration complete"
    );
    println!("{}", report.final_image.display());
    Ok(())
}
