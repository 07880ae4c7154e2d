use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::error;

use hmda_pipeline::config::PipelineConfig;
use hmda_pipeline::logging;
use hmda_pipeline::model::{self, ModelArtifact};
use hmda_pipeline::pipeline::{self, output, BuildOutput};

#[derive(Parser)]
#[command(name = "hmda_pipeline")]
#[command(about = "Historical mortgage-disclosure harmonization and imputation pipeline")]
#[command(version = "0.1.0")]
struct Cli {
    /// Path to the pipeline configuration file
    #[arg(long, default_value = "config.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the data build: ingest, crosswalk resolution, merge, features
    Build,
    /// Train the classifier on the labeled subset of the built data
    Train,
    /// Apply a trained model to impute the missing loan-purpose label
    Impute,
    /// Run build, train, and impute sequentially
    Run,
}

fn print_build_summary(build: &BuildOutput) {
    println!("\n📊 Build results:");
    println!("   {}", build.loan_report);
    println!("   {}", build.covariate_report);
    println!("   {}", build.crosswalk_report);
    println!("   {}", build.lender_report);
    println!("   {}", build.price_report);
    for line in build.merge_report.to_string().lines() {
        println!("   {}", line);
    }
    println!("   Enriched rows: {}", build.enriched.len());
}

fn run_train(config: &PipelineConfig, build: &BuildOutput) -> anyhow::Result<ModelArtifact> {
    let (artifact, report) = model::train(&build.enriched, &config.model)?;
    let model_path = config.output_dir.join("model.json");
    artifact.save(&model_path)?;

    println!("\n🎯 Training results:");
    for line in report.to_string().lines() {
        println!("   {}", line);
    }
    println!("   Model artifact: {}", model_path.display());
    Ok(artifact)
}

fn run_impute(
    config: &PipelineConfig,
    build: &BuildOutput,
    artifact: &ModelArtifact,
) -> anyhow::Result<()> {
    let (rows, report) = model::impute(artifact, &build.enriched);
    let out_path = config.output_dir.join("imputed_loans.csv");
    output::write_imputed(&out_path, &rows)?;

    println!("\n🏷️  Imputation results:");
    println!("   {}", report);
    println!("   Output file: {}", out_path.display());
    Ok(())
}

fn main() -> anyhow::Result<()> {
    // Initialize logging
    logging::init_logging();

    let cli = Cli::parse();
    let config = match PipelineConfig::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load config: {}", e);
            return Err(e.into());
        }
    };

    match cli.command {
        Commands::Build => {
            println!("🔄 Running data build...");
            let build = pipeline::run_build(&config)?;
            print_build_summary(&build);
        }
        Commands::Train => {
            println!("🎓 Running data build + training...");
            let build = pipeline::run_build(&config)?;
            print_build_summary(&build);
            run_train(&config, &build)?;
        }
        Commands::Impute => {
            println!("🏷️  Running data build + imputation...");
            let build = pipeline::run_build(&config)?;
            print_build_summary(&build);

            let model_path = config.output_dir.join("model.json");
            let artifact = ModelArtifact::load(&model_path)?;
            run_impute(&config, &build, &artifact)?;
        }
        Commands::Run => {
            println!("🚀 Running full pipeline (build + train + impute)...");
            let build = pipeline::run_build(&config)?;
            print_build_summary(&build);

            let artifact = run_train(&config, &build)?;
            run_impute(&config, &build, &artifact)?;
            println!("\n✅ Full pipeline completed successfully!");
        }
    }
    Ok(())
}
