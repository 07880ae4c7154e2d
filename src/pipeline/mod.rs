// Data-build pipeline: ingest, crosswalk resolution, merge, feature derivation

pub mod features;
pub mod ingest;
pub mod merge;
pub mod output;
pub mod report;

use crate::config::PipelineConfig;
use crate::error::Result;
use crate::records::EnrichedLoan;
use merge::{MergeEngine, MergeReport};
use report::StageReport;
use tracing::info;

/// Everything the build stage produces: the enriched dataset plus the
/// per-stage diagnostics the CLI prints.
#[derive(Debug)]
pub struct BuildOutput {
    pub enriched: Vec<EnrichedLoan>,
    pub loan_report: StageReport,
    pub covariate_report: StageReport,
    pub crosswalk_report: StageReport,
    pub lender_report: StageReport,
    pub price_report: StageReport,
    pub merge_report: MergeReport,
}

/// Run the full data build: read all inputs, resolve the crosswalk, merge
/// covariates onto loans, derive features, and write the enriched file.
/// Each stage consumes its input and produces a new dataset.
pub fn run_build(config: &PipelineConfig) -> Result<BuildOutput> {
    let span = tracing::info_span!("build");
    let _enter = span.enter();

    let (loans, loan_report) = ingest::read_loans(&config.inputs.loans)?;
    let (covariates, covariate_report) = ingest::read_covariates(&config.inputs.covariates)?;
    let (crosswalk, crosswalk_report) = ingest::read_crosswalk(&config.inputs.crosswalk)?;
    let (lenders, lender_report) = ingest::read_lenders(&config.inputs.lenders)?;
    let (price_index, price_report) = ingest::read_price_index(&config.inputs.price_index)?;

    let mapping = crosswalk.resolve()?;
    info!(sources = mapping.len(), "crosswalk mapping ready");

    let engine = MergeEngine::new(
        &covariates,
        &mapping,
        &lenders,
        &price_index,
        config.target_vintage,
    );
    let (merged, merge_report) = engine.merge(loans);

    let enriched = features::derive_all(merged);

    let out_path = config.output_dir.join("enriched_loans.csv");
    output::write_enriched(&out_path, &enriched)?;

    Ok(BuildOutput {
        enriched,
        loan_report,
        covariate_report,
        crosswalk_report,
        lender_report,
        price_report,
        merge_report,
    })
}
