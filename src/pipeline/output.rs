use crate::error::Result;
use crate::records::{EnrichedLoan, MatchTier};
use serde::Serialize;
use std::path::Path;
use tracing::info;

/// Flat output row for the enriched loan file. One column per merged and
/// derived field; missing values serialize as empty cells.
#[derive(Debug, Serialize)]
pub struct EnrichedRow<'a> {
    pub sequence_id: &'a str,
    pub year: u16,
    pub source_geoid: &'a str,
    pub source_vintage: u16,
    pub target_geoid: &'a str,
    pub covariate_match: &'static str,
    pub amount: f64,
    pub income: Option<f64>,
    pub lender_id: &'a str,
    pub lender_name: Option<&'a str>,
    pub lender_agency: Option<&'a str>,
    pub median_income: Option<f64>,
    pub vacant_units: Option<f64>,
    pub housing_units: Option<f64>,
    pub population: Option<f64>,
    pub price_index: Option<f64>,
    pub loan_to_income: Option<f64>,
    pub relative_income: Option<f64>,
    pub vacancy_share: Option<f64>,
    pub real_amount: Option<f64>,
    pub purpose: Option<&'static str>,
}

pub fn purpose_label(refinance: Option<bool>) -> Option<&'static str> {
    refinance.map(|r| if r { "refinance" } else { "purchase" })
}

fn match_label(tier: MatchTier) -> &'static str {
    match tier {
        MatchTier::Exact => "exact",
        MatchTier::CountyMedian => "county_median",
    }
}

impl<'a> EnrichedRow<'a> {
    pub fn from_loan(e: &'a EnrichedLoan) -> Self {
        let m = &e.merged;
        Self {
            sequence_id: &m.loan.sequence_id,
            year: m.loan.year,
            source_geoid: m.loan.geoid.as_str(),
            source_vintage: m.loan.vintage,
            target_geoid: m.target_geoid.as_str(),
            covariate_match: match_label(m.covariate_match),
            amount: m.loan.amount,
            income: m.loan.income,
            lender_id: &m.loan.lender_id,
            lender_name: m.lender_name.as_deref(),
            lender_agency: m.lender_agency.as_deref(),
            median_income: m.covariates.median_income,
            vacant_units: m.covariates.vacant_units,
            housing_units: m.covariates.housing_units,
            population: m.covariates.population,
            price_index: m.price_index,
            loan_to_income: e.features.loan_to_income,
            relative_income: e.features.relative_income,
            vacancy_share: e.features.vacancy_share,
            real_amount: e.features.real_amount,
            purpose: purpose_label(m.loan.refinance),
        }
    }
}

/// Write the enriched loan-level file, one row per merged loan.
pub fn write_enriched(path: &Path, enriched: &[EnrichedLoan]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut writer = csv::Writer::from_path(path)?;
    for e in enriched {
        writer.serialize(EnrichedRow::from_loan(e))?;
    }
    writer.flush()?;
    info!(rows = enriched.len(), path = %path.display(), "wrote enriched output");
    Ok(())
}

/// Output row for the imputation stage: loan key plus the final label, its
/// provenance, and the classifier probability for imputed rows. Joined back
/// to the enriched file on the loan sequence id.
#[derive(Debug, Serialize)]
pub struct ImputedRow<'a> {
    pub sequence_id: &'a str,
    pub year: u16,
    pub target_geoid: &'a str,
    pub purpose: Option<&'static str>,
    /// "reported" when the source file carried the label, else "imputed"
    pub purpose_source: &'static str,
    pub refinance_probability: Option<f64>,
}

/// Write the imputation output, one row per loan in the enriched dataset.
pub fn write_imputed(path: &Path, rows: &[ImputedRow<'_>]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut writer = csv::Writer::from_path(path)?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    info!(rows = rows.len(), path = %path.display(), "wrote imputed output");
    Ok(())
}
