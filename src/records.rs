use crate::geo::{GeoId, Vintage};
use serde::{Deserialize, Serialize};

/// Loan application row as it appears in the disclosure file, before any
/// identifier normalization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoanRow {
    pub sequence_id: String,
    pub year: u16,
    pub state: String,
    pub county: String,
    pub tract: String,
    /// Loan amount in thousands of dollars
    pub amount: f64,
    /// Applicant income in thousands of dollars, absent for some records
    pub income: Option<f64>,
    pub lender_id: String,
    /// "purchase" or "refinance"; absent from the historical files this
    /// pipeline imputes it for
    pub purpose: Option<String>,
}

/// Loan record with canonical geography, as admitted by the ingest stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoanRecord {
    pub sequence_id: String,
    pub year: u16,
    pub geoid: GeoId,
    /// Boundary vintage the loan's tract id is expressed in
    pub vintage: Vintage,
    pub amount: f64,
    pub income: Option<f64>,
    pub lender_id: String,
    /// True for refinance, false for purchase, `None` when unreported
    pub refinance: Option<bool>,
}

/// Covariate row keyed by raw components, as stored in the census extract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CovariateRow {
    pub state: String,
    pub county: String,
    pub tract: String,
    pub vintage: Vintage,
    pub median_income: Option<f64>,
    pub vacant_units: Option<f64>,
    pub housing_units: Option<f64>,
    pub population: Option<f64>,
}

/// The covariate fields attached to a loan, separated from their key so the
/// county-median fallback can synthesize them without a tract id.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CovariateValues {
    pub median_income: Option<f64>,
    pub vacant_units: Option<f64>,
    pub housing_units: Option<f64>,
    pub population: Option<f64>,
}

/// One row per (tract GeoId, vintage) in the covariate table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TractCovariates {
    pub geoid: GeoId,
    pub vintage: Vintage,
    pub values: CovariateValues,
}

/// Crosswalk correspondence row keyed by raw components, one per edge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrosswalkRow {
    pub src_state: String,
    pub src_county: String,
    pub src_tract: String,
    pub src_vintage: Vintage,
    pub dst_state: String,
    pub dst_county: String,
    pub dst_tract: String,
    pub dst_vintage: Vintage,
    pub weight: f64,
}

/// Administrative lender list row, one per lender-year.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LenderRecord {
    pub lender_id: String,
    pub year: u16,
    pub name: String,
    /// Regulator code (OCC, FDIC, ...)
    pub agency: String,
}

/// House-price index row, one per state-year, base 100.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceIndexRow {
    pub state: String,
    pub year: u16,
    pub index: f64,
}

/// How a loan's covariates were matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchTier {
    /// Exact (target GeoId, vintage) covariate row
    Exact,
    /// County-level median across the county's tracts for the vintage
    CountyMedian,
}

/// A loan record with target-vintage covariates attached. Wraps the ingested
/// record rather than mutating it; each stage produces a new dataset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergedLoan {
    pub loan: LoanRecord,
    /// Tract id in the target vintage the covariates are keyed by
    pub target_geoid: GeoId,
    pub covariates: CovariateValues,
    pub covariate_match: MatchTier,
    pub lender_name: Option<String>,
    pub lender_agency: Option<String>,
    pub price_index: Option<f64>,
}

/// Ratio features computed from merged fields. A zero or missing denominator
/// yields `None`, never an error and never zero.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DerivedFeatures {
    pub loan_to_income: Option<f64>,
    /// Applicant income relative to the tract median
    pub relative_income: Option<f64>,
    pub vacancy_share: Option<f64>,
    /// Loan amount deflated by the state price index
    pub real_amount: Option<f64>,
}

/// Final build-stage record: merged loan plus derived features.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichedLoan {
    pub merged: MergedLoan,
    pub features: DerivedFeatures,
}
