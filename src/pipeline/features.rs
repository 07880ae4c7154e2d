use crate::records::{DerivedFeatures, EnrichedLoan, MergedLoan};

/// Numerator over denominator, with the pipeline-wide convention that a
/// zero, missing, or non-finite denominator yields a missing value, never
/// an error and never zero.
pub fn ratio(numerator: Option<f64>, denominator: Option<f64>) -> Option<f64> {
    let n = numerator?;
    let d = denominator?;
    if d == 0.0 || !d.is_finite() || !n.is_finite() {
        return None;
    }
    Some(n / d)
}

/// Derive the ratio features for one merged loan. Pure; the merged record is
/// untouched.
pub fn derive(merged: &MergedLoan) -> DerivedFeatures {
    let amount = Some(merged.loan.amount);
    DerivedFeatures {
        loan_to_income: ratio(amount, merged.loan.income),
        relative_income: ratio(merged.loan.income, merged.covariates.median_income),
        vacancy_share: ratio(
            merged.covariates.vacant_units,
            merged.covariates.housing_units,
        ),
        // Index is base 100, so deflation preserves the nominal scale
        real_amount: ratio(amount.map(|a| a * 100.0), merged.price_index),
    }
}

/// Feature-derivation stage: consumes the merged dataset and produces the
/// enriched one.
pub fn derive_all(merged: Vec<MergedLoan>) -> Vec<EnrichedLoan> {
    merged
        .into_iter()
        .map(|m| EnrichedLoan {
            features: derive(&m),
            merged: m,
        })
        .collect()
}
