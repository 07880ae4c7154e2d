use crate::crosswalk::ResolvedMapping;
use crate::geo::{GeoId, Vintage};
use crate::pipeline::report::percentage;
use crate::records::{CovariateValues, LenderRecord, LoanRecord, MatchTier, MergedLoan, TractCovariates};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use tracing::{info, warn};

/// Match-rate diagnostic for the covariate merge. Exact geography is
/// preferred, the county median is an explicit bounded degradation, and
/// exclusion is the last resort; each tier is counted so a reader of the log
/// can detect silent degradation.
#[derive(Debug, Clone, Serialize)]
pub struct MergeReport {
    pub loans_in: usize,
    pub exact_matched: usize,
    pub fallback_matched: usize,
    /// Loans whose source tract has no entry in the resolved crosswalk
    pub unresolved: usize,
    /// Loans with a resolved tract but no covariates even at county level
    pub dropped: usize,
    pub lender_matched: usize,
    pub price_matched: usize,
}

impl MergeReport {
    pub fn merged(&self) -> usize {
        self.exact_matched + self.fallback_matched
    }

    pub fn exact_rate(&self) -> f64 {
        percentage(self.exact_matched, self.loans_in)
    }

    pub fn merge_rate(&self) -> f64 {
        percentage(self.merged(), self.loans_in)
    }

    pub fn log(&self) {
        info!(
            loans_in = self.loans_in,
            exact = self.exact_matched,
            fallback = self.fallback_matched,
            unresolved = self.unresolved,
            dropped = self.dropped,
            "covariate merge complete"
        );
        if self.unresolved + self.dropped > 0 {
            warn!(
                excluded = self.unresolved + self.dropped,
                "loans excluded from merge output"
            );
        }
    }
}

impl fmt::Display for MergeReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "merge: {} loans in, {} exact ({:.1}%), {} county fallback, {:.1}% matched overall",
            self.loans_in,
            self.exact_matched,
            self.exact_rate(),
            self.fallback_matched,
            self.merge_rate()
        )?;
        writeln!(
            f,
            "merge: {} unresolved tract, {} dropped without county covariates",
            self.unresolved, self.dropped
        )?;
        write!(
            f,
            "merge: lender match {:.1}%, price index match {:.1}%",
            percentage(self.lender_matched, self.merged()),
            percentage(self.price_matched, self.merged())
        )
    }
}

/// Attaches target-vintage covariates and administrative fields to loan
/// records, with the two-tier exact/county-median join policy.
pub struct MergeEngine<'a> {
    exact: HashMap<(GeoId, Vintage), &'a CovariateValues>,
    county_medians: HashMap<(String, Vintage), CovariateValues>,
    mapping: &'a ResolvedMapping,
    lenders: &'a HashMap<(String, u16), LenderRecord>,
    price_index: &'a HashMap<(String, u16), f64>,
    target_vintage: Vintage,
}

impl<'a> MergeEngine<'a> {
    pub fn new(
        covariates: &'a [TractCovariates],
        mapping: &'a ResolvedMapping,
        lenders: &'a HashMap<(String, u16), LenderRecord>,
        price_index: &'a HashMap<(String, u16), f64>,
        target_vintage: Vintage,
    ) -> Self {
        let exact = covariates
            .iter()
            .map(|c| ((c.geoid.clone(), c.vintage), &c.values))
            .collect();
        let county_medians = county_medians(covariates);
        Self {
            exact,
            county_medians,
            mapping,
            lenders,
            price_index,
            target_vintage,
        }
    }

    /// Merge all loans, returning the matched union and the tier counts.
    /// The input is consumed; the output is a new dataset.
    pub fn merge(&self, loans: Vec<LoanRecord>) -> (Vec<MergedLoan>, MergeReport) {
        let mut report = MergeReport {
            loans_in: loans.len(),
            exact_matched: 0,
            fallback_matched: 0,
            unresolved: 0,
            dropped: 0,
            lender_matched: 0,
            price_matched: 0,
        };
        let mut merged = Vec::with_capacity(loans.len());

        for loan in loans {
            let target = match self
                .mapping
                .target_for(&loan.geoid, loan.vintage, self.target_vintage)
            {
                Some(target) => target,
                None => {
                    warn!(sequence_id = %loan.sequence_id, geoid = %loan.geoid, "no crosswalk target");
                    report.unresolved += 1;
                    continue;
                }
            };

            let (covariates, tier) =
                match self.exact.get(&(target.clone(), self.target_vintage)) {
                    Some(values) => ((*values).clone(), MatchTier::Exact),
                    None => {
                        let county_key =
                            (target.county_fips().to_string(), self.target_vintage);
                        match self.county_medians.get(&county_key) {
                            Some(values) => (values.clone(), MatchTier::CountyMedian),
                            None => {
                                warn!(sequence_id = %loan.sequence_id, geoid = %target, "no covariates at tract or county level");
                                report.dropped += 1;
                                continue;
                            }
                        }
                    }
                };
            match tier {
                MatchTier::Exact => report.exact_matched += 1,
                MatchTier::CountyMedian => report.fallback_matched += 1,
            }

            let lender = self.lenders.get(&(loan.lender_id.clone(), loan.year));
            if lender.is_some() {
                report.lender_matched += 1;
            }

            let price_index = self
                .price_index
                .get(&(loan.geoid.state().to_string(), loan.year))
                .copied();
            if price_index.is_some() {
                report.price_matched += 1;
            }

            merged.push(MergedLoan {
                target_geoid: target,
                covariates,
                covariate_match: tier,
                lender_name: lender.map(|l| l.name.clone()),
                lender_agency: lender.map(|l| l.agency.clone()),
                price_index,
                loan,
            });
        }

        report.log();
        (merged, report)
    }
}

/// County-level fallback covariates: per (county FIPS, vintage), the median
/// of each field across the county's tracts, taken over present values only.
fn county_medians(covariates: &[TractCovariates]) -> HashMap<(String, Vintage), CovariateValues> {
    let mut groups: HashMap<(String, Vintage), Vec<&CovariateValues>> = HashMap::new();
    for c in covariates {
        groups
            .entry((c.geoid.county_fips().to_string(), c.vintage))
            .or_default()
            .push(&c.values);
    }

    groups
        .into_iter()
        .map(|(key, values)| {
            let medians = CovariateValues {
                median_income: median(values.iter().filter_map(|v| v.median_income)),
                vacant_units: median(values.iter().filter_map(|v| v.vacant_units)),
                housing_units: median(values.iter().filter_map(|v| v.housing_units)),
                population: median(values.iter().filter_map(|v| v.population)),
            };
            (key, medians)
        })
        .collect()
}

fn median(values: impl Iterator<Item = f64>) -> Option<f64> {
    let mut sorted: Vec<f64> = values.filter(|v| v.is_finite()).collect();
    if sorted.is_empty() {
        return None;
    }
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 1 {
        Some(sorted[mid])
    } else {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::GeoId;

    fn covariate(geoid: &str, vintage: Vintage, median_income: f64) -> TractCovariates {
        TractCovariates {
            geoid: GeoId::from_canonical(geoid).unwrap(),
            vintage,
            values: CovariateValues {
                median_income: Some(median_income),
                vacant_units: Some(10.0),
                housing_units: Some(100.0),
                population: Some(400.0),
            },
        }
    }

    fn loan(sequence_id: &str, geoid: &str, year: u16) -> LoanRecord {
        LoanRecord {
            sequence_id: sequence_id.to_string(),
            year,
            geoid: GeoId::from_canonical(geoid).unwrap(),
            vintage: crate::geo::vintage_for_year(year),
            amount: 100.0,
            income: Some(40.0),
            lender_id: "B100".to_string(),
            refinance: None,
        }
    }

    fn empty_lenders() -> HashMap<(String, u16), LenderRecord> {
        HashMap::new()
    }

    fn empty_index() -> HashMap<(String, u16), f64> {
        HashMap::new()
    }

    #[test]
    fn test_exact_match_carries_covariates_unchanged() {
        let covariates = vec![covariate("06037123456", 2010, 52.5)];
        let mapping = ResolvedMapping::default();
        let lenders = empty_lenders();
        let index = empty_index();
        let engine = MergeEngine::new(&covariates, &mapping, &lenders, &index, 2010);

        let (merged, report) = engine.merge(vec![loan("L1", "06037123456", 2012)]);
        assert_eq!(report.exact_matched, 1);
        assert_eq!(merged[0].covariates.median_income, Some(52.5));
        assert_eq!(merged[0].covariate_match, MatchTier::Exact);
    }

    #[test]
    fn test_fallback_uses_county_median_of_other_tracts() {
        // Loan tract 999999 has no covariate row, but two sibling tracts in
        // county 06037 do: the loan receives their median, not a missing value.
        let covariates = vec![
            covariate("06037000100", 2010, 40.0),
            covariate("06037000200", 2010, 60.0),
            covariate("06037000300", 2010, 80.0),
        ];
        let mapping = ResolvedMapping::default();
        let lenders = empty_lenders();
        let index = empty_index();
        let engine = MergeEngine::new(&covariates, &mapping, &lenders, &index, 2010);

        let (merged, report) = engine.merge(vec![loan("L1", "06037999999", 2012)]);
        assert_eq!(report.fallback_matched, 1);
        assert_eq!(merged[0].covariate_match, MatchTier::CountyMedian);
        assert_eq!(merged[0].covariates.median_income, Some(60.0));
    }

    #[test]
    fn test_unmatched_loans_are_dropped_and_counted() {
        // County 06075 has no covariate rows at all
        let covariates = vec![covariate("06037000100", 2010, 40.0)];
        let mapping = ResolvedMapping::default();
        let lenders = empty_lenders();
        let index = empty_index();
        let engine = MergeEngine::new(&covariates, &mapping, &lenders, &index, 2010);

        let (merged, report) = engine.merge(vec![
            loan("L1", "06037000100", 2012),
            loan("L2", "06075999999", 2012),
        ]);
        assert_eq!(merged.len(), 1);
        assert_eq!(report.dropped, 1);
        assert_eq!(report.merged(), 1);
    }

    #[test]
    fn test_loan_without_crosswalk_target_is_counted_unresolved() {
        let covariates = vec![covariate("06037000100", 2010, 40.0)];
        // Empty mapping and a 1990-vintage loan: no identity shortcut applies
        let mapping = ResolvedMapping::default();
        let lenders = empty_lenders();
        let index = empty_index();
        let engine = MergeEngine::new(&covariates, &mapping, &lenders, &index, 2010);

        let (merged, report) = engine.merge(vec![loan("L1", "06037000100", 1992)]);
        assert!(merged.is_empty());
        assert_eq!(report.unresolved, 1);
    }

    #[test]
    fn test_no_record_appears_twice() {
        let covariates = vec![
            covariate("06037000100", 2010, 40.0),
            covariate("06037000200", 2010, 60.0),
        ];
        let mapping = ResolvedMapping::default();
        let lenders = empty_lenders();
        let index = empty_index();
        let engine = MergeEngine::new(&covariates, &mapping, &lenders, &index, 2010);

        let loans = vec![
            loan("L1", "06037000100", 2012),
            loan("L2", "06037999999", 2012),
        ];
        let (merged, report) = engine.merge(loans);
        assert_eq!(merged.len(), 2);
        assert_eq!(report.exact_matched + report.fallback_matched, 2);

        let mut ids: Vec<&str> = merged.iter().map(|m| m.loan.sequence_id.as_str()).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), 2);
    }

    #[test]
    fn test_median_of_even_count_averages() {
        assert_eq!(median([40.0, 60.0].into_iter()), Some(50.0));
        assert_eq!(median(std::iter::empty()), None);
    }
}
