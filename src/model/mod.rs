// Classifier stage: split discipline, training, artifact, imputation

pub mod gbm;

use crate::config::ModelConfig;
use crate::error::{PipelineError, Result};
use crate::pipeline::output::{purpose_label, ImputedRow};
use crate::records::EnrichedLoan;
use chrono::{DateTime, Utc};
use gbm::GradientBoostedStumps;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use tracing::info;

/// Column order of the feature matrix fed to the classifier. Missing values
/// are encoded as NaN and handled by the booster's missing routing.
pub const FEATURE_NAMES: [&str; 6] = [
    "amount",
    "income",
    "loan_to_income",
    "relative_income",
    "vacancy_share",
    "real_amount",
];

fn opt(value: Option<f64>) -> f64 {
    value.unwrap_or(f64::NAN)
}

/// Dense feature vector for one enriched loan, in `FEATURE_NAMES` order.
pub fn feature_vector(e: &EnrichedLoan) -> Vec<f64> {
    vec![
        e.merged.loan.amount,
        opt(e.merged.loan.income),
        opt(e.features.loan_to_income),
        opt(e.features.relative_income),
        opt(e.features.vacancy_share),
        opt(e.features.real_amount),
    ]
}

/// Seam for the booster so the in-crate trainer can be swapped for an
/// external library without touching the train/impute stages.
pub trait Classifier {
    fn fit(&mut self, features: &[Vec<f64>], labels: &[bool], rounds: usize);
    fn predict_proba(&self, features: &[f64]) -> f64;
}

impl Classifier for GradientBoostedStumps {
    fn fit(&mut self, features: &[Vec<f64>], labels: &[bool], rounds: usize) {
        GradientBoostedStumps::fit(self, features, labels, rounds)
    }

    fn predict_proba(&self, features: &[f64]) -> f64 {
        GradientBoostedStumps::predict_proba(self, features)
    }
}

/// Index partition of the labeled rows. Disjoint and exhaustive.
#[derive(Debug)]
pub struct SplitIndices {
    pub train: Vec<usize>,
    pub validation: Vec<usize>,
    pub test: Vec<usize>,
}

/// Shuffle 0..n with the configured seed and cut at the configured
/// fractions. The same seed always yields the same partition.
pub fn split_indices(n: usize, config: &ModelConfig) -> SplitIndices {
    let mut indices: Vec<usize> = (0..n).collect();
    let mut rng = StdRng::seed_from_u64(config.seed);
    indices.shuffle(&mut rng);

    let train_end = (n as f64 * config.train_fraction).round() as usize;
    let validation_end =
        train_end + (n as f64 * config.validation_fraction).round() as usize;
    let validation_end = validation_end.min(n);

    SplitIndices {
        train: indices[..train_end.min(n)].to_vec(),
        validation: indices[train_end.min(n)..validation_end].to_vec(),
        test: indices[validation_end..].to_vec(),
    }
}

/// Opaque trained-classifier artifact, serialized as JSON. Embeds everything
/// the inference stage needs: the model, the selected threshold, and the
/// feature column order it was trained on.
#[derive(Debug, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub model: GradientBoostedStumps,
    pub threshold: f64,
    pub feature_names: Vec<String>,
    pub trained_at: DateTime<Utc>,
    pub validation_accuracy: f64,
    pub test_accuracy: f64,
}

impl ModelArtifact {
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        info!(path = %path.display(), "saved model artifact");
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }
}

/// Training diagnostics printed by the CLI.
#[derive(Debug, Clone, Serialize)]
pub struct TrainReport {
    pub labeled_rows: usize,
    pub train_rows: usize,
    pub validation_rows: usize,
    pub test_rows: usize,
    pub threshold: f64,
    pub validation_accuracy: f64,
    pub test_accuracy: f64,
}

impl fmt::Display for TrainReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "train: {} labeled rows ({} train / {} validation / {} test)",
            self.labeled_rows, self.train_rows, self.validation_rows, self.test_rows
        )?;
        write!(
            f,
            "train: threshold {:.2}, validation accuracy {:.1}%, test accuracy {:.1}%",
            self.threshold,
            100.0 * self.validation_accuracy,
            100.0 * self.test_accuracy
        )
    }
}

const MIN_LABELED_ROWS: usize = 20;

/// Fit the classifier on the labeled subset of the enriched dataset under
/// train/validation/test discipline, select the decision threshold on the
/// validation split, and report held-out test accuracy.
pub fn train(enriched: &[EnrichedLoan], config: &ModelConfig) -> Result<(ModelArtifact, TrainReport)> {
    let labeled: Vec<(&EnrichedLoan, bool)> = enriched
        .iter()
        .filter_map(|e| e.merged.loan.refinance.map(|label| (e, label)))
        .collect();

    if labeled.len() < MIN_LABELED_ROWS {
        return Err(PipelineError::Config(format!(
            "only {} labeled rows available for training (need at least {})",
            labeled.len(),
            MIN_LABELED_ROWS
        )));
    }

    let features: Vec<Vec<f64>> = labeled.iter().map(|(e, _)| feature_vector(e)).collect();
    let labels: Vec<bool> = labeled.iter().map(|&(_, label)| label).collect();

    let split = split_indices(labeled.len(), config);
    let train_features: Vec<Vec<f64>> =
        split.train.iter().map(|&i| features[i].clone()).collect();
    let train_labels: Vec<bool> = split.train.iter().map(|&i| labels[i]).collect();

    let mut model = GradientBoostedStumps::new(config.learning_rate);
    model.fit(&train_features, &train_labels, config.rounds);

    let (threshold, validation_accuracy) =
        select_threshold(&model, &features, &labels, &split.validation);
    let test_accuracy = accuracy(&model, &features, &labels, &split.test, threshold);

    let report = TrainReport {
        labeled_rows: labeled.len(),
        train_rows: split.train.len(),
        validation_rows: split.validation.len(),
        test_rows: split.test.len(),
        threshold,
        validation_accuracy,
        test_accuracy,
    };
    info!(
        labeled = report.labeled_rows,
        threshold = report.threshold,
        validation_accuracy = report.validation_accuracy,
        test_accuracy = report.test_accuracy,
        "training complete"
    );

    let artifact = ModelArtifact {
        model,
        threshold,
        feature_names: FEATURE_NAMES.iter().map(|s| s.to_string()).collect(),
        trained_at: Utc::now(),
        validation_accuracy,
        test_accuracy,
    };
    Ok((artifact, report))
}

/// Best-accuracy threshold over the validation split, scanned on a fixed
/// grid; ties go to the lower threshold.
fn select_threshold(
    model: &impl Classifier,
    features: &[Vec<f64>],
    labels: &[bool],
    validation: &[usize],
) -> (f64, f64) {
    let mut best = (0.5, accuracy(model, features, labels, validation, 0.5));
    for step in 1..100 {
        let threshold = step as f64 / 100.0;
        let acc = accuracy(model, features, labels, validation, threshold);
        if acc > best.1 || (acc == best.1 && threshold < best.0) {
            best = (threshold, acc);
        }
    }
    best
}

fn accuracy(
    model: &impl Classifier,
    features: &[Vec<f64>],
    labels: &[bool],
    indices: &[usize],
    threshold: f64,
) -> f64 {
    if indices.is_empty() {
        return 0.0;
    }
    let correct = indices
        .iter()
        .filter(|&&i| (model.predict_proba(&features[i]) >= threshold) == labels[i])
        .count();
    correct as f64 / indices.len() as f64
}

/// Imputation diagnostics printed by the CLI.
#[derive(Debug, Clone, Serialize)]
pub struct ImputeReport {
    pub total_rows: usize,
    pub reported: usize,
    pub imputed: usize,
    pub imputed_refinance: usize,
}

impl fmt::Display for ImputeReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "impute: {} rows, {} reported labels kept, {} imputed ({} as refinance)",
            self.total_rows, self.reported, self.imputed, self.imputed_refinance
        )
    }
}

/// Apply the trained artifact to the enriched dataset: reported labels pass
/// through untouched; rows with a missing label get the classifier's call
/// and its probability.
pub fn impute<'a>(
    artifact: &ModelArtifact,
    enriched: &'a [EnrichedLoan],
) -> (Vec<ImputedRow<'a>>, ImputeReport) {
    let mut report = ImputeReport {
        total_rows: enriched.len(),
        reported: 0,
        imputed: 0,
        imputed_refinance: 0,
    };

    let rows = enriched
        .iter()
        .map(|e| {
            let loan = &e.merged.loan;
            match loan.refinance {
                Some(reported) => {
                    report.reported += 1;
                    ImputedRow {
                        sequence_id: &loan.sequence_id,
                        year: loan.year,
                        target_geoid: e.merged.target_geoid.as_str(),
                        purpose: purpose_label(Some(reported)),
                        purpose_source: "reported",
                        refinance_probability: None,
                    }
                }
                None => {
                    let probability = artifact.model.predict_proba(&feature_vector(e));
                    let refinance = probability >= artifact.threshold;
                    report.imputed += 1;
                    if refinance {
                        report.imputed_refinance += 1;
                    }
                    ImputedRow {
                        sequence_id: &loan.sequence_id,
                        year: loan.year,
                        target_geoid: e.merged.target_geoid.as_str(),
                        purpose: purpose_label(Some(refinance)),
                        purpose_source: "imputed",
                        refinance_probability: Some(probability),
                    }
                }
            }
        })
        .collect();

    report.log();
    (rows, report)
}

impl ImputeReport {
    pub fn log(&self) {
        info!(
            total = self.total_rows,
            reported = self.reported,
            imputed = self.imputed,
            "imputation complete"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::GeoId;
    use crate::records::{CovariateValues, DerivedFeatures, LoanRecord, MatchTier, MergedLoan};

    fn enriched(sequence_id: &str, loan_to_income: f64, refinance: Option<bool>) -> EnrichedLoan {
        EnrichedLoan {
            merged: MergedLoan {
                loan: LoanRecord {
                    sequence_id: sequence_id.to_string(),
                    year: 2012,
                    geoid: GeoId::from_canonical("06037123456").unwrap(),
                    vintage: 2010,
                    amount: loan_to_income * 40.0,
                    income: Some(40.0),
                    lender_id: "B100".to_string(),
                    refinance,
                },
                target_geoid: GeoId::from_canonical("06037123456").unwrap(),
                covariates: CovariateValues::default(),
                covariate_match: MatchTier::Exact,
                lender_name: None,
                lender_agency: None,
                price_index: None,
            },
            features: DerivedFeatures {
                loan_to_income: Some(loan_to_income),
                relative_income: None,
                vacancy_share: None,
                real_amount: None,
            },
        }
    }

    fn config() -> ModelConfig {
        ModelConfig {
            train_fraction: 0.6,
            validation_fraction: 0.2,
            seed: 7,
            rounds: 60,
            learning_rate: 0.3,
        }
    }

    #[test]
    fn test_split_partitions_without_overlap() {
        let split = split_indices(100, &config());
        assert_eq!(split.train.len(), 60);
        assert_eq!(split.validation.len(), 20);
        assert_eq!(split.test.len(), 20);

        let mut all: Vec<usize> = split
            .train
            .iter()
            .chain(&split.validation)
            .chain(&split.test)
            .copied()
            .collect();
        all.sort_unstable();
        assert_eq!(all, (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn test_split_is_reproducible_for_a_seed() {
        let a = split_indices(50, &config());
        let b = split_indices(50, &config());
        assert_eq!(a.train, b.train);
        assert_eq!(a.test, b.test);
    }

    fn separable_dataset() -> Vec<EnrichedLoan> {
        // Refinance iff loan-to-income above 2.0; a strong margin on both sides
        (0..200)
            .map(|i| {
                let lti = if i % 2 == 0 { 3.0 + (i % 7) as f64 / 10.0 } else { 1.0 + (i % 7) as f64 / 10.0 };
                enriched(&format!("L{}", i), lti, Some(i % 2 == 0))
            })
            .collect()
    }

    #[test]
    fn test_train_learns_separable_labels() {
        let data = separable_dataset();
        let (artifact, report) = train(&data, &config()).unwrap();
        assert!(report.test_accuracy > 0.9, "test accuracy {}", report.test_accuracy);
        assert_eq!(artifact.feature_names.len(), FEATURE_NAMES.len());
    }

    #[test]
    fn test_train_refuses_tiny_labeled_sets() {
        let data: Vec<EnrichedLoan> = (0..5)
            .map(|i| enriched(&format!("L{}", i), 2.0, Some(true)))
            .collect();
        assert!(train(&data, &config()).is_err());
    }

    #[test]
    fn test_artifact_round_trips_through_json() {
        let data = separable_dataset();
        let (artifact, _) = train(&data, &config()).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");
        artifact.save(&path).unwrap();
        let loaded = ModelArtifact::load(&path).unwrap();

        assert_eq!(loaded.threshold, artifact.threshold);
        assert_eq!(loaded.feature_names, artifact.feature_names);
        let probe = vec![120.0, 40.0, 3.0, f64::NAN, f64::NAN, f64::NAN];
        assert_eq!(
            loaded.model.predict_proba(&probe),
            artifact.model.predict_proba(&probe)
        );
    }

    #[test]
    fn test_impute_keeps_reported_labels_and_fills_missing() {
        let mut data = separable_dataset();
        data.push(enriched("U1", 3.4, None));
        data.push(enriched("U2", 1.1, None));

        let (artifact, _) = train(&data, &config()).unwrap();
        let (rows, report) = impute(&artifact, &data);

        assert_eq!(report.total_rows, 202);
        assert_eq!(report.reported, 200);
        assert_eq!(report.imputed, 2);

        let u1 = rows.iter().find(|r| r.sequence_id == "U1").unwrap();
        assert_eq!(u1.purpose_source, "imputed");
        assert_eq!(u1.purpose, Some("refinance"));
        assert!(u1.refinance_probability.unwrap() > 0.5);

        let u2 = rows.iter().find(|r| r.sequence_id == "U2").unwrap();
        assert_eq!(u2.purpose, Some("purchase"));

        let l0 = rows.iter().find(|r| r.sequence_id == "L0").unwrap();
        assert_eq!(l0.purpose_source, "reported");
        assert_eq!(l0.refinance_probability, None);
    }
}
