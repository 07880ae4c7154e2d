use serde::Serialize;
use std::fmt;
use tracing::{info, warn};

/// Row-count diagnostic for one ingest stage. These counts are the only
/// integrity signal a user has that a source file was read cleanly, so every
/// stage logs and prints them rather than dropping rows silently.
#[derive(Debug, Clone, Serialize)]
pub struct StageReport {
    pub stage: &'static str,
    pub rows_in: usize,
    pub rows_kept: usize,
    pub rows_rejected: usize,
}

impl StageReport {
    pub fn new(stage: &'static str, rows_in: usize, rows_kept: usize) -> Self {
        Self {
            stage,
            rows_in,
            rows_kept,
            rows_rejected: rows_in - rows_kept,
        }
    }

    /// Percentage of input rows kept.
    pub fn keep_rate(&self) -> f64 {
        percentage(self.rows_kept, self.rows_in)
    }

    pub fn log(&self) {
        if self.rows_rejected > 0 {
            warn!(
                stage = self.stage,
                rows_in = self.rows_in,
                rows_kept = self.rows_kept,
                rows_rejected = self.rows_rejected,
                "stage rejected rows"
            );
        } else {
            info!(
                stage = self.stage,
                rows_in = self.rows_in,
                rows_kept = self.rows_kept,
                "stage complete"
            );
        }
    }
}

impl fmt::Display for StageReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} rows in, {} kept ({:.1}%), {} rejected",
            self.stage,
            self.rows_in,
            self.rows_kept,
            self.keep_rate(),
            self.rows_rejected
        )
    }
}

/// Safe percentage for report output; an empty stage reads as 100%.
pub fn percentage(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        100.0
    } else {
        100.0 * part as f64 / whole as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keep_rate_and_rejected_count() {
        let report = StageReport::new("loans", 200, 150);
        assert_eq!(report.rows_rejected, 50);
        assert!((report.keep_rate() - 75.0).abs() < 1e-9);
    }

    #[test]
    fn test_empty_stage_is_full_rate() {
        let report = StageReport::new("loans", 0, 0);
        assert_eq!(report.keep_rate(), 100.0);
    }

    #[test]
    fn test_display_mentions_counts() {
        let report = StageReport::new("covariates", 10, 9);
        let text = report.to_string();
        assert!(text.contains("10 rows in"));
        assert!(text.contains("1 rejected"));
    }
}
