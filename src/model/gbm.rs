use serde::{Deserialize, Serialize};

/// One depth-1 regression tree in the boosted ensemble. Missing feature
/// values (NaN) are routed to whichever side the training gain preferred.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stump {
    pub feature: usize,
    pub threshold: f64,
    pub left: f64,
    pub right: f64,
    pub missing_left: bool,
}

impl Stump {
    fn output(&self, features: &[f64]) -> f64 {
        let value = features.get(self.feature).copied().unwrap_or(f64::NAN);
        let goes_left = if value.is_nan() {
            self.missing_left
        } else {
            value < self.threshold
        };
        if goes_left {
            self.left
        } else {
            self.right
        }
    }
}

/// Gradient-boosted decision stumps with logistic loss.
///
/// Deliberately minimal: the pipeline treats the booster as a swappable
/// black box behind the `Classifier` trait, and this implementation exists
/// so the crate has no external model dependency. Split search is exact
/// over sorted feature values with second-order gain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradientBoostedStumps {
    pub base_score: f64,
    pub learning_rate: f64,
    pub stumps: Vec<Stump>,
}

const LAMBDA: f64 = 1.0;

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

impl GradientBoostedStumps {
    pub fn new(learning_rate: f64) -> Self {
        Self {
            base_score: 0.0,
            learning_rate,
            stumps: Vec::new(),
        }
    }

    /// Fit `rounds` stumps. Stops early once no split has positive gain.
    pub fn fit(&mut self, features: &[Vec<f64>], labels: &[bool], rounds: usize) {
        assert_eq!(features.len(), labels.len());
        let n = labels.len();
        if n == 0 {
            return;
        }

        let positive = labels.iter().filter(|&&l| l).count() as f64;
        let rate = (positive / n as f64).clamp(1e-6, 1.0 - 1e-6);
        self.base_score = (rate / (1.0 - rate)).ln();
        self.stumps.clear();

        let mut margins = vec![self.base_score; n];
        let width = features.first().map(|f| f.len()).unwrap_or(0);

        for _ in 0..rounds {
            let mut grad = vec![0.0f64; n];
            let mut hess = vec![0.0f64; n];
            for i in 0..n {
                let p = sigmoid(margins[i]);
                grad[i] = p - if labels[i] { 1.0 } else { 0.0 };
                hess[i] = p * (1.0 - p);
            }

            let stump = match best_stump(features, &grad, &hess, width) {
                Some(stump) => stump,
                None => break,
            };

            for i in 0..n {
                margins[i] += self.learning_rate * stump.output(&features[i]);
            }
            self.stumps.push(stump);
        }
    }

    /// Probability of the positive class for one feature vector.
    pub fn predict_proba(&self, features: &[f64]) -> f64 {
        let mut margin = self.base_score;
        for stump in &self.stumps {
            margin += self.learning_rate * stump.output(features);
        }
        sigmoid(margin)
    }
}

/// Exact greedy split search over all features, with both routings of
/// missing values considered. Returns `None` when no split improves on the
/// unsplit loss.
fn best_stump(features: &[Vec<f64>], grad: &[f64], hess: &[f64], width: usize) -> Option<Stump> {
    let total_g: f64 = grad.iter().sum();
    let total_h: f64 = hess.iter().sum();
    let unsplit = total_g * total_g / (total_h + LAMBDA);

    let mut best: Option<(f64, Stump)> = None;

    for feature in 0..width {
        let mut present: Vec<(f64, usize)> = features
            .iter()
            .enumerate()
            .filter_map(|(i, row)| {
                let v = row[feature];
                if v.is_nan() {
                    None
                } else {
                    Some((v, i))
                }
            })
            .collect();
        if present.len() < 2 {
            continue;
        }
        present.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));

        let present_g: f64 = present.iter().map(|&(_, i)| grad[i]).sum();
        let present_h: f64 = present.iter().map(|&(_, i)| hess[i]).sum();
        let missing_g = total_g - present_g;
        let missing_h = total_h - present_h;

        let mut left_g = 0.0;
        let mut left_h = 0.0;
        for w in 0..present.len() - 1 {
            let (value, i) = present[w];
            left_g += grad[i];
            left_h += hess[i];
            let next_value = present[w + 1].0;
            if next_value <= value {
                continue;
            }
            let threshold = (value + next_value) / 2.0;

            for missing_left in [false, true] {
                let (gl, hl, gr, hr) = if missing_left {
                    (
                        left_g + missing_g,
                        left_h + missing_h,
                        present_g - left_g,
                        present_h - left_h,
                    )
                } else {
                    (
                        left_g,
                        left_h,
                        present_g - left_g + missing_g,
                        present_h - left_h + missing_h,
                    )
                };
                let gain =
                    gl * gl / (hl + LAMBDA) + gr * gr / (hr + LAMBDA) - unsplit;
                if gain <= 1e-12 {
                    continue;
                }
                if best.as_ref().map(|(g, _)| gain > *g).unwrap_or(true) {
                    best = Some((
                        gain,
                        Stump {
                            feature,
                            threshold,
                            left: -gl / (hl + LAMBDA),
                            right: -gr / (hr + LAMBDA),
                            missing_left,
                        },
                    ));
                }
            }
        }
    }

    best.map(|(_, stump)| stump)
}
