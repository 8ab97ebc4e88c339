//! Ranking and calibration metrics over parallel `(label, probability)` slices.
//!
//! Every function is pure. Ties in probability keep the input order (stable
//! sort), so callers that need reproducible top-k selection must order their
//! samples by a secondary key before calling in.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum MetricError {
    #[error("label and probability sequences differ in length ({labels} vs {probs})")]
    LengthMismatch { labels: usize, probs: usize },
    #[error("no samples to evaluate")]
    Empty,
    #[error("label {value} at index {index} is not binary")]
    InvalidLabel { index: usize, value: f64 },
    #[error("probability {value} at index {index} is outside [0, 1]")]
    InvalidProbability { index: usize, value: f64 },
    #[error("{metric} is undefined: {reason}")]
    UndefinedMetric {
        metric: &'static str,
        reason: &'static str,
    },
}

/// Mean predicted probability and observed positive fraction of one bin.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibrationBin {
    pub mean_predicted: f64,
    pub fraction_positive: f64,
    pub count: usize,
}

fn check_inputs(y_true: &[f64], y_prob: &[f64]) -> Result<(), MetricError> {
    if y_true.len() != y_prob.len() {
        return Err(MetricError::LengthMismatch {
            labels: y_true.len(),
            probs: y_prob.len(),
        });
    }

    for (index, value) in y_true.iter().copied().enumerate() {
        if value != 0.0 && value != 1.0 {
            return Err(MetricError::InvalidLabel { index, value });
        }
    }
    for (index, value) in y_prob.iter().copied().enumerate() {
        if !(0.0..=1.0).contains(&value) {
            return Err(MetricError::InvalidProbability { index, value });
        }
    }

    Ok(())
}

/// Indices ordered by descending probability; equal probabilities keep input order.
fn descending_order(y_prob: &[f64]) -> Vec<usize> {
    let mut order = (0..y_prob.len()).collect::<Vec<_>>();
    order.sort_by(|&left, &right| y_prob[right].total_cmp(&y_prob[left]));
    order
}

/// Cumulative (true positives, false positives) at every distinct threshold,
/// walking from the highest probability down.
fn threshold_counts(y_true: &[f64], y_prob: &[f64]) -> Vec<(f64, f64)> {
    let order = descending_order(y_prob);
    let mut counts = Vec::new();
    let mut tps = 0.0_f64;
    let mut fps = 0.0_f64;

    for (position, &index) in order.iter().enumerate() {
        if y_true[index] == 1.0 {
            tps += 1.0;
        } else {
            fps += 1.0;
        }

        let is_last_at_threshold = order
            .get(position + 1)
            .map(|&next| y_prob[next] != y_prob[index])
            .unwrap_or(true);
        if is_last_at_threshold {
            counts.push((tps, fps));
        }
    }

    counts
}

fn trapezoid(points: &[(f64, f64)]) -> f64 {
    points
        .windows(2)
        .map(|pair| (pair[1].0 - pair[0].0) * (pair[1].1 + pair[0].1) / 2.0)
        .sum()
}

/// Area under the precision-recall curve, integrated over ascending recall
/// starting from the `(recall 0, precision 1)` anchor.
pub fn auprc(y_true: &[f64], y_prob: &[f64]) -> Result<f64, MetricError> {
    check_inputs(y_true, y_prob)?;
    if y_true.is_empty() {
        return Err(MetricError::Empty);
    }

    let counts = threshold_counts(y_true, y_prob);
    let positives = counts.last().map(|(tps, _)| *tps).unwrap_or(0.0);
    if positives == 0.0 {
        return Err(MetricError::UndefinedMetric {
            metric: "AUPRC",
            reason: "no positive labels",
        });
    }

    let mut points = Vec::with_capacity(counts.len() + 1);
    points.push((0.0, 1.0));
    for (tps, fps) in counts {
        points.push((tps / positives, tps / (tps + fps)));
    }

    Ok(trapezoid(&points))
}

/// Area under the ROC curve.
pub fn roc_auc(y_true: &[f64], y_prob: &[f64]) -> Result<f64, MetricError> {
    check_inputs(y_true, y_prob)?;
    if y_true.is_empty() {
        return Err(MetricError::Empty);
    }

    let counts = threshold_counts(y_true, y_prob);
    let (positives, negatives) = counts.last().copied().unwrap_or((0.0, 0.0));
    if positives == 0.0 || negatives == 0.0 {
        return Err(MetricError::UndefinedMetric {
            metric: "ROC AUC",
            reason: "only one class present",
        });
    }

    let mut points = Vec::with_capacity(counts.len() + 1);
    points.push((0.0, 0.0));
    for (tps, fps) in counts {
        points.push((fps / negatives, tps / positives));
    }

    Ok(trapezoid(&points))
}

pub fn brier_score(y_true: &[f64], y_prob: &[f64]) -> Result<f64, MetricError> {
    check_inputs(y_true, y_prob)?;
    if y_true.is_empty() {
        return Err(MetricError::Empty);
    }

    let sum_sq: f64 = y_true
        .iter()
        .zip(y_prob)
        .map(|(label, prob)| (prob - label).powi(2))
        .sum();
    Ok(sum_sq / y_true.len() as f64)
}

fn top_k_size(n: usize, k_pct: f64) -> usize {
    let k = (n as f64 * (k_pct / 100.0)).floor();
    if k.is_nan() || k <= 0.0 {
        0
    } else {
        (k as usize).min(n)
    }
}

fn top_k_positives(y_true: &[f64], y_prob: &[f64], k: usize) -> f64 {
    descending_order(y_prob)
        .into_iter()
        .take(k)
        .map(|index| y_true[index])
        .sum()
}

/// Share of all positives captured by the `k_pct` percent highest-scored rows.
pub fn recall_at_k(y_true: &[f64], y_prob: &[f64], k_pct: f64) -> Result<f64, MetricError> {
    check_inputs(y_true, y_prob)?;
    let k = top_k_size(y_true.len(), k_pct);
    if k == 0 {
        return Ok(0.0);
    }

    let positives: f64 = y_true.iter().sum();
    if positives == 0.0 {
        return Err(MetricError::UndefinedMetric {
            metric: "recall@k",
            reason: "no positive labels",
        });
    }

    Ok(top_k_positives(y_true, y_prob, k) / positives)
}

/// Fraction of the `k_pct` percent highest-scored rows that are positive.
pub fn precision_at_k(y_true: &[f64], y_prob: &[f64], k_pct: f64) -> Result<f64, MetricError> {
    check_inputs(y_true, y_prob)?;
    let k = top_k_size(y_true.len(), k_pct);
    if k == 0 {
        return Ok(0.0);
    }

    Ok(top_k_positives(y_true, y_prob, k) / k as f64)
}

fn percentile(sorted: &[f64], fraction: f64) -> f64 {
    let position = fraction * (sorted.len() - 1) as f64;
    let low = position.floor() as usize;
    let high = position.ceil() as usize;
    let weight = position - low as f64;
    sorted[low] + (sorted[high] - sorted[low]) * weight
}

/// Equal-population calibration bins. Edges are the linear-interpolated
/// quantiles of `y_prob`; a value lands in the first bin whose inner edge is
/// greater than or equal to it. Empty bins are dropped.
pub fn calibration_curve(
    y_true: &[f64],
    y_prob: &[f64],
    n_bins: usize,
) -> Result<Vec<CalibrationBin>, MetricError> {
    check_inputs(y_true, y_prob)?;
    if y_true.is_empty() {
        return Err(MetricError::Empty);
    }
    if n_bins == 0 {
        return Err(MetricError::UndefinedMetric {
            metric: "calibration curve",
            reason: "bin count must be positive",
        });
    }

    let mut sorted = y_prob.to_vec();
    sorted.sort_by(|left, right| left.total_cmp(right));
    let inner_edges = (1..n_bins)
        .map(|step| percentile(&sorted, step as f64 / n_bins as f64))
        .collect::<Vec<_>>();

    let mut sums = vec![0.0_f64; n_bins];
    let mut positives = vec![0.0_f64; n_bins];
    let mut counts = vec![0_usize; n_bins];
    for (label, prob) in y_true.iter().zip(y_prob) {
        let bin = inner_edges.partition_point(|edge| edge < prob);
        sums[bin] += prob;
        positives[bin] += label;
        counts[bin] += 1;
    }

    Ok((0..n_bins)
        .filter(|&bin| counts[bin] > 0)
        .map(|bin| CalibrationBin {
            mean_predicted: sums[bin] / counts[bin] as f64,
            fraction_positive: positives[bin] / counts[bin] as f64,
            count: counts[bin],
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    const LABELS: [f64; 5] = [1.0, 0.0, 1.0, 0.0, 1.0];
    const PROBS: [f64; 5] = [0.9, 0.1, 0.8, 0.4, 0.2];

    fn approx(left: f64, right: f64) -> bool {
        (left - right).abs() < 1e-9
    }

    #[test]
    fn top_k_worked_example() {
        let recall = recall_at_k(&LABELS, &PROBS, 40.0).unwrap();
        let precision = precision_at_k(&LABELS, &PROBS, 40.0).unwrap();
        assert!(approx(recall, 2.0 / 3.0));
        assert!(approx(precision, 1.0));
    }

    #[test]
    fn zero_k_returns_zero() {
        assert_eq!(recall_at_k(&LABELS, &PROBS, 0.0).unwrap(), 0.0);
        assert_eq!(precision_at_k(&LABELS, &PROBS, 0.0).unwrap(), 0.0);
        // 1% of five rows floors to zero as well.
        assert_eq!(recall_at_k(&LABELS, &PROBS, 1.0).unwrap(), 0.0);
    }

    #[test]
    fn recall_is_monotone_in_k() {
        let labels = [0.0, 1.0, 0.0, 0.0, 1.0, 1.0, 0.0, 1.0, 0.0, 0.0];
        let probs = [0.05, 0.7, 0.3, 0.3, 0.9, 0.2, 0.6, 0.45, 0.1, 0.3];
        let mut previous = 0.0;
        for k_pct in [0.0, 5.0, 10.0, 25.0, 40.0, 50.0, 75.0, 100.0] {
            let recall = recall_at_k(&labels, &probs, k_pct).unwrap();
            assert!(recall >= previous, "recall dropped at k={k_pct}");
            previous = recall;
        }
        assert!(approx(previous, 1.0));
    }

    #[test]
    fn ties_keep_input_order() {
        let labels = [0.0, 1.0, 1.0];
        let probs = [0.5, 0.5, 0.1];
        // k = 1 picks index 0 because it comes first among equal scores.
        assert_eq!(precision_at_k(&labels, &probs, 34.0).unwrap(), 0.0);
    }

    #[test]
    fn recall_without_positives_is_an_error() {
        let err = recall_at_k(&[0.0, 0.0], &[0.1, 0.2], 50.0).unwrap_err();
        assert!(matches!(err, MetricError::UndefinedMetric { .. }));
    }

    #[test]
    fn auprc_integrates_from_the_precision_one_anchor() {
        let value = auprc(&LABELS, &PROBS).unwrap();
        assert!(approx(value, 65.0 / 72.0), "got {value}");
    }

    #[test]
    fn auprc_is_one_for_perfect_ranking() {
        let value = auprc(&[1.0, 1.0, 0.0, 0.0], &[0.9, 0.8, 0.2, 0.1]).unwrap();
        assert!(approx(value, 1.0));
    }

    #[test]
    fn auprc_without_positives_is_an_error() {
        let err = auprc(&[0.0, 0.0, 0.0], &[0.3, 0.2, 0.1]).unwrap_err();
        assert_eq!(
            err,
            MetricError::UndefinedMetric {
                metric: "AUPRC",
                reason: "no positive labels"
            }
        );
        assert_eq!(auprc(&[], &[]).unwrap_err(), MetricError::Empty);
    }

    #[test]
    fn roc_auc_counts_ordered_pairs() {
        let value = roc_auc(&LABELS, &PROBS).unwrap();
        assert!(approx(value, 5.0 / 6.0), "got {value}");
        assert!(roc_auc(&[1.0, 1.0], &[0.2, 0.3]).is_err());
    }

    #[test]
    fn brier_is_mean_squared_error() {
        let value = brier_score(&LABELS, &PROBS).unwrap();
        assert!(approx(value, 0.172), "got {value}");
    }

    #[test]
    fn inputs_are_validated() {
        assert_eq!(
            recall_at_k(&[1.0], &[0.5, 0.2], 50.0).unwrap_err(),
            MetricError::LengthMismatch { labels: 1, probs: 2 }
        );
        assert!(matches!(
            brier_score(&[2.0], &[0.5]).unwrap_err(),
            MetricError::InvalidLabel { index: 0, .. }
        ));
        assert!(matches!(
            brier_score(&[1.0], &[1.5]).unwrap_err(),
            MetricError::InvalidProbability { index: 0, .. }
        ));
    }

    #[test]
    fn calibration_curve_uses_equal_population_bins() {
        let probs = [0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7, 0.8, 0.9, 1.0];
        let labels = [0.0, 0.0, 0.0, 1.0, 0.0, 1.0, 1.0, 0.0, 1.0, 1.0];
        let bins = calibration_curve(&labels, &probs, 2).unwrap();

        assert_eq!(bins.len(), 2);
        assert_eq!(bins[0].count, 5);
        assert!(approx(bins[0].mean_predicted, 0.3));
        assert!(approx(bins[0].fraction_positive, 0.2));
        assert!(approx(bins[1].mean_predicted, 0.8));
        assert!(approx(bins[1].fraction_positive, 0.8));
    }

    #[test]
    fn calibration_curve_drops_empty_bins() {
        let probs = [0.2, 0.2, 0.2, 0.2];
        let labels = [0.0, 1.0, 0.0, 0.0];
        let bins = calibration_curve(&labels, &probs, 4).unwrap();
        assert_eq!(bins.len(), 1);
        assert_eq!(bins[0].count, 4);
        assert!(approx(bins[0].fraction_positive, 0.25));
    }
}
