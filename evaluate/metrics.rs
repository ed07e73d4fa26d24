//! Discrimination metrics and group statistics.
//!
//! Every function here sorts its input before reducing it, so results depend
//! only on the multiset of (score, label) pairs and never on row order.

use statrs::distribution::{ContinuousCDF, StudentsT};
use std::cmp::Ordering;
use thiserror::Error;

/// Why a statistic could not be computed. Each variant is an "undefined" result,
/// not a failure of the stage.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MetricError {
    #[error(
        "undefined: {positives} mutant and {negatives} wild-type samples, both classes are required"
    )]
    SingleClass { positives: usize, negatives: usize },
    #[error(
        "undefined: a t-test needs at least 2 samples per group, found {positives} mutant and {negatives} wild-type"
    )]
    TooFewSamples { positives: usize, negatives: usize },
    #[error("undefined: both groups have zero variance")]
    ZeroVariance,
    #[error("{scores} scores were given with {labels} labels")]
    LengthMismatch { scores: usize, labels: usize },
}

/// Rendering used for every undefined statistic in output tables.
pub const UNDEFINED: &str = "undefined";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RocPoint {
    pub fpr: f64,
    pub tpr: f64,
    pub threshold: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PrPoint {
    pub recall: f64,
    pub precision: f64,
    pub threshold: f64,
}

/// Result of Welch's unequal-variance t-test, mutant minus wild-type.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WelchTest {
    pub t_statistic: f64,
    pub degrees_of_freedom: f64,
    pub p_value: f64,
}

/// Descriptive statistics of one group of scores.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreSummary {
    pub n: usize,
    pub mean: f64,
    /// Sample standard deviation; `None` for a single observation.
    pub sd: Option<f64>,
    pub min: f64,
    pub q1: f64,
    pub median: f64,
    pub q3: f64,
    pub max: f64,
}

fn sorted_values(values: &[f64]) -> Vec<f64> {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    sorted
}

/// Sum over sorted values so the result does not depend on input order.
fn ordered_mean(sorted: &[f64]) -> f64 {
    sorted.iter().sum::<f64>() / sorted.len() as f64
}

fn sample_variance(sorted: &[f64], mean: f64) -> f64 {
    let mut squares: Vec<f64> = sorted.iter().map(|v| (v - mean).powi(2)).collect();
    squares.sort_by(f64::total_cmp);
    squares.iter().sum::<f64>() / (sorted.len() - 1) as f64
}

/// Linear-interpolation quantile of a sorted, non-empty slice.
fn quantile(sorted: &[f64], q: f64) -> f64 {
    let position = q * (sorted.len() - 1) as f64;
    let lower = position.floor() as usize;
    let upper = position.ceil() as usize;
    let fraction = position - lower as f64;
    sorted[lower] + (sorted[upper] - sorted[lower]) * fraction
}

impl ScoreSummary {
    /// Summarizes a group; `None` when the group is empty.
    pub fn from_values(values: &[f64]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        let sorted = sorted_values(values);
        let n = sorted.len();
        let mean = ordered_mean(&sorted);
        let sd = (n > 1).then(|| sample_variance(&sorted, mean).sqrt());
        Some(Self {
            n,
            mean,
            sd,
            min: sorted[0],
            q1: quantile(&sorted, 0.25),
            median: quantile(&sorted, 0.5),
            q3: quantile(&sorted, 0.75),
            max: sorted[n - 1],
        })
    }
}

/// Counts (positives, negatives), rejecting mismatched lengths and single-class labels.
fn class_counts(scores: &[f64], labels: &[bool]) -> Result<(usize, usize), MetricError> {
    if scores.len() != labels.len() {
        return Err(MetricError::LengthMismatch {
            scores: scores.len(),
            labels: labels.len(),
        });
    }
    let positives = labels.iter().filter(|&&l| l).count();
    let negatives = labels.len() - positives;
    if positives == 0 || negatives == 0 {
        return Err(MetricError::SingleClass {
            positives,
            negatives,
        });
    }
    Ok((positives, negatives))
}

/// (score, label) pairs in ascending score order; labels break ties so the
/// order is total.
fn sorted_pairs(scores: &[f64], labels: &[bool]) -> Vec<(f64, bool)> {
    let mut pairs: Vec<(f64, bool)> = scores.iter().copied().zip(labels.iter().copied()).collect();
    pairs.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
    pairs
}

/// Splits sorted pairs into runs of equal score, yielding (score, positives, negatives).
fn tied_groups(pairs: &[(f64, bool)]) -> Vec<(f64, usize, usize)> {
    let mut groups = Vec::new();
    let mut start = 0;
    while start < pairs.len() {
        let score = pairs[start].0;
        let end = start
            + pairs[start..]
                .iter()
                .take_while(|p| p.0.partial_cmp(&score) == Some(Ordering::Equal))
                .count();
        let positives = pairs[start..end].iter().filter(|p| p.1).count();
        groups.push((score, positives, end - start - positives));
        start = end;
    }
    groups
}

/// Area under the ROC curve via the Mann-Whitney U statistic with average ranks
/// for ties. Rank sums are accumulated as doubled integers so the result is exact
/// up to the final division.
pub fn auroc(scores: &[f64], labels: &[bool]) -> Result<f64, MetricError> {
    let (positives, negatives) = class_counts(scores, labels)?;
    let pairs = sorted_pairs(scores, labels);

    let mut doubled_rank_sum: u128 = 0;
    let mut seen = 0usize;
    for (_, pos, neg) in tied_groups(&pairs) {
        let size = pos + neg;
        // Ranks seen+1 ..= seen+size share the average rank; doubled it is integral.
        let doubled_rank = (2 * seen + size + 1) as u128;
        doubled_rank_sum += doubled_rank * pos as u128;
        seen += size;
    }

    let n1 = positives as u128;
    let doubled_u = doubled_rank_sum - n1 * (n1 + 1);
    Ok(doubled_u as f64 / (2.0 * positives as f64 * negatives as f64))
}

/// ROC curve from the highest threshold down, starting at (0, 0) with an
/// infinite threshold and ending at (1, 1).
pub fn roc_curve(scores: &[f64], labels: &[bool]) -> Result<Vec<RocPoint>, MetricError> {
    let (positives, negatives) = class_counts(scores, labels)?;
    let pairs = sorted_pairs(scores, labels);

    let mut points = vec![RocPoint {
        fpr: 0.0,
        tpr: 0.0,
        threshold: f64::INFINITY,
    }];
    let (mut tp, mut fp) = (0usize, 0usize);
    for (threshold, pos, neg) in tied_groups(&pairs).into_iter().rev() {
        tp += pos;
        fp += neg;
        points.push(RocPoint {
            fpr: fp as f64 / negatives as f64,
            tpr: tp as f64 / positives as f64,
            threshold,
        });
    }
    Ok(points)
}

/// Precision-recall curve from the highest threshold down, starting at
/// recall 0 with precision 1.
pub fn precision_recall_curve(
    scores: &[f64],
    labels: &[bool],
) -> Result<Vec<PrPoint>, MetricError> {
    let (positives, _) = class_counts(scores, labels)?;
    let pairs = sorted_pairs(scores, labels);

    let mut points = vec![PrPoint {
        recall: 0.0,
        precision: 1.0,
        threshold: f64::INFINITY,
    }];
    let (mut tp, mut fp) = (0usize, 0usize);
    for (threshold, pos, neg) in tied_groups(&pairs).into_iter().rev() {
        tp += pos;
        fp += neg;
        points.push(PrPoint {
            recall: tp as f64 / positives as f64,
            precision: tp as f64 / (tp + fp) as f64,
            threshold,
        });
    }
    Ok(points)
}

/// Average precision, `Σ (R_n − R_{n−1}) P_n` over descending thresholds.
pub fn average_precision(scores: &[f64], labels: &[bool]) -> Result<f64, MetricError> {
    let curve = precision_recall_curve(scores, labels)?;
    Ok(curve
        .windows(2)
        .map(|w| (w[1].recall - w[0].recall) * w[1].precision)
        .sum())
}

/// Welch's t-test of `mutant` against `wild_type` with a two-sided p-value.
pub fn welch_t_test(mutant: &[f64], wild_type: &[f64]) -> Result<WelchTest, MetricError> {
    if mutant.len() < 2 || wild_type.len() < 2 {
        return Err(MetricError::TooFewSamples {
            positives: mutant.len(),
            negatives: wild_type.len(),
        });
    }
    let a = sorted_values(mutant);
    let b = sorted_values(wild_type);
    let (na, nb) = (a.len() as f64, b.len() as f64);
    let (mean_a, mean_b) = (ordered_mean(&a), ordered_mean(&b));
    let se_a = sample_variance(&a, mean_a) / na;
    let se_b = sample_variance(&b, mean_b) / nb;
    let se = se_a + se_b;
    if se <= 0.0 {
        return Err(MetricError::ZeroVariance);
    }

    let t_statistic = (mean_a - mean_b) / se.sqrt();
    let degrees_of_freedom = se * se / (se_a * se_a / (na - 1.0) + se_b * se_b / (nb - 1.0));
    let t_dist =
        StudentsT::new(0.0, 1.0, degrees_of_freedom).map_err(|_| MetricError::ZeroVariance)?;
    let p_value = (2.0 * t_dist.sf(t_statistic.abs())).clamp(0.0, 1.0);

    Ok(WelchTest {
        t_statistic,
        degrees_of_freedom,
        p_value,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn perfect_separation_gives_unit_auroc() {
        let scores = [0.1, 0.2, 0.8, 0.9];
        let labels = [false, false, true, true];
        assert_abs_diff_eq!(auroc(&scores, &labels).unwrap(), 1.0);
        assert_abs_diff_eq!(average_precision(&scores, &labels).unwrap(), 1.0);
    }

    #[test]
    fn ties_count_as_half() {
        // One positive tied with one negative, one clean win.
        let scores = [0.5, 0.5, 0.1, 0.9];
        let labels = [true, false, false, true];
        // Pairs: (0.5+,0.5-)=0.5, (0.5+,0.1-)=1, (0.9+,0.5-)=1, (0.9+,0.1-)=1.
        assert_abs_diff_eq!(auroc(&scores, &labels).unwrap(), 3.5 / 4.0);
    }

    #[test]
    fn single_class_labels_are_undefined() {
        let scores = [0.1, 0.2, 0.3];
        assert_eq!(
            auroc(&scores, &[true, true, true]),
            Err(MetricError::SingleClass {
                positives: 3,
                negatives: 0
            })
        );
        assert!(average_precision(&scores, &[false, false, false]).is_err());
        assert!(roc_curve(&scores, &[false, false, false]).is_err());
    }

    #[test]
    fn roc_curve_runs_from_origin_to_corner() {
        let scores = [0.1, 0.4, 0.35, 0.8];
        let labels = [false, false, true, true];
        let curve = roc_curve(&scores, &labels).unwrap();
        assert_eq!(curve.len(), 5);
        assert_eq!((curve[0].fpr, curve[0].tpr), (0.0, 0.0));
        assert!(curve[0].threshold.is_infinite());
        let last = curve[curve.len() - 1];
        assert_eq!((last.fpr, last.tpr), (1.0, 1.0));
        assert!(curve.windows(2).all(|w| w[0].threshold > w[1].threshold));
    }

    #[test]
    fn average_precision_uses_step_sum() {
        // Descending: 0.8(+) 0.4(-) 0.35(+) 0.1(-).
        // Steps: R 0.5 at P 1; R 1.0 at P 2/3.
        let scores = [0.1, 0.4, 0.35, 0.8];
        let labels = [false, false, true, true];
        let ap = average_precision(&scores, &labels).unwrap();
        assert_abs_diff_eq!(ap, 0.5 * 1.0 + 0.5 * (2.0 / 3.0), epsilon = 1e-12);
    }

    #[test]
    fn welch_test_matches_reference_values() {
        let mutant = [0.8, 0.9, 0.7, 0.85];
        let wild_type = [0.2, 0.3, 0.25, 0.4, 0.35];
        let test = welch_t_test(&mutant, &wild_type).unwrap();
        // mean diff 0.8125 - 0.3 = 0.5125
        let se_a = 0.0072916666666666_f64 / 4.0;
        let se_b = 0.00625_f64 / 5.0;
        assert_abs_diff_eq!(test.t_statistic, 0.5125 / (se_a + se_b).sqrt(), epsilon = 1e-9);
        assert!(test.p_value > 0.0 && test.p_value < 1e-3);
        assert!(test.degrees_of_freedom > 5.0 && test.degrees_of_freedom < 7.0);
    }

    #[test]
    fn welch_test_needs_two_per_group_and_variance() {
        assert!(matches!(
            welch_t_test(&[0.5], &[0.1, 0.2]),
            Err(MetricError::TooFewSamples { .. })
        ));
        assert_eq!(
            welch_t_test(&[0.5, 0.5], &[0.1, 0.1]),
            Err(MetricError::ZeroVariance)
        );
    }

    #[test]
    fn summary_uses_linear_quantiles() {
        let summary = ScoreSummary::from_values(&[4.0, 1.0, 3.0, 2.0]).unwrap();
        assert_eq!(summary.n, 4);
        assert_abs_diff_eq!(summary.mean, 2.5);
        assert_abs_diff_eq!(summary.median, 2.5);
        assert_abs_diff_eq!(summary.q1, 1.75);
        assert_abs_diff_eq!(summary.q3, 3.25);
        assert_abs_diff_eq!(summary.sd.unwrap(), (5.0f64 / 3.0).sqrt(), epsilon = 1e-12);
        assert_eq!(ScoreSummary::from_values(&[1.0]).unwrap().sd, None);
        assert!(ScoreSummary::from_values(&[]).is_none());
    }

    #[test]
    fn metrics_ignore_row_order() {
        let scores = [0.3, 0.9, 0.3, 0.1, 0.7, 0.5, 0.5, 0.2];
        let labels = [true, true, false, false, true, false, true, false];
        let mut rows: Vec<(f64, bool)> = scores.iter().copied().zip(labels).collect();
        let reference = (
            auroc(&scores, &labels).unwrap(),
            average_precision(&scores, &labels).unwrap(),
        );
        for shift in 1..rows.len() {
            let last = rows.len() - 1;
            rows.rotate_left(shift);
            rows.swap(0, last);
            let (s, l): (Vec<f64>, Vec<bool>) = rows.iter().copied().unzip();
            assert_eq!(auroc(&s, &l).unwrap().to_bits(), reference.0.to_bits());
            assert_eq!(average_precision(&s, &l).unwrap().to_bits(), reference.1.to_bits());
        }
    }
}
