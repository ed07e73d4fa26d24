//! Rule-based outlier detection over the labeled cohort.
//!
//! A sample is an outlier for a classifier when its observed score disagrees
//! with its variant annotation:
//! - high-score wild-type: no variant record and `score >= high_threshold`
//! - low-score mutant: at least one variant record and `score < low_threshold`

use crate::config::ExplorationConfig;
use crate::evaluate::annotations::{LabeledClassifier, LabeledCohort};
use crate::evaluate::metrics::ScoreSummary;
use crate::io::{format_float, write_tsv};
use crate::types::{MutationStatus, ScoreKind};
use itertools::Itertools;
use std::collections::BTreeMap;
use std::fmt;
use std::io::Write;

pub const OUTLIERS_FILE: &str = "outlier_samples.tsv";
pub const VARIANT_SUMMARY_FILE: &str = "variant_summary.tsv";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OutlierPolicy {
    pub high_threshold: f64,
    pub low_threshold: f64,
}

impl From<&ExplorationConfig> for OutlierPolicy {
    fn from(config: &ExplorationConfig) -> Self {
        Self {
            high_threshold: config.high_threshold,
            low_threshold: config.low_threshold,
        }
    }
}

impl OutlierPolicy {
    /// Classifies one sample, returning the crossed threshold alongside the kind.
    pub fn classify(&self, status: MutationStatus, score: f64) -> Option<(OutlierKind, f64)> {
        match status {
            MutationStatus::WildType if score >= self.high_threshold => {
                Some((OutlierKind::HighScoreWildType, self.high_threshold))
            }
            MutationStatus::Mutant if score < self.low_threshold => {
                Some((OutlierKind::LowScoreMutant, self.low_threshold))
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum OutlierKind {
    HighScoreWildType,
    LowScoreMutant,
}

impl fmt::Display for OutlierKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HighScoreWildType => f.write_str("high-score wild-type"),
            Self::LowScoreMutant => f.write_str("low-score mutant"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Outlier {
    pub classifier: String,
    pub sample_id: String,
    pub model: String,
    pub histology: Option<String>,
    pub kind: OutlierKind,
    pub score: f64,
    pub threshold: f64,
    /// Absolute distance between the score and the crossed threshold.
    pub distance: f64,
    pub genes: Vec<String>,
    pub classifications: Vec<String>,
}

fn classifier_outliers(
    cohort: &LabeledCohort,
    classifier: &LabeledClassifier,
    policy: &OutlierPolicy,
) -> Vec<Outlier> {
    let scores = classifier.scores.values(ScoreKind::Observed);
    cohort
        .samples
        .iter()
        .zip(&classifier.status)
        .zip(scores)
        .filter_map(|((sample, &status), &score)| {
            let (kind, threshold) = policy.classify(status, score)?;
            let records = classifier.variants.records(&sample.model);
            Some(Outlier {
                classifier: classifier.name.clone(),
                sample_id: sample.sample_id.clone(),
                model: sample.model.clone(),
                histology: sample.histology.clone(),
                kind,
                score,
                threshold,
                distance: (score - threshold).abs(),
                genes: records.iter().map(|r| r.gene.clone()).dedup().collect(),
                classifications: records
                    .iter()
                    .map(|r| r.classification.clone())
                    .sorted()
                    .dedup()
                    .collect(),
            })
        })
        .collect()
}

/// All outliers, grouped by classifier in cohort order, then ordered by distance
/// from the crossed threshold (largest first) and natural sample order.
pub fn find_outliers(cohort: &LabeledCohort, policy: &OutlierPolicy) -> Vec<Outlier> {
    cohort
        .classifiers
        .iter()
        .flat_map(|c| {
            let mut found = classifier_outliers(cohort, c, policy);
            found.sort_by(|a, b| {
                b.distance
                    .total_cmp(&a.distance)
                    .then_with(|| natord::compare(&a.sample_id, &b.sample_id))
                    .then_with(|| a.kind.cmp(&b.kind))
            });
            log::info!("Classifier '{}': {} outlier samples", c.name, found.len());
            found
        })
        .collect()
}

/// Score statistics for one (gene, variant classification) group.
#[derive(Debug, Clone, PartialEq)]
pub struct VariantSummaryRow {
    pub classifier: String,
    pub gene: String,
    pub classification: String,
    pub samples: usize,
    pub mean_score: f64,
    pub median_score: f64,
    pub fraction_high: f64,
}

/// Per classifier × gene × variant classification, plus one wild-type row.
/// A sample counts once per distinct (gene, classification) pair it carries.
pub fn summarize_variants(cohort: &LabeledCohort, policy: &OutlierPolicy) -> Vec<VariantSummaryRow> {
    let wild_type = MutationStatus::WildType.describe();
    let mut rows = Vec::new();
    for classifier in &cohort.classifiers {
        let scores = classifier.scores.values(ScoreKind::Observed);
        let mut groups: BTreeMap<(&str, &str), Vec<f64>> = BTreeMap::new();
        for (sample, &score) in cohort.samples.iter().zip(scores) {
            let records = classifier.variants.records(&sample.model);
            if records.is_empty() {
                groups.entry((wild_type, wild_type)).or_default().push(score);
                continue;
            }
            for record in records.iter().dedup() {
                groups
                    .entry((record.gene.as_str(), record.classification.as_str()))
                    .or_default()
                    .push(score);
            }
        }

        rows.extend(groups.into_iter().filter_map(|((gene, classification), values)| {
            let summary = ScoreSummary::from_values(&values)?;
            let high = values.iter().filter(|&&v| v >= policy.high_threshold).count();
            Some(VariantSummaryRow {
                classifier: classifier.name.clone(),
                gene: gene.to_string(),
                classification: classification.to_string(),
                samples: summary.n,
                mean_score: summary.mean,
                median_score: summary.median,
                fraction_high: high as f64 / summary.n as f64,
            })
        }));
    }
    rows
}

pub fn write_outliers(out: &mut dyn Write, outliers: &[Outlier]) -> std::io::Result<()> {
    let header = [
        "classifier",
        "sample_id",
        "Model",
        "Histology",
        "outlier_type",
        "score",
        "threshold",
        "distance",
        "variant_genes",
        "variant_classifications",
    ]
    .map(String::from);
    let rows: Vec<Vec<String>> = outliers
        .iter()
        .map(|o| {
            vec![
                o.classifier.clone(),
                o.sample_id.clone(),
                o.model.clone(),
                o.histology.clone().unwrap_or_default(),
                o.kind.to_string(),
                format_float(o.score),
                format_float(o.threshold),
                format_float(o.distance),
                o.genes.join(","),
                o.classifications.join(","),
            ]
        })
        .collect();
    write_tsv(out, &header, &rows)
}

pub fn write_variant_summary(
    out: &mut dyn Write,
    rows: &[VariantSummaryRow],
) -> std::io::Result<()> {
    let header = [
        "classifier",
        "gene",
        "variant_classification",
        "n_samples",
        "mean_score",
        "median_score",
        "fraction_above_high_threshold",
    ]
    .map(String::from);
    let rows: Vec<Vec<String>> = rows
        .iter()
        .map(|r| {
            vec![
                r.classifier.clone(),
                r.gene.clone(),
                r.classification.clone(),
                r.samples.to_string(),
                format_float(r.mean_score),
                format_float(r.median_score),
                format_float(r.fraction_high),
            ]
        })
        .collect();
    write_tsv(out, &header, &rows)
}
