//! Per-classifier evaluation results and the tables they are written to.

use super::annotations::{LabeledClassifier, LabeledCohort};
use super::metrics::{
    self, MetricError, PrPoint, RocPoint, ScoreSummary, UNDEFINED, WelchTest,
};
use crate::io::{format_float, write_tsv};
use crate::types::{MutationStatus, ScoreKind};
use std::collections::BTreeMap;
use std::io::Write;

pub const METRICS_FILE: &str = "evaluation_metrics.tsv";
pub const ROC_FILE: &str = "roc_curves.tsv";
pub const PR_FILE: &str = "pr_curves.tsv";
pub const DISTRIBUTIONS_FILE: &str = "score_distributions.tsv";
pub const LABELED_SCORES_FILE: &str = "labeled_scores.tsv";

/// Histology value used for rows that pool every histology.
const ALL_HISTOLOGIES: &str = "all";

/// Metrics for one classifier on one kind of score.
#[derive(Debug, Clone, PartialEq)]
pub struct KindEvaluation {
    pub kind: ScoreKind,
    pub auroc: Result<f64, MetricError>,
    pub aupr: Result<f64, MetricError>,
    pub t_test: Result<WelchTest, MetricError>,
    pub roc: Result<Vec<RocPoint>, MetricError>,
    pub pr: Result<Vec<PrPoint>, MetricError>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassifierEvaluation {
    pub name: String,
    pub label: String,
    pub mutants: usize,
    pub wild_types: usize,
    /// Observed first, then shuffled.
    pub kinds: Vec<KindEvaluation>,
}

impl ClassifierEvaluation {
    pub fn kind(&self, kind: ScoreKind) -> Option<&KindEvaluation> {
        self.kinds.iter().find(|k| k.kind == kind)
    }
}

/// One row of the distribution table.
#[derive(Debug, Clone, PartialEq)]
pub struct DistributionRow {
    pub classifier: String,
    pub kind: ScoreKind,
    pub status: MutationStatus,
    /// `None` pools every histology.
    pub histology: Option<String>,
    pub summary: ScoreSummary,
}

/// Everything the evaluation stage computes.
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationReport {
    pub classifiers: Vec<ClassifierEvaluation>,
    pub distributions: Vec<DistributionRow>,
}

fn warn_if_undefined<T>(classifier: &str, kind: ScoreKind, metric: &str, value: &Result<T, MetricError>) {
    if let Err(reason) = value {
        log::warn!("{classifier} ({kind}) {metric} is {reason}");
    }
}

pub fn evaluate_classifier(classifier: &LabeledClassifier) -> ClassifierEvaluation {
    let labels = classifier.labels();
    let kinds = ScoreKind::ALL
        .into_iter()
        .map(|kind| {
            let scores = classifier.scores.values(kind);
            let evaluation = KindEvaluation {
                kind,
                auroc: metrics::auroc(scores, &labels),
                aupr: metrics::average_precision(scores, &labels),
                t_test: metrics::welch_t_test(
                    &classifier.scores_with_status(kind, MutationStatus::Mutant),
                    &classifier.scores_with_status(kind, MutationStatus::WildType),
                ),
                roc: metrics::roc_curve(scores, &labels),
                pr: metrics::precision_recall_curve(scores, &labels),
            };
            warn_if_undefined(&classifier.name, kind, "AUROC", &evaluation.auroc);
            warn_if_undefined(&classifier.name, kind, "t-test", &evaluation.t_test);
            if let Ok(auroc) = evaluation.auroc {
                log::info!("{} ({kind}) AUROC = {:.4}", classifier.name, auroc);
            }
            evaluation
        })
        .collect();

    ClassifierEvaluation {
        name: classifier.name.clone(),
        label: classifier.label.clone(),
        mutants: classifier.count(MutationStatus::Mutant),
        wild_types: classifier.count(MutationStatus::WildType),
        kinds,
    }
}

/// Summaries by status, then by status within each histology when histology is known.
pub fn score_distributions(cohort: &LabeledCohort) -> Vec<DistributionRow> {
    let mut rows = Vec::new();
    for classifier in &cohort.classifiers {
        for kind in ScoreKind::ALL {
            let values = classifier.scores.values(kind);
            let mut groups: BTreeMap<(Option<&str>, MutationStatus), Vec<f64>> = BTreeMap::new();
            for ((sample, status), value) in cohort.samples.iter().zip(&classifier.status).zip(values) {
                groups.entry((None, *status)).or_default().push(*value);
                if let Some(histology) = sample.histology.as_deref() {
                    groups
                        .entry((Some(histology), *status))
                        .or_default()
                        .push(*value);
                }
            }
            rows.extend(groups.into_iter().filter_map(|((histology, status), group)| {
                Some(DistributionRow {
                    classifier: classifier.name.clone(),
                    kind,
                    status,
                    histology: histology.map(str::to_string),
                    summary: ScoreSummary::from_values(&group)?,
                })
            }));
        }
    }
    rows
}

pub fn build_report(cohort: &LabeledCohort) -> EvaluationReport {
    EvaluationReport {
        classifiers: cohort.classifiers.iter().map(evaluate_classifier).collect(),
        distributions: score_distributions(cohort),
    }
}

fn cell(value: &Result<f64, MetricError>) -> String {
    match value {
        Ok(v) => format_float(*v),
        Err(_) => UNDEFINED.to_string(),
    }
}

fn header(columns: &[&str]) -> Vec<String> {
    columns.iter().map(|c| c.to_string()).collect()
}

impl EvaluationReport {
    pub fn write_metrics(&self, out: &mut dyn Write) -> std::io::Result<()> {
        let mut rows = Vec::new();
        for c in &self.classifiers {
            for k in &c.kinds {
                let t = k.t_test.clone();
                rows.push(vec![
                    c.name.clone(),
                    k.kind.to_string(),
                    c.mutants.to_string(),
                    c.wild_types.to_string(),
                    cell(&k.auroc),
                    cell(&k.aupr),
                    cell(&t.clone().map(|w| w.t_statistic)),
                    cell(&t.clone().map(|w| w.degrees_of_freedom)),
                    cell(&t.map(|w| w.p_value)),
                ]);
            }
        }
        write_tsv(
            out,
            &header(&[
                "classifier",
                "score_kind",
                "n_mutant",
                "n_wild_type",
                "auroc",
                "aupr",
                "t_statistic",
                "t_df",
                "t_p_value",
            ]),
            &rows,
        )
    }

    pub fn write_roc_curves(&self, out: &mut dyn Write) -> std::io::Result<()> {
        let mut rows = Vec::new();
        for c in &self.classifiers {
            for k in &c.kinds {
                for p in k.roc.iter().flatten() {
                    rows.push(vec![
                        c.name.clone(),
                        k.kind.to_string(),
                        format_float(p.threshold),
                        format_float(p.fpr),
                        format_float(p.tpr),
                    ]);
                }
            }
        }
        write_tsv(
            out,
            &header(&["classifier", "score_kind", "threshold", "fpr", "tpr"]),
            &rows,
        )
    }

    pub fn write_pr_curves(&self, out: &mut dyn Write) -> std::io::Result<()> {
        let mut rows = Vec::new();
        for c in &self.classifiers {
            for k in &c.kinds {
                for p in k.pr.iter().flatten() {
                    rows.push(vec![
                        c.name.clone(),
                        k.kind.to_string(),
                        format_float(p.threshold),
                        format_float(p.recall),
                        format_float(p.precision),
                    ]);
                }
            }
        }
        write_tsv(
            out,
            &header(&["classifier", "score_kind", "threshold", "recall", "precision"]),
            &rows,
        )
    }

    pub fn write_distributions(&self, out: &mut dyn Write) -> std::io::Result<()> {
        let rows: Vec<Vec<String>> = self
            .distributions
            .iter()
            .map(|d| {
                let s = &d.summary;
                vec![
                    d.classifier.clone(),
                    d.kind.to_string(),
                    d.status.to_string(),
                    d.histology.clone().unwrap_or_else(|| ALL_HISTOLOGIES.to_string()),
                    s.n.to_string(),
                    format_float(s.mean),
                    s.sd.map(format_float).unwrap_or_else(|| UNDEFINED.to_string()),
                    format_float(s.min),
                    format_float(s.q1),
                    format_float(s.median),
                    format_float(s.q3),
                    format_float(s.max),
                ]
            })
            .collect();
        write_tsv(
            out,
            &header(&[
                "classifier",
                "score_kind",
                "status",
                "histology",
                "n",
                "mean",
                "sd",
                "min",
                "q1",
                "median",
                "q3",
                "max",
            ]),
            &rows,
        )
    }
}
