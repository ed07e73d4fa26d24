//! SVG figures for the evaluation stage.
//!
//! Every figure is rendered into an in-memory string. The evaluation stage stages
//! those strings alongside its tables and commits them together, so an
//! interrupted run never leaves a half-drawn file. Point jitter is seeded, which
//! keeps the SVG reproducible.

use super::annotations::{LabeledClassifier, LabeledCohort};
use super::metrics::{MetricError, ScoreSummary};
use super::report::ClassifierEvaluation;
use crate::types::{MutationStatus, ScoreKind};
use plotters::coord::Shift;
use plotters::coord::types::RangedCoordf64;
use plotters::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeSet;
use thiserror::Error;

pub const ROC_FIGURE: &str = "roc_curves.svg";
pub const PR_FIGURE: &str = "pr_curves.svg";

const CURVE_SIZE: (u32, u32) = (640, 520);
const STRIP_SIZE: (u32, u32) = (520, 560);
const HISTOLOGY_SIZE: (u32, u32) = (900, 600);
const FONT: &str = "sans-serif";
const JITTER_SEED: u64 = 42;
/// Reference line marking the conventional decision threshold.
const DECISION_THRESHOLD: f64 = 0.5;

/// Dark2 qualitative palette.
const PALETTE: [RGBColor; 8] = [
    RGBColor(27, 158, 119),
    RGBColor(217, 95, 2),
    RGBColor(117, 112, 179),
    RGBColor(231, 41, 138),
    RGBColor(102, 166, 30),
    RGBColor(230, 171, 2),
    RGBColor(166, 118, 29),
    RGBColor(102, 102, 102),
];
const BOX_FILL: RGBColor = RGBColor(210, 210, 210);

#[derive(Error, Debug)]
pub enum PlotError {
    #[error("Failed to render '{figure}': {detail}")]
    Render { figure: String, detail: String },
}

fn palette(i: usize) -> RGBColor {
    PALETTE[i % PALETTE.len()]
}

fn short(value: &Result<f64, MetricError>) -> String {
    match value {
        Ok(v) => format!("{v:.2}"),
        Err(_) => super::metrics::UNDEFINED.to_string(),
    }
}

/// Renders into an SVG string with `draw`, mapping any backend error to `PlotError`.
fn render_svg<F>(figure: &str, size: (u32, u32), draw: F) -> Result<String, PlotError>
where
    F: FnOnce(&DrawingArea<SVGBackend, Shift>) -> Result<(), Box<dyn std::error::Error>>,
{
    let mut svg = String::new();
    {
        let root = SVGBackend::with_string(&mut svg, size).into_drawing_area();
        let outcome = root
            .fill(&WHITE)
            .map_err(|e| e.to_string())
            .and_then(|()| draw(&root).map_err(|e| e.to_string()))
            .and_then(|()| root.present().map_err(|e| e.to_string()));
        outcome.map_err(|detail| PlotError::Render {
            figure: figure.to_string(),
            detail,
        })?;
    }
    Ok(svg)
}

fn curve_style(color: RGBColor, kind: ScoreKind) -> ShapeStyle {
    match kind {
        ScoreKind::Observed => color.stroke_width(2),
        ScoreKind::Shuffled => color.mix(0.5).stroke_width(1),
    }
}

fn kind_suffix(kind: ScoreKind) -> &'static str {
    match kind {
        ScoreKind::Observed => "",
        ScoreKind::Shuffled => " Shuffle",
    }
}

/// ROC curves of every classifier, observed solid and shuffled faded.
pub fn roc_figure(evaluations: &[ClassifierEvaluation]) -> Result<String, PlotError> {
    render_svg(ROC_FIGURE, CURVE_SIZE, |root| {
        let mut chart = ChartBuilder::on(root)
            .margin(15)
            .caption("ROC curves", (FONT, 20))
            .x_label_area_size(40)
            .y_label_area_size(50)
            .build_cartesian_2d(0.0..1.0, 0.0..1.0)?;
        chart
            .configure_mesh()
            .disable_mesh()
            .x_desc("False Positive Rate")
            .y_desc("True Positive Rate")
            .draw()?;
        chart.draw_series(LineSeries::new(
            vec![(0.0, 0.0), (1.0, 1.0)],
            BLACK.mix(0.4).stroke_width(1),
        ))?;

        for (i, evaluation) in evaluations.iter().enumerate() {
            for k in &evaluation.kinds {
                let Ok(points) = &k.roc else { continue };
                let style = curve_style(palette(i), k.kind);
                chart
                    .draw_series(LineSeries::new(points.iter().map(|p| (p.fpr, p.tpr)), style))?
                    .label(format!(
                        "{}{} (AUROC = {})",
                        evaluation.label,
                        kind_suffix(k.kind),
                        short(&k.auroc)
                    ))
                    .legend(move |(x, y)| PathElement::new(vec![(x - 10, y), (x + 10, y)], style));
            }
        }

        chart
            .configure_series_labels()
            .position(SeriesLabelPosition::LowerRight)
            .background_style(WHITE.mix(0.8))
            .border_style(BLACK)
            .draw()?;
        Ok(())
    })
}

/// Precision-recall curves of every classifier.
pub fn pr_figure(evaluations: &[ClassifierEvaluation]) -> Result<String, PlotError> {
    render_svg(PR_FIGURE, CURVE_SIZE, |root| {
        let mut chart = ChartBuilder::on(root)
            .margin(15)
            .caption("Precision-recall curves", (FONT, 20))
            .x_label_area_size(40)
            .y_label_area_size(50)
            .build_cartesian_2d(0.0..1.0, 0.0..1.0)?;
        chart
            .configure_mesh()
            .disable_mesh()
            .x_desc("Recall")
            .y_desc("Precision")
            .draw()?;

        for (i, evaluation) in evaluations.iter().enumerate() {
            for k in &evaluation.kinds {
                let Ok(points) = &k.pr else { continue };
                let style = curve_style(palette(i), k.kind);
                chart
                    .draw_series(LineSeries::new(
                        points.iter().map(|p| (p.recall, p.precision)),
                        style,
                    ))?
                    .label(format!(
                        "{}{} (AUPR = {})",
                        evaluation.label,
                        kind_suffix(k.kind),
                        short(&k.aupr)
                    ))
                    .legend(move |(x, y)| PathElement::new(vec![(x - 10, y), (x + 10, y)], style));
            }
        }

        chart
            .configure_series_labels()
            .position(SeriesLabelPosition::LowerLeft)
            .background_style(WHITE.mix(0.8))
            .border_style(BLACK)
            .draw()?;
        Ok(())
    })
}

/// Score axis covering [0, 1] and any identity-link scores outside it, with headroom.
fn score_range(values: &[f64]) -> (f64, f64) {
    let low = values.iter().copied().fold(0.0, f64::min);
    let high = values.iter().copied().fold(1.0, f64::max);
    (low - 0.05, high + 0.12 * (high - low))
}

type ScoreChart<'a, DB> = ChartContext<'a, DB, Cartesian2d<RangedCoordf64, RangedCoordf64>>;

/// Box from Q1 to Q3 with median bar and whiskers to min and max.
fn draw_box<DB: DrawingBackend>(
    chart: &mut ScoreChart<'_, DB>,
    center: f64,
    half_width: f64,
    summary: &ScoreSummary,
) -> Result<(), DrawingAreaErrorKind<DB::ErrorType>> {
    let outline = BLACK.stroke_width(1);
    let (left, right) = (center - half_width, center + half_width);
    chart.draw_series([
        Rectangle::new([(left, summary.q1), (right, summary.q3)], BOX_FILL.filled()),
        Rectangle::new([(left, summary.q1), (right, summary.q3)], outline),
    ])?;
    chart.draw_series([
        PathElement::new(
            vec![(left, summary.median), (right, summary.median)],
            BLACK.stroke_width(2),
        ),
        PathElement::new(vec![(center, summary.q3), (center, summary.max)], outline),
        PathElement::new(vec![(center, summary.q1), (center, summary.min)], outline),
    ])?;
    Ok(())
}

fn status_color(classifier_index: usize, status: MutationStatus) -> RGBColor {
    match status {
        MutationStatus::WildType => PALETTE[7],
        MutationStatus::Mutant => palette(classifier_index),
    }
}

/// Observed scores split by mutation status: boxes, jittered points, the 0.5
/// reference line and the Welch p-value.
pub fn predictions_figure(
    classifier: &LabeledClassifier,
    classifier_index: usize,
    evaluation: &ClassifierEvaluation,
) -> Result<String, PlotError> {
    let figure = format!("{}_predictions.svg", classifier.name);
    let scores = classifier.scores.values(ScoreKind::Observed);
    let (y_low, y_high) = score_range(scores);
    let p_value = evaluation
        .kind(ScoreKind::Observed)
        .and_then(|k| k.t_test.as_ref().ok())
        .map(|t| format!("p = {:.2e}", t.p_value))
        .unwrap_or_else(|| format!("p = {}", super::metrics::UNDEFINED));

    render_svg(&figure, STRIP_SIZE, |root| {
        let mut chart = ChartBuilder::on(root)
            .margin(15)
            .caption(format!("{} classifier, PDX data", classifier.label), (FONT, 20))
            .x_label_area_size(30)
            .y_label_area_size(50)
            .build_cartesian_2d(-0.6..1.6, y_low..y_high)?;
        chart
            .configure_mesh()
            .disable_mesh()
            .disable_x_axis()
            .y_desc("Classifier Score")
            .draw()?;

        chart.draw_series(std::iter::once(PathElement::new(
            vec![(-0.6, DECISION_THRESHOLD), (1.6, DECISION_THRESHOLD)],
            BLACK.mix(0.6).stroke_width(1),
        )))?;

        let mut rng = StdRng::seed_from_u64(JITTER_SEED);
        for (x, status) in [MutationStatus::WildType, MutationStatus::Mutant]
            .into_iter()
            .enumerate()
        {
            let x = x as f64;
            let group = classifier.scores_with_status(ScoreKind::Observed, status);
            let Some(summary) = ScoreSummary::from_values(&group) else {
                continue;
            };
            draw_box(&mut chart, x, 0.3, &summary)?;

            let color = status_color(classifier_index, status);
            let points: Vec<(f64, f64)> = group
                .iter()
                .map(|&y| (x + rng.gen_range(-0.25..0.25), y))
                .collect();
            chart
                .draw_series(
                    points
                        .into_iter()
                        .map(|p| Circle::new(p, 3, color.mix(0.65).filled())),
                )?
                .label(format!("{} {} (n = {})", classifier.label, status, summary.n))
                .legend(move |(x, y)| Circle::new((x, y), 4, color.filled()));
        }

        // Bracket between the two groups carrying the t-test p-value.
        let bracket_y = y_high - 0.08 * (y_high - y_low);
        let tick = 0.02 * (y_high - y_low);
        chart.draw_series(std::iter::once(PathElement::new(
            vec![
                (0.0, bracket_y - tick),
                (0.0, bracket_y),
                (1.0, bracket_y),
                (1.0, bracket_y - tick),
            ],
            BLACK.stroke_width(1),
        )))?;
        chart.draw_series(std::iter::once(Text::new(
            p_value.clone(),
            (0.38, bracket_y + 0.5 * tick),
            (FONT, 14).into_font(),
        )))?;

        chart
            .configure_series_labels()
            .position(SeriesLabelPosition::LowerRight)
            .background_style(WHITE.mix(0.8))
            .border_style(BLACK)
            .draw()?;
        Ok(())
    })
}

/// Observed scores split by status and, within each status, by histology.
/// Returns `None` when no histology is known.
pub fn histology_figure(
    cohort: &LabeledCohort,
    classifier: &LabeledClassifier,
) -> Result<Option<String>, PlotError> {
    let histologies: Vec<&str> = cohort
        .samples
        .iter()
        .filter_map(|s| s.histology.as_deref())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    if histologies.is_empty() {
        return Ok(None);
    }

    let figure = format!("{}_predictions_histology.svg", classifier.name);
    let scores = classifier.scores.values(ScoreKind::Observed);
    let (y_low, y_high) = score_range(scores);
    let slot = 0.8 / histologies.len() as f64;

    let svg = render_svg(&figure, HISTOLOGY_SIZE, |root| {
        let mut chart = ChartBuilder::on(root)
            .margin(15)
            .caption(
                format!("{} score by histology (left: wild-type, right: mutant)", classifier.label),
                (FONT, 18),
            )
            .x_label_area_size(30)
            .y_label_area_size(50)
            .build_cartesian_2d(-0.5..1.5, y_low..y_high)?;
        chart
            .configure_mesh()
            .disable_mesh()
            .disable_x_axis()
            .y_desc("Classifier Score")
            .draw()?;
        chart.draw_series(std::iter::once(PathElement::new(
            vec![(-0.5, DECISION_THRESHOLD), (1.5, DECISION_THRESHOLD)],
            BLACK.mix(0.6).stroke_width(1),
        )))?;

        let mut rng = StdRng::seed_from_u64(JITTER_SEED);
        for (j, histology) in histologies.iter().enumerate() {
            let color = palette(j);
            let mut points = Vec::new();
            for (x, status) in [MutationStatus::WildType, MutationStatus::Mutant]
                .into_iter()
                .enumerate()
            {
                let center = x as f64 - 0.4 + slot * (j as f64 + 0.5);
                let group: Vec<f64> = cohort
                    .samples
                    .iter()
                    .zip(&classifier.status)
                    .zip(scores)
                    .filter(|((sample, s), _)| {
                        **s == status && sample.histology.as_deref() == Some(*histology)
                    })
                    .map(|(_, v)| *v)
                    .collect();
                let Some(summary) = ScoreSummary::from_values(&group) else {
                    continue;
                };
                draw_box(&mut chart, center, 0.4 * slot, &summary)?;
                let spread = 0.3 * slot;
                points.extend(
                    group
                        .iter()
                        .map(|&y| (center + rng.gen_range(-spread..spread), y)),
                );
            }
            chart
                .draw_series(
                    points
                        .into_iter()
                        .map(|p| Circle::new(p, 3, color.mix(0.65).filled())),
                )?
                .label(*histology)
                .legend(move |(x, y)| Circle::new((x, y), 4, color.filled()));
        }

        chart
            .configure_series_labels()
            .position(SeriesLabelPosition::UpperRight)
            .background_style(WHITE.mix(0.8))
            .border_style(BLACK)
            .draw()?;
        Ok(())
    })?;
    Ok(Some(svg))
}
