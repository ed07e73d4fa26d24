//! Ground-truth annotations and their join onto the score table.
//!
//! Three optional or per-classifier inputs are merged here: the variant tables
//! that define mutation status, the barcode map that aligns expression sample
//! identifiers to annotation models, and the clinical table carrying histology.

use crate::config::{ClassifierConfig, PipelineConfig};
use crate::io::{self, TableError, TsvTable, format_float};
use crate::types::{ClassifierScores, MutationStatus, ScoreKind, ScoreTable};
use itertools::Itertools;
use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;
use std::path::Path;
use thiserror::Error;

/// Every histology containing this word is collapsed into one group.
const OTHER_HISTOLOGY: &str = "Other";

#[derive(Error, Debug)]
pub enum AnnotationError {
    #[error(transparent)]
    Table(#[from] TableError),
    #[error("The score table has no columns for classifier '{0}'. Re-run the apply stage.")]
    ClassifierMissing(String),
    #[error(
        "No samples remain after mapping {total} scored samples to annotation models ({unmapped} unmapped)."
    )]
    NoSamplesRemain { total: usize, unmapped: usize },
}

/// One row of a variant table.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct VariantRecord {
    pub gene: String,
    pub classification: String,
}

/// Variant records grouped by model. A model with any record is mutant.
#[derive(Debug, Clone, Default)]
pub struct VariantTable {
    by_model: BTreeMap<String, Vec<VariantRecord>>,
}

impl VariantTable {
    pub fn load(path: &Path) -> Result<Self, TableError> {
        let table = TsvTable::read(path)?;
        let model = table.column_index("Model")?;
        let gene = table.column_index("Hugo_Symbol")?;
        let classification = table.column_index("Variant_Classification")?;

        let mut by_model: BTreeMap<String, Vec<VariantRecord>> = BTreeMap::new();
        for record in &table.records {
            let id = table.text(record, model);
            if id.is_empty() {
                continue;
            }
            by_model
                .entry(id.to_string())
                .or_default()
                .push(VariantRecord {
                    gene: table.text(record, gene).to_string(),
                    classification: table.text(record, classification).to_string(),
                });
        }
        for records in by_model.values_mut() {
            records.sort();
        }
        log::info!(
            "Loaded {} variant records across {} models from '{}'",
            table.records.len(),
            by_model.len(),
            path.display()
        );
        Ok(Self { by_model })
    }

    pub fn from_records<I>(records: I) -> Self
    where
        I: IntoIterator<Item = (String, VariantRecord)>,
    {
        let mut by_model: BTreeMap<String, Vec<VariantRecord>> = BTreeMap::new();
        for (model, record) in records {
            by_model.entry(model).or_default().push(record);
        }
        for records in by_model.values_mut() {
            records.sort();
        }
        Self { by_model }
    }

    pub fn records(&self, model: &str) -> &[VariantRecord] {
        self.by_model.get(model).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn status(&self, model: &str) -> MutationStatus {
        MutationStatus::from_mutated(!self.records(model).is_empty())
    }
}

/// Reads a two-column lookup table keyed on `key`. Repeated keys are an error.
fn load_lookup(path: &Path, key: &str, value: &str) -> Result<BTreeMap<String, String>, TableError> {
    let table = TsvTable::read(path)?;
    let key_col = table.column_index(key)?;
    let value_col = table.column_index(value)?;

    let mut lookup = BTreeMap::new();
    for record in &table.records {
        let k = table.text(record, key_col);
        if k.is_empty() {
            continue;
        }
        if lookup
            .insert(k.to_string(), table.text(record, value_col).to_string())
            .is_some()
        {
            return Err(TableError::DuplicateId {
                path: table.path.clone(),
                id: k.to_string(),
            });
        }
    }
    Ok(lookup)
}

/// `sample_id` → `Model`.
#[derive(Debug, Clone, Default)]
pub struct BarcodeMap {
    models: BTreeMap<String, String>,
}

impl BarcodeMap {
    pub fn load(path: &Path) -> Result<Self, TableError> {
        let models = load_lookup(path, "sample_id", "Model")?;
        log::info!("Loaded {} barcode mappings", models.len());
        Ok(Self { models })
    }

    pub fn model(&self, sample_id: &str) -> Option<&str> {
        self.models
            .get(sample_id)
            .map(String::as_str)
            .filter(|m| !m.is_empty())
    }
}

/// `Model` → histology, with every `Other ...` histology collapsed to `Other`.
#[derive(Debug, Clone, Default)]
pub struct ClinicalTable {
    histology: BTreeMap<String, String>,
}

impl ClinicalTable {
    pub fn load(path: &Path) -> Result<Self, TableError> {
        let raw = load_lookup(path, "Model", "Histology")?;
        Ok(Self::from_pairs(raw))
    }

    pub fn from_pairs<I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let histology = pairs
            .into_iter()
            .map(|(model, histology)| (model, collapse_histology(histology)))
            .collect();
        Self { histology }
    }

    pub fn histology(&self, model: &str) -> Option<&str> {
        self.histology.get(model).map(String::as_str)
    }
}

fn collapse_histology(histology: String) -> String {
    if histology.contains(OTHER_HISTOLOGY) {
        OTHER_HISTOLOGY.to_string()
    } else {
        histology
    }
}

/// A scored sample that survived annotation mapping.
#[derive(Debug, Clone, PartialEq)]
pub struct LabeledSample {
    pub sample_id: String,
    pub model: String,
    pub histology: Option<String>,
}

/// One classifier's scores restricted to the labeled samples, with their status.
#[derive(Debug, Clone)]
pub struct LabeledClassifier {
    pub name: String,
    pub label: String,
    pub scores: ClassifierScores,
    pub status: Vec<MutationStatus>,
    pub variants: VariantTable,
}

impl LabeledClassifier {
    pub fn labels(&self) -> Vec<bool> {
        self.status.iter().map(|s| s.is_mutant()).collect()
    }

    /// Scores of one kind split by status.
    pub fn scores_with_status(&self, kind: ScoreKind, status: MutationStatus) -> Vec<f64> {
        self.scores
            .values(kind)
            .iter()
            .zip(&self.status)
            .filter(|(_, s)| **s == status)
            .map(|(v, _)| *v)
            .collect()
    }

    pub fn count(&self, status: MutationStatus) -> usize {
        self.status.iter().filter(|s| **s == status).count()
    }
}

/// The score table joined with every annotation.
#[derive(Debug, Clone)]
pub struct LabeledCohort {
    pub samples: Vec<LabeledSample>,
    pub classifiers: Vec<LabeledClassifier>,
    /// Scored samples dropped because they could not be mapped.
    pub unmapped: Vec<String>,
}

/// Side tables shared by every classifier.
#[derive(Debug, Clone, Default)]
pub struct SampleAnnotations {
    pub barcodes: Option<BarcodeMap>,
    pub clinical: Option<ClinicalTable>,
}

impl SampleAnnotations {
    pub fn load(config: &PipelineConfig) -> Result<Self, TableError> {
        let barcodes = config
            .input
            .barcode_map
            .as_deref()
            .map(BarcodeMap::load)
            .transpose()?;
        let clinical = config
            .input
            .clinical
            .as_deref()
            .map(ClinicalTable::load)
            .transpose()?;
        Ok(Self { barcodes, clinical })
    }

    /// Resolves a sample to its model and histology, or `None` when it cannot be mapped.
    fn resolve(&self, sample_id: &str) -> Option<LabeledSample> {
        let model = match &self.barcodes {
            Some(map) => map.model(sample_id)?,
            None => sample_id,
        };
        let histology = match &self.clinical {
            Some(table) => Some(table.histology(model)?.to_string()),
            None => None,
        };
        Some(LabeledSample {
            sample_id: sample_id.to_string(),
            model: model.to_string(),
            histology,
        })
    }
}

impl LabeledCohort {
    /// Joins scores, sample annotations and per-classifier variant tables.
    /// Classifiers keep the order in which they are given.
    pub fn assemble(
        scores: &ScoreTable,
        annotations: &SampleAnnotations,
        classifiers: Vec<(&ClassifierConfig, VariantTable)>,
    ) -> Result<Self, AnnotationError> {
        let mut samples = Vec::with_capacity(scores.num_samples());
        let mut kept_rows = Vec::with_capacity(scores.num_samples());
        let mut unmapped = Vec::new();
        for (row, sample_id) in scores.sample_ids.iter().enumerate() {
            match annotations.resolve(sample_id) {
                Some(sample) => {
                    samples.push(sample);
                    kept_rows.push(row);
                }
                None => unmapped.push(sample_id.clone()),
            }
        }

        if !unmapped.is_empty() {
            log::warn!(
                "{} of {} scored samples could not be mapped to an annotated model and are excluded: {}",
                unmapped.len(),
                scores.num_samples(),
                unmapped.iter().take(10).join(", ")
            );
        }
        if samples.is_empty() {
            return Err(AnnotationError::NoSamplesRemain {
                total: scores.num_samples(),
                unmapped: unmapped.len(),
            });
        }

        let configured: BTreeSet<&str> = classifiers.iter().map(|(c, _)| c.name.as_str()).collect();
        for name in scores.classifier_names() {
            if !configured.contains(name) {
                log::warn!("Score table column '{name}' has no configured classifier; ignoring it");
            }
        }

        let labeled = classifiers
            .into_iter()
            .map(|(config, variants)| -> Result<LabeledClassifier, AnnotationError> {
                let source = scores
                    .classifier(&config.name)
                    .ok_or_else(|| AnnotationError::ClassifierMissing(config.name.clone()))?;
                let pick = |values: &[f64]| -> Vec<f64> { kept_rows.iter().map(|&i| values[i]).collect() };
                let status: Vec<MutationStatus> =
                    samples.iter().map(|s| variants.status(&s.model)).collect();
                let labeled = LabeledClassifier {
                    name: config.name.clone(),
                    label: config.display_label().to_string(),
                    scores: ClassifierScores {
                        name: config.name.clone(),
                        observed: pick(&source.observed),
                        shuffled: pick(&source.shuffled),
                    },
                    status,
                    variants,
                };
                log::info!(
                    "Classifier '{}': {} mutant, {} wild-type samples",
                    labeled.name,
                    labeled.count(MutationStatus::Mutant),
                    labeled.count(MutationStatus::WildType)
                );
                Ok(labeled)
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            samples,
            classifiers: labeled,
            unmapped,
        })
    }

    /// Loads every annotation named by the config and joins it onto `scores`.
    pub fn from_config(
        scores: &ScoreTable,
        config: &PipelineConfig,
    ) -> Result<Self, AnnotationError> {
        let annotations = SampleAnnotations::load(config)?;
        let classifiers = config
            .classifiers
            .iter()
            .map(|c| -> Result<_, TableError> { Ok((c, VariantTable::load(&c.variants)?)) })
            .collect::<Result<Vec<_>, TableError>>()?;
        Self::assemble(scores, &annotations, classifiers)
    }

    /// Writes one row per labeled sample with model, histology and, for each
    /// classifier, both scores, the 0/1 status and the mutated genes.
    pub fn write_labeled_scores(&self, out: &mut dyn Write) -> std::io::Result<()> {
        let mut header: Vec<String> = ["sample_id", "Model", "Histology"].map(String::from).to_vec();
        for c in &self.classifiers {
            header.push(ScoreKind::Observed.column_name(&c.name));
            header.push(ScoreKind::Shuffled.column_name(&c.name));
            header.push(format!("{}_status", c.name));
            header.push(format!("{}_genes", c.name));
        }

        let rows: Vec<Vec<String>> = self
            .samples
            .iter()
            .enumerate()
            .map(|(i, sample)| {
                let mut row = vec![
                    sample.sample_id.clone(),
                    sample.model.clone(),
                    sample.histology.clone().unwrap_or_default(),
                ];
                for c in &self.classifiers {
                    row.push(format_float(c.scores.observed[i]));
                    row.push(format_float(c.scores.shuffled[i]));
                    row.push(u8::from(c.status[i].is_mutant()).to_string());
                    let genes = c
                        .variants
                        .records(&sample.model)
                        .iter()
                        .map(|r| r.gene.as_str())
                        .dedup()
                        .join(",");
                    row.push(if genes.is_empty() {
                        MutationStatus::WildType.describe().to_string()
                    } else {
                        genes
                    });
                }
                row
            })
            .collect();

        io::write_tsv(out, &header, &rows)
    }
}
