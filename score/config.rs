//! # Pipeline Configuration
//!
//! A single TOML file describes one analysis: where the expression matrix and
//! annotation tables live, which classifiers to apply, and the handful of
//! decisions that must be explicit rather than implied (scaling, missing-feature
//! policy, overlap threshold, shuffle seed and outlier thresholds).
//!
//! Relative paths are resolved against the directory holding the config file so
//! that a pipeline can be invoked from anywhere.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// How the expression matrix is laid out on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MatrixOrientation {
    /// One row per sample, one column per gene.
    #[default]
    SamplesByGenes,
    /// One row per gene, one column per sample (the usual RNA-seq export).
    GenesBySamples,
}

impl MatrixOrientation {
    /// What the identifier column of each row names.
    pub fn row_kind(self) -> &'static str {
        match self {
            Self::SamplesByGenes => "sample",
            Self::GenesBySamples => "gene",
        }
    }

    /// What each header cell after the identifier column names.
    pub fn column_kind(self) -> &'static str {
        match self {
            Self::SamplesByGenes => "gene",
            Self::GenesBySamples => "sample",
        }
    }
}

/// Per-gene transformation applied to the cohort before scoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Scaling {
    /// Center each gene on its cohort mean and divide by its population SD.
    #[default]
    ZScore,
    /// Use the expression values as provided.
    #[serde(rename = "none")]
    Raw,
}

/// What to do with classifier features that are absent from the matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MissingFeaturePolicy {
    /// Missing features contribute zero to the linear predictor.
    #[default]
    ZeroFill,
    /// Any missing feature aborts classifier application.
    Fail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InputConfig {
    pub expression: PathBuf,
    #[serde(default)]
    pub orientation: MatrixOrientation,
    /// Optional `from`/`to` table renaming matrix genes into the classifier namespace.
    pub gene_map: Option<PathBuf>,
    /// Optional `sample_id`/`Model` table aligning expression barcodes to annotation models.
    pub barcode_map: Option<PathBuf>,
    /// Optional `Model`/`Histology` table.
    pub clinical: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OutputConfig {
    pub results_dir: PathBuf,
    pub figures_dir: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            results_dir: PathBuf::from("results"),
            figures_dir: PathBuf::from("figures"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScoringConfig {
    pub scaling: Scaling,
    pub missing_features: MissingFeaturePolicy,
    /// Minimum fraction of a classifier's non-zero features that must be present.
    pub min_feature_overlap: f64,
    pub shuffle_seed: u64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            scaling: Scaling::ZScore,
            missing_features: MissingFeaturePolicy::ZeroFill,
            min_feature_overlap: 0.75,
            shuffle_seed: 1234,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExplorationConfig {
    /// Wild-type samples scoring at or above this value are outliers.
    pub high_threshold: f64,
    /// Mutant samples scoring below this value are outliers.
    pub low_threshold: f64,
}

impl Default for ExplorationConfig {
    fn default() -> Self {
        Self {
            high_threshold: 0.5,
            low_threshold: 0.5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClassifierConfig {
    /// Short identifier used as the score-table column prefix, e.g. `ras`.
    pub name: String,
    /// Human-readable label for plots, e.g. `Ras`. Defaults to `name`.
    pub label: Option<String>,
    /// Coefficient table (`.tsv`, `.txt`, optionally `.gz`) or TOML artifact.
    pub model: PathBuf,
    /// Variant table listing the mutated models for this classifier's pathway.
    pub variants: PathBuf,
}

impl ClassifierConfig {
    pub fn display_label(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineConfig {
    pub input: InputConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub scoring: ScoringConfig,
    #[serde(default)]
    pub exploration: ExplorationConfig,
    pub classifiers: Vec<ClassifierConfig>,
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse TOML config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("The config does not list any [[classifiers]].")]
    NoClassifiers,
    #[error("Classifier name '{0}' is used more than once.")]
    DuplicateClassifier(String),
    #[error(
        "Classifier name '{0}' is invalid. Use letters, digits, '-' or '_' so it can prefix score columns."
    )]
    InvalidClassifierName(String),
    #[error("min_feature_overlap must lie in [0, 1], found {0}.")]
    InvalidOverlap(f64),
    #[error(
        "Outlier thresholds must satisfy 0 <= low_threshold <= high_threshold <= 1, found low = {low}, high = {high}."
    )]
    InvalidThresholds { low: f64, high: f64 },
}

impl PipelineConfig {
    /// Loads, resolves and validates a config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let base_dir = path.parent().unwrap_or_else(|| Path::new(""));
        Self::from_toml_str(&text, base_dir)
    }

    /// Parses a config from TOML text, resolving relative paths against `base_dir`.
    pub fn from_toml_str(text: &str, base_dir: &Path) -> Result<Self, ConfigError> {
        let mut config: PipelineConfig = toml::from_str(text)?;
        config.resolve_paths(base_dir);
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.classifiers.is_empty() {
            return Err(ConfigError::NoClassifiers);
        }
        for (i, classifier) in self.classifiers.iter().enumerate() {
            let name = &classifier.name;
            let valid = !name.is_empty()
                && name
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
            if !valid {
                return Err(ConfigError::InvalidClassifierName(name.clone()));
            }
            if self.classifiers[..i].iter().any(|c| &c.name == name) {
                return Err(ConfigError::DuplicateClassifier(name.clone()));
            }
        }

        let overlap = self.scoring.min_feature_overlap;
        if !(0.0..=1.0).contains(&overlap) {
            return Err(ConfigError::InvalidOverlap(overlap));
        }

        let ExplorationConfig {
            low_threshold: low,
            high_threshold: high,
        } = self.exploration;
        let ordered = 0.0 <= low && low <= high && high <= 1.0;
        if !ordered {
            return Err(ConfigError::InvalidThresholds { low, high });
        }
        Ok(())
    }

    pub fn results_path(&self, file_name: &str) -> PathBuf {
        self.output.results_dir.join(file_name)
    }

    pub fn figures_path(&self, file_name: &str) -> PathBuf {
        self.output.figures_dir.join(file_name)
    }

    pub fn classifier(&self, name: &str) -> Option<&ClassifierConfig> {
        self.classifiers.iter().find(|c| c.name == name)
    }

    fn resolve_paths(&mut self, base_dir: &Path) {
        let resolve = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base_dir.join(&*p);
            }
        };
        resolve(&mut self.input.expression);
        for optional in [
            &mut self.input.gene_map,
            &mut self.input.barcode_map,
            &mut self.input.clinical,
        ] {
            if let Some(p) = optional.as_mut() {
                resolve(p);
            }
        }
        resolve(&mut self.output.results_dir);
        resolve(&mut self.output.figures_dir);
        for classifier in &mut self.classifiers {
            resolve(&mut classifier.model);
            resolve(&mut classifier.variants);
        }
    }
}
