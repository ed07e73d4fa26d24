// ========================================================================================
//                             High-Level Data Contracts
// ========================================================================================

// This file is ONLY for types that are SHARED BETWEEN FILES, not types that only are used in one file.

use std::fmt;

/// Which of the two scores produced per classifier a value refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ScoreKind {
    /// The classifier applied to the cohort's real expression values.
    Observed,
    /// The classifier applied to a copy of the matrix whose gene columns were
    /// independently permuted across samples. This is the chance baseline.
    Shuffled,
}

impl ScoreKind {
    pub const ALL: [ScoreKind; 2] = [ScoreKind::Observed, ScoreKind::Shuffled];

    /// Suffix appended to the classifier name to form a score-table column.
    pub fn column_suffix(self) -> &'static str {
        match self {
            Self::Observed => "_score",
            Self::Shuffled => "_shuffle",
        }
    }

    pub fn column_name(self, classifier: &str) -> String {
        format!("{classifier}{}", self.column_suffix())
    }
}

impl fmt::Display for ScoreKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Observed => f.write_str("observed"),
            Self::Shuffled => f.write_str("shuffled"),
        }
    }
}

/// Per-sample scores of one classifier, aligned with `ScoreTable::sample_ids`.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifierScores {
    pub name: String,
    pub observed: Vec<f64>,
    pub shuffled: Vec<f64>,
}

impl ClassifierScores {
    pub fn values(&self, kind: ScoreKind) -> &[f64] {
        match kind {
            ScoreKind::Observed => &self.observed,
            ScoreKind::Shuffled => &self.shuffled,
        }
    }
}

/// The samples × classifier-score table produced by classifier application and
/// consumed by the evaluation and exploration stages.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreTable {
    pub sample_ids: Vec<String>,
    pub classifiers: Vec<ClassifierScores>,
}

impl ScoreTable {
    pub fn num_samples(&self) -> usize {
        self.sample_ids.len()
    }

    pub fn classifier(&self, name: &str) -> Option<&ClassifierScores> {
        self.classifiers.iter().find(|c| c.name == name)
    }

    pub fn classifier_names(&self) -> impl Iterator<Item = &str> {
        self.classifiers.iter().map(|c| c.name.as_str())
    }
}

/// Mutation status of a sample with respect to one classifier's target genes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MutationStatus {
    WildType,
    Mutant,
}

impl MutationStatus {
    pub fn from_mutated(mutated: bool) -> Self {
        if mutated { Self::Mutant } else { Self::WildType }
    }

    pub fn is_mutant(self) -> bool {
        self == Self::Mutant
    }

    pub fn describe(self) -> &'static str {
        match self {
            Self::WildType => "wild-type",
            Self::Mutant => "mutant",
        }
    }
}

impl fmt::Display for MutationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.describe())
    }
}
