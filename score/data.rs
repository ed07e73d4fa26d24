//! # Expression Matrix Loading and Validation
//!
//! This module is the exclusive entry point for the cohort's expression data.
//! It reads a tab-delimited matrix (optionally gzip-compressed), validates it
//! against a strict contract and reshapes it into a samples × genes `ndarray`.
//!
//! - Strict Contract: the first column holds identifiers, every other column is
//!   numeric. Duplicate identifiers, missing cells, non-numeric and non-finite
//!   values are input errors. Nothing is coerced.
//! - User-Centric Errors: failures are assumed to be input errors, and the
//!   `DataError` enum carries enough context to fix the file.
//! - Orientation: matrices exported gene-major are transposed on load, so the
//!   rest of the pipeline only ever sees samples as rows.

use crate::config::MatrixOrientation;
use crate::io::{TableError, TsvTable, read_input_bytes};
use ahash::{AHashMap, AHashSet};
use ndarray::{Array2, ArrayView2, ArrayViewMut2, ShapeBuilder};
use polars::prelude::*;
use std::io::Cursor;
use std::path::Path;
use thiserror::Error;

/// A validated expression matrix with samples as rows and genes as columns.
#[derive(Debug, Clone)]
pub struct ExpressionMatrix {
    sample_ids: Vec<String>,
    gene_ids: Vec<String>,
    /// Shape: [n_samples, n_genes].
    values: Array2<f64>,
    gene_index: AHashMap<String, usize>,
}

/// A comprehensive error type for all expression-matrix loading failures.
#[derive(Error, Debug)]
pub enum DataError {
    #[error("Error from the underlying Polars DataFrame library: {0}")]
    PolarsError(#[from] PolarsError),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to read gene map: {0}")]
    GeneMap(#[from] TableError),
    #[error("The expression matrix '{0}' has no header line.")]
    MissingHeader(String),
    #[error("The expression matrix contains no samples or no genes.")]
    Empty,
    #[error("The {kind} identifier '{id}' appears more than once in the expression matrix.")]
    DuplicateIdentifier { kind: &'static str, id: String },
    #[error(
        "The column '{column_name}' could not be converted to the expected type '{expected_type}'. It contains non-numeric data. (Found type: {found_type})"
    )]
    ColumnWrongType {
        column_name: String,
        expected_type: &'static str,
        found_type: String,
    },
    #[error(
        "Missing or null values were found in the column '{0}'. This tool requires complete data with no missing values."
    )]
    MissingValuesFound(String),
    #[error(
        "Non-finite values (NaN or Infinity) were found in the column '{0}'. This tool requires all data to be finite."
    )]
    NonFiniteValuesFound(String),
    #[error("Internal error: {values} values cannot fill a {rows} x {cols} matrix.")]
    ShapeMismatch {
        rows: usize,
        cols: usize,
        values: usize,
    },
    #[error(
        "The gene map renames both '{first}' and '{second}' to '{target}'. A classifier feature must come from exactly one matrix column."
    )]
    GeneMapCollision {
        first: String,
        second: String,
        target: String,
    },
}

impl ExpressionMatrix {
    /// Builds a matrix from parts, enforcing every invariant the loaders enforce.
    pub fn new(
        sample_ids: Vec<String>,
        gene_ids: Vec<String>,
        values: Array2<f64>,
    ) -> Result<Self, DataError> {
        if sample_ids.is_empty() || gene_ids.is_empty() {
            return Err(DataError::Empty);
        }
        if values.dim() != (sample_ids.len(), gene_ids.len()) {
            return Err(DataError::ShapeMismatch {
                rows: sample_ids.len(),
                cols: gene_ids.len(),
                values: values.len(),
            });
        }
        ensure_unique(&sample_ids, "sample")?;
        if let Some(j) = values
            .columns()
            .into_iter()
            .position(|column| column.iter().any(|v| !v.is_finite()))
        {
            return Err(DataError::NonFiniteValuesFound(gene_ids[j].clone()));
        }

        let gene_index = index_unique(&gene_ids, "gene")?;
        Ok(Self {
            sample_ids,
            gene_ids,
            values,
            gene_index,
        })
    }

    pub fn sample_ids(&self) -> &[String] {
        &self.sample_ids
    }

    pub fn gene_ids(&self) -> &[String] {
        &self.gene_ids
    }

    pub fn num_samples(&self) -> usize {
        self.sample_ids.len()
    }

    pub fn num_genes(&self) -> usize {
        self.gene_ids.len()
    }

    pub fn values(&self) -> ArrayView2<'_, f64> {
        self.values.view()
    }

    pub fn values_mut(&mut self) -> ArrayViewMut2<'_, f64> {
        self.values.view_mut()
    }

    /// Column index of a gene, if the matrix measures it.
    pub fn gene_column(&self, gene: &str) -> Option<usize> {
        self.gene_index.get(gene).copied()
    }

    /// Renames genes into the classifier namespace. Genes absent from the map keep
    /// their identifier.
    pub fn rename_genes(self, map: &GeneMap) -> Result<Self, DataError> {
        let renamed: Vec<String> = self
            .gene_ids
            .iter()
            .map(|g| map.translate(g).to_string())
            .collect();

        let mut first_source: AHashMap<&str, &str> = AHashMap::with_capacity(renamed.len());
        for (source, target) in self.gene_ids.iter().zip(&renamed) {
            if let Some(first) = first_source.insert(target.as_str(), source.as_str()) {
                return Err(DataError::GeneMapCollision {
                    first: first.to_string(),
                    second: source.clone(),
                    target: target.clone(),
                });
            }
        }

        let gene_index = index_unique(&renamed, "gene")?;
        Ok(Self {
            sample_ids: self.sample_ids,
            gene_ids: renamed,
            values: self.values,
            gene_index,
        })
    }
}

/// Translation of matrix gene identifiers into a classifier's feature namespace.
#[derive(Debug, Clone, Default)]
pub struct GeneMap {
    targets: AHashMap<String, String>,
}

impl GeneMap {
    /// Reads a two-column (`from`, `to`) table. Repeated `from` entries are an error.
    pub fn load(path: &Path) -> Result<Self, TableError> {
        let table = TsvTable::read(path)?;
        let from = table.column_index("from")?;
        let to = table.column_index("to")?;

        let mut targets = AHashMap::with_capacity(table.records.len());
        for record in &table.records {
            let source = table.text(record, from);
            let target = table.text(record, to);
            if source.is_empty() || target.is_empty() {
                continue;
            }
            if targets
                .insert(source.to_string(), target.to_string())
                .is_some()
            {
                return Err(TableError::DuplicateId {
                    path: table.path.clone(),
                    id: source.to_string(),
                });
            }
        }
        log::info!("Loaded {} gene identifier translations", targets.len());
        Ok(Self { targets })
    }

    pub fn from_pairs<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, S)>,
        S: Into<String>,
    {
        Self {
            targets: pairs
                .into_iter()
                .map(|(a, b)| (a.into(), b.into()))
                .collect(),
        }
    }

    pub fn translate<'a>(&'a self, gene: &'a str) -> &'a str {
        self.targets.get(gene).map(String::as_str).unwrap_or(gene)
    }
}

/// Loads and validates an expression matrix.
pub fn load_expression_matrix(
    path: &Path,
    orientation: MatrixOrientation,
) -> Result<ExpressionMatrix, DataError> {
    log::info!("Loading expression matrix from '{}'", path.display());
    let bytes = read_input_bytes(path)?;

    // Polars silently renames repeated header cells, so duplicates are caught here.
    let header = internal::header_cells(&bytes)
        .ok_or_else(|| DataError::MissingHeader(path.display().to_string()))?;
    if header.len() < 2 {
        return Err(DataError::Empty);
    }
    ensure_unique(&header[1..], orientation.column_kind())?;

    let df = CsvReader::new(Cursor::new(bytes))
        .with_options(
            CsvReadOptions::default()
                .with_has_header(true)
                .with_infer_schema_length(None)
                .with_parse_options(CsvParseOptions::default().with_separator(b'\t')),
        )
        .finish()?;

    let columns = df.get_columns();
    if df.height() == 0 || columns.len() < 2 {
        return Err(DataError::Empty);
    }

    let row_ids = internal::extract_identifier_column(&columns[0])?;
    ensure_unique(&row_ids, orientation.row_kind())?;
    let column_ids: Vec<String> = header[1..].to_vec();

    let n_rows = row_ids.len();
    let n_cols = column_ids.len();
    let mut buffer = Vec::with_capacity(n_rows * n_cols);
    for column in &columns[1..] {
        buffer.append(&mut internal::extract_numeric_column(column)?);
    }

    let matrix = match orientation {
        // Each file column is one gene across all samples: column-major fill.
        MatrixOrientation::SamplesByGenes => {
            let values = Array2::from_shape_vec((n_rows, n_cols).f(), buffer).map_err(|_| {
                DataError::ShapeMismatch {
                    rows: n_rows,
                    cols: n_cols,
                    values: n_rows * n_cols,
                }
            })?;
            ExpressionMatrix::new(row_ids, column_ids, values)?
        }
        // Each file column is one sample across all genes: row-major fill.
        MatrixOrientation::GenesBySamples => {
            let values = Array2::from_shape_vec((n_cols, n_rows), buffer).map_err(|_| {
                DataError::ShapeMismatch {
                    rows: n_cols,
                    cols: n_rows,
                    values: n_rows * n_cols,
                }
            })?;
            ExpressionMatrix::new(column_ids, row_ids, values)?
        }
    };

    log::info!(
        "Expression matrix validated: {} samples x {} genes",
        matrix.num_samples(),
        matrix.num_genes()
    );
    Ok(matrix)
}

fn ensure_unique(ids: &[String], kind: &'static str) -> Result<(), DataError> {
    let mut seen = AHashSet::with_capacity(ids.len());
    for id in ids {
        if !seen.insert(id.as_str()) {
            return Err(DataError::DuplicateIdentifier {
                kind,
                id: id.clone(),
            });
        }
    }
    Ok(())
}

fn index_unique(ids: &[String], kind: &'static str) -> Result<AHashMap<String, usize>, DataError> {
    let mut index = AHashMap::with_capacity(ids.len());
    for (i, id) in ids.iter().enumerate() {
        if index.insert(id.clone(), i).is_some() {
            return Err(DataError::DuplicateIdentifier {
                kind,
                id: id.clone(),
            });
        }
    }
    Ok(index)
}

/// Internal module for the Polars-facing details.
mod internal {
    use super::*;

    /// Splits the first line of the file into trimmed header cells.
    pub(super) fn header_cells(bytes: &[u8]) -> Option<Vec<String>> {
        let end = bytes.iter().position(|&b| b == b'\n').unwrap_or(bytes.len());
        let line = std::str::from_utf8(&bytes[..end]).ok()?;
        let line = line.trim_end_matches('\r');
        if line.is_empty() {
            return None;
        }
        Some(
            line.split('\t')
                .map(|cell| cell.trim().trim_matches('"').to_string())
                .collect(),
        )
    }

    pub(super) fn extract_identifier_column(column: &Column) -> Result<Vec<String>, DataError> {
        let column_name = column.name().to_string();
        if column.null_count() > 0 {
            return Err(DataError::MissingValuesFound(column_name));
        }
        let as_text = column.cast(&DataType::String)?;
        let ids: Vec<String> = as_text
            .str()?
            .into_iter()
            .map(|value| value.unwrap_or_default().trim().to_string())
            .collect();
        if ids.iter().any(String::is_empty) {
            return Err(DataError::MissingValuesFound(column_name));
        }
        Ok(ids)
    }

    pub(super) fn extract_numeric_column(column: &Column) -> Result<Vec<f64>, DataError> {
        let column_name = column.name().to_string();
        if column.null_count() > 0 {
            return Err(DataError::MissingValuesFound(column_name));
        }

        let wrong_type = || DataError::ColumnWrongType {
            column_name: column_name.clone(),
            expected_type: "f64 (numeric)",
            found_type: format!("{:?}", column.dtype()),
        };

        let casted = column.cast(&DataType::Float64).map_err(|_| wrong_type())?;
        if casted.null_count() > 0 {
            return Err(wrong_type());
        }

        let chunked = casted.f64()?.rechunk();
        let values: Vec<f64> = chunked.into_no_null_iter().collect();
        if values.iter().any(|v| !v.is_finite()) {
            return Err(DataError::NonFiniteValuesFound(column_name));
        }
        Ok(values)
    }
}
