// ========================================================================================
//
//                       Tabular I/O shared by every pipeline stage
//
// ========================================================================================
//
// All inputs are flat tab-delimited files, optionally gzip-compressed. All outputs are
// staged in temporary files next to their destinations and renamed into place only
// once every output of the stage has been written, so a failing stage leaves nothing.

use crate::types::{ClassifierScores, ScoreKind, ScoreTable};
use ahash::AHashSet;
use flate2::read::MultiGzDecoder;
use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use thiserror::Error;

/// Errors raised while reading one of the small annotation or score tables.
#[derive(Error, Debug)]
pub enum TableError {
    #[error("Failed to read '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("Malformed tab-delimited file '{path}': {source}")]
    Csv {
        path: String,
        #[source]
        source: csv::Error,
    },
    #[error(
        "The required column '{column}' was not found in '{path}'. Please check spelling and case."
    )]
    ColumnNotFound { path: String, column: String },
    #[error(
        "Value '{value}' in column '{column}' of '{path}' (data row {row}) is not a finite number."
    )]
    NotNumeric {
        path: String,
        column: String,
        row: usize,
        value: String,
    },
    #[error("Identifier '{id}' appears more than once in '{path}'.")]
    DuplicateId { path: String, id: String },
    #[error("'{path}' contains no data rows.")]
    Empty { path: String },
    #[error("Score table '{path}' has an unexpected header: {detail}")]
    MalformedScoreHeader { path: String, detail: String },
}

/// Reads a whole input file into memory, transparently decompressing `.gz` files.
pub fn read_input_bytes(path: &Path) -> io::Result<Vec<u8>> {
    let file = File::open(path)?;
    let mut reader: Box<dyn Read> = if path.extension().is_some_and(|ext| ext == "gz") {
        Box::new(MultiGzDecoder::new(file))
    } else {
        Box::new(file)
    };
    let mut bytes = Vec::new();
    reader.read_to_end(&mut bytes)?;
    Ok(bytes)
}

/// A fully parsed tab-delimited table: header plus every record.
pub struct TsvTable {
    pub path: String,
    pub headers: Vec<String>,
    pub records: Vec<csv::StringRecord>,
}

impl TsvTable {
    pub fn read(path: &Path) -> Result<Self, TableError> {
        let display = path.display().to_string();
        let bytes = read_input_bytes(path).map_err(|source| TableError::Io {
            path: display.clone(),
            source,
        })?;
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .has_headers(true)
            .from_reader(bytes.as_slice());
        let csv_error = |source| TableError::Csv {
            path: display.clone(),
            source,
        };
        let headers = reader
            .headers()
            .map_err(csv_error)?
            .iter()
            .map(|h| h.trim().to_string())
            .collect();
        let records = reader
            .records()
            .collect::<Result<Vec<_>, _>>()
            .map_err(csv_error)?;
        Ok(Self {
            path: display,
            headers,
            records,
        })
    }

    pub fn column_index(&self, column: &str) -> Result<usize, TableError> {
        self.headers
            .iter()
            .position(|h| h == column)
            .ok_or_else(|| TableError::ColumnNotFound {
                path: self.path.clone(),
                column: column.to_string(),
            })
    }

    /// Returns the trimmed text of a cell; short records yield an empty string.
    pub fn text<'a>(&self, record: &'a csv::StringRecord, index: usize) -> &'a str {
        record.get(index).map(str::trim).unwrap_or("")
    }

    pub fn number(
        &self,
        record: &csv::StringRecord,
        index: usize,
        row: usize,
    ) -> Result<f64, TableError> {
        let raw = self.text(record, index);
        match raw.parse::<f64>() {
            Ok(value) if value.is_finite() => Ok(value),
            _ => Err(TableError::NotNumeric {
                path: self.path.clone(),
                column: self.headers[index].clone(),
                row: row + 1,
                value: raw.to_string(),
            }),
        }
    }

    pub fn ensure_not_empty(&self) -> Result<(), TableError> {
        if self.records.is_empty() {
            return Err(TableError::Empty {
                path: self.path.clone(),
            });
        }
        Ok(())
    }
}

/// Formats a float with the shortest representation that round-trips exactly.
/// Output tables must be byte-for-byte reproducible, so every float written by the
/// pipeline goes through here.
pub fn format_float(value: f64) -> String {
    let mut buffer = ryu::Buffer::new();
    buffer.format(value).to_string()
}

/// An output file that could not be staged or moved into place.
#[derive(Error, Debug)]
#[error("Failed to write '{path}': {source}")]
pub struct OutputError {
    pub path: PathBuf,
    #[source]
    pub source: io::Error,
}

/// The output files of one stage. Each file is written in full to a temporary
/// sibling of its destination, and none of them is visible until [`commit`]
/// renames them all into place.
///
/// [`commit`]: StagedOutputs::commit
#[derive(Default)]
pub struct StagedOutputs {
    staged: Vec<(PathBuf, NamedTempFile)>,
}

impl StagedOutputs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes the contents of `path` into a temporary file without touching `path` itself.
    pub fn stage<F>(&mut self, path: &Path, write_body: F) -> Result<(), OutputError>
    where
        F: FnOnce(&mut dyn Write) -> io::Result<()>,
    {
        let fail = |source| OutputError {
            path: path.to_path_buf(),
            source,
        };
        let parent = match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        fs::create_dir_all(parent).map_err(fail)?;

        let mut temp = NamedTempFile::new_in(parent).map_err(fail)?;
        {
            let mut writer = BufWriter::new(temp.as_file_mut());
            write_body(&mut writer).map_err(fail)?;
            writer.flush().map_err(fail)?;
        }
        self.staged.push((path.to_path_buf(), temp));
        Ok(())
    }

    /// Moves every staged file into place, in staging order. If one rename fails,
    /// the files already moved are removed again and the rest are discarded.
    pub fn commit(self) -> Result<Vec<PathBuf>, OutputError> {
        let mut committed: Vec<PathBuf> = Vec::with_capacity(self.staged.len());
        for (path, temp) in self.staged {
            if let Err(e) = temp.persist(&path) {
                for done in &committed {
                    if let Err(cleanup) = fs::remove_file(done) {
                        log::warn!("Could not remove '{}': {cleanup}", done.display());
                    }
                }
                return Err(OutputError {
                    path,
                    source: e.error,
                });
            }
            committed.push(path);
        }
        Ok(committed)
    }
}

/// Writes a tab-delimited table from a header and pre-formatted rows.
pub fn write_tsv(out: &mut dyn Write, header: &[String], rows: &[Vec<String>]) -> io::Result<()> {
    let mut writer = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .from_writer(out);
    writer.write_record(header).map_err(io::Error::from)?;
    for row in rows {
        writer.write_record(row).map_err(io::Error::from)?;
    }
    writer.flush()
}

/// Persists the classifier score table: `sample_id`, then `<name>_score` and
/// `<name>_shuffle` for every classifier in order.
pub fn write_score_table(out: &mut dyn Write, table: &ScoreTable) -> io::Result<()> {
    let mut header = Vec::with_capacity(1 + table.classifiers.len() * 2);
    header.push("sample_id".to_string());
    for classifier in &table.classifiers {
        for kind in ScoreKind::ALL {
            header.push(kind.column_name(&classifier.name));
        }
    }

    let rows: Vec<Vec<String>> = table
        .sample_ids
        .iter()
        .enumerate()
        .map(|(i, id)| {
            let mut row = Vec::with_capacity(header.len());
            row.push(id.clone());
            for classifier in &table.classifiers {
                for kind in ScoreKind::ALL {
                    row.push(format_float(classifier.values(kind)[i]));
                }
            }
            row
        })
        .collect();

    write_tsv(out, &header, &rows)
}

/// Reads a score table previously written by [`write_score_table`].
pub fn read_score_table(path: &Path) -> Result<ScoreTable, TableError> {
    let table = TsvTable::read(path)?;
    table.ensure_not_empty()?;

    let malformed = |detail: String| TableError::MalformedScoreHeader {
        path: table.path.clone(),
        detail,
    };

    if table.headers.first().map(String::as_str) != Some("sample_id") {
        return Err(malformed("the first column must be 'sample_id'".to_string()));
    }

    let score_columns = &table.headers[1..];
    if score_columns.is_empty() || score_columns.len() % 2 != 0 {
        return Err(malformed(format!(
            "expected pairs of '<classifier>_score' and '<classifier>_shuffle' columns, found {} score columns",
            score_columns.len()
        )));
    }

    let mut names = Vec::with_capacity(score_columns.len() / 2);
    for pair in score_columns.chunks_exact(2) {
        let name = pair[0]
            .strip_suffix(ScoreKind::Observed.column_suffix())
            .filter(|n| !n.is_empty())
            .ok_or_else(|| malformed(format!("'{}' is not a '<classifier>_score' column", pair[0])))?;
        if pair[1] != ScoreKind::Shuffled.column_name(name) {
            return Err(malformed(format!(
                "'{}' must be followed by '{}', found '{}'",
                pair[0],
                ScoreKind::Shuffled.column_name(name),
                pair[1]
            )));
        }
        names.push(name.to_string());
    }

    let mut sample_ids = Vec::with_capacity(table.records.len());
    let mut seen = AHashSet::with_capacity(table.records.len());
    let mut classifiers: Vec<ClassifierScores> = names
        .into_iter()
        .map(|name| ClassifierScores {
            name,
            observed: Vec::with_capacity(table.records.len()),
            shuffled: Vec::with_capacity(table.records.len()),
        })
        .collect();

    for (row, record) in table.records.iter().enumerate() {
        let id = table.text(record, 0).to_string();
        if !seen.insert(id.clone()) {
            return Err(TableError::DuplicateId {
                path: table.path.clone(),
                id,
            });
        }
        sample_ids.push(id);
        for (c, classifier) in classifiers.iter_mut().enumerate() {
            classifier
                .observed
                .push(table.number(record, 1 + 2 * c, row)?);
            classifier
                .shuffled
                .push(table.number(record, 2 + 2 * c, row)?);
        }
    }

    Ok(ScoreTable {
        sample_ids,
        classifiers,
    })
}
