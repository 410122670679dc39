//! Row preprocessing for streamed CSV sources.

use std::collections::HashMap;
use std::path::Path;

use csv::{ReaderBuilder, StringRecord};

use crate::widedeep::error::{Result, WideDeepError};
use crate::widedeep::models::config::ColumnIndex;

/// Turns one raw record into a dense row of model input.
///
/// Implementations are shared with the background reader thread, hence
/// `Send + Sync`.
pub trait StreamPreprocessor: Send + Sync {
    /// Values produced per row.
    fn n_columns(&self) -> usize;

    /// `row` is the absolute row index in the source, used for error reports.
    fn transform(&self, record: &StringRecord, row: usize) -> Result<Vec<f32>>;

    /// Whether the source starts with a header line.
    fn has_headers(&self) -> bool {
        true
    }

    fn delimiter(&self) -> u8 {
        b','
    }
}

/// Category value to code, in order of first appearance.
#[derive(Debug, Clone, Default)]
pub struct Vocabulary {
    codes: HashMap<String, usize>,
}

impl Vocabulary {
    pub fn from_values<S: Into<String>>(values: impl IntoIterator<Item = S>) -> Self {
        let mut vocab = Self::default();
        for value in values {
            vocab.insert(value.into());
        }
        vocab
    }

    pub fn insert(&mut self, value: String) -> usize {
        let next = self.codes.len();
        *self.codes.entry(value).or_insert(next)
    }

    pub fn code(&self, value: &str) -> Option<usize> {
        self.codes.get(value).copied()
    }

    /// Number of known categories.
    pub fn cardinality(&self) -> usize {
        self.codes.len()
    }
}

#[derive(Debug, Clone)]
pub enum ColumnKind {
    Continuous,
    Categorical(Vocabulary),
}

/// Positional CSV preprocessor: field `i` of a record becomes column `i`.
///
/// Continuous fields are parsed as `f32`. Categorical fields are mapped
/// through their vocabulary; unseen values become `-1`, which the embedding
/// bank routes to the padding row.
#[derive(Debug, Clone)]
pub struct TabularPreprocessor {
    columns: Vec<(String, ColumnKind)>,
    has_headers: bool,
    delimiter: u8,
}

impl Default for TabularPreprocessor {
    fn default() -> Self {
        Self {
            columns: Vec::new(),
            has_headers: true,
            delimiter: b',',
        }
    }
}

impl TabularPreprocessor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn continuous(mut self, name: impl Into<String>) -> Self {
        self.columns.push((name.into(), ColumnKind::Continuous));
        self
    }

    /// Categorical column with a known vocabulary.
    pub fn categorical<S: Into<String>>(
        mut self,
        name: impl Into<String>,
        values: impl IntoIterator<Item = S>,
    ) -> Self {
        self.columns
            .push((name.into(), ColumnKind::Categorical(Vocabulary::from_values(values))));
        self
    }

    pub fn with_headers(mut self, has_headers: bool) -> Self {
        self.has_headers = has_headers;
        self
    }

    pub fn with_delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }

    /// Grow every categorical vocabulary from one pass over `path`.
    ///
    /// Reads record by record; the file is never held in memory.
    pub fn fit(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let mut reader = ReaderBuilder::new()
            .has_headers(self.has_headers)
            .delimiter(self.delimiter)
            .flexible(true)
            .from_path(path)?;

        let mut record = StringRecord::new();
        let mut row = 0;
        loop {
            let more = reader
                .read_record(&mut record)
                .map_err(|e| WideDeepError::decode(row, e.to_string()))?;
            if !more {
                break;
            }
            self.check_width(&record, row)?;
            for ((_, kind), field) in self.columns.iter_mut().zip(record.iter()) {
                if let ColumnKind::Categorical(vocab) = kind {
                    vocab.insert(field.trim().to_string());
                }
            }
            row += 1;
        }
        log::debug!("fitted categorical vocabularies over {row} rows");
        Ok(())
    }

    /// Positions of the produced columns, in field order.
    pub fn column_index(&self) -> Result<ColumnIndex> {
        ColumnIndex::from_names(self.columns.iter().map(|(name, _)| name.clone()))
    }

    /// `(column, cardinality)` for every categorical column.
    pub fn embed_input(&self) -> Vec<(String, usize)> {
        self.columns
            .iter()
            .filter_map(|(name, kind)| match kind {
                ColumnKind::Categorical(vocab) => Some((name.clone(), vocab.cardinality())),
                ColumnKind::Continuous => None,
            })
            .collect()
    }

    pub fn continuous_cols(&self) -> Vec<String> {
        self.columns
            .iter()
            .filter(|(_, kind)| matches!(kind, ColumnKind::Continuous))
            .map(|(name, _)| name.clone())
            .collect()
    }

    fn check_width(&self, record: &StringRecord, row: usize) -> Result<()> {
        if record.len() != self.columns.len() {
            return Err(WideDeepError::decode(
                row,
                format!("expected {} fields, found {}", self.columns.len(), record.len()),
            ));
        }
        Ok(())
    }
}

impl StreamPreprocessor for TabularPreprocessor {
    fn n_columns(&self) -> usize {
        self.columns.len()
    }

    fn transform(&self, record: &StringRecord, row: usize) -> Result<Vec<f32>> {
        self.check_width(record, row)?;
        self.columns
            .iter()
            .zip(record.iter())
            .map(|((name, kind), field)| {
                let field = field.trim();
                match kind {
                    ColumnKind::Continuous => field.parse::<f32>().map_err(|_| {
                        WideDeepError::decode(row, format!("column '{name}': cannot parse '{field}' as a number"))
                    }),
                    ColumnKind::Categorical(vocab) => {
                        Ok(vocab.code(field).map_or(-1.0, |code| code as f32))
                    }
                }
            })
            .collect()
    }

    fn has_headers(&self) -> bool {
        self.has_headers
    }

    fn delimiter(&self) -> u8 {
        self.delimiter
    }
}
