use std::{
    error::Error,
    fmt::{self, Display},
    num::NonZeroUsize,
    str,
};

use comms::sparse::{FeatureIndex, SparseDataset, SparseSample};
use log::warn;

/// A malformed training record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseErr {
    /// The line inside the parsed range, starting at 1.
    pub line: usize,
    pub reason: String,
}

impl Display for ParseErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "malformed record at line {}: {}", self.line, self.reason)
    }
}

impl Error for ParseErr {}

/// Parses text records `<label> <index>:<value> ...` into minibatches.
#[derive(Debug, Clone, Copy)]
pub struct LibsvmParser {
    minibatch_rows: NonZeroUsize,
    labeled: bool,
    features: u64,
}

impl LibsvmParser {
    /// Creates a new `LibsvmParser`.
    ///
    /// # Arguments
    /// * `minibatch_rows` - The amount of samples in every minibatch.
    /// * `labeled` - Whether every record starts with a label.
    /// * `features` - The size of the feature space, larger indices are rejected.
    pub fn new(minibatch_rows: NonZeroUsize, labeled: bool, features: u64) -> Self {
        Self {
            minibatch_rows,
            labeled,
            features,
        }
    }

    /// Parses a single record.
    ///
    /// # Arguments
    /// * `line` - The record without its line terminator.
    /// * `line_no` - The position of the record, used in errors.
    pub fn parse_line(&self, line: &str, line_no: usize) -> Result<SparseSample, ParseErr> {
        let err = |reason: String| ParseErr {
            line: line_no,
            reason,
        };

        let mut tokens = line.split_ascii_whitespace();

        let label = if self.labeled {
            let token = tokens.next().ok_or_else(|| err("missing label".into()))?;
            let label = token
                .parse::<f32>()
                .map_err(|e| err(format!("invalid label {token:?}: {e}")))?;

            Some(label)
        } else {
            None
        };

        let mut features = Vec::new();
        for token in tokens {
            let (index, value) = token
                .split_once(':')
                .ok_or_else(|| err(format!("expected <index>:<value>, got {token:?}")))?;

            let index: FeatureIndex = index
                .parse()
                .map_err(|e| err(format!("invalid index {index:?}: {e}")))?;

            let value: f32 = value
                .parse()
                .map_err(|e| err(format!("invalid value {value:?}: {e}")))?;

            if index >= self.features {
                return Err(err(format!(
                    "index {index} out of a feature space of {}",
                    self.features
                )));
            }

            if !value.is_finite() {
                return Err(err(format!("value {value} of index {index} isn't finite")));
            }

            features.push((index, value));
        }

        let mut indices: Vec<_> = features.iter().map(|&(i, _)| i).collect();
        indices.sort_unstable();
        if let Some(pair) = indices.windows(2).find(|pair| pair[0] == pair[1]) {
            return Err(err(format!("duplicated index {}", pair[0])));
        }

        Ok(SparseSample::new(label, features))
    }

    /// Parses a byte range of the dataset object into full minibatches.
    ///
    /// Unless the range starts the object, `data` begins with the byte right before the
    /// range and everything up to the first newline is the tail of a record cut by the
    /// range, which is skipped. A record starting right at the range start is kept. Likewise the bytes after the last
    /// newline are skipped unless the range ends the object. A malformed record discards
    /// the minibatch being built and parsing resumes with the next record. The trailing
    /// group of fewer than `minibatch_rows` samples is dropped.
    ///
    /// # Arguments
    /// * `data` - The bytes of the range, plus the preceding byte unless `at_start`.
    /// * `at_start` - Whether the range starts at the beginning of the object.
    /// * `at_end` - Whether the range ends at the end of the object.
    pub fn parse_range(&self, data: &[u8], at_start: bool, at_end: bool) -> Vec<SparseDataset> {
        let mut data = data;

        if !at_start {
            match data.iter().position(|&b| b == b'\n') {
                Some(pos) => data = &data[pos + 1..],
                None => return Vec::new(),
            }
        }

        if !at_end {
            match data.iter().rposition(|&b| b == b'\n') {
                Some(pos) => data = &data[..pos + 1],
                None => return Vec::new(),
            }
        }

        let rows = self.minibatch_rows.get();
        let mut batches = Vec::with_capacity(data.len() / 64 / rows);
        let mut current = Vec::with_capacity(rows);

        let lines = data.split(|&b| b == b'\n').enumerate();
        for (line_no, line) in lines.map(|(i, line)| (i + 1, line.trim_ascii())) {
            if line.is_empty() {
                continue;
            }

            let parsed = str::from_utf8(line)
                .map_err(|e| ParseErr {
                    line: line_no,
                    reason: e.to_string(),
                })
                .and_then(|line| self.parse_line(line, line_no));

            match parsed {
                Ok(sample) => current.push(sample),
                Err(e) => {
                    warn!("{e}, discarding {} samples", current.len());
                    current.clear();
                    continue;
                }
            }

            if current.len() == rows {
                let batch = std::mem::replace(&mut current, Vec::with_capacity(rows));
                batches.push(SparseDataset::new(batch));
            }
        }

        batches
    }
}
