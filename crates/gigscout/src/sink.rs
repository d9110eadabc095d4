use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::concert::{CSV_HEADER, ConcertRow, EnrichedConcertExtraction};
use crate::error::Error;

/// Append-only CSV file of concert rows. No locking.
#[derive(Debug, Clone)]
pub struct CsvSink {
    path: PathBuf,
}

impl CsvSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create the file with its header row if it does not exist yet.
    ///
    /// Returns `true` when the file was created.
    pub fn initialize(&self) -> Result<bool, Error> {
        if self.path.exists() {
            return Ok(false);
        }
        self.append_rows(&[])?;
        info!(path = %self.path.display(), "created CSV output");
        Ok(true)
    }

    /// Append one row per (band, concert) pair, all sharing the current
    /// local time as timestamp. Returns the number of rows written.
    pub fn append(
        &self,
        source_image: &str,
        extraction: &EnrichedConcertExtraction,
    ) -> Result<usize, Error> {
        let timestamp = chrono::Local::now()
            .format("%Y-%m-%dT%H:%M:%S%.6f")
            .to_string();
        let rows = extraction.rows(&timestamp, source_image);
        self.append_rows(&rows)
    }

    /// Append pre-built rows, writing the header first if the file is missing.
    pub fn append_rows(&self, rows: &[ConcertRow]) -> Result<usize, Error> {
        let needs_header = !self.path.exists();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        if needs_header {
            writer.write_record(CSV_HEADER)?;
        }
        for row in rows {
            writer.write_record(row.fields())?;
        }
        writer.flush()?;

        debug!(path = %self.path.display(), rows = rows.len(), "appended rows");
        Ok(rows.len())
    }
}
