//! JSON-lines output sinks for finished spans and bin snapshots.

use log::info;
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::time::{Duration, Instant};

const FLUSH_EVERY: Duration = Duration::from_secs(5);

/// Buffered append-only writer, one JSON document per line. Buffered
/// output is flushed at most every few seconds and on [`JsonlWriter::flush`].
pub struct JsonlWriter {
    writer: BufWriter<File>,
    last_flush: Instant,
}

impl JsonlWriter {
    pub fn create(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        info!("writing records to {}", path.display());
        Ok(JsonlWriter {
            writer: BufWriter::new(file),
            last_flush: Instant::now(),
        })
    }

    pub fn append<T: Serialize>(&mut self, record: &T) -> std::io::Result<()> {
        let line = serde_json::to_string(record)?;
        writeln!(self.writer, "{}", line)?;
        if self.last_flush.elapsed() > FLUSH_EVERY {
            self.flush()?;
        }
        Ok(())
    }

    pub fn flush(&mut self) -> std::io::Result<()> {
        self.writer.flush()?;
        self.last_flush = Instant::now();
        Ok(())
    }
}
