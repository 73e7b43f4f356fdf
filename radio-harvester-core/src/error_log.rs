use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, warn};

use crate::error::FlushError;
use crate::model::ErrorRecord;

/// Cloneable handle download tasks report failures through.
///
/// Records travel over a channel to a single collector task, which is the
/// only owner of the accumulated list.
#[derive(Debug, Clone)]
pub struct ErrorSink {
    tx: mpsc::UnboundedSender<ErrorRecord>,
}

impl ErrorSink {
    pub fn spawn() -> (ErrorSink, ErrorCollector) {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(async move {
            let mut records = Vec::new();
            while let Some(record) = rx.recv().await {
                records.push(record);
            }
            records
        });
        (ErrorSink { tx }, ErrorCollector { task })
    }

    pub fn append(&self, record: ErrorRecord) {
        if let Err(err) = self.tx.send(record) {
            error!(
                "error collector is gone, lost record for {:?}: {}",
                err.0.song.title, err.0.err
            );
        }
    }
}

pub struct ErrorCollector {
    task: JoinHandle<Vec<ErrorRecord>>,
}

impl ErrorCollector {
    /// Resolves once every `ErrorSink` clone has been dropped.
    pub async fn finish(self) -> ErrorLog {
        match self.task.await {
            Ok(records) => ErrorLog { records },
            Err(err) => {
                error!("error collector task failed: {err}");
                ErrorLog::default()
            }
        }
    }
}

/// Failure records in the order they were reported.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorLog {
    records: Vec<ErrorRecord>,
}

impl ErrorLog {
    pub fn records(&self) -> &[ErrorRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Writes one JSON object per line. Only a failure to create the file is
    /// returned; a record that cannot be serialized or written is logged and
    /// skipped. Returns the number of lines written.
    pub fn flush(&self, path: &Path) -> Result<usize, FlushError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| FlushError::Create {
                path: path.to_path_buf(),
                source,
            })?;
        }
        let file = File::create(path).map_err(|source| FlushError::Create {
            path: path.to_path_buf(),
            source,
        })?;
        let mut writer = BufWriter::new(file);

        let mut written = 0;
        for record in &self.records {
            let mut line = match serde_json::to_vec(record) {
                Ok(line) => line,
                Err(err) => {
                    warn!("cannot serialize error record: {err}");
                    continue;
                }
            };
            line.push(b'\n');
            match writer.write_all(&line) {
                Ok(()) => written += 1,
                Err(err) => warn!("cannot write error record to {path:?}: {err}"),
            }
        }

        if let Err(err) = writer.flush() {
            warn!("cannot flush error log {path:?}: {err}");
        }
        Ok(written)
    }
}

impl From<Vec<ErrorRecord>> for ErrorLog {
    fn from(records: Vec<ErrorRecord>) -> Self {
        Self { records }
    }
}
