//! The batch log file (`batch_analysis_log.txt`) and the live event stream
//! handed to callers.

use crate::{
    error::BatchError,
    runner::{RunStatus, StopCodonDetail},
};
use serde::Serialize;
use std::{
    fs::{self, File, OpenOptions},
    io::Write,
    path::Path,
    sync::{Arc, Mutex, PoisonError},
};

pub const BATCH_LOG_FILE_NAME: &str = "batch_analysis_log.txt";

/// Live updates for the caller driving a batch.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum BatchEvent {
    Log {
        line: String,
    },
    BatchStarted {
        genes: usize,
        models: Vec<String>,
    },
    GeneStarted {
        gene: String,
        processed: usize,
        total: usize,
    },
    StopCodon {
        gene: String,
        model: String,
        detail: StopCodonDetail,
        count: usize,
    },
    RunFinished {
        gene: String,
        model: String,
        status: RunStatus,
    },
    GeneFinished {
        gene: String,
        processed: usize,
        total: usize,
    },
    BatchFinished {
        processed: usize,
        total: usize,
        aborted: bool,
    },
}

pub type EventSink = Arc<dyn Fn(&BatchEvent) + Send + Sync>;

/// Append-only batch log. Every line is also delivered to the event sink.
/// Safe to share between the batch thread and stream readers.
pub struct RunLog {
    file: Mutex<Option<File>>,
    sink: Option<EventSink>,
}

impl RunLog {
    pub fn open(path: &Path, sink: Option<EventSink>) -> Result<Self, BatchError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| BatchError::io_at("create", parent, e))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| BatchError::io_at("open log", path, e))?;
        Ok(Self {
            file: Mutex::new(Some(file)),
            sink,
        })
    }

    /// A log that only forwards to the sink and the `log` facade.
    #[cfg(test)]
    pub(crate) fn detached(sink: Option<EventSink>) -> Self {
        Self {
            file: Mutex::new(None),
            sink,
        }
    }

    pub fn emit(&self, event: &BatchEvent) {
        if let Some(sink) = &self.sink {
            sink(event);
        }
    }

    pub fn line(&self, text: &str) {
        log::debug!("{text}");
        {
            let mut guard = self.file.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(file) = guard.as_mut() {
                if let Err(e) = writeln!(file, "{text}") {
                    log::warn!("Could not write batch log: {e}");
                }
            }
        }
        self.emit(&BatchEvent::Log {
            line: text.to_string(),
        });
    }

    pub fn lines<'a>(&self, lines: impl IntoIterator<Item = &'a str>) {
        for line in lines {
            self.line(line);
        }
    }

    /// A line attributed to one run: `[{model}] {gene}: {text}`.
    pub fn run_line(&self, model: &str, gene: &str, text: &str) {
        self.line(&format!("[{model}] {gene}: {text}"));
    }

    pub fn warn(&self, text: &str) {
        log::warn!("{text}");
        self.line(&format!("Warning: {text}"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_and_forwards_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join(BATCH_LOG_FILE_NAME);
        let seen = Arc::new(Mutex::new(vec![]));
        let sink: EventSink = {
            let seen = seen.clone();
            Arc::new(move |event: &BatchEvent| {
                if let BatchEvent::Log { line } = event {
                    seen.lock().unwrap().push(line.clone());
                }
            })
        };
        {
            let log = RunLog::open(&path, Some(sink.clone())).unwrap();
            log.run_line("M0", "geneA", "Running codeml");
            log.warn("temp dir left behind");
        }
        let log = RunLog::open(&path, None).unwrap();
        log.line("second session");
        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(
            text,
            "[M0] geneA: Running codeml\nWarning: temp dir left behind\nsecond session\n"
        );
        assert_eq!(seen.lock().unwrap().len(), 2);
    }

    #[test]
    fn detached_log_only_forwards() {
        let count = Arc::new(Mutex::new(0));
        let sink: EventSink = {
            let count = count.clone();
            Arc::new(move |_: &BatchEvent| *count.lock().unwrap() += 1)
        };
        let log = RunLog::detached(Some(sink));
        log.lines(["a", "b"]);
        assert_eq!(*count.lock().unwrap(), 2);
    }
}
