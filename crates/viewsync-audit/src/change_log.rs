//! ChangeLogWriter - daily change log files
//!
//! Each change event becomes one line
//!
//! ```text
//! [2024-05-01 14:03:22] Created: /srv/shop/Views/Home/Index.cshtml
//! ```
//!
//! appended to `<logging.directory>/viewsync_<YYYY-MM-DD>.log`. The file is
//! reopened when the local date rolls over or the logging settings in the
//! configuration snapshot change.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::{Local, NaiveDate, NaiveDateTime};
use viewsync_core::{ChangeEvent, ConfigStore, IChangeListener};

type Clock = Box<dyn Fn() -> NaiveDateTime + Send + Sync>;

struct OpenLog {
    date: NaiveDate,
    directory: PathBuf,
    path: PathBuf,
    writer: BufWriter<File>,
}

impl OpenLog {
    fn is_for(&self, date: NaiveDate, directory: &Path) -> bool {
        self.date == date && self.directory == directory
    }
}

/// Appends change events to a daily log file
pub struct ChangeLogWriter {
    store: ConfigStore,
    clock: Clock,
    open: Mutex<Option<OpenLog>>,
}

impl std::fmt::Debug for ChangeLogWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeLogWriter")
            .field("current_path", &self.current_path())
            .finish_non_exhaustive()
    }
}

impl ChangeLogWriter {
    /// Creates a writer that follows the logging settings in `store`
    pub fn new(store: ConfigStore) -> Self {
        Self::with_clock(store, || Local::now().naive_local())
    }

    /// Creates a writer that timestamps lines with `clock`
    pub fn with_clock<F>(store: ConfigStore, clock: F) -> Self
    where
        F: Fn() -> NaiveDateTime + Send + Sync + 'static,
    {
        Self {
            store,
            clock: Box::new(clock),
            open: Mutex::new(None),
        }
    }

    /// Name of the log file for `date`
    pub fn file_name(date: NaiveDate) -> String {
        format!("viewsync_{}.log", date.format("%Y-%m-%d"))
    }

    /// Formats one log line, without the trailing newline
    pub fn format_line(at: NaiveDateTime, event: &ChangeEvent) -> String {
        format!(
            "[{}] {}: {}",
            at.format("%Y-%m-%d %H:%M:%S"),
            event.title,
            event.text
        )
    }

    /// Path of the currently open log file, if any
    pub fn current_path(&self) -> Option<PathBuf> {
        self.lock().as_ref().map(|log| log.path.clone())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<OpenLog>> {
        self.open.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn append(&self, event: &ChangeEvent) -> Result<()> {
        let logging = self.store.current().logging.clone();
        let directory = match (logging.enabled, logging.directory) {
            (true, Some(directory)) => directory,
            _ => {
                *self.lock() = None;
                return Ok(());
            }
        };

        let now = (self.clock)();
        let date = now.date();
        let mut line = Self::format_line(now, event);
        line.push('\n');

        // Opening (and creating the directory) happens outside the lock.
        let stale = self
            .lock()
            .as_ref()
            .map(|log| !log.is_for(date, &directory))
            .unwrap_or(true);
        let fresh = if stale {
            Some(open_log(&directory, date)?)
        } else {
            None
        };

        let mut open = self.lock();
        if let Some(fresh) = fresh {
            let keep = open
                .as_ref()
                .map(|log| log.is_for(date, &directory))
                .unwrap_or(false);
            if !keep {
                *open = Some(fresh);
            }
        }

        let log = match open.as_mut() {
            Some(log) => log,
            None => return Ok(()),
        };
        log.writer
            .write_all(line.as_bytes())
            .and_then(|()| log.writer.flush())
            .with_context(|| format!("Failed to write to log {}", log.path.display()))?;
        Ok(())
    }
}

fn open_log(directory: &Path, date: NaiveDate) -> Result<OpenLog> {
    std::fs::create_dir_all(directory)
        .with_context(|| format!("Failed to create log directory {}", directory.display()))?;

    let path = directory.join(ChangeLogWriter::file_name(date));
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("Failed to open log {}", path.display()))?;

    tracing::debug!(path = %path.display(), "Opened change log");
    Ok(OpenLog {
        date,
        directory: directory.to_path_buf(),
        path,
        writer: BufWriter::new(file),
    })
}

impl IChangeListener for ChangeLogWriter {
    fn on_change(&self, event: &ChangeEvent) -> Result<()> {
        self.append(event)
    }
}
