use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use metrics_exporter_prometheus::PrometheusHandle;
use sales_pipeline::pipeline::{EventStore, EventStoreError, PipelineEvent};
use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use tracing::error;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
    /// Where accepted mutations are persisted, as reported by `/ready`.
    pub(crate) event_log: Arc<str>,
}

/// Event store that forgets everything on restart.
#[derive(Default, Clone)]
pub(crate) struct InMemoryEventStore {
    events: Arc<Mutex<Vec<PipelineEvent>>>,
}

impl InMemoryEventStore {
    pub(crate) fn events(&self) -> Vec<PipelineEvent> {
        self.events.lock().expect("event store mutex poisoned").clone()
    }
}

impl EventStore for InMemoryEventStore {
    fn load_all(&self) -> Result<Vec<PipelineEvent>, EventStoreError> {
        Ok(self.events())
    }

    fn on_event(&self, event: &PipelineEvent) -> Result<(), EventStoreError> {
        let mut guard = self.events.lock().expect("event store mutex poisoned");
        guard.push(event.clone());
        Ok(())
    }
}

type SyncFn = fn(&File) -> io::Result<()>;

/// Append-only log with one JSON encoded event per line.
///
/// A line that cannot be written and synced in full is truncated away again,
/// so a refused mutation never reappears on replay.
pub(crate) struct JsonLinesEventStore {
    path: PathBuf,
    writer: Mutex<()>,
    sync: SyncFn,
}

impl JsonLinesEventStore {
    pub(crate) fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_sync(path, File::sync_data)
    }

    fn with_sync(path: impl Into<PathBuf>, sync: SyncFn) -> Self {
        Self {
            path: path.into(),
            writer: Mutex::new(()),
            sync,
        }
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }
}

fn unavailable(path: &Path, err: std::io::Error) -> EventStoreError {
    EventStoreError::Unavailable(format!("{}: {err}", path.display()))
}

impl EventStore for JsonLinesEventStore {
    fn load_all(&self) -> Result<Vec<PipelineEvent>, EventStoreError> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(unavailable(&self.path, err)),
        };

        let mut events = Vec::new();
        for (index, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|err| unavailable(&self.path, err))?;
            if line.trim().is_empty() {
                continue;
            }
            let event = serde_json::from_str::<PipelineEvent>(&line).map_err(|err| {
                EventStoreError::Corrupt {
                    position: index + 1,
                    reason: err.to_string(),
                }
            })?;
            events.push(event);
        }
        Ok(events)
    }

    fn on_event(&self, event: &PipelineEvent) -> Result<(), EventStoreError> {
        let mut line = serde_json::to_string(event)
            .map_err(|err| EventStoreError::Unavailable(err.to_string()))?;
        line.push('\n');

        let _guard = self.writer.lock().expect("event log mutex poisoned");
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|err| unavailable(&self.path, err))?;
        append_or_truncate(&mut file, line.as_bytes(), self.sync)
            .map_err(|err| unavailable(&self.path, err))
    }
}

fn append_or_truncate(file: &mut File, line: &[u8], sync: SyncFn) -> io::Result<()> {
    let previous_len = file.metadata()?.len();
    let written = file.write_all(line).and_then(|_| sync(&*file));
    if let Err(err) = written {
        if let Err(truncate_err) = file.set_len(previous_len).and_then(|_| sync(&*file)) {
            error!(
                error = %truncate_err,
                previous_len,
                "failed to roll back a partially written event"
            );
        }
        return Err(err);
    }
    Ok(())
}

/// Store selected by `PIPELINE_EVENT_LOG` / `--event-log`.
pub(crate) enum ConfiguredEventStore {
    Memory(InMemoryEventStore),
    File(JsonLinesEventStore),
}

impl ConfiguredEventStore {
    pub(crate) fn from_path(path: Option<PathBuf>) -> Self {
        match path {
            Some(path) => Self::File(JsonLinesEventStore::new(path)),
            None => Self::Memory(InMemoryEventStore::default()),
        }
    }

    pub(crate) fn describe(&self) -> String {
        match self {
            Self::Memory(_) => "in-memory".to_string(),
            Self::File(store) => store.path().display().to_string(),
        }
    }
}

impl EventStore for ConfiguredEventStore {
    fn load_all(&self) -> Result<Vec<PipelineEvent>, EventStoreError> {
        match self {
            Self::Memory(store) => store.load_all(),
            Self::File(store) => store.load_all(),
        }
    }

    fn on_event(&self, event: &PipelineEvent) -> Result<(), EventStoreError> {
        match self {
            Self::Memory(store) => store.on_event(event),
            Self::File(store) => store.on_event(event),
        }
    }
}

pub(crate) fn parse_date(raw: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|err| format!("failed to parse '{raw}' as YYYY-MM-DD ({err})"))
}

/// Midnight UTC of the given calendar day.
pub(crate) fn start_of_day(date: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_time(chrono::NaiveTime::MIN))
}
