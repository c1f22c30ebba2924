//! Executor event stream

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Event kinds the tracker reacts to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    TaskOk,
    TaskFailed,
    HostUnreachable,
    RunStats,
    Other(String),
}

impl EventKind {
    pub fn parse(s: &str) -> Self {
        match s {
            "runner_on_ok" => EventKind::TaskOk,
            "runner_on_failed" => EventKind::TaskFailed,
            "runner_on_unreachable" => EventKind::HostUnreachable,
            "playbook_on_stats" => EventKind::RunStats,
            other => EventKind::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            EventKind::TaskOk => "runner_on_ok",
            EventKind::TaskFailed => "runner_on_failed",
            EventKind::HostUnreachable => "runner_on_unreachable",
            EventKind::RunStats => "playbook_on_stats",
            EventKind::Other(s) => s,
        }
    }

    /// Unreachable hosts count as failed
    pub fn is_failure(&self) -> bool {
        matches!(self, EventKind::TaskFailed | EventKind::HostUnreachable)
    }
}

/// One raw event emitted by the executor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutorEvent {
    #[serde(default)]
    pub event: String,

    #[serde(default)]
    pub event_data: Map<String, Value>,
}

impl ExecutorEvent {
    pub fn new(event: impl Into<String>, event_data: Value) -> Self {
        Self {
            event: event.into(),
            event_data: match event_data {
                Value::Object(map) => map,
                _ => Map::new(),
            },
        }
    }

    /// Parse one line of the executor's JSON output
    pub fn from_line(line: &str) -> Option<Self> {
        let event: ExecutorEvent = serde_json::from_str(line.trim()).ok()?;
        if event.event.is_empty() {
            return None;
        }
        Some(event)
    }

    pub fn kind(&self) -> EventKind {
        EventKind::parse(&self.event)
    }

    fn data_str(&self, key: &str) -> Option<String> {
        self.event_data
            .get(key)
            .and_then(Value::as_str)
            .map(str::to_string)
    }

    fn data(&self, key: &str) -> Value {
        self.event_data.get(key).cloned().unwrap_or(Value::Null)
    }

    /// Extract the record shipped to the log sink; `None` for events the tracker ignores
    pub fn record(&self) -> Option<EventRecord> {
        let kind = self.kind();
        match kind {
            EventKind::TaskOk | EventKind::TaskFailed | EventKind::HostUnreachable => {
                Some(EventRecord::Task(TaskRecord {
                    task: self.data_str("task"),
                    host: self.data_str("host"),
                    role: self.data_str("role"),
                    res: self.data("res"),
                    duration: self.data("duration"),
                    event: self.event.clone(),
                }))
            }
            EventKind::RunStats => Some(EventRecord::Stats(StatsRecord {
                changed: self.data("changed"),
                failures: self.data("failures"),
                ignored: self.data("ignored"),
                ok: self.data("ok"),
                processed: self.data("processed"),
                skipped: self.data("skipped"),
                event: self.event.clone(),
            })),
            EventKind::Other(_) => None,
        }
    }
}

/// Per-task outcome
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskRecord {
    pub task: Option<String>,
    pub host: Option<String>,
    pub role: Option<String>,
    pub res: Value,
    pub duration: Value,
    pub event: String,
}

impl TaskRecord {
    /// Numeric host id from the inventory name (`host12` or `12`)
    pub fn host_id(&self) -> Option<i64> {
        let host = self.host.as_deref()?.trim();
        let digits = host.strip_prefix("host").unwrap_or(host);
        digits.parse().ok()
    }
}

/// Aggregate counters of a finished run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsRecord {
    pub changed: Value,
    pub failures: Value,
    pub ignored: Value,
    pub ok: Value,
    pub processed: Value,
    pub skipped: Value,
    pub event: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EventRecord {
    Task(TaskRecord),
    Stats(StatsRecord),
}

impl EventRecord {
    pub fn to_json(&self) -> Value {
        let value = match self {
            EventRecord::Task(task) => serde_json::to_value(task),
            EventRecord::Stats(stats) => serde_json::to_value(stats),
        };
        value.unwrap_or(Value::Null)
    }
}
