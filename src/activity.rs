use serde::{Deserialize, Serialize};
use std::sync::mpsc::{self, Receiver, Sender};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn label(self) -> &'static str {
        match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "DEBUG" => Some(LogLevel::Debug),
            "INFO" => Some(LogLevel::Info),
            "WARN" => Some(LogLevel::Warn),
            "ERROR" => Some(LogLevel::Error),
            _ => None,
        }
    }
}

impl From<log::Level> for LogLevel {
    fn from(level: log::Level) -> Self {
        match level {
            log::Level::Error => LogLevel::Error,
            log::Level::Warn => LogLevel::Warn,
            log::Level::Info => LogLevel::Info,
            log::Level::Debug | log::Level::Trace => LogLevel::Debug,
        }
    }
}

/// One activity event. Stored exactly as received.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    pub timestamp: String,
    pub level: LogLevel,
    pub message: String,
}

impl LogRecord {
    pub fn new(timestamp: impl Into<String>, level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            timestamp: timestamp.into(),
            level,
            message: message.into(),
        }
    }

    pub fn line(&self) -> String {
        format!("[{}] {} {}", self.timestamp, self.level.label(), self.message)
    }

    /// Reads back a line written by [`LogRecord::line`].
    pub fn parse_line(line: &str) -> Option<Self> {
        let rest = line.strip_prefix('[')?;
        let (timestamp, rest) = rest.split_once("] ")?;
        let (label, message) = rest.split_once(' ').unwrap_or((rest, ""));
        let level = LogLevel::from_label(label)?;
        Some(Self::new(timestamp, level, message))
    }
}

/// Append-only record sequence. Nothing is ever removed or reordered.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivityLog {
    records: Vec<LogRecord>,
}

impl ActivityLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, record: LogRecord) {
        self.records.push(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &LogRecord> {
        self.records.iter()
    }

    pub fn last(&self) -> Option<&LogRecord> {
        self.records.last()
    }

    /// Owned copy; later appends never show up in it.
    pub fn snapshot(&self) -> Vec<LogRecord> {
        self.records.clone()
    }

    pub fn text(&self) -> String {
        self.records
            .iter()
            .map(LogRecord::line)
            .collect::<Vec<String>>()
            .join("\n")
    }
}

/// Producer half of the log delivery channel. Sending never blocks and never fails.
#[derive(Debug, Clone)]
pub struct LogSender {
    tx: Sender<LogRecord>,
}

impl LogSender {
    pub fn send(&self, record: LogRecord) {
        let _ = self.tx.send(record);
    }
}

pub fn log_channel() -> (LogSender, Receiver<LogRecord>) {
    let (tx, rx) = mpsc::channel();
    (LogSender { tx }, rx)
}
