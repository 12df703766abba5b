use crate::activity::{LogLevel, LogRecord, LogSender};
use anyhow::{anyhow, Result};
use log::{LevelFilter, Log, Metadata, Record};
use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
    sync::Mutex,
};
use time::OffsetDateTime;

static LOGGER: ShellLogger = ShellLogger::new();

/// Routes `log` macros into the activity log and the log file.
pub struct ShellLogger {
    sender: Mutex<Option<LogSender>>,
    // Records emitted before a sender exists.
    queue: Mutex<Vec<LogRecord>>,
    file: Mutex<Option<PathBuf>>,
}

impl ShellLogger {
    const fn new() -> Self {
        Self {
            sender: Mutex::new(None),
            queue: Mutex::new(Vec::new()),
            file: Mutex::new(None),
        }
    }

    fn set_file(&self, path: Option<PathBuf>) {
        if let Ok(mut file) = self.file.lock() {
            *file = path;
        }
    }

    fn set_sender(&self, sender: LogSender) {
        if let Ok(mut slot) = self.sender.lock() {
            *slot = Some(sender);
        }
        self.flush_queue();
    }

    /// Hands queued records to the sender, oldest first. Keeps them if no sender is set.
    fn flush_queue(&self) -> usize {
        let Ok(slot) = self.sender.lock() else {
            return 0;
        };
        let Some(sender) = slot.as_ref() else {
            return 0;
        };
        let Ok(mut queue) = self.queue.lock() else {
            return 0;
        };
        let count = queue.len();
        for record in queue.drain(..) {
            sender.send(record);
        }
        count
    }

    fn deliver(&self, record: LogRecord) {
        if let Ok(file) = self.file.lock() {
            if let Some(path) = file.as_deref() {
                let _ = append_log_file(path, &record);
            }
        }

        let Ok(slot) = self.sender.lock() else {
            return;
        };
        match slot.as_ref() {
            Some(sender) => sender.send(record),
            None => {
                if let Ok(mut queue) = self.queue.lock() {
                    queue.push(record);
                }
            }
        }
    }
}

impl Log for ShellLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        self.deliver(LogRecord::new(
            timestamp(OffsetDateTime::now_utc()),
            LogLevel::from(record.level()),
            record.args().to_string(),
        ));
    }

    fn flush(&self) {}
}

/// Installs the process-wide logger. Fails if a logger is already installed.
pub fn init(level: LevelFilter, log_path: Option<PathBuf>) -> Result<()> {
    log::set_logger(&LOGGER).map_err(|err| anyhow!("install logger: {err}"))?;
    log::set_max_level(level);
    if let Some(parent) = log_path.as_deref().and_then(Path::parent) {
        let _ = fs::create_dir_all(parent);
    }
    LOGGER.set_file(log_path);
    Ok(())
}

pub fn set_sender(sender: LogSender) {
    LOGGER.set_sender(sender);
}

pub fn timestamp(now: OffsetDateTime) -> String {
    format!(
        "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
        now.year(),
        now.month() as u8,
        now.day(),
        now.hour(),
        now.minute(),
        now.second()
    )
}

fn append_log_file(path: &Path, record: &LogRecord) -> std::io::Result<()> {
    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    writeln!(file, "{}", record.line())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{activity::log_channel, controller::ModController};
    use log::Level;
    use tempfile::tempdir;
    use time::macros::datetime;

    fn emit(logger: &ShellLogger, level: Level, message: &str) {
        logger.deliver(LogRecord::new("ts", LogLevel::from(level), message));
    }

    #[test]
    fn timestamp_is_zero_padded() {
        assert_eq!(timestamp(datetime!(2024-03-07 04:05:09 UTC)), "2024-03-07 04:05:09");
    }

    #[test]
    fn records_before_sender_are_queued_then_flushed_in_order() {
        let logger = ShellLogger::new();
        emit(&logger, Level::Info, "early 1");
        emit(&logger, Level::Warn, "early 2");
        assert_eq!(logger.flush_queue(), 0);

        let (sender, rx) = log_channel();
        logger.set_sender(sender);
        emit(&logger, Level::Error, "late");

        let received: Vec<(LogLevel, String)> = rx
            .try_iter()
            .map(|record| (record.level, record.message))
            .collect();
        assert_eq!(
            received,
            vec![
                (LogLevel::Info, "early 1".to_string()),
                (LogLevel::Warn, "early 2".to_string()),
                (LogLevel::Error, "late".to_string()),
            ]
        );
        assert_eq!(logger.flush_queue(), 0);
    }

    #[test]
    fn trace_maps_to_debug() {
        let logger = ShellLogger::new();
        let (sender, rx) = log_channel();
        logger.set_sender(sender);
        emit(&logger, Level::Trace, "fine detail");

        assert_eq!(rx.try_recv().unwrap().level, LogLevel::Debug);
    }

    #[test]
    fn log_file_receives_formatted_lines() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("modshell.log");
        let logger = ShellLogger::new();
        logger.set_file(Some(path.clone()));

        logger.deliver(LogRecord::new("2024-01-01 00:00:00", LogLevel::Info, "Loaded"));
        logger.deliver(LogRecord::new("2024-01-01 00:00:01", LogLevel::Warn, "Odd"));

        let raw = fs::read_to_string(path).unwrap();
        assert_eq!(
            raw,
            "[2024-01-01 00:00:00] INFO Loaded\n[2024-01-01 00:00:01] WARN Odd\n"
        );
    }

    #[test]
    fn log_macros_reach_the_controller_activity_log() {
        init(LevelFilter::Debug, None).unwrap();
        let mut controller = ModController::new(Vec::new(), Vec::new(), String::new()).unwrap();
        set_sender(controller.attach_log_channel());

        log::info!("pipeline check: first");
        log::warn!("pipeline check: second");
        assert!(controller.pump_logs() >= 2);

        let received: Vec<(LogLevel, &str)> = controller
            .log()
            .iter()
            .filter(|record| record.message.starts_with("pipeline check"))
            .map(|record| (record.level, record.message.as_str()))
            .collect();
        assert_eq!(
            received,
            [
                (LogLevel::Info, "pipeline check: first"),
                (LogLevel::Warn, "pipeline check: second"),
            ]
        );
        assert!(controller
            .log()
            .iter()
            .all(|record| !record.timestamp.is_empty()));
    }
}
