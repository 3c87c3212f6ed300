//! Terminal notification text and a logging sink

use courier_core_interface::{ProgressSink, TaskStatus, TaskSummary};
use tracing::{debug, info, warn};

/// User-facing text for a task's terminal status
///
/// Cancellation gets a soft acknowledgement rather than an error report.
pub fn terminal_message(task: &TaskSummary, status: TaskStatus, error: Option<&str>) -> String {
    match status {
        TaskStatus::Succeeded => format!(
            "Saved {} to [{}]:{}",
            task.file_name, task.storage_name, task.storage_path
        ),
        TaskStatus::Failed => format!(
            "Failed to save {}: {}",
            task.file_name,
            error.unwrap_or("unknown error")
        ),
        TaskStatus::Canceled => format!("Canceled {}", task.file_name),
        TaskStatus::Pending => format!("{} is still pending", task.file_name),
    }
}

/// Sink that writes every notification to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl ProgressSink for LogSink {
    fn report_progress(&self, task: &TaskSummary, bytes_read: u64, content_length: u64) {
        let percent = if content_length == 0 {
            100
        } else {
            bytes_read.saturating_mul(100) / content_length
        };
        debug!(task_id = task.id, file = %task.file_name, bytes_read, content_length, percent, "progress");
    }

    fn report_terminal(&self, task: &TaskSummary, status: TaskStatus, error: Option<&str>) {
        let message = terminal_message(task, status, error);
        match status {
            TaskStatus::Failed => warn!(task_id = task.id, key = %task.key, "{}", message),
            _ => info!(task_id = task.id, key = %task.key, "{}", message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_core_interface::TaskKey;

    fn summary() -> TaskSummary {
        TaskSummary {
            id: 1,
            key: TaskKey::from_message(1, 2),
            file_name: "a.bin".into(),
            storage_name: "disk".into(),
            storage_path: "/srv/a.bin".into(),
        }
    }

    #[test]
    fn test_terminal_messages() {
        let task = summary();
        assert_eq!(
            terminal_message(&task, TaskStatus::Succeeded, None),
            "Saved a.bin to [disk]:/srv/a.bin"
        );
        assert_eq!(
            terminal_message(&task, TaskStatus::Failed, Some("boom")),
            "Failed to save a.bin: boom"
        );
        assert_eq!(terminal_message(&task, TaskStatus::Canceled, None), "Canceled a.bin");
    }

    #[test]
    fn test_log_sink_accepts_zero_length() {
        LogSink.report_progress(&summary(), 0, 0);
        LogSink.report_terminal(&summary(), TaskStatus::Canceled, None);
    }
}
