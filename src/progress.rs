//! Knowledge-base sync progress reporting.
//!
//! Tells the user which statute is being read, reused, uploaded or waited
//! on while the knowledge base is built. Progress is emitted on **stderr** so
//! stdout stays reserved for answers.

use std::io::Write;

/// A single progress event for a knowledge-base build.
#[derive(Clone, Debug)]
pub enum SyncProgressEvent {
    /// Local files found; remote listing about to be fetched.
    Discovered { total: usize },
    /// A remote copy already exists and will be reused.
    Reusing { name: String },
    Uploading { name: String, n: usize, total: usize },
    /// Waiting for the provider to finish processing.
    Waiting { name: String },
    Ready { name: String },
    Skipped { name: String, reason: String },
    Finished { ready: usize, skipped: usize },
}

/// Reports sync progress. Implementations write to stderr (human or JSON).
pub trait SyncProgressReporter: Send + Sync {
    fn report(&self, event: SyncProgressEvent);
}

/// Human-friendly progress on stderr: "📥 Đang đọc: luat_thue_tncn.pdf (1 / 2)".
pub struct StderrProgress;

impl SyncProgressReporter for StderrProgress {
    fn report(&self, event: SyncProgressEvent) {
        let line = match &event {
            SyncProgressEvent::Discovered { total } => {
                format!("Đang nạp dữ liệu luật... ({} văn bản)\n", total)
            }
            SyncProgressEvent::Reusing { name } => format!("♻️  Dùng lại: {}\n", name),
            SyncProgressEvent::Uploading { name, n, total } => {
                format!("📥 Đang đọc: {} ({} / {})\n", name, n, total)
            }
            SyncProgressEvent::Waiting { name } => format!("⏳ Đang xử lý: {}...\n", name),
            SyncProgressEvent::Ready { name } => format!("✅ Sẵn sàng: {}\n", name),
            SyncProgressEvent::Skipped { name, reason } => {
                format!("⚠️  Bỏ qua {}: {}\n", name, reason)
            }
            SyncProgressEvent::Finished { ready, skipped } => {
                format!(
                    "✅ Đã nạp xong dữ liệu! {} văn bản sẵn sàng, {} bị bỏ qua\n",
                    ready, skipped
                )
            }
        };
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl SyncProgressReporter for JsonProgress {
    fn report(&self, event: SyncProgressEvent) {
        let obj = match &event {
            SyncProgressEvent::Discovered { total } => serde_json::json!({
                "event": "progress", "phase": "discovered", "total": total
            }),
            SyncProgressEvent::Reusing { name } => serde_json::json!({
                "event": "progress", "phase": "reusing", "name": name
            }),
            SyncProgressEvent::Uploading { name, n, total } => serde_json::json!({
                "event": "progress", "phase": "uploading", "name": name, "n": n, "total": total
            }),
            SyncProgressEvent::Waiting { name } => serde_json::json!({
                "event": "progress", "phase": "waiting", "name": name
            }),
            SyncProgressEvent::Ready { name } => serde_json::json!({
                "event": "progress", "phase": "ready", "name": name
            }),
            SyncProgressEvent::Skipped { name, reason } => serde_json::json!({
                "event": "progress", "phase": "skipped", "name": name, "reason": reason
            }),
            SyncProgressEvent::Finished { ready, skipped } => serde_json::json!({
                "event": "progress", "phase": "finished", "ready": ready, "skipped": skipped
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl SyncProgressReporter for NoProgress {
    fn report(&self, _event: SyncProgressEvent) {}
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn SyncProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Captures events for assertions.
    #[derive(Default)]
    pub(crate) struct RecordingProgress {
        pub events: Mutex<Vec<SyncProgressEvent>>,
    }

    impl SyncProgressReporter for RecordingProgress {
        fn report(&self, event: SyncProgressEvent) {
            self.events.lock().unwrap().push(event);
        }
    }

    #[test]
    fn off_mode_is_silent() {
        let reporter = ProgressMode::Off.reporter();
        reporter.report(SyncProgressEvent::Discovered { total: 3 });
    }

    #[test]
    fn recorder_keeps_order() {
        let rec = RecordingProgress::default();
        rec.report(SyncProgressEvent::Discovered { total: 1 });
        rec.report(SyncProgressEvent::Finished {
            ready: 1,
            skipped: 0,
        });
        let events = rec.events.lock().unwrap();
        assert!(matches!(events[0], SyncProgressEvent::Discovered { total: 1 }));
        assert!(matches!(events[1], SyncProgressEvent::Finished { .. }));
    }
}
