//! Dispatch progress reporting.
//!
//! Reports observable progress during `relay ingest` so users see how many
//! files have been extracted and how many remote calls have completed.
//! Progress is emitted on **stderr** so stdout remains parseable for scripts.

use std::io::Write;

use crate::tier::SizeTier;

/// A single progress event for a dispatch run.
#[derive(Clone, Debug)]
pub enum DispatchProgressEvent {
    /// Text extraction finished for `n` of `total` files.
    Extracting { n: u64, total: u64 },
    /// A remote call completed. `n` of `total` planned calls are done.
    Called {
        filename: String,
        tier: SizeTier,
        batch: usize,
        batches: usize,
        status: Option<u16>,
        n: u64,
        total: u64,
    },
}

/// Reports dispatch progress. Implementations write to stderr (human or JSON).
pub trait DispatchProgressReporter: Send + Sync {
    /// Emit a progress event. Called concurrently from dispatch workers.
    fn report(&self, event: DispatchProgressEvent);
}

/// Human-friendly progress on stderr: "ingest  calls  12 / 40  report.pdf [2/7] 200".
pub struct StderrProgress;

impl DispatchProgressReporter for StderrProgress {
    fn report(&self, event: DispatchProgressEvent) {
        let line = match &event {
            DispatchProgressEvent::Extracting { n, total } => {
                format!(
                    "ingest  extracting  {} / {} files\n",
                    format_number(*n),
                    format_number(*total)
                )
            }
            DispatchProgressEvent::Called {
                filename,
                tier,
                batch,
                batches,
                status,
                n,
                total,
            } => {
                let status = status
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "error".to_string());
                format!(
                    "ingest  calls  {} / {}  {} [{}/{}] {} {}\n",
                    format_number(*n),
                    format_number(*total),
                    filename,
                    batch + 1,
                    batches,
                    tier,
                    status
                )
            }
        };
        let mut stderr = std::io::stderr().lock();
        let _ = stderr.write_all(line.as_bytes());
        let _ = stderr.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl DispatchProgressReporter for JsonProgress {
    fn report(&self, event: DispatchProgressEvent) {
        let obj = match &event {
            DispatchProgressEvent::Extracting { n, total } => serde_json::json!({
                "event": "progress",
                "phase": "extracting",
                "n": n,
                "total": total
            }),
            DispatchProgressEvent::Called {
                filename,
                tier,
                batch,
                batches,
                status,
                n,
                total,
            } => serde_json::json!({
                "event": "progress",
                "phase": "calling",
                "filename": filename,
                "tier": tier,
                "batch": batch,
                "batches": batches,
                "status": status,
                "n": n,
                "total": total
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let mut stderr = std::io::stderr().lock();
            let _ = writeln!(stderr, "{}", line);
            let _ = stderr.flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl DispatchProgressReporter for NoProgress {
    fn report(&self, _event: DispatchProgressEvent) {}
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
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

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "off" => Some(ProgressMode::Off),
            "human" => Some(ProgressMode::Human),
            "json" => Some(ProgressMode::Json),
            _ => None,
        }
    }

    /// Build a reporter for this mode.
    pub fn reporter(&self) -> Box<dyn DispatchProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
