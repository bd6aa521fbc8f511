//! Ingestion dispatch orchestration.
//!
//! Coordinates the full flow for one batch of files: extraction → size
//! classification → chunking → remote calls → audit. Two dispatch strategies
//! run side by side:
//!
//! - **Small** documents are sent as one call each. All small-tier calls run
//!   concurrently, bounded by a semaphore of `dispatch.workers` permits.
//! - **Medium** and **large** documents are split into sub-batches of
//!   `dispatch.batch_size` chunks. A document's sub-batches are sent strictly
//!   in order, one at a time, with a [`BatchDelay`] pause between them.
//!   Different documents' sequences interleave freely.
//!
//! Every completed call, whatever its outcome, is appended to the
//! [`AuditLog`] as soon as it completes. A failed call never aborts its
//! siblings and is never retried here.

use anyhow::Context;
use futures::future::join_all;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::archive::{extension_tally, UnpackedArchive};
use crate::audit::AuditLog;
use crate::chunk::{chunk_text, preview, PREVIEW_CHARS};
use crate::config::{Config, DispatchConfig};
use crate::error::{RelayError, Result};
use crate::extract::{extract_file, Extraction};
use crate::models::{CallResult, Chunk, DispatchReport, DispatchRequest, IngestionCall, SkippedFile};
use crate::progress::{DispatchProgressEvent, DispatchProgressReporter, NoProgress, ProgressMode};
use crate::remote::{HttpRemoteIndex, IngestPayload, RemoteIndex};
use crate::tier::SizeTier;

/// Pause inserted between consecutive sub-batches of one document.
pub trait BatchDelay: Send + Sync {
    fn delay(&self, tier: SizeTier) -> Duration;
}

/// Fixed per-tier pause, from `dispatch.medium_delay_ms` / `large_delay_ms`.
#[derive(Debug, Clone, Copy)]
pub struct FixedDelay {
    pub medium: Duration,
    pub large: Duration,
}

impl FixedDelay {
    pub fn from_config(config: &DispatchConfig) -> Self {
        Self {
            medium: config.medium_delay(),
            large: config.large_delay(),
        }
    }
}

impl BatchDelay for FixedDelay {
    fn delay(&self, tier: SizeTier) -> Duration {
        match tier {
            SizeTier::Small => Duration::ZERO,
            SizeTier::Medium => self.medium,
            SizeTier::Large => self.large,
        }
    }
}

/// No pause at all.
pub struct NoDelay;

impl BatchDelay for NoDelay {
    fn delay(&self, _tier: SizeTier) -> Duration {
        Duration::ZERO
    }
}

/// Per-file outcome of a dry run.
#[derive(Debug, Clone, Serialize)]
pub struct PlannedFile {
    pub file: PathBuf,
    pub extractor: String,
    pub tier: SizeTier,
    pub chars: usize,
    pub chunks: usize,
    pub calls: usize,
    pub skipped: Option<String>,
    /// Leading characters of each chunk, in chunk order.
    pub previews: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DispatchPlan {
    pub files: Vec<PlannedFile>,
    /// Selected files per lowercased extension.
    pub extensions: BTreeMap<String, usize>,
}

impl DispatchPlan {
    pub fn total_calls(&self) -> usize {
        self.files.iter().map(|f| f.calls).sum()
    }

    pub fn total_chunks(&self) -> usize {
        self.files.iter().map(|f| f.chunks).sum()
    }
}

/// A file after extraction, classification and chunking.
struct PreparedFile {
    order: usize,
    path: PathBuf,
    filename: String,
    extractor: String,
    tier: SizeTier,
    chars: usize,
    chunks: Vec<Chunk>,
    skip_reason: Option<String>,
}

/// Labels and counters shared by all calls of one dispatch run.
struct RunContext<'a> {
    run_id: Uuid,
    collection: &'a str,
    doc_type: &'a str,
    user: &'a str,
    total_calls: u64,
    completed: AtomicU64,
    permits: Semaphore,
}

pub struct Dispatcher {
    config: Arc<Config>,
    remote: Arc<dyn RemoteIndex>,
    audit: Arc<AuditLog>,
    delay: Arc<dyn BatchDelay>,
    progress: Arc<dyn DispatchProgressReporter>,
}

impl Dispatcher {
    /// Create a dispatcher pacing sub-batches with the configured [`FixedDelay`].
    pub fn new(config: Arc<Config>, remote: Arc<dyn RemoteIndex>, audit: Arc<AuditLog>) -> Self {
        let delay = Arc::new(FixedDelay::from_config(&config.dispatch));
        Self {
            config,
            remote,
            audit,
            delay,
            progress: Arc::new(NoProgress),
        }
    }

    pub fn with_delay(mut self, delay: Arc<dyn BatchDelay>) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn DispatchProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    pub fn audit(&self) -> &Arc<AuditLog> {
        &self.audit
    }

    pub fn remote(&self) -> &Arc<dyn RemoteIndex> {
        &self.remote
    }

    /// Extract, chunk and send every selected file.
    ///
    /// Fails only on invalid input (empty labels, user, or file set); every
    /// per-file and per-call failure is part of the returned report.
    pub async fn dispatch(&self, request: DispatchRequest) -> Result<DispatchReport> {
        let collection = request.collection.trim();
        let doc_type = request.doc_type.trim();
        let user = request.user.trim();
        if collection.is_empty() {
            return Err(RelayError::configuration("collection must not be empty"));
        }
        if doc_type.is_empty() {
            return Err(RelayError::configuration("doc type must not be empty"));
        }
        if user.is_empty() {
            return Err(RelayError::configuration("user must not be empty"));
        }
        if request.files.is_empty() {
            return Err(RelayError::configuration("no files selected"));
        }

        let run_id = Uuid::new_v4();
        info!(
            %run_id,
            files = request.files.len(),
            collection,
            doc_type,
            user,
            "dispatch started"
        );

        let prepared = self.prepare(&request.files).await;

        let mut skipped = Vec::new();
        let mut small = Vec::new();
        let mut batched = Vec::new();
        for file in prepared {
            if let Some(reason) = &file.skip_reason {
                debug!(file = %file.path.display(), %reason, "file skipped");
                skipped.push(SkippedFile {
                    file: file.path.clone(),
                    reason: reason.clone(),
                });
            } else if file.tier.is_batched() {
                batched.push(file);
            } else {
                small.push(file);
            }
        }

        let batch_size = self.config.dispatch.batch_size.max(1);
        let total_calls =
            small.len() + batched.iter().map(|f| f.chunks.len().div_ceil(batch_size)).sum::<usize>();

        let ctx = RunContext {
            run_id,
            collection,
            doc_type,
            user,
            total_calls: total_calls as u64,
            completed: AtomicU64::new(0),
            permits: Semaphore::new(self.config.dispatch.workers.max(1)),
        };

        let small_calls = join_all(small.iter().map(|file| self.send_whole(file, &ctx)));
        let batched_calls = join_all(batched.iter().map(|file| self.send_batched(file, &ctx)));
        let (small_results, batched_results) = tokio::join!(small_calls, batched_calls);

        let mut ordered: Vec<(usize, CallResult)> = small_results
            .into_iter()
            .chain(batched_results.into_iter().flatten())
            .collect();
        ordered.sort_by_key(|(order, call)| (*order, call.batch_index));

        let report = DispatchReport {
            run_id,
            calls: ordered.into_iter().map(|(_, call)| call).collect(),
            skipped,
        };
        info!(
            %run_id,
            calls = report.calls.len(),
            succeeded = report.succeeded(),
            failed = report.failed(),
            skipped = report.skipped.len(),
            "dispatch finished"
        );
        Ok(report)
    }

    /// Extract, classify and chunk without calling the remote.
    pub async fn plan(&self, files: &[PathBuf]) -> DispatchPlan {
        let batch_size = self.config.dispatch.batch_size.max(1);
        let extensions = extension_tally(files);
        let files = self
            .prepare(files)
            .await
            .into_iter()
            .map(|f| {
                let calls = match (&f.skip_reason, f.tier.is_batched()) {
                    (Some(_), _) => 0,
                    (None, false) => 1,
                    (None, true) => f.chunks.len().div_ceil(batch_size),
                };
                PlannedFile {
                    previews: f
                        .chunks
                        .iter()
                        .map(|c| preview(&c.text, PREVIEW_CHARS).to_string())
                        .collect(),
                    file: f.path,
                    extractor: f.extractor,
                    tier: f.tier,
                    chars: f.chars,
                    chunks: f.chunks.len(),
                    calls,
                    skipped: f.skip_reason,
                }
            })
            .collect();
        DispatchPlan { files, extensions }
    }

    async fn prepare(&self, files: &[PathBuf]) -> Vec<PreparedFile> {
        let permits = Semaphore::new(self.config.dispatch.workers.max(1));
        let total = files.len() as u64;
        let done = AtomicU64::new(0);

        let jobs = files.iter().enumerate().map(|(order, path)| {
            let permits = &permits;
            let done = &done;
            async move {
                let _permit = permits.acquire().await;
                let owned = path.clone();
                let extraction = tokio::task::spawn_blocking(move || extract_file(&owned)).await;
                let n = done.fetch_add(1, Ordering::SeqCst) + 1;
                self.progress
                    .report(DispatchProgressEvent::Extracting { n, total });

                match extraction {
                    Ok(extraction) => self.prepare_file(order, path, extraction),
                    Err(e) => {
                        warn!(file = %path.display(), error = %e, "extraction task failed");
                        PreparedFile {
                            order,
                            path: path.clone(),
                            filename: filename_of(path),
                            extractor: "unknown".to_string(),
                            tier: SizeTier::Small,
                            chars: 0,
                            chunks: Vec::new(),
                            skip_reason: Some(format!("extraction aborted: {}", e)),
                        }
                    }
                }
            }
        });
        join_all(jobs).await
    }

    fn prepare_file(&self, order: usize, path: &Path, extraction: Extraction) -> PreparedFile {
        let Extraction {
            extractor,
            text,
            error,
        } = extraction;
        let chars = text.chars().count();
        let tier = self.config.tiers.classify(chars);
        let chunks = chunk_text(
            &text,
            self.config.chunking.max_words,
            self.config.chunking.strategy,
        );

        let skip_reason = match error {
            Some(e) => {
                debug!(file = %path.display(), error = %e, "extraction degraded to empty text");
                Some(e.to_string())
            }
            None if chunks.is_empty() => Some("no extractable text".to_string()),
            None => None,
        };

        PreparedFile {
            order,
            path: path.to_path_buf(),
            filename: filename_of(path),
            extractor: extractor.name().to_string(),
            tier,
            chars,
            chunks,
            skip_reason,
        }
    }

    async fn send_whole(&self, file: &PreparedFile, ctx: &RunContext<'_>) -> (usize, CallResult) {
        let result = self.send_call(file, 0, 1, &file.chunks, ctx).await;
        (file.order, result)
    }

    /// Send a document's sub-batches one after another, pausing in between.
    async fn send_batched(
        &self,
        file: &PreparedFile,
        ctx: &RunContext<'_>,
    ) -> Vec<(usize, CallResult)> {
        let batch_size = self.config.dispatch.batch_size.max(1);
        let batches: Vec<&[Chunk]> = file.chunks.chunks(batch_size).collect();
        let count = batches.len();
        debug!(
            file = %file.filename,
            tier = %file.tier,
            chunks = file.chunks.len(),
            batches = count,
            "sending in sub-batches"
        );

        let mut results = Vec::with_capacity(count);
        for (index, batch) in batches.into_iter().enumerate() {
            if index > 0 {
                let pause = self.delay.delay(file.tier);
                if !pause.is_zero() {
                    tokio::time::sleep(pause).await;
                }
            }
            let result = self.send_call(file, index, count, batch, ctx).await;
            results.push((file.order, result));
        }
        results
    }

    async fn send_call(
        &self,
        file: &PreparedFile,
        batch_index: usize,
        batch_count: usize,
        chunks: &[Chunk],
        ctx: &RunContext<'_>,
    ) -> CallResult {
        let payload = IngestPayload {
            chunks: chunks.iter().map(|c| c.text.clone()).collect(),
            filename: file.filename.clone(),
            collection: ctx.collection.to_string(),
            doc_type: ctx.doc_type.to_string(),
        };

        let response = {
            let _permit = ctx.permits.acquire().await;
            self.remote.ingest(&payload).await
        };

        let (status, body) = match response {
            Ok(r) => (Some(r.status), r.body),
            Err(e) => (None, e.to_string()),
        };

        let call = IngestionCall {
            run_id: ctx.run_id,
            file: file.path.clone(),
            filename: payload.filename,
            collection: payload.collection,
            doc_type: payload.doc_type,
            tier: file.tier,
            batch_index,
            batch_count,
            chunks: payload.chunks,
            payload_digest: payload_digest(chunks),
            status,
            response: body,
            user: ctx.user.to_string(),
            at: chrono::Utc::now(),
        };
        if !call.is_success() {
            warn!(
                file = %call.filename,
                batch = batch_index,
                status = ?call.status,
                response = %call.response,
                "ingest call failed"
            );
        }

        let result = self.audit.append_with(call, CallResult::from_entry);

        let n = ctx.completed.fetch_add(1, Ordering::SeqCst) + 1;
        self.progress.report(DispatchProgressEvent::Called {
            filename: result.filename.clone(),
            tier: result.tier,
            batch: batch_index,
            batches: batch_count,
            status: result.status,
            n,
            total: ctx.total_calls,
        });
        result
    }
}

/// Entry point for `relay ingest`: unpack an archive and dispatch (or plan) its files.
///
/// `preview` prints the start of every chunk in the dry-run listing.
#[allow(clippy::too_many_arguments)]
pub async fn run_ingest(
    config: &Config,
    archive: &Path,
    collection: &str,
    doc_type: &str,
    user: Option<&str>,
    dry_run: bool,
    preview: bool,
    progress: ProgressMode,
) -> anyhow::Result<()> {
    let bytes = std::fs::read(archive)
        .with_context(|| format!("Failed to read archive: {}", archive.display()))?;
    let unpacked = UnpackedArchive::unpack(&bytes, &config.archive)?;
    if unpacked.files().is_empty() {
        anyhow::bail!("archive {} contains no files", archive.display());
    }

    let config = Arc::new(config.clone());
    let remote = Arc::new(HttpRemoteIndex::new(&config.remote)?);
    let audit = Arc::new(AuditLog::from_config(&config.audit));
    let dispatcher = Dispatcher::new(config.clone(), remote, audit)
        .with_progress(Arc::from(progress.reporter()));

    if dry_run {
        let plan = dispatcher.plan(unpacked.files()).await;
        println!("ingest {} (dry-run)", archive.display());
        for file in &plan.files {
            let name = file.file.strip_prefix(unpacked.root()).unwrap_or(&file.file);
            match &file.skipped {
                Some(reason) => println!("  {}  skipped: {}", name.display(), reason),
                None => println!(
                    "  {}  {}  {} chars  {} chunks  {} call(s)",
                    name.display(),
                    file.tier,
                    file.chars,
                    file.chunks,
                    file.calls
                ),
            }
            if preview {
                for (index, text) in file.previews.iter().enumerate() {
                    println!("    [{}] {}", index, text);
                }
            }
        }
        let extensions: Vec<String> = plan
            .extensions
            .iter()
            .map(|(ext, count)| format!("{}={}", ext, count))
            .collect();
        println!("  extensions: {}", extensions.join(" "));
        println!(
            "  files: {}  chunks: {}  calls planned: {}",
            plan.files.len(),
            plan.total_chunks(),
            plan.total_calls()
        );
        return Ok(());
    }

    let request = DispatchRequest {
        files: unpacked.files().to_vec(),
        collection: collection.to_string(),
        doc_type: doc_type.to_string(),
        user: user
            .map(str::to_string)
            .unwrap_or_else(|| config.audit.default_user.clone()),
    };
    let report = dispatcher.dispatch(request).await?;

    println!("ingest {} (run {})", archive.display(), report.run_id);
    for call in &report.calls {
        let status = call
            .status
            .map(|s| s.to_string())
            .unwrap_or_else(|| "error".to_string());
        println!(
            "  {}  {}  {} [{}/{}]  {} chunks  {}",
            call.entry_id,
            call.filename,
            call.tier,
            call.batch_index + 1,
            call.batch_count,
            call.chunk_count,
            status
        );
    }
    for skipped in &report.skipped {
        let name = skipped
            .file
            .strip_prefix(unpacked.root())
            .unwrap_or(&skipped.file);
        println!("  skipped {}: {}", name.display(), skipped.reason);
    }
    println!(
        "  calls: {}  succeeded: {}  failed: {}  skipped files: {}",
        report.calls.len(),
        report.succeeded(),
        report.failed(),
        report.skipped.len()
    );

    if report.failed() > 0 {
        anyhow::bail!("{} of {} calls failed", report.failed(), report.calls.len());
    }
    Ok(())
}

fn filename_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}

/// SHA-256 over the chunk hashes of one payload.
fn payload_digest(chunks: &[Chunk]) -> String {
    let mut hasher = Sha256::new();
    for chunk in chunks {
        hasher.update(chunk.hash.as_bytes());
    }
    format!("{:x}", hasher.finalize())
}
