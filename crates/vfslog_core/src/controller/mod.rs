//! Compaction scheduling and failure handling.
//!
//! The [`CompactionController`] owns the engine directory, the current
//! [`OperationMode`] and, in [`OperationMode::CompactData`], the compacted
//! model. Each pass shrinks the operation log to the configured target size:
//!
//! 1. pick a target position (see `target::select_target`)
//! 2. find how far the payload store can follow (`target::payload_floor`)
//! 3. in `CompactData`, fold the log range into the compacted model
//! 4. truncate the log and the payload store
//!
//! A compaction failure other than cancellation demotes the controller to
//! [`OperationMode::Corrupted`], after which data is dropped like in
//! [`OperationMode::DropData`] until the mode is reset.

mod mode;
mod signal;
mod target;

pub use mode::OperationMode;

use crate::compaction::CompactedVfsModel;
use crate::config::CompactionConfig;
use crate::dir::EngineDir;
use crate::error::{CoreError, CoreResult};
use crate::oplog::OperationLog;
use crate::payload::PayloadStore;
use crate::snapshot::CompactedVfsSnapshot;
use crate::stats::CompactionStats;
use crate::types::CompactionPosition;
use parking_lot::Mutex;
use signal::JobSignal;
use std::path::Path;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, warn};

/// Outcome of one [`CompactionController::run_pass`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassOutcome {
    /// Compaction steps that succeeded.
    pub compactions: usize,
    /// Log truncations performed.
    pub truncations: usize,
    /// Mode after the pass.
    pub mode: OperationMode,
}

struct Context {
    mode: OperationMode,
    model: Option<CompactedVfsModel>,
}

struct Shared {
    config: CompactionConfig,
    dir: Arc<EngineDir>,
    log: Arc<dyn OperationLog>,
    payloads: Arc<dyn PayloadStore>,
    context: Mutex<Context>,
    signal: JobSignal,
    stats: CompactionStats,
}

/// Keeps the operation log bounded, compacting truncated data when enabled.
///
/// # Thread Safety
///
/// Passes and snapshot queries are serialized by a single context lock. At
/// most one background job runs at a time.
pub struct CompactionController {
    shared: Arc<Shared>,
    job: Mutex<Option<JoinHandle<()>>>,
}

impl CompactionController {
    /// Opens the engine in `path`.
    ///
    /// The persisted mode is restored; without one the controller starts in
    /// [`OperationMode::DropData`]. If the compacted model cannot be opened
    /// the controller starts demoted to [`OperationMode::Corrupted`].
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::EngineLocked`] if another process uses the
    /// directory, or an I/O error.
    pub fn open(
        path: &Path,
        log: Arc<dyn OperationLog>,
        payloads: Arc<dyn PayloadStore>,
        config: CompactionConfig,
    ) -> CoreResult<Self> {
        let dir = Arc::new(EngineDir::open(path)?);
        let mut mode = match dir.read_mode() {
            Ok(None) => OperationMode::default(),
            Ok(Some(value)) => OperationMode::from_i32(value).unwrap_or_else(|| {
                warn!(value, "unknown operation mode, treating as corrupted");
                OperationMode::Corrupted
            }),
            Err(e @ CoreError::InvalidFormat { .. }) => {
                warn!(error = %e, "unreadable operation mode, treating as corrupted");
                OperationMode::Corrupted
            }
            Err(e) => return Err(e),
        };

        let mut model = None;
        if mode.compacts() {
            match CompactedVfsModel::open(Arc::clone(&dir), &config) {
                Ok(opened) => model = Some(opened),
                Err(e) => {
                    error!(error = %e, "failed to open compacted model");
                    mode = OperationMode::Corrupted;
                    if !config.read_only {
                        persist_mode(&dir, mode);
                    }
                }
            }
        }
        info!(path = %path.display(), %mode, "compaction controller opened");

        Ok(Self {
            shared: Arc::new(Shared {
                config,
                dir,
                log,
                payloads,
                context: Mutex::new(Context { mode, model }),
                signal: JobSignal::new(),
                stats: CompactionStats::new(),
            }),
            job: Mutex::new(None),
        })
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &CompactionConfig {
        &self.shared.config
    }

    /// Returns the engine directory.
    #[must_use]
    pub fn dir(&self) -> &EngineDir {
        &self.shared.dir
    }

    /// Returns the current mode.
    #[must_use]
    pub fn mode(&self) -> OperationMode {
        self.shared.context.lock().mode
    }

    /// Returns the compacted position, if a model is open.
    #[must_use]
    pub fn compacted_position(&self) -> Option<CompactionPosition> {
        self.shared
            .context
            .lock()
            .model
            .as_ref()
            .map(CompactedVfsModel::position)
    }

    /// Returns the statistics.
    #[must_use]
    pub fn stats(&self) -> &CompactionStats {
        &self.shared.stats
    }

    /// Switches to `mode`, discarding all compacted data.
    ///
    /// The model files are deleted and the new mode is persisted before a
    /// fresh model is opened, so the change survives a restart even if it is
    /// interrupted. If any step fails the controller is demoted to
    /// [`OperationMode::Corrupted`].
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidOperation`] in read-only mode, or an I/O
    /// error.
    pub fn set_mode(&self, mode: OperationMode) -> CoreResult<()> {
        if self.shared.config.read_only {
            return Err(CoreError::invalid_operation(
                "cannot change the operation mode of a read-only engine",
            ));
        }
        let shared = &self.shared;
        let mut ctx = shared.context.lock();
        let previous = ctx.mode;

        ctx.model = None;
        if let Err(e) = shared.reset_model(&mut ctx, mode) {
            shared.demote(&mut ctx, &e);
            return Err(e);
        }

        info!(%previous, %mode, "operation mode changed, compacted data reset");
        Ok(())
    }

    /// Runs one pass in the calling thread.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Cancelled`] if the controller was cancelled, or
    /// an error if the log or payload store cannot be read or truncated.
    /// Compaction failures do not surface here; they demote the mode.
    pub fn run_pass(&self) -> CoreResult<PassOutcome> {
        self.shared.run_pass()
    }

    /// Runs `f` against a snapshot of the latest compacted state.
    ///
    /// Returns `None` if no compacted model is open.
    ///
    /// The query holds the context lock, so it waits for a running pass to
    /// finish and always sees a fully persisted state. A pass ends by
    /// deleting the blocks of the state it replaced, so the prior state is
    /// not readable while a pass runs.
    pub fn with_latest_snapshot<R>(&self, f: impl FnOnce(&CompactedVfsSnapshot<'_>) -> R) -> Option<R> {
        let ctx = self.shared.context.lock();
        ctx.model.as_ref().map(|model| f(&model.snapshot()))
    }

    /// Starts the background job.
    ///
    /// Returns false without starting anything if the engine is read-only,
    /// disposed, or a job is already running. Starting clears a previous
    /// [`cancel`](Self::cancel).
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the thread cannot be spawned.
    pub fn start(&self) -> CoreResult<bool> {
        if self.shared.config.read_only || self.shared.signal.is_disposed() {
            return Ok(false);
        }
        let mut job = self.job.lock();
        if job.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return Ok(false);
        }

        self.shared.signal.reset();
        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name("vfslog-compaction".into())
            .spawn(move || shared.run_job())?;
        *job = Some(handle);
        Ok(true)
    }

    /// Returns true while the background job is alive.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.job
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Cancels the running pass and stops the background job.
    pub fn cancel(&self) {
        self.shared.signal.cancel();
    }

    /// Stops the background job and waits for it to exit. Further passes
    /// fail with [`CoreError::Cancelled`].
    pub fn dispose(&self) {
        self.shared.signal.dispose();
        if let Some(handle) = self.job.lock().take() {
            if handle.join().is_err() {
                error!("compaction job panicked");
            }
        }
    }
}

impl Drop for CompactionController {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl std::fmt::Debug for CompactionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompactionController")
            .field("dir", &self.shared.dir.path())
            .field("mode", &self.mode())
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl Shared {
    fn is_cancelled(&self) -> bool {
        self.signal.is_cancelled()
    }

    fn run_job(&self) {
        info!(
            initial_delay_ms = self.config.initial_delay.as_millis() as u64,
            interval_ms = self.config.interval.as_millis() as u64,
            "compaction job started"
        );
        if self.signal.wait(self.config.initial_delay) {
            info!("compaction job stopped");
            return;
        }
        loop {
            match self.run_pass() {
                Ok(outcome) => debug!(
                    compactions = outcome.compactions,
                    truncations = outcome.truncations,
                    mode = %outcome.mode,
                    "compaction pass finished"
                ),
                Err(e) if e.is_cancellation() => {
                    info!("compaction job cancelled");
                    return;
                }
                Err(e) => error!(error = %e, "compaction pass failed"),
            }
            if self.signal.wait(self.config.interval) {
                info!("compaction job stopped");
                return;
            }
        }
    }

    fn run_pass(&self) -> CoreResult<PassOutcome> {
        let mut guard = self.context.lock();
        let ctx: &mut Context = &mut guard;
        self.stats.record_pass();

        let mut outcome = PassOutcome::default();
        let result = self.shrink_log(ctx, &mut outcome);
        outcome.mode = ctx.mode;
        match result {
            Ok(()) => Ok(outcome),
            Err(e) => {
                if e.is_cancellation() {
                    self.stats.record_cancellation();
                }
                Err(e)
            }
        }
    }

    fn shrink_log(&self, ctx: &mut Context, outcome: &mut PassOutcome) -> CoreResult<()> {
        let log = &*self.log;
        while log.size() > self.config.target_log_size {
            if self.is_cancelled() {
                return Err(CoreError::Cancelled);
            }

            let begin = log.begin();
            let start = match (&ctx.model, ctx.mode.compacts()) {
                (Some(model), true) => model.position().operation_log_position.max(begin),
                _ => begin,
            };
            let target = target::select_target(
                log,
                start,
                self.config.max_chunk_size,
                self.config.tail_threshold(),
            )?;
            if target <= begin {
                break;
            }
            let floor = target::payload_floor(log, target)?;

            if ctx.mode.compacts() {
                self.compact(ctx, target, floor, outcome)?;
            }

            log.truncate_before(target)?;
            if let Some(floor) = floor {
                if floor > self.payloads.begin() {
                    self.payloads.truncate_before(floor)?;
                }
            }
            self.stats.record_truncation(target - begin);
            outcome.truncations += 1;
            debug!(from = begin, to = target, payload_floor = ?floor, "operation log truncated");
        }
        Ok(())
    }

    fn reset_model(&self, ctx: &mut Context, mode: OperationMode) -> CoreResult<()> {
        self.dir.delete_model_files()?;
        self.dir.write_mode(mode.as_i32())?;
        ctx.mode = mode;
        if mode.compacts() {
            ctx.model = Some(CompactedVfsModel::open(
                Arc::clone(&self.dir),
                &self.config,
            )?);
        }
        Ok(())
    }

    fn compact(
        &self,
        ctx: &mut Context,
        target_log: u64,
        floor: Option<u64>,
        outcome: &mut PassOutcome,
    ) -> CoreResult<()> {
        if ctx.model.is_none() {
            let cause = CoreError::invalid_operation("compaction enabled without an open model");
            self.demote(ctx, &cause);
            return Ok(());
        }
        let Some(model) = ctx.model.as_mut() else {
            return Ok(());
        };
        let current = model.position();
        let target = CompactionPosition::new(
            target_log,
            floor
                .unwrap_or(current.payload_storage_position)
                .max(current.payload_storage_position),
        );

        let is_cancelled = || self.is_cancelled();
        match model.compact_up_to(target, &*self.log, &*self.payloads, &is_cancelled) {
            Ok(report) => {
                self.stats
                    .record_compaction(report.operations_replayed, report.reclaimed.bytes_reclaimed);
                outcome.compactions += 1;
                Ok(())
            }
            Err(e) if e.is_cancellation() => Err(e),
            Err(e) => {
                self.demote(ctx, &e);
                Ok(())
            }
        }
    }

    fn demote(&self, ctx: &mut Context, cause: &CoreError) {
        error!(error = %cause, "compaction failed, switching to corrupted mode");
        self.stats.record_failure();
        ctx.model = None;
        ctx.mode = OperationMode::Corrupted;
        persist_mode(&self.dir, ctx.mode);
    }
}

fn persist_mode(dir: &EngineDir, mode: OperationMode) {
    if let Err(e) = dir.write_mode(mode.as_i32()) {
        warn!(error = %e, %mode, "failed to persist operation mode");
    }
}
