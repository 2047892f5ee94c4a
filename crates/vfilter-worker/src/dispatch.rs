//! Chunk dispatch: sequential or bounded-parallel, in-process or in child processes.

use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::{watch, Semaphore};
use tracing::{debug, info, warn};
use vfilter_media::{next_lossy_line, MediaTimeouts};
use vfilter_models::{Stage, StageDetail};
use vfilter_separation::Device;

use crate::error::{ErrorKind, WorkerError, WorkerResult};
use crate::metrics;
use crate::progress::StageReporter;
use crate::unit::{UnitProcessor, UnitTask};
use crate::worker_process::{ChunkWorkRequest, WorkerMessage, CHUNK_WORKER_ARG};

/// Maximum stderr lines kept from a failed chunk worker.
const STDERR_TAIL_LINES: usize = 40;

/// How concurrently processed chunks are isolated from each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IsolationMode {
    /// Child processes when running in parallel on an accelerator, else shared
    #[default]
    Auto,
    /// Tasks in this process sharing one model cache
    Shared,
    /// One fresh child process per chunk
    Process,
}

impl IsolationMode {
    /// Pick the concrete mode for a job.
    ///
    /// Concurrent chunks on an accelerator always get their own process.
    pub fn resolve(self, device: Device, parallelism: usize) -> IsolationMode {
        let concurrent_accelerator = device.is_accelerator() && parallelism > 1;
        match self {
            IsolationMode::Auto if concurrent_accelerator => IsolationMode::Process,
            IsolationMode::Auto => IsolationMode::Shared,
            IsolationMode::Shared if concurrent_accelerator => {
                warn!(%device, parallelism, "Shared isolation cannot run concurrent accelerator chunks, using processes");
                IsolationMode::Process
            }
            other => other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            IsolationMode::Auto => "auto",
            IsolationMode::Shared => "shared",
            IsolationMode::Process => "process",
        }
    }
}

impl fmt::Display for IsolationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IsolationMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(IsolationMode::Auto),
            "shared" | "thread" => Ok(IsolationMode::Shared),
            "process" => Ok(IsolationMode::Process),
            other => Err(format!("unknown isolation mode '{}' (expected auto, shared or process)", other)),
        }
    }
}

/// Runs one chunk task to completion.
#[async_trait]
pub trait ChunkExecutor: Send + Sync {
    async fn execute(&self, task: UnitTask, reporter: StageReporter) -> WorkerResult<PathBuf>;
}

/// Runs chunks on this process's runtime with a shared model cache.
#[derive(Clone)]
pub struct InProcessExecutor {
    processor: UnitProcessor,
}

impl InProcessExecutor {
    pub fn new(processor: UnitProcessor) -> Self {
        Self { processor }
    }
}

#[async_trait]
impl ChunkExecutor for InProcessExecutor {
    async fn execute(&self, task: UnitTask, reporter: StageReporter) -> WorkerResult<PathBuf> {
        self.processor.process(&task, &reporter).await
    }
}

/// Runs each chunk in a freshly started child process.
///
/// The child receives one [`ChunkWorkRequest`] as JSON on stdin and answers
/// with newline-delimited [`WorkerMessage`]s on stdout. Its accelerator
/// context is created after it starts; nothing is inherited from this process.
#[derive(Debug, Clone)]
pub struct ProcessPoolExecutor {
    program: PathBuf,
    args: Vec<String>,
    model_dir: PathBuf,
    work_dir: PathBuf,
    timeouts: MediaTimeouts,
}

impl ProcessPoolExecutor {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>, model_dir: PathBuf, work_dir: PathBuf, timeouts: MediaTimeouts) -> Self {
        Self {
            program: program.into(),
            args,
            model_dir,
            work_dir,
            timeouts,
        }
    }

    /// Re-run the current executable in chunk-worker mode.
    pub fn current_exe(model_dir: PathBuf, work_dir: PathBuf, timeouts: MediaTimeouts) -> WorkerResult<Self> {
        let program = std::env::current_exe()?;
        Ok(Self::new(program, vec![CHUNK_WORKER_ARG.to_string()], model_dir, work_dir, timeouts))
    }

    /// Directory children create their scratch workspaces in.
    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }
}

#[async_trait]
impl ChunkExecutor for ProcessPoolExecutor {
    async fn execute(&self, task: UnitTask, reporter: StageReporter) -> WorkerResult<PathBuf> {
        let chunk = task.chunk_index();
        let request = ChunkWorkRequest {
            task,
            model_dir: self.model_dir.clone(),
            work_dir: self.work_dir.clone(),
            timeouts: self.timeouts,
        };
        let mut payload = serde_json::to_vec(&request)
            .map_err(|e| WorkerError::internal(format!("Failed to encode chunk request: {}", e)))?;
        payload.push(b'\n');

        debug!(program = %self.program.display(), chunk = ?chunk, "Spawning chunk worker");
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // Ctrl-C reaches only this process; dispatched chunks run to completion
        #[cfg(unix)]
        command.process_group(0);
        let mut child = command.spawn()?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| WorkerError::internal("Chunk worker stdin not captured"))?;
        // A child that dies before reading is reported through its exit status
        if let Err(e) = stdin.write_all(&payload).await {
            debug!(chunk = ?chunk, "Failed to send chunk request: {}", e);
        }
        drop(stdin);

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| WorkerError::internal("Chunk worker stdout not captured"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| WorkerError::internal("Chunk worker stderr not captured"))?;

        let stderr_handle = tokio::spawn(async move {
            let mut reader = BufReader::new(stderr);
            let mut tail: VecDeque<String> = VecDeque::with_capacity(STDERR_TAIL_LINES);
            while let Some(line) = next_lossy_line(&mut reader).await {
                if tail.len() == STDERR_TAIL_LINES {
                    tail.pop_front();
                }
                tail.push_back(line);
            }
            tail.into_iter().collect::<Vec<_>>().join("\n")
        });

        let mut terminal: Option<WorkerMessage> = None;
        let mut lines = BufReader::new(stdout).lines();
        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<WorkerMessage>(&line) {
                Ok(WorkerMessage::Progress { event }) => reporter.report(event),
                Ok(message) => terminal = Some(message),
                Err(e) => debug!(chunk = ?chunk, "Ignoring non-protocol line from chunk worker: {}", e),
            }
        }

        let status = child.wait().await?;
        let stderr_tail = stderr_handle.await.unwrap_or_default();
        let stderr_tail = (!stderr_tail.trim().is_empty()).then_some(stderr_tail);

        match terminal {
            Some(WorkerMessage::Completed { output }) if status.success() => Ok(output),
            Some(WorkerMessage::Failed {
                kind,
                stage,
                message,
                diagnostics,
            }) => {
                let err = WorkerError::WorkerProcess {
                    kind,
                    message,
                    stderr: diagnostics.or(stderr_tail),
                };
                Err(match stage {
                    Some(stage) => err.in_stage(stage, chunk),
                    None => err,
                })
            }
            _ => Err(WorkerError::WorkerProcess {
                kind: ErrorKind::Internal,
                message: format!("chunk worker exited with {} without reporting completion", status),
                stderr: stderr_tail,
            }),
        }
    }
}

/// Drives chunk tasks through an executor with bounded concurrency.
pub struct ChunkDispatcher {
    executor: Arc<dyn ChunkExecutor>,
    parallelism: usize,
}

impl ChunkDispatcher {
    pub fn new(executor: Arc<dyn ChunkExecutor>, parallelism: usize) -> Self {
        Self {
            executor,
            parallelism: parallelism.max(1),
        }
    }

    /// Process every task and return outputs in task order.
    ///
    /// "Process Chunks" advances by `completed / total` after each chunk.
    /// When `cancel` turns true no further chunks are started; chunks already
    /// running finish and the job fails with `Cancelled`.
    pub async fn run(
        &self,
        tasks: Vec<UnitTask>,
        reporter: &StageReporter,
        cancel: Option<watch::Receiver<bool>>,
    ) -> WorkerResult<Vec<PathBuf>> {
        reporter.start(Stage::ProcessChunks);
        let result = if self.parallelism == 1 {
            self.run_sequential(tasks, reporter, cancel).await
        } else {
            self.run_parallel(tasks, reporter, cancel).await
        };
        if result.is_ok() {
            reporter.complete(Stage::ProcessChunks);
        }
        result
    }

    async fn run_sequential(
        &self,
        tasks: Vec<UnitTask>,
        reporter: &StageReporter,
        cancel: Option<watch::Receiver<bool>>,
    ) -> WorkerResult<Vec<PathBuf>> {
        let total = tasks.len();
        let tracker = CompletionTracker::new(total, reporter.clone());
        let mut outputs = Vec::with_capacity(total);

        for (position, task) in tasks.into_iter().enumerate() {
            if is_cancelled(&cancel) {
                info!(dispatched = position, total, "Cancellation requested, not dispatching further chunks");
                return Err(WorkerError::Cancelled);
            }

            info!("Processing chunk {}/{}", position + 1, total);
            let index = task.unit.index;
            let output = self
                .executor
                .execute(task, chunk_reporter(index))
                .await
                .map_err(|e| {
                    metrics::record_chunk_failed();
                    e.in_chunk(index, total)
                })?;
            tracker.chunk_done();
            outputs.push(output);
        }

        Ok(outputs)
    }

    async fn run_parallel(
        &self,
        tasks: Vec<UnitTask>,
        reporter: &StageReporter,
        cancel: Option<watch::Receiver<bool>>,
    ) -> WorkerResult<Vec<PathBuf>> {
        let total = tasks.len();
        let tracker = Arc::new(CompletionTracker::new(total, reporter.clone()));
        let semaphore = Arc::new(Semaphore::new(self.parallelism));
        let mut handles = Vec::with_capacity(total);
        let mut cancelled = false;

        info!(total, parallelism = self.parallelism, "Dispatching chunks in parallel");

        // Permits are taken in index order, so chunks start in index order
        for task in tasks {
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|e| WorkerError::internal(format!("Chunk semaphore closed: {}", e)))?;

            if is_cancelled(&cancel) {
                info!(dispatched = handles.len(), total, "Cancellation requested, not dispatching further chunks");
                cancelled = true;
                break;
            }

            let index = task.unit.index;
            let executor = self.executor.clone();
            let tracker = tracker.clone();
            debug!(chunk = index, "Starting chunk");
            let handle = tokio::spawn(async move {
                let _permit = permit;
                let result = executor.execute(task, chunk_reporter(index)).await;
                if result.is_ok() {
                    tracker.chunk_done();
                }
                result
            });
            handles.push((index, handle));
        }

        // Wait for every dispatched chunk before deciding the outcome
        let (indices, handles): (Vec<usize>, Vec<_>) = handles.into_iter().unzip();
        let joined = join_all(handles).await;

        let mut outputs = Vec::with_capacity(joined.len());
        let mut first_failure: Option<WorkerError> = None;
        for (index, joined) in indices.into_iter().zip(joined) {
            let result = match joined {
                Ok(result) => result,
                Err(e) => Err(WorkerError::internal(format!("Chunk task panicked: {}", e))),
            };
            match result {
                Ok(output) => outputs.push(output),
                Err(e) => {
                    metrics::record_chunk_failed();
                    warn!(chunk = index, "Chunk failed: {}", e);
                    if first_failure.is_none() {
                        first_failure = Some(e.in_chunk(index, total));
                    }
                }
            }
        }

        if let Some(err) = first_failure {
            return Err(err);
        }
        if cancelled {
            return Err(WorkerError::Cancelled);
        }
        Ok(outputs)
    }
}

fn is_cancelled(cancel: &Option<watch::Receiver<bool>>) -> bool {
    cancel.as_ref().map(|rx| *rx.borrow()).unwrap_or(false)
}

/// Chunk-internal stage events are logged, not forwarded to the job sink.
fn chunk_reporter(index: usize) -> StageReporter {
    StageReporter::from_fn(move |event| {
        debug!(chunk = index, stage = %event.stage, percent = event.percent, "Chunk progress");
    })
}

/// Emits "Process Chunks" progress as chunks finish.
struct CompletionTracker {
    total: usize,
    done: AtomicUsize,
    started: Instant,
    reporter: StageReporter,
}

impl CompletionTracker {
    fn new(total: usize, reporter: StageReporter) -> Self {
        Self {
            total,
            done: AtomicUsize::new(0),
            started: Instant::now(),
            reporter,
        }
    }

    fn chunk_done(&self) {
        let done = self.done.fetch_add(1, Ordering::SeqCst) + 1;
        let total = self.total.max(1);
        let elapsed = self.started.elapsed().as_secs_f64();
        let rate = if elapsed > 0.0 { done as f64 / elapsed } else { 0.0 };
        let remaining = if rate > 0.0 { (total - done.min(total)) as f64 / rate } else { 0.0 };

        let percent = ((done * 100) / total).min(100) as u8;
        info!(completed = done, total, "Chunk completed");
        self.reporter.percent_with_detail(
            Stage::ProcessChunks,
            percent,
            StageDetail {
                elapsed_seconds: Some(elapsed),
                remaining_seconds: Some(remaining),
                rate: Some(rate),
                ..StageDetail::units(done as f64, total as f64)
            },
        );
    }
}
