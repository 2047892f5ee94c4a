//! Music removal worker.
//!
//! This crate provides:
//! - Single-unit processing (extract audio, isolate vocals, remux)
//! - Chunk planning and the chunking orchestrator
//! - Sequential and parallel chunk dispatch, in-process or in child processes
//! - Stage progress reporting and caller-side aggregation
//! - Configuration, structured logging and metrics

pub mod chunking;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod orchestrator;
pub mod progress;
pub mod unit;
pub mod worker_process;

#[cfg(test)]
pub(crate) mod testing;

pub use chunking::ChunkPolicy;
pub use config::WorkerConfig;
pub use dispatch::{ChunkDispatcher, ChunkExecutor, InProcessExecutor, IsolationMode, ProcessPoolExecutor};
pub use error::{ErrorKind, WorkerError, WorkerResult};
pub use logging::{init_tracing, JobLogger};
pub use orchestrator::Orchestrator;
pub use progress::{ProgressAggregator, ProgressSink, StageReporter, StageWeights};
pub use unit::{UnitProcessor, UnitSettings, UnitTask};
pub use worker_process::{run_chunk_worker, ChunkWorkRequest, WorkerMessage, CHUNK_WORKER_ARG};
