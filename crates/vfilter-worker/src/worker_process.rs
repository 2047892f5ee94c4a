//! Chunk-worker mode: process one chunk request from stdin.
//!
//! Stdout carries only protocol messages; logs go to stderr.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{error, info};
use vfilter_media::{FfmpegMedia, MediaTimeouts};
use vfilter_models::{Stage, StageProgress};
use vfilter_separation::VocalSeparator;

use crate::error::{ErrorKind, WorkerError, WorkerResult};
use crate::progress::StageReporter;
use crate::unit::{UnitProcessor, UnitTask};

/// First argument selecting chunk-worker mode.
pub const CHUNK_WORKER_ARG: &str = "chunk-worker";

/// Request sent to a chunk worker on stdin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkWorkRequest {
    pub task: UnitTask,
    pub model_dir: PathBuf,
    pub work_dir: PathBuf,
    pub timeouts: MediaTimeouts,
}

/// One line of chunk-worker output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerMessage {
    Progress {
        event: StageProgress,
    },
    Completed {
        output: PathBuf,
    },
    Failed {
        kind: ErrorKind,
        stage: Option<Stage>,
        message: String,
        diagnostics: Option<String>,
    },
}

impl WorkerMessage {
    pub fn failed(err: &WorkerError) -> Self {
        WorkerMessage::Failed {
            kind: err.kind(),
            stage: err.stage(),
            message: err.to_string(),
            diagnostics: err.diagnostics().map(str::to_string),
        }
    }
}

/// Entry point for `<binary> chunk-worker`.
///
/// The separation model is loaded inside this process, so each chunk
/// worker owns its accelerator context.
pub async fn run_chunk_worker() -> WorkerResult<()> {
    serve(tokio::io::stdin(), tokio::io::stdout(), |request| {
        UnitProcessor::new(
            Arc::new(FfmpegMedia::new(request.timeouts)),
            VocalSeparator::with_model_dir(&request.model_dir),
            &request.work_dir,
        )
    })
    .await
}

/// Read one request from `input`, process it and stream messages to `output`.
///
/// Processing failures are reported as a `failed` message, not returned.
pub async fn serve<R, W, F>(mut input: R, mut output: W, build: F) -> WorkerResult<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
    F: FnOnce(&ChunkWorkRequest) -> UnitProcessor,
{
    let mut raw = Vec::new();
    input.read_to_end(&mut raw).await?;
    let request: ChunkWorkRequest = serde_json::from_slice(&raw)
        .map_err(|e| WorkerError::validation("Malformed chunk request", Some(e.to_string())))?;

    let processor = build(&request);
    let chunk = request.task.unit.index;
    info!(job_id = %request.task.job_id, chunk, "Chunk worker started");

    let (tx, mut rx) = mpsc::unbounded_channel::<WorkerMessage>();

    let work = async move {
        let progress_tx = tx.clone();
        let reporter = StageReporter::from_fn(move |event| {
            let _ = progress_tx.send(WorkerMessage::Progress { event });
        });

        let message = match processor.process(&request.task, &reporter).await {
            Ok(path) => WorkerMessage::Completed { output: path },
            Err(e) => {
                error!(chunk, "Chunk failed: {}", e);
                WorkerMessage::failed(&e)
            }
        };
        drop(reporter);
        let _ = tx.send(message);
    };

    let write = async {
        while let Some(message) = rx.recv().await {
            let mut line = serde_json::to_vec(&message)
                .map_err(|e| WorkerError::internal(format!("Failed to encode message: {}", e)))?;
            line.push(b'\n');
            output.write_all(&line).await?;
            output.flush().await?;
        }
        Ok::<(), WorkerError>(())
    };

    let ((), written) = tokio::join!(work, write);
    written
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{fake_separator, fake_video, FakeMedia};
    use crate::unit::UnitSettings;
    use tempfile::TempDir;
    use vfilter_models::{DeviceSpec, JobId, MediaUnit, WatermarkMode};

    fn request(dir: &TempDir, label: &str) -> ChunkWorkRequest {
        let input = fake_video(dir.path(), "in_chunk_001.mp4", label);
        ChunkWorkRequest {
            task: UnitTask {
                job_id: JobId::from_string("job-7"),
                unit: MediaUnit::chunk(input, 30.0, 1),
                output: dir.path().join("processed_001.mp4"),
                settings: UnitSettings {
                    device: DeviceSpec::Cpu,
                    model: "htdemucs".to_string(),
                    audio_bitrate: "192k".to_string(),
                    watermark: WatermarkMode::Off,
                },
            },
            model_dir: dir.path().join("models"),
            work_dir: dir.path().join("work"),
            timeouts: MediaTimeouts::default(),
        }
    }

    fn messages(out: &[u8]) -> Vec<WorkerMessage> {
        String::from_utf8_lossy(out)
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_serve_streams_progress_then_completion() {
        let dir = TempDir::new().unwrap();
        let req = request(&dir, "chunk001");
        let input = serde_json::to_vec(&req).unwrap();
        let mut out = Vec::new();

        serve(input.as_slice(), &mut out, |r| {
            UnitProcessor::new(Arc::new(FakeMedia::with_duration(30.0)), fake_separator(), &r.work_dir)
        })
        .await
        .unwrap();

        let msgs = messages(&out);
        assert!(matches!(msgs.first(), Some(WorkerMessage::Progress { .. })));
        assert_eq!(
            msgs.last(),
            Some(&WorkerMessage::Completed {
                output: req.task.output.clone()
            })
        );
        assert!(req.task.output.exists());
    }

    #[tokio::test]
    async fn test_serve_reports_failure_as_message() {
        let dir = TempDir::new().unwrap();
        let req = request(&dir, "chunk001");
        let input = serde_json::to_vec(&req).unwrap();
        let mut out = Vec::new();

        serve(input.as_slice(), &mut out, |r| {
            let media = FakeMedia {
                duration: 30.0,
                fail_remux: Some("chunk001".to_string()),
                ..Default::default()
            };
            UnitProcessor::new(Arc::new(media), fake_separator(), &r.work_dir)
        })
        .await
        .unwrap();

        match messages(&out).pop() {
            Some(WorkerMessage::Failed {
                kind,
                stage,
                diagnostics,
                ..
            }) => {
                assert_eq!(kind, ErrorKind::MediaOperationFailure);
                assert_eq!(stage, Some(Stage::RemuxVideo));
                assert_eq!(diagnostics.as_deref(), Some("Conversion failed!"));
            }
            other => panic!("expected failure message, got {:?}", other),
        }
        assert!(!req.task.output.exists());
    }

    #[tokio::test]
    async fn test_malformed_request_rejected() {
        let mut out = Vec::new();
        let err = serve(&b"not json"[..], &mut out, |r| {
            UnitProcessor::new(Arc::new(FakeMedia::default()), fake_separator(), &r.work_dir)
        })
        .await
        .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::ValidationFailure);
        assert!(out.is_empty());
    }
}
