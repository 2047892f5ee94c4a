//! Chunking orchestrator: one job from input file to output file.

use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn, Instrument};
use vfilter_media::{
    file_size_mb, move_file, remove_if_exists, same_file, validate_input_file, FfmpegMedia, MediaOps, MediaTimeouts,
    TransformProgress,
};
use vfilter_models::{ChunkPlan, JobReport, MediaUnit, ProcessingJob, Stage};
use vfilter_separation::VocalSeparator;

use crate::chunking::ChunkPolicy;
use crate::config::WorkerConfig;
use crate::dispatch::{ChunkDispatcher, ChunkExecutor, InProcessExecutor, IsolationMode, ProcessPoolExecutor};
use crate::error::{WorkerError, WorkerResult};
use crate::logging::JobLogger;
use crate::metrics;
use crate::progress::StageReporter;
use crate::unit::{UnitProcessor, UnitSettings, UnitTask};

/// Decides between monolithic and chunked processing and drives the job.
///
/// A job either leaves exactly one complete file at its output path or
/// fails without touching it.
pub struct Orchestrator {
    media: Arc<dyn MediaOps>,
    separator: VocalSeparator,
    policy: ChunkPolicy,
    isolation: IsolationMode,
    work_root: PathBuf,
    model_dir: PathBuf,
    timeouts: MediaTimeouts,
    executor: Option<Arc<dyn ChunkExecutor>>,
}

impl Orchestrator {
    /// FFmpeg media and ONNX Runtime separation configured from `config`.
    pub fn from_config(config: &WorkerConfig) -> Self {
        Self::new(
            config,
            Arc::new(FfmpegMedia::new(config.timeouts)),
            VocalSeparator::with_model_dir(&config.model_dir),
        )
    }

    pub fn new(config: &WorkerConfig, media: Arc<dyn MediaOps>, separator: VocalSeparator) -> Self {
        Self {
            media,
            separator,
            policy: config.chunk_policy,
            isolation: config.isolation,
            work_root: config.work_root(),
            model_dir: config.model_dir.clone(),
            timeouts: config.timeouts,
            executor: None,
        }
    }

    /// Run chunks through `executor` instead of picking one from the isolation mode.
    pub fn with_executor(mut self, executor: Arc<dyn ChunkExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Processor sharing this orchestrator's media backend and model cache.
    pub fn unit_processor(&self) -> UnitProcessor {
        UnitProcessor::new(self.media.clone(), self.separator.clone(), &self.work_root)
    }

    pub fn plan(&self, total_duration: f64, job: &ProcessingJob) -> ChunkPlan {
        self.policy.plan(total_duration, job.chunk_duration)
    }

    /// Run `job` to completion.
    pub async fn run(&self, job: &ProcessingJob, reporter: &StageReporter) -> WorkerResult<JobReport> {
        self.execute(job, reporter, None).await
    }

    /// Run `job`, dispatching no further chunks once `cancel` turns true.
    pub async fn run_with_cancel(
        &self,
        job: &ProcessingJob,
        reporter: &StageReporter,
        cancel: watch::Receiver<bool>,
    ) -> WorkerResult<JobReport> {
        self.execute(job, reporter, Some(cancel)).await
    }

    async fn execute(
        &self,
        job: &ProcessingJob,
        reporter: &StageReporter,
        cancel: Option<watch::Receiver<bool>>,
    ) -> WorkerResult<JobReport> {
        let logger = JobLogger::new(&job.id, "remove_music");
        let span = logger.create_span();
        let mut mode = "unplanned";

        let result = self
            .execute_inner(job, reporter, cancel, &logger, &mut mode)
            .instrument(span)
            .await;

        match &result {
            Ok(report) => {
                metrics::record_job_completed(&report.mode, report.elapsed_secs());
                let size = file_size_mb(&report.output).await.unwrap_or_default();
                logger.log_completion(&format!(
                    "{} ({:.1} MB, {} unit(s), {:.1}s)",
                    report.output.display(),
                    size,
                    report.unit_count,
                    report.elapsed_secs()
                ));
            }
            Err(e) => {
                metrics::record_job_failed(mode, e.kind().as_str());
                logger.log_error(&e.to_string());
                if let Some(diagnostics) = e.diagnostics() {
                    warn!(job_id = %job.id, "Diagnostics:\n{}", diagnostics);
                }
            }
        }
        result
    }

    async fn execute_inner(
        &self,
        job: &ProcessingJob,
        reporter: &StageReporter,
        cancel: Option<watch::Receiver<bool>>,
        logger: &JobLogger,
        mode: &mut &'static str,
    ) -> WorkerResult<JobReport> {
        let started_at = Utc::now();

        validate_input_file(&job.input).await?;
        if same_file(&job.input, &job.output).await {
            return Err(WorkerError::validation(
                "Output path must differ from the input",
                Some(job.output.display().to_string()),
            ));
        }
        self.check_prerequisites(job)?;

        let size = file_size_mb(&job.input).await.unwrap_or_default();
        logger.log_start(&format!("{} ({:.1} MB)", job.input.display(), size));

        let duration = self.media.probe_duration(&job.input).await?;
        match self.media.probe_audio(&job.input).await {
            Ok(audio) => info!(
                sample_rate = audio.sample_rate,
                channels = audio.channels,
                codec = %audio.codec,
                "Input audio stream"
            ),
            Err(e) => warn!("Could not probe input audio: {}", e),
        }

        let plan = self.plan(duration, job);
        *mode = plan.mode_label();
        logger.log_progress(&format!(
            "{:.1}s input, {} plan with {} unit(s)",
            duration,
            plan.mode_label(),
            plan.unit_count()
        ));

        match &plan {
            ChunkPlan::Monolithic => {
                if is_cancelled(&cancel) {
                    return Err(WorkerError::Cancelled);
                }
                let task = UnitTask {
                    job_id: job.id.clone(),
                    unit: MediaUnit::source(&job.input, duration),
                    output: job.output.clone(),
                    settings: UnitSettings::from_job(job),
                };
                self.unit_processor().process(&task, reporter).await?;
            }
            ChunkPlan::Chunked {
                chunk_duration,
                boundaries,
                ..
            } => {
                metrics::record_chunk_count(boundaries.len());
                let durations: Vec<f64> = boundaries.iter().map(|span| span.duration()).collect();
                self.run_chunked(job, duration, *chunk_duration, &durations, reporter, cancel)
                    .await?;
            }
        }

        Ok(JobReport {
            job_id: job.id.clone(),
            output: job.output.clone(),
            mode: plan.mode_label().to_string(),
            unit_count: plan.unit_count(),
            input_duration: duration,
            started_at,
            finished_at: Utc::now(),
        })
    }

    /// FFmpeg/FFprobe and the requested model must be usable before any work starts.
    fn check_prerequisites(&self, job: &ProcessingJob) -> WorkerResult<()> {
        self.media.ensure_available()?;
        self.separator.check_available(&job.model)?;
        Ok(())
    }

    async fn run_chunked(
        &self,
        job: &ProcessingJob,
        total_duration: f64,
        chunk_duration: f64,
        durations: &[f64],
        reporter: &StageReporter,
        cancel: Option<watch::Receiver<bool>>,
    ) -> WorkerResult<()> {
        tokio::fs::create_dir_all(&self.work_root).await?;
        let workspace = tempfile::Builder::new()
            .prefix("vfilter_job_")
            .tempdir_in(&self.work_root)?;
        let chunks_dir = workspace.path().join("chunks");
        let processed_dir = workspace.path().join("processed");
        tokio::fs::create_dir_all(&processed_dir).await?;

        // Split
        reporter.start(Stage::SplitVideo);
        let progress = TransformProgress::new(total_duration, reporter.stage_callback(Stage::SplitVideo));
        let chunk_paths = self
            .media
            .split(&job.input, &chunks_dir, chunk_duration, &progress)
            .await
            .map_err(|e| WorkerError::from(e).in_stage(Stage::SplitVideo, None))?;
        reporter.complete(Stage::SplitVideo);
        info!(chunks = chunk_paths.len(), chunk_duration, "Video split");

        if chunk_paths.len() != durations.len() {
            warn!(
                planned = durations.len(),
                produced = chunk_paths.len(),
                "Split produced a different chunk count than planned"
            );
        }

        let settings = UnitSettings::from_job(job);
        let (stem, ext) = name_parts(&job.input);
        let tasks: Vec<UnitTask> = chunk_paths
            .iter()
            .enumerate()
            .map(|(index, path)| UnitTask {
                job_id: job.id.clone(),
                unit: MediaUnit::chunk(path, durations.get(index).copied().unwrap_or(chunk_duration), index),
                output: processed_dir.join(format!("{}_processed_{:03}.{}", stem, index, ext)),
                settings: settings.clone(),
            })
            .collect();

        // Process
        let dispatcher = ChunkDispatcher::new(self.chunk_executor(job, workspace.path())?, job.parallelism);
        let processed = dispatcher.run(tasks, reporter, cancel).await?;

        // Concatenate in index order
        reporter.start(Stage::ConcatenateChunks);
        let joined = workspace.path().join(format!("{}_joined.{}", stem, ext));
        let progress = TransformProgress::new(total_duration, reporter.stage_callback(Stage::ConcatenateChunks));
        self.media
            .concatenate(&processed, &joined, &progress)
            .await
            .map_err(|e| WorkerError::from(e).in_stage(Stage::ConcatenateChunks, None))?;

        for path in &chunk_paths {
            if let Err(e) = remove_if_exists(path).await {
                warn!("Failed to remove chunk {}: {}", path.display(), e);
            }
        }

        move_file(&joined, &job.output)
            .await
            .map_err(|e| WorkerError::from(e).in_stage(Stage::ConcatenateChunks, None))?;
        reporter.complete(Stage::ConcatenateChunks);

        Ok(())
    }

    /// Executor for this job's chunks; child processes work inside `workspace`.
    fn chunk_executor(&self, job: &ProcessingJob, workspace: &Path) -> WorkerResult<Arc<dyn ChunkExecutor>> {
        if let Some(executor) = &self.executor {
            return Ok(executor.clone());
        }

        let device = self.separator.resolve_device(job.device);
        let isolation = self.isolation.resolve(device, job.parallelism);
        info!(%device, %isolation, parallelism = job.parallelism, "Selected chunk executor");

        Ok(match isolation {
            IsolationMode::Process => Arc::new(self.process_pool(workspace)?),
            IsolationMode::Auto | IsolationMode::Shared => Arc::new(InProcessExecutor::new(self.unit_processor())),
        })
    }

    fn process_pool(&self, workspace: &Path) -> WorkerResult<ProcessPoolExecutor> {
        ProcessPoolExecutor::current_exe(self.model_dir.clone(), workspace.to_path_buf(), self.timeouts)
    }
}

fn is_cancelled(cancel: &Option<watch::Receiver<bool>>) -> bool {
    cancel.as_ref().map(|rx| *rx.borrow()).unwrap_or(false)
}

/// File stem and extension used to name chunk artifacts.
fn name_parts(input: &Path) -> (String, String) {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "input".to_string());
    let ext = input
        .extension()
        .map(|e| e.to_string_lossy().into_owned())
        .unwrap_or_else(|| "mp4".to_string());
    (stem, ext)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::progress::{ProgressAggregator, StageWeights};
    use crate::testing::{fake_separator, fake_video, FakeMedia};
    use std::collections::HashMap;
    use std::sync::Mutex;
    use tempfile::TempDir;
    use vfilter_models::{DeviceSpec, StageProgress};

    struct Harness {
        dir: TempDir,
        media: Arc<FakeMedia>,
        orchestrator: Orchestrator,
    }

    impl Harness {
        fn new(media: FakeMedia) -> Self {
            let dir = TempDir::new().unwrap();
            let config = WorkerConfig {
                work_dir: Some(dir.path().join("work")),
                ..Default::default()
            };
            let media = Arc::new(media);
            let orchestrator = Orchestrator::new(&config, media.clone(), fake_separator());
            Self {
                dir,
                media,
                orchestrator,
            }
        }

        fn job(&self) -> ProcessingJob {
            let input = fake_video(self.dir.path(), "talk.mp4", "source");
            ProcessingJob::new(input, self.dir.path().join("talk_filtered.mp4")).with_device(DeviceSpec::Cpu)
        }

        fn leftover_workspaces(&self) -> usize {
            match std::fs::read_dir(self.dir.path().join("work")) {
                Ok(entries) => entries.count(),
                Err(_) => 0,
            }
        }
    }

    fn recording() -> (Arc<Mutex<Vec<StageProgress>>>, StageReporter) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        (seen, StageReporter::from_fn(move |e| sink.lock().unwrap().push(e)))
    }

    #[tokio::test]
    async fn test_short_input_runs_monolithic() {
        let h = Harness::new(FakeMedia::with_duration(600.0));
        let job = h.job();
        let (seen, reporter) = recording();

        let report = h.orchestrator.run(&job, &reporter).await.unwrap();

        assert_eq!(report.mode, "monolithic");
        assert_eq!(report.unit_count, 1);
        assert_eq!(std::fs::read_to_string(&job.output).unwrap(), "source+0.40\n");
        assert!(h.media.calls().iter().all(|c| !c.starts_with("split")));
        assert!(seen.lock().unwrap().iter().all(|e| Stage::UNIT_STAGES.contains(&e.stage)));
        assert_eq!(h.leftover_workspaces(), 0);
        assert!(job.input.exists());
    }

    #[tokio::test]
    async fn test_forced_chunks_concatenate_in_order() {
        let h = Harness::new(FakeMedia::with_duration(300.0));
        let job = h.job().with_chunk_duration(Some(120.0));
        let (seen, reporter) = recording();

        let report = h.orchestrator.run(&job, &reporter).await.unwrap();

        assert_eq!(report.mode, "chunked");
        assert_eq!(report.unit_count, 3);
        // Vocals made it into every chunk, same as the monolithic path
        assert_eq!(
            std::fs::read_to_string(&job.output).unwrap(),
            "chunk000+0.40\nchunk001+0.40\nchunk002+0.40\n"
        );
        assert!(h.media.calls().contains(&"split:3".to_string()));
        assert!(h.media.calls().contains(&"concat:3".to_string()));
        assert_eq!(h.leftover_workspaces(), 0);

        let seen = seen.lock().unwrap();
        assert!(seen
            .iter()
            .all(|e| matches!(e.stage, Stage::SplitVideo | Stage::ProcessChunks | Stage::ConcatenateChunks)));

        let mut aggregator = ProgressAggregator::new(StageWeights::chunked());
        let mut last = 0;
        for event in seen.iter() {
            let overall = aggregator.update(event);
            assert!(overall >= last);
            last = overall;
        }
        assert_eq!(last, 100);
    }

    #[tokio::test]
    async fn test_parallel_completion_order_does_not_change_output_order() {
        let delays = HashMap::from([
            ("chunk000".to_string(), 80),
            ("chunk001".to_string(), 40),
            ("chunk002".to_string(), 1),
        ]);
        let h = Harness::new(FakeMedia {
            duration: 280.0,
            remux_delays: delays,
            ..Default::default()
        });
        let job = h.job().with_chunk_duration(Some(60.0)).with_parallelism(3);

        h.orchestrator.run(&job, &StageReporter::silent()).await.unwrap();

        let output = std::fs::read_to_string(&job.output).unwrap();
        let labels: Vec<&str> = output.lines().map(|l| l.split('+').next().unwrap()).collect();
        assert_eq!(labels, vec!["chunk000", "chunk001", "chunk002", "chunk003", "chunk004"]);

        // One model load shared by all in-process chunks
        let processor = h.orchestrator.unit_processor();
        assert_eq!(processor.separator().cache().load_count(), 1);
    }

    #[tokio::test]
    async fn test_parallel_chunk_failure_leaves_no_output() {
        let h = Harness::new(FakeMedia {
            duration: 280.0,
            fail_remux: Some("chunk002".to_string()),
            ..Default::default()
        });
        let job = h.job().with_chunk_duration(Some(60.0)).with_parallelism(3);

        let err = h.orchestrator.run(&job, &StageReporter::silent()).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::MediaOperationFailure);
        assert_eq!(err.chunk_index(), Some(2));
        assert_eq!(err.stage(), Some(Stage::RemuxVideo));
        assert_eq!(err.diagnostics(), Some("Conversion failed!"));
        assert!(!job.output.exists());
        assert_eq!(h.leftover_workspaces(), 0);

        let remuxed = h.media.calls().iter().filter(|c| c.starts_with("remux:")).count();
        assert_eq!(remuxed, 5);
        assert!(!h.media.calls().iter().any(|c| c.starts_with("concat")));
    }

    #[tokio::test]
    async fn test_missing_input_fails_validation() {
        let h = Harness::new(FakeMedia::with_duration(60.0));
        let job = ProcessingJob::new(h.dir.path().join("nope.mp4"), h.dir.path().join("out.mp4"));

        let err = h.orchestrator.run(&job, &StageReporter::silent()).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::ValidationFailure);
        assert!(h.media.calls().is_empty());
    }

    #[tokio::test]
    async fn test_missing_tools_fail_before_processing() {
        let h = Harness::new(FakeMedia {
            duration: 60.0,
            missing_tools: true,
            ..Default::default()
        });
        let job = h.job();

        let err = h.orchestrator.run(&job, &StageReporter::silent()).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::MissingCapability);
        assert!(h.media.calls().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_model_fails_before_processing() {
        let h = Harness::new(FakeMedia::with_duration(60.0));
        let job = h.job().with_model("mdx_extra");

        let err = h.orchestrator.run(&job, &StageReporter::silent()).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::MissingCapability);
        assert!(h.media.calls().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_job_dispatches_nothing() {
        let h = Harness::new(FakeMedia::with_duration(300.0));
        let job = h.job().with_chunk_duration(Some(100.0));
        let (_tx, rx) = watch::channel(true);

        let err = h
            .orchestrator
            .run_with_cancel(&job, &StageReporter::silent(), rx)
            .await
            .unwrap_err();

        assert!(err.is_cancelled());
        assert!(!job.output.exists());
        assert!(!h.media.calls().iter().any(|c| c.starts_with("remux:")));
        assert_eq!(h.leftover_workspaces(), 0);
    }

    #[tokio::test]
    async fn test_output_naming_the_input_is_rejected() {
        let h = Harness::new(FakeMedia::with_duration(60.0));
        let input = fake_video(h.dir.path(), "talk.mp4", "source");
        let job = ProcessingJob::new(input.clone(), h.dir.path().join(".").join("talk.mp4"));

        let err = h.orchestrator.run(&job, &StageReporter::silent()).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::ValidationFailure);
        assert!(h.media.calls().is_empty());
        assert_eq!(std::fs::read_to_string(&input).unwrap(), "source");
    }

    #[test]
    fn test_chunk_workers_scratch_inside_job_workspace() {
        let h = Harness::new(FakeMedia::with_duration(60.0));
        let workspace = h.dir.path().join("work").join("vfilter_job_abc");

        let pool = h.orchestrator.process_pool(&workspace).unwrap();

        assert_eq!(pool.work_dir(), workspace.as_path());
    }

    #[test]
    fn test_name_parts() {
        assert_eq!(
            name_parts(Path::new("/videos/Talk.MKV")),
            ("Talk".to_string(), "MKV".to_string())
        );
    }
}
