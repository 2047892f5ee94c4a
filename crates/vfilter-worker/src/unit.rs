//! Single-unit processor: extract audio, isolate vocals, remux.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};
use vfilter_media::{move_file, MediaOps, TransformProgress};
use vfilter_models::{
    DeviceSpec, JobId, MediaUnit, ProcessingJob, Stage, StageDetail, WatermarkMode,
};
use vfilter_separation::{SeparationCallback, SeparationProgress, VocalSeparator};

use crate::error::{WorkerError, WorkerResult};
use crate::logging::JobLogger;
use crate::metrics;
use crate::progress::StageReporter;

/// Per-unit encoding and separation settings, copied from the job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitSettings {
    pub device: DeviceSpec,
    pub model: String,
    pub audio_bitrate: String,
    pub watermark: WatermarkMode,
}

impl UnitSettings {
    pub fn from_job(job: &ProcessingJob) -> Self {
        Self {
            device: job.device,
            model: job.model.clone(),
            audio_bitrate: job.audio_bitrate.clone(),
            watermark: job.watermark,
        }
    }
}

/// One unit of work: process `unit` into `output`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitTask {
    pub job_id: JobId,
    pub unit: MediaUnit,
    pub output: PathBuf,
    pub settings: UnitSettings,
}

impl UnitTask {
    /// Chunk index for error context; `None` for the whole input.
    pub fn chunk_index(&self) -> Option<usize> {
        self.unit.disposable.then_some(self.unit.index)
    }
}

fn separation_detail(progress: &SeparationProgress) -> StageDetail {
    StageDetail {
        elapsed_seconds: Some(progress.elapsed_seconds),
        remaining_seconds: Some(progress.remaining_seconds),
        rate: Some(progress.rate),
        current_units: Some(progress.current_seconds),
        total_units: Some(progress.total_seconds),
    }
}

/// Runs the three unit stages in order inside a private workspace.
///
/// The workspace is a `vfilter_*` directory under `work_root` and is removed
/// on every exit path. The output is staged there and only moved to the
/// destination after remux succeeds.
#[derive(Clone)]
pub struct UnitProcessor {
    media: Arc<dyn MediaOps>,
    separator: VocalSeparator,
    work_root: PathBuf,
}

impl UnitProcessor {
    pub fn new(media: Arc<dyn MediaOps>, separator: VocalSeparator, work_root: impl Into<PathBuf>) -> Self {
        Self {
            media,
            separator,
            work_root: work_root.into(),
        }
    }

    pub fn separator(&self) -> &VocalSeparator {
        &self.separator
    }

    pub fn work_root(&self) -> &Path {
        &self.work_root
    }

    /// Process one unit and return the output path.
    pub async fn process(&self, task: &UnitTask, reporter: &StageReporter) -> WorkerResult<PathBuf> {
        let chunk = task.chunk_index();
        let logger = match chunk {
            Some(index) => JobLogger::new(&task.job_id, &format!("chunk_{:03}", index)),
            None => JobLogger::new(&task.job_id, "unit"),
        };
        let started = Instant::now();

        tokio::fs::create_dir_all(&self.work_root).await?;
        let workspace = tempfile::Builder::new()
            .prefix("vfilter_")
            .tempdir_in(&self.work_root)?;
        debug!(workspace = %workspace.path().display(), "Created unit workspace");

        let audio_wav = workspace.path().join("audio.wav");
        let vocals_wav = workspace.path().join("vocals.wav");
        let staged = workspace.path().join(staged_name(&task.output));
        let settings = &task.settings;

        // 1. Extract Audio
        logger.log_stage(1, 3, Stage::ExtractAudio);
        reporter.start(Stage::ExtractAudio);
        let progress = TransformProgress::new(task.unit.duration, reporter.stage_callback(Stage::ExtractAudio));
        self.media
            .extract_audio(task.unit.path(), &audio_wav, None, &progress)
            .await
            .map_err(|e| WorkerError::from(e).in_stage(Stage::ExtractAudio, chunk))?;
        reporter.complete(Stage::ExtractAudio);

        // 2. Isolate Vocals
        logger.log_stage(2, 3, Stage::IsolateVocals);
        reporter.start(Stage::IsolateVocals);
        let isolate_reporter = reporter.clone();
        let callback: SeparationCallback = Box::new(move |p: SeparationProgress| {
            isolate_reporter.percent_with_detail(Stage::IsolateVocals, p.percent, separation_detail(&p));
        });
        self.separator
            .isolate_vocals(&audio_wav, &vocals_wav, settings.device, &settings.model, Some(callback))
            .await
            .map_err(|e| WorkerError::from(e).in_stage(Stage::IsolateVocals, chunk))?;
        reporter.complete(Stage::IsolateVocals);

        // 3. Remux Video
        logger.log_stage(3, 3, Stage::RemuxVideo);
        reporter.start(Stage::RemuxVideo);
        let progress = TransformProgress::new(task.unit.duration, reporter.stage_callback(Stage::RemuxVideo));
        self.media
            .remux(
                task.unit.path(),
                &vocals_wav,
                &staged,
                &settings.audio_bitrate,
                settings.watermark,
                &progress,
            )
            .await
            .map_err(|e| WorkerError::from(e).in_stage(Stage::RemuxVideo, chunk))?;

        move_file(&staged, &task.output)
            .await
            .map_err(|e| WorkerError::from(e).in_stage(Stage::RemuxVideo, chunk))?;
        reporter.complete(Stage::RemuxVideo);

        let elapsed = started.elapsed().as_secs_f64();
        metrics::record_unit_duration(elapsed);
        info!(
            job_id = %task.job_id,
            chunk = ?chunk,
            output = %task.output.display(),
            elapsed_secs = elapsed,
            "Unit processed"
        );

        Ok(task.output.clone())
    }
}

/// File name for the staged output, keeping the destination's extension.
fn staged_name(output: &Path) -> String {
    match output.extension().and_then(|e| e.to_str()) {
        Some(ext) => format!("output.{}", ext),
        None => "output.mp4".to_string(),
    }
}
