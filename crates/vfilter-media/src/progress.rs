//! FFmpeg `-progress` snapshots and per-operation percent reporting.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Progress reported by FFmpeg at the end of each `-progress` block.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FfmpegProgress {
    /// Output time in milliseconds
    pub out_time_ms: i64,
    /// Encoding speed (e.g., 1.5 = 1.5x realtime)
    pub speed: f64,
    /// Whether FFmpeg reported `progress=end`
    pub is_complete: bool,
}

impl FfmpegProgress {
    /// Output position in seconds.
    pub fn out_time_secs(&self) -> f64 {
        self.out_time_ms.max(0) as f64 / 1000.0
    }

    /// Integer percent of `total_secs` written so far, capped at 100.
    pub fn percent_of(&self, total_secs: f64) -> u8 {
        if self.is_complete {
            return 100;
        }
        if total_secs <= 0.0 {
            return 0;
        }
        ((self.out_time_secs() / total_secs) * 100.0).clamp(0.0, 100.0) as u8
    }

    /// Estimate time remaining in seconds.
    pub fn eta_seconds(&self, total_secs: f64) -> Option<f64> {
        if self.speed <= 0.0 || self.out_time_ms <= 0 {
            return None;
        }

        let remaining = total_secs - self.out_time_secs();
        if remaining <= 0.0 {
            return Some(0.0);
        }

        Some(remaining / self.speed)
    }
}

/// Percent callback shared across tasks.
pub type PercentFn = Arc<dyn Fn(u8) + Send + Sync>;

/// Percent reporter handed to a single media operation.
///
/// `total_secs` is the expected output duration used to turn FFmpeg's
/// output position into a percentage.
#[derive(Clone, Default)]
pub struct TransformProgress {
    total_secs: f64,
    callback: Option<PercentFn>,
}

impl TransformProgress {
    /// Reporter that discards everything.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn new(total_secs: f64, callback: impl Fn(u8) + Send + Sync + 'static) -> Self {
        Self {
            total_secs,
            callback: Some(Arc::new(callback)),
        }
    }

    pub fn report(&self, percent: u8) {
        if let Some(callback) = &self.callback {
            callback(percent.min(100));
        }
    }

    /// Adapter for [`crate::FfmpegRunner::run_with_progress`].
    pub fn ffmpeg_callback(&self) -> impl Fn(FfmpegProgress) + Send + 'static {
        let total_secs = self.total_secs;
        let callback = self.callback.clone();
        move |progress: FfmpegProgress| {
            if let Some(callback) = &callback {
                callback(progress.percent_of(total_secs));
            }
        }
    }
}

impl std::fmt::Debug for TransformProgress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransformProgress")
            .field("total_secs", &self.total_secs)
            .field("has_callback", &self.callback.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percent_of() {
        let progress = FfmpegProgress {
            out_time_ms: 5000,
            ..Default::default()
        };

        assert_eq!(progress.percent_of(10.0), 50);
        assert_eq!(progress.percent_of(2.0), 100);
        assert_eq!(progress.percent_of(0.0), 0);
    }

    #[test]
    fn test_complete_is_full() {
        let progress = FfmpegProgress {
            out_time_ms: 10,
            is_complete: true,
            ..Default::default()
        };
        assert_eq!(progress.percent_of(60.0), 100);
    }

    #[test]
    fn test_transform_progress_forwards_percent() {
        use std::sync::Mutex;

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let progress = TransformProgress::new(20.0, move |p| sink.lock().unwrap().push(p));

        let callback = progress.ffmpeg_callback();
        callback(FfmpegProgress {
            out_time_ms: 5_000,
            ..Default::default()
        });
        progress.report(140);

        assert_eq!(*seen.lock().unwrap(), vec![25, 100]);
    }

    #[test]
    fn test_eta_calculation() {
        let progress = FfmpegProgress {
            out_time_ms: 5000,
            speed: 2.0,
            ..Default::default()
        };

        // 5 seconds remaining at 2x speed
        let eta = progress.eta_seconds(10.0).unwrap();
        assert!((eta - 2.5).abs() < 0.01);
    }
}
