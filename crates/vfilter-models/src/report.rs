//! Job outcome summaries.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::job::JobId;

/// Summary of a job that produced its output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct JobReport {
    pub job_id: JobId,
    pub output: PathBuf,
    /// "monolithic" or "chunked"
    pub mode: String,
    /// Units processed (1 for monolithic jobs)
    pub unit_count: usize,
    /// Probed input duration in seconds
    pub input_duration: f64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl JobReport {
    /// Wall-clock seconds between start and finish.
    pub fn elapsed_secs(&self) -> f64 {
        (self.finished_at - self.started_at).num_milliseconds() as f64 / 1000.0
    }

    /// Input seconds processed per wall-clock second.
    pub fn realtime_factor(&self) -> Option<f64> {
        let elapsed = self.elapsed_secs();
        (elapsed > 0.0).then(|| self.input_duration / elapsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_elapsed_and_realtime_factor() {
        let started_at = Utc::now();
        let report = JobReport {
            job_id: JobId::from_string("job-1"),
            output: PathBuf::from("out.mp4"),
            mode: "chunked".to_string(),
            unit_count: 3,
            input_duration: 2400.0,
            started_at,
            finished_at: started_at + Duration::seconds(600),
        };

        assert_eq!(report.elapsed_secs(), 600.0);
        assert_eq!(report.realtime_factor(), Some(4.0));
    }
}
