//! Stage progress reporting and caller-side aggregation.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use vfilter_models::{ChunkPlan, Stage, StageDetail, StageProgress};

/// Progress sink supplied by the caller.
pub type ProgressSink = Arc<dyn Fn(StageProgress) + Send + Sync>;

/// Forwards stage events while keeping each stage's percent non-decreasing.
///
/// Events that would move a stage backwards, or repeat its current percent,
/// are dropped.
#[derive(Clone, Default)]
pub struct StageReporter {
    sink: Option<ProgressSink>,
    last: Arc<Mutex<HashMap<Stage, u8>>>,
}

impl StageReporter {
    pub fn new(sink: ProgressSink) -> Self {
        Self {
            sink: Some(sink),
            last: Arc::default(),
        }
    }

    pub fn from_fn(f: impl Fn(StageProgress) + Send + Sync + 'static) -> Self {
        Self::new(Arc::new(f))
    }

    /// Reporter that forwards nothing.
    pub fn silent() -> Self {
        Self::default()
    }

    pub fn report(&self, event: StageProgress) {
        let Some(sink) = &self.sink else {
            return;
        };

        {
            let Ok(mut last) = self.last.lock() else {
                return;
            };
            match last.get(&event.stage) {
                Some(previous) if event.percent <= *previous => return,
                _ => {
                    last.insert(event.stage, event.percent);
                }
            }
        }

        sink(event);
    }

    pub fn start(&self, stage: Stage) {
        self.report(StageProgress::started(stage));
    }

    pub fn complete(&self, stage: Stage) {
        self.report(StageProgress::completed(stage));
    }

    pub fn percent(&self, stage: Stage, percent: u8) {
        self.report(StageProgress::new(stage, percent));
    }

    pub fn percent_with_detail(&self, stage: Stage, percent: u8, detail: StageDetail) {
        self.report(StageProgress::new(stage, percent).with_detail(detail));
    }

    /// Percent callback bound to one stage.
    pub fn stage_callback(&self, stage: Stage) -> impl Fn(u8) + Send + Sync + 'static {
        let reporter = self.clone();
        move |percent| reporter.percent(stage, percent)
    }

    /// Last percent forwarded for `stage`.
    pub fn last_percent(&self, stage: Stage) -> Option<u8> {
        self.last.lock().ok().and_then(|last| last.get(&stage).copied())
    }
}

/// Share of the overall 0-100 scale given to each stage.
#[derive(Debug, Clone, PartialEq)]
pub struct StageWeights {
    ranges: Vec<(Stage, f64, f64)>,
}

impl StageWeights {
    /// Extract 0-10, Isolate 10-85, Remux 85-100.
    pub fn monolithic() -> Self {
        Self {
            ranges: vec![
                (Stage::ExtractAudio, 0.0, 10.0),
                (Stage::IsolateVocals, 10.0, 85.0),
                (Stage::RemuxVideo, 85.0, 100.0),
            ],
        }
    }

    /// Split 0-5, Process Chunks 5-95, Concatenate 95-100.
    pub fn chunked() -> Self {
        Self {
            ranges: vec![
                (Stage::SplitVideo, 0.0, 5.0),
                (Stage::ProcessChunks, 5.0, 95.0),
                (Stage::ConcatenateChunks, 95.0, 100.0),
            ],
        }
    }

    pub fn for_plan(plan: &ChunkPlan) -> Self {
        if plan.is_chunked() {
            Self::chunked()
        } else {
            Self::monolithic()
        }
    }

    fn range(&self, stage: Stage) -> Option<(f64, f64)> {
        self.ranges
            .iter()
            .find(|(s, _, _)| *s == stage)
            .map(|(_, start, end)| (*start, *end))
    }
}

/// Caller-side mapping of stage events onto one monotonic overall percent.
#[derive(Debug, Clone)]
pub struct ProgressAggregator {
    weights: StageWeights,
    overall: f64,
}

impl ProgressAggregator {
    pub fn new(weights: StageWeights) -> Self {
        Self { weights, overall: 0.0 }
    }

    /// Fold one event in and return the overall percent.
    ///
    /// Stages outside the weight table leave the overall value unchanged.
    pub fn update(&mut self, event: &StageProgress) -> u8 {
        if let Some((start, end)) = self.weights.range(event.stage) {
            let value = start + (end - start) * f64::from(event.percent) / 100.0;
            self.overall = self.overall.max(value);
        }
        self.overall.round() as u8
    }

    pub fn overall(&self) -> u8 {
        self.overall.round() as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recording() -> (Arc<Mutex<Vec<StageProgress>>>, StageReporter) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let reporter = StageReporter::from_fn(move |event| sink.lock().unwrap().push(event));
        (seen, reporter)
    }

    #[test]
    fn test_reporter_drops_regressions() {
        let (seen, reporter) = recording();
        reporter.start(Stage::IsolateVocals);
        reporter.percent(Stage::IsolateVocals, 40);
        reporter.percent(Stage::IsolateVocals, 30);
        reporter.percent(Stage::IsolateVocals, 40);
        reporter.complete(Stage::IsolateVocals);
        reporter.complete(Stage::IsolateVocals);

        let percents: Vec<u8> = seen.lock().unwrap().iter().map(|e| e.percent).collect();
        assert_eq!(percents, vec![0, 40, 100]);
        assert_eq!(reporter.last_percent(Stage::IsolateVocals), Some(100));
    }

    #[test]
    fn test_stages_are_independent() {
        let (seen, reporter) = recording();
        reporter.complete(Stage::ExtractAudio);
        reporter.start(Stage::IsolateVocals);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[1].stage, Stage::IsolateVocals);
        assert_eq!(seen[1].percent, 0);
    }

    #[test]
    fn test_stage_callback() {
        let (seen, reporter) = recording();
        let callback = reporter.stage_callback(Stage::RemuxVideo);
        callback(10);
        callback(55);

        assert_eq!(seen.lock().unwrap().last().unwrap().percent, 55);
    }

    #[test]
    fn test_aggregator_monolithic_weights() {
        let mut agg = ProgressAggregator::new(StageWeights::monolithic());
        assert_eq!(agg.update(&StageProgress::completed(Stage::ExtractAudio)), 10);
        // Stage transition resets the stage percent, not the overall one
        assert_eq!(agg.update(&StageProgress::started(Stage::IsolateVocals)), 10);
        assert_eq!(agg.update(&StageProgress::new(Stage::IsolateVocals, 50)), 48);
        assert_eq!(agg.update(&StageProgress::completed(Stage::RemuxVideo)), 100);
    }

    #[test]
    fn test_aggregator_never_decreases() {
        let mut agg = ProgressAggregator::new(StageWeights::chunked());
        agg.update(&StageProgress::new(Stage::ProcessChunks, 60));
        let before = agg.overall();
        agg.update(&StageProgress::completed(Stage::SplitVideo));
        assert_eq!(agg.overall(), before);

        // Unknown stage for this plan
        agg.update(&StageProgress::completed(Stage::RemuxVideo));
        assert_eq!(agg.overall(), before);
    }

    #[test]
    fn test_weights_for_plan() {
        assert_eq!(StageWeights::for_plan(&ChunkPlan::Monolithic), StageWeights::monolithic());
        assert_eq!(StageWeights::for_plan(&ChunkPlan::chunked(100.0, 10.0)), StageWeights::chunked());
    }
}
