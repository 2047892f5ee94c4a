//! Inference progress hook and throttled re-emission.

use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Hook a model calls from inside its processing loop.
///
/// Calls must not affect the model's numeric output.
pub trait ProgressHook: Send {
    fn on_progress(&mut self, processed_secs: f64, total_secs: f64);
}

/// Hook that ignores every call.
pub struct NoopHook;

impl ProgressHook for NoopHook {
    fn on_progress(&mut self, _processed_secs: f64, _total_secs: f64) {}
}

/// Normalised separation progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeparationProgress {
    pub percent: u8,
    /// Audio seconds processed so far
    pub current_seconds: f64,
    pub total_seconds: f64,
    pub elapsed_seconds: f64,
    pub remaining_seconds: f64,
    /// Audio seconds processed per wall-clock second
    pub rate: f64,
}

/// Callback receiving separation progress.
pub type SeparationCallback = Box<dyn FnMut(SeparationProgress) + Send>;

/// Forwards hook calls only when the integer percent changes.
///
/// Percent never decreases, even if the model reports out of order.
pub struct ThrottledProgress {
    callback: SeparationCallback,
    started: Instant,
    last_percent: Option<u8>,
}

impl ThrottledProgress {
    pub fn new(callback: impl FnMut(SeparationProgress) + Send + 'static) -> Self {
        Self {
            callback: Box::new(callback),
            started: Instant::now(),
            last_percent: None,
        }
    }

    /// Emit 100 if it has not been emitted yet.
    pub fn finish(&mut self, total_secs: f64) {
        if self.last_percent != Some(100) {
            self.emit(100, total_secs, total_secs);
        }
    }

    fn emit(&mut self, percent: u8, processed_secs: f64, total_secs: f64) {
        self.last_percent = Some(percent);

        let elapsed = self.started.elapsed().as_secs_f64();
        let rate = if elapsed > 0.0 { processed_secs / elapsed } else { 0.0 };
        let remaining = if rate > 0.0 {
            ((total_secs - processed_secs) / rate).max(0.0)
        } else {
            0.0
        };

        (self.callback)(SeparationProgress {
            percent,
            current_seconds: processed_secs,
            total_seconds: total_secs,
            elapsed_seconds: elapsed,
            remaining_seconds: remaining,
            rate,
        });
    }
}

impl ProgressHook for ThrottledProgress {
    fn on_progress(&mut self, processed_secs: f64, total_secs: f64) {
        if total_secs <= 0.0 {
            return;
        }

        let percent = ((processed_secs / total_secs) * 100.0).clamp(0.0, 100.0) as u8;
        match self.last_percent {
            Some(last) if percent <= last => {}
            _ => self.emit(percent, processed_secs.min(total_secs), total_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn recorder() -> (Arc<Mutex<Vec<u8>>>, ThrottledProgress) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let hook = ThrottledProgress::new(move |p: SeparationProgress| sink.lock().unwrap().push(p.percent));
        (seen, hook)
    }

    #[test]
    fn test_emits_only_on_percent_change() {
        let (seen, mut hook) = recorder();
        for step in 0..=1000 {
            hook.on_progress(step as f64 * 0.1, 100.0);
        }
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 101);
        assert_eq!(seen.first(), Some(&0));
        assert_eq!(seen.last(), Some(&100));
    }

    #[test]
    fn test_never_decreases() {
        let (seen, mut hook) = recorder();
        hook.on_progress(50.0, 100.0);
        hook.on_progress(20.0, 100.0);
        hook.on_progress(60.0, 100.0);
        hook.finish(100.0);
        hook.finish(100.0);

        assert_eq!(*seen.lock().unwrap(), vec![50, 60, 100]);
    }

    #[test]
    fn test_detail_fields() {
        let last = Arc::new(Mutex::new(None));
        let sink = last.clone();
        let mut hook = ThrottledProgress::new(move |p| *sink.lock().unwrap() = Some(p));

        hook.on_progress(30.0, 120.0);
        let p = last.lock().unwrap().clone().unwrap();
        assert_eq!(p.percent, 25);
        assert_eq!(p.current_seconds, 30.0);
        assert_eq!(p.total_seconds, 120.0);
        assert!(p.remaining_seconds >= 0.0);
    }
}
