//! Stage progress events streamed to the caller.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Pipeline stage names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum Stage {
    #[serde(rename = "Extract Audio")]
    ExtractAudio,
    #[serde(rename = "Isolate Vocals")]
    IsolateVocals,
    #[serde(rename = "Remux Video")]
    RemuxVideo,
    #[serde(rename = "Split Video")]
    SplitVideo,
    #[serde(rename = "Process Chunks")]
    ProcessChunks,
    #[serde(rename = "Concatenate Chunks")]
    ConcatenateChunks,
}

impl Stage {
    /// Stages of the single-unit pipeline, in execution order.
    pub const UNIT_STAGES: [Stage; 3] = [Stage::ExtractAudio, Stage::IsolateVocals, Stage::RemuxVideo];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::ExtractAudio => "Extract Audio",
            Stage::IsolateVocals => "Isolate Vocals",
            Stage::RemuxVideo => "Remux Video",
            Stage::SplitVideo => "Split Video",
            Stage::ProcessChunks => "Process Chunks",
            Stage::ConcatenateChunks => "Concatenate Chunks",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Optional structured detail attached to a progress event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct StageDetail {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elapsed_seconds: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining_seconds: Option<f64>,
    /// Units processed per wall-clock second
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_units: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_units: Option<f64>,
}

impl StageDetail {
    /// Detail with only unit counters set.
    pub fn units(current: f64, total: f64) -> Self {
        Self {
            current_units: Some(current),
            total_units: Some(total),
            ..Default::default()
        }
    }
}

/// Ephemeral progress event for one stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct StageProgress {
    pub stage: Stage,
    /// Percent complete within the stage (0-100)
    pub percent: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<StageDetail>,
}

impl StageProgress {
    pub fn new(stage: Stage, percent: u8) -> Self {
        Self {
            stage,
            percent: percent.min(100),
            detail: None,
        }
    }

    pub fn started(stage: Stage) -> Self {
        Self::new(stage, 0)
    }

    pub fn completed(stage: Stage) -> Self {
        Self::new(stage, 100)
    }

    pub fn with_detail(mut self, detail: StageDetail) -> Self {
        self.detail = Some(detail);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_names_serialize_as_labels() {
        let json = serde_json::to_string(&Stage::IsolateVocals).unwrap();
        assert_eq!(json, "\"Isolate Vocals\"");
        assert_eq!(Stage::ConcatenateChunks.to_string(), "Concatenate Chunks");
    }

    #[test]
    fn test_percent_clamped() {
        assert_eq!(StageProgress::new(Stage::RemuxVideo, 250).percent, 100);
    }

    #[test]
    fn test_detail_omits_empty_fields() {
        let event = StageProgress::new(Stage::ProcessChunks, 50).with_detail(StageDetail::units(1.0, 2.0));
        let json = serde_json::to_value(&event).unwrap();
        let detail = json.get("detail").unwrap();
        assert!(detail.get("elapsed_seconds").is_none());
        assert_eq!(detail.get("total_units").unwrap(), 2.0);
    }
}
