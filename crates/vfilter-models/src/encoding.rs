//! Encoding and model defaults.

/// Default separation model identifier.
pub const DEFAULT_MODEL: &str = "htdemucs";
/// Default AAC bitrate for the re-encoded audio track.
pub const DEFAULT_AUDIO_BITRATE: &str = "192k";
/// Audio codec used for the final remux.
pub const OUTPUT_AUDIO_CODEC: &str = "aac";
/// PCM codec used for extracted audio.
pub const EXTRACT_AUDIO_CODEC: &str = "pcm_s16le";

/// Container extensions accepted as job input.
pub const SUPPORTED_INPUT_EXTENSIONS: &[&str] = &["avi", "m4v", "mkv", "mov", "mp4", "webm"];

/// Suffix appended to the input stem when no output path is given.
pub const DEFAULT_OUTPUT_SUFFIX: &str = "_filtered";
