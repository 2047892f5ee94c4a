//! Visual/temporal perturbation applied when watermark mode is requested.
//!
//! The perturbation forces a video re-encode: speed change, a padded border,
//! colour shift and short periodic blackouts. Audio is sped up to match.

use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::OnceCell;
use tracing::debug;

use crate::command::ffmpeg_path;

/// Perturbation parameters.
#[derive(Debug, Clone)]
pub struct PerturbationConfig {
    /// Playback speed factor applied to both streams
    pub speed: f64,
    /// Frame scale before padding back to the original size
    pub scale: f64,
    /// Border colour
    pub border_color: String,
    pub brightness: f64,
    pub saturation: f64,
    /// Hue rotation in degrees
    pub hue: f64,
    /// Seconds between blackouts
    pub blackout_period: f64,
    /// Blackout length in seconds
    pub blackout_duration: f64,
}

impl Default for PerturbationConfig {
    fn default() -> Self {
        Self {
            speed: 1.05,
            scale: 0.75,
            border_color: "#1a1a2e".to_string(),
            brightness: 0.04,
            saturation: 1.08,
            hue: 8.0,
            blackout_period: 5.0,
            blackout_duration: 0.15,
        }
    }
}

impl PerturbationConfig {
    pub fn with_speed(mut self, speed: f64) -> Self {
        self.speed = speed;
        self
    }

    /// Video filter chain.
    pub fn video_filter(&self) -> String {
        format!(
            "setpts=PTS/{speed},\
             scale=iw*{scale}:ih*{scale},\
             pad=iw/{scale}:ih/{scale}:(ow-iw)/2:(oh-ih)/2:color={color},\
             eq=brightness={brightness}:saturation={saturation},\
             hue=h={hue},\
             drawbox=enable='lt(mod(t,{period}),{blackout})':c=black:t=fill",
            speed = self.speed,
            scale = self.scale,
            color = self.border_color,
            brightness = self.brightness,
            saturation = self.saturation,
            hue = self.hue,
            period = self.blackout_period,
            blackout = self.blackout_duration,
        )
    }

    /// Audio filter matching the video speed change.
    pub fn audio_filter(&self) -> String {
        format!("atempo={}", self.speed)
    }

    /// Filter graph over input 0 video and input 1 audio, producing `[v]` and `[a]`.
    pub fn filter_complex(&self) -> String {
        format!("[0:v]{}[v];[1:a]{}[a]", self.video_filter(), self.audio_filter())
    }
}

/// H.264 encoder used for the perturbed re-encode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoEncoder {
    /// NVIDIA GPU encoder
    Nvenc,
    /// CPU encoder
    Libx264,
}

impl VideoEncoder {
    /// Codec and quality arguments.
    pub fn args(&self) -> Vec<&'static str> {
        match self {
            VideoEncoder::Nvenc => vec!["-c:v", "h264_nvenc", "-preset", "p4", "-cq", "18", "-b:v", "0"],
            VideoEncoder::Libx264 => vec!["-c:v", "libx264", "-preset", "fast", "-crf", "18"],
        }
    }
}

static ENCODER: OnceCell<VideoEncoder> = OnceCell::const_new();

/// Pick NVENC when FFmpeg lists it, otherwise libx264. Probed once per process.
pub async fn detect_video_encoder() -> VideoEncoder {
    *ENCODER
        .get_or_init(|| async {
            let encoder = if nvenc_listed().await {
                VideoEncoder::Nvenc
            } else {
                VideoEncoder::Libx264
            };
            debug!(?encoder, "Selected watermark video encoder");
            encoder
        })
        .await
}

async fn nvenc_listed() -> bool {
    let Ok(ffmpeg) = ffmpeg_path() else {
        return false;
    };

    let output = Command::new(ffmpeg)
        .args(["-hide_banner", "-encoders"])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .output();

    match tokio::time::timeout(Duration::from_secs(10), output).await {
        Ok(Ok(out)) => String::from_utf8_lossy(&out.stdout).contains("h264_nvenc"),
        _ => false,
    }
}
