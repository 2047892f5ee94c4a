//! Waveform I/O, channel coercion and resampling.

use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};
use std::path::Path;
use tracing::debug;

use crate::error::{SeparationError, SeparationResult};

/// Planar audio: one sample vector per channel, all the same length.
#[derive(Debug, Clone, PartialEq)]
pub struct Waveform {
    pub sample_rate: u32,
    pub channels: Vec<Vec<f32>>,
}

impl Waveform {
    pub fn new(sample_rate: u32, channels: Vec<Vec<f32>>) -> Self {
        Self {
            sample_rate,
            channels,
        }
    }

    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }

    /// Samples per channel.
    pub fn num_frames(&self) -> usize {
        self.channels.first().map(Vec::len).unwrap_or(0)
    }

    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.num_frames() as f64 / self.sample_rate as f64
    }

    /// Exactly two channels: mono is duplicated, extra channels are dropped.
    pub fn into_stereo(mut self) -> SeparationResult<Self> {
        match self.channels.len() {
            0 => Err(SeparationError::demucs("Audio has no channels")),
            1 => {
                let mono = self.channels.remove(0);
                self.channels = vec![mono.clone(), mono];
                Ok(self)
            }
            2 => Ok(self),
            n => {
                debug!("Truncating {}-channel audio to stereo", n);
                self.channels.truncate(2);
                Ok(self)
            }
        }
    }

    /// Resample every channel to `target_rate`.
    pub fn resample(self, target_rate: u32) -> SeparationResult<Self> {
        if self.sample_rate == target_rate || self.num_frames() == 0 {
            return Ok(Self {
                sample_rate: target_rate,
                ..self
            });
        }

        let ratio = target_rate as f64 / self.sample_rate as f64;
        let frames = self.num_frames();
        let expected = (frames as f64 * ratio).round() as usize;
        debug!("Resampling {}Hz -> {}Hz ({} frames)", self.sample_rate, target_rate, frames);

        let params = SincInterpolationParameters {
            sinc_len: 256,
            f_cutoff: 0.95,
            interpolation: SincInterpolationType::Linear,
            oversampling_factor: 256,
            window: WindowFunction::BlackmanHarris2,
        };

        let mut resampler = SincFixedIn::<f32>::new(ratio, 2.0, params, frames, self.num_channels())
            .map_err(|e| SeparationError::Resample(e.to_string()))?;
        let delay = resampler.output_delay();

        let mut out = resampler
            .process(&self.channels, None)
            .map_err(|e| SeparationError::Resample(e.to_string()))?;
        // Drain the filter so the tail is not lost to the output delay
        let tail = resampler
            .process_partial(None::<&[Vec<f32>]>, None)
            .map_err(|e| SeparationError::Resample(e.to_string()))?;

        for (channel, rest) in out.iter_mut().zip(tail) {
            channel.extend(rest);
            channel.drain(..delay.min(channel.len()));
            channel.resize(expected, 0.0);
        }

        Ok(Self::new(target_rate, out))
    }
}

/// Read a PCM or float WAV file.
pub fn read_wav(path: impl AsRef<Path>) -> SeparationResult<Waveform> {
    let reader = hound::WavReader::open(path.as_ref())?;
    let spec = reader.spec();
    let num_channels = spec.channels.max(1) as usize;

    let samples: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader.into_samples::<f32>().collect::<Result<_, _>>()?,
        hound::SampleFormat::Int => {
            let max_value = (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f32 / max_value))
                .collect::<Result<_, _>>()?
        }
    };

    // Deinterleave
    let num_frames = samples.len() / num_channels;
    let mut channels = vec![Vec::with_capacity(num_frames); num_channels];
    for frame in samples.chunks_exact(num_channels) {
        for (channel, sample) in channels.iter_mut().zip(frame) {
            channel.push(*sample);
        }
    }

    Ok(Waveform::new(spec.sample_rate, channels))
}

/// Write a 32-bit float WAV file.
pub fn write_wav(path: impl AsRef<Path>, waveform: &Waveform) -> SeparationResult<()> {
    let spec = hound::WavSpec {
        channels: waveform.num_channels() as u16,
        sample_rate: waveform.sample_rate,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };

    let mut writer = hound::WavWriter::create(path.as_ref(), spec)?;
    for i in 0..waveform.num_frames() {
        for channel in &waveform.channels {
            writer.write_sample(channel[i])?;
        }
    }
    writer.finalize()?;
    Ok(())
}
