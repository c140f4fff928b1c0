use anyhow::{bail, Context, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, Stream, StreamConfig};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::constants::playback::{ALL_SPEAKERS, DEFAULT_DEVICE_ID};
use crate::stimulus::Stimulus;

/// Presents a stimulus at a digital level (dB re full scale)
pub trait Playback {
    fn play(&mut self, stimulus: &Stimulus, level_db: f64) -> Result<()>;
}

/// `None` stands for an output that could not be opened; every
/// presentation then fails until a device is configured
impl<A: Playback> Playback for Option<A> {
    fn play(&mut self, stimulus: &Stimulus, level_db: f64) -> Result<()> {
        match self {
            Some(player) => player.play(stimulus, level_db),
            None => bail!("No audio output available, cannot play {}", stimulus.name),
        }
    }
}

/// Mono samples decoded from a WAV file
#[derive(Debug, Clone)]
pub struct AudioClip {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl AudioClip {
    pub fn from_wav(path: &Path) -> Result<Self> {
        let mut reader = hound::WavReader::open(path)
            .with_context(|| format!("Failed to open WAV file {}", path.display()))?;
        let spec = reader.spec();
        let channels = spec.channels.max(1) as usize;

        let interleaved: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Float => reader
                .samples::<f32>()
                .collect::<Result<_, _>>()
                .context("Failed to decode float samples")?,
            hound::SampleFormat::Int => {
                let scale = (1u64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
                reader
                    .samples::<i32>()
                    .map(|s| s.map(|v| v as f32 / scale))
                    .collect::<Result<_, _>>()
                    .context("Failed to decode integer samples")?
            }
        };

        // Average channels to get mono
        let samples = if channels == 1 {
            interleaved
        } else {
            interleaved
                .chunks(channels)
                .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
                .collect()
        };

        Ok(AudioClip {
            samples,
            sample_rate: spec.sample_rate,
        })
    }

    /// Apply `level_db` of gain, hard-clipping to [-1, 1].
    /// Returns the number of clipped samples.
    pub fn apply_level(&mut self, level_db: f64) -> usize {
        let gain = db_to_gain(level_db);
        let mut clipped = 0;
        for sample in self.samples.iter_mut() {
            let scaled = *sample * gain;
            if scaled.abs() > 1.0 {
                clipped += 1;
            }
            *sample = scaled.clamp(-1.0, 1.0);
        }
        clipped
    }
}

pub fn db_to_gain(level_db: f64) -> f32 {
    10f64.powf(level_db / 20.0) as f32
}

// Simple linear interpolation resampling
pub fn resample(input: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || input.is_empty() {
        return input.to_vec();
    }

    let ratio = from_rate as f64 / to_rate as f64;
    let output_len = (input.len() as f64 / ratio) as usize;
    let mut output = Vec::with_capacity(output_len);

    for i in 0..output_len {
        let src_idx = i as f64 * ratio;
        let src_idx_floor = (src_idx.floor() as usize).min(input.len() - 1);
        let src_idx_ceil = (src_idx_floor + 1).min(input.len() - 1);
        let frac = src_idx - src_idx_floor as f64;

        // Linear interpolation
        let sample = input[src_idx_floor] * (1.0 - frac) as f32
            + input[src_idx_ceil] * frac as f32;

        output.push(sample);
    }

    output
}

/// Spread mono samples over `channels` interleaved outputs. `speaker` is
/// 1-based; `ALL_SPEAKERS` copies the signal to every channel.
pub fn route_to_speaker(mono: &[f32], channels: usize, speaker: i64) -> Result<Vec<f32>> {
    if speaker < 0 || speaker as usize > channels {
        bail!(
            "Speaker {} not available, output device has {} channel(s)",
            speaker,
            channels
        );
    }

    let mut out = vec![0.0; mono.len() * channels];
    for (frame, &sample) in out.chunks_mut(channels).zip(mono) {
        if speaker == ALL_SPEAKERS {
            frame.iter_mut().for_each(|s| *s = sample);
        } else {
            frame[speaker as usize - 1] = sample;
        }
    }
    Ok(out)
}

/// Plays stimuli on a cpal output device. Starting a new stimulus stops
/// the one still playing.
pub struct CpalPlayback {
    device: Device,
    config: StreamConfig,
    speaker: i64,
    stream: Option<Stream>,
    finished: Arc<AtomicBool>,
}

impl CpalPlayback {
    pub fn new(device_id: i64, speaker: i64) -> Result<Self> {
        let host = cpal::default_host();

        let device = if device_id == DEFAULT_DEVICE_ID {
            host.default_output_device()
                .context("No output device available")?
        } else {
            let index = usize::try_from(device_id)
                .with_context(|| format!("Invalid audio device id {}", device_id))?;
            host.output_devices()
                .context("Failed to enumerate output devices")?
                .nth(index)
                .with_context(|| format!("No output device with id {}", device_id))?
        };

        log::info!(
            "Using audio output device: {}",
            device.name().unwrap_or_else(|_| "<unnamed>".to_string())
        );

        let default_config = device
            .default_output_config()
            .context("Failed to get default output config")?;
        if default_config.sample_format() != cpal::SampleFormat::F32 {
            log::warn!(
                "Output device prefers {:?} samples, requesting f32",
                default_config.sample_format()
            );
        }
        let config: StreamConfig = default_config.into();

        log::info!(
            "Output config: {} channels, {} Hz",
            config.channels,
            config.sample_rate.0
        );

        if speaker < 0 || speaker > config.channels as i64 {
            bail!(
                "Speaker {} not available, output device has {} channel(s)",
                speaker,
                config.channels
            );
        }

        Ok(CpalPlayback {
            device,
            config,
            speaker,
            stream: None,
            finished: Arc::new(AtomicBool::new(true)),
        })
    }

    pub fn stop(&mut self) {
        if let Some(stream) = self.stream.take() {
            drop(stream);
            if !self.finished.load(Ordering::Relaxed) {
                log::debug!("Playback preempted");
            }
        }
        self.finished.store(true, Ordering::Relaxed);
    }

    pub fn is_playing(&self) -> bool {
        self.stream.is_some() && !self.finished.load(Ordering::Relaxed)
    }
}

impl Playback for CpalPlayback {
    fn play(&mut self, stimulus: &Stimulus, level_db: f64) -> Result<()> {
        self.stop();

        let mut clip = AudioClip::from_wav(&stimulus.path)?;
        let clipped = clip.apply_level(level_db);
        if clipped > 0 {
            log::warn!(
                "{}: {} sample(s) clipped at {:.1} dB",
                stimulus.name,
                clipped,
                level_db
            );
        }

        let device_rate = self.config.sample_rate.0;
        let mono = resample(&clip.samples, clip.sample_rate, device_rate);
        let channels = self.config.channels as usize;
        let samples = route_to_speaker(&mono, channels, self.speaker)?;

        let finished = Arc::new(AtomicBool::new(false));
        let done = Arc::clone(&finished);
        let mut position = 0usize;

        let err_fn = |err| log::error!("Audio stream error: {}", err);

        let stream = self
            .device
            .build_output_stream(
                &self.config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let remaining = samples.len().saturating_sub(position);
                    let n = remaining.min(data.len());
                    data[..n].copy_from_slice(&samples[position..position + n]);
                    data[n..].iter_mut().for_each(|s| *s = 0.0);
                    position += n;
                    if position >= samples.len() {
                        done.store(true, Ordering::Relaxed);
                    }
                },
                err_fn,
                None,
            )
            .context("Failed to build output stream")?;

        stream.play().context("Failed to start audio stream")?;

        log::info!("Playing {} at {:.1} dB", stimulus.name, level_db);
        self.stream = Some(stream);
        self.finished = finished;
        Ok(())
    }
}

impl Drop for CpalPlayback {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Recording(Vec<f64>);

    impl Playback for Recording {
        fn play(&mut self, _stimulus: &Stimulus, level_db: f64) -> Result<()> {
            self.0.push(level_db);
            Ok(())
        }
    }

    #[test]
    fn test_missing_output_fails_each_play() {
        let stimulus = Stimulus::from_path("tone.wav".into());
        let mut player: Option<Recording> = None;
        let err = player.play(&stimulus, -20.0).unwrap_err();
        assert!(err.to_string().contains("tone.wav"));

        let mut player = Some(Recording(Vec::new()));
        player.play(&stimulus, -20.0).unwrap();
        assert_eq!(player.unwrap().0, vec![-20.0]);
    }

    #[test]
    fn test_db_to_gain() {
        assert!((db_to_gain(0.0) - 1.0).abs() < 1e-6);
        assert!((db_to_gain(-20.0) - 0.1).abs() < 1e-6);
        assert!((db_to_gain(6.0) - 1.995).abs() < 1e-3);
    }

    #[test]
    fn test_apply_level_clips() {
        let mut clip = AudioClip {
            samples: vec![0.5, -0.5, 0.05],
            sample_rate: 16000,
        };
        let clipped = clip.apply_level(20.0);
        assert_eq!(clipped, 2);
        assert_eq!(clip.samples[0], 1.0);
        assert_eq!(clip.samples[1], -1.0);
        assert!((clip.samples[2] - 0.5).abs() < 1e-5);
    }

    #[test]
    fn test_resample_lengths() {
        let input = vec![0.0; 4800];
        assert_eq!(resample(&input, 48000, 16000).len(), 1600);
        assert_eq!(resample(&input, 16000, 16000).len(), 4800);
        assert!(resample(&[], 16000, 48000).is_empty());
    }

    #[test]
    fn test_route_to_single_speaker() {
        let out = route_to_speaker(&[0.1, 0.2], 2, 2).unwrap();
        assert_eq!(out, vec![0.0, 0.1, 0.0, 0.2]);
    }

    #[test]
    fn test_route_to_all_speakers() {
        let out = route_to_speaker(&[0.3], 3, ALL_SPEAKERS).unwrap();
        assert_eq!(out, vec![0.3, 0.3, 0.3]);
    }

    #[test]
    fn test_route_rejects_missing_speaker() {
        assert!(route_to_speaker(&[0.3], 2, 3).is_err());
        assert!(route_to_speaker(&[0.3], 2, -1).is_err());
    }
}
