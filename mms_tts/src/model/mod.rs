//! End-to-end VITS synthesis model.

use anyhow::{Result, bail};
use candle_core::{DType, Device, Tensor};

use crate::audio::HifiGanDecoder;
use crate::config::VitsConfig;
use crate::nn::duration::{DurationModel, frames_per_token};
use crate::nn::encoder::TextEncoder;
use crate::nn::flow::ResidualCouplingBlock;
use crate::text::VitsTokenizer;

pub mod loader;

pub use loader::{LoadError, LoaderConfig, ModelLoader};

/// Sampling knobs for a synthesis call.
#[derive(Debug, Clone)]
pub struct SynthesisOptions {
    /// Standard deviation multiplier for the prior noise.
    pub noise_scale: f64,
    /// Standard deviation multiplier for the duration noise.
    pub noise_scale_duration: f64,
    /// Speaking rate; durations scale by its inverse.
    pub speaking_rate: f64,
    /// RNG seed; `None` keeps the device generator state.
    pub seed: Option<u64>,
}

impl Default for SynthesisOptions {
    fn default() -> Self {
        Self {
            noise_scale: 0.667,
            noise_scale_duration: 0.8,
            speaking_rate: 1.0,
            seed: None,
        }
    }
}

impl SynthesisOptions {
    /// Defaults taken from the checkpoint config instead of hard-coded ones.
    pub fn from_config(config: &VitsConfig) -> Self {
        Self {
            noise_scale: config.noise_scale,
            noise_scale_duration: config.noise_scale_duration,
            speaking_rate: config.speaking_rate,
            seed: None,
        }
    }
}

/// Result of one synthesis call.
pub struct SynthesisResult {
    /// Generated waveform, `(1, 1, samples)`.
    pub audio: Tensor,
    /// Sample rate of the waveform in Hz.
    pub sample_rate: u32,
    /// Number of latent frames fed to the decoder.
    pub frames: usize,
}

impl SynthesisResult {
    /// Waveform as a flat sample vector.
    pub fn samples(&self) -> candle_core::Result<Vec<f32>> {
        self.audio.flatten_all()?.to_dtype(DType::F32)?.to_vec1()
    }
}

/// Loaded VITS model: tokenizer, text encoder, duration predictor, prior
/// flow and HiFi-GAN decoder.
#[derive(Debug)]
pub struct Model {
    tokenizer: VitsTokenizer,
    text_encoder: TextEncoder,
    duration_predictor: DurationModel,
    flow: ResidualCouplingBlock,
    decoder: HifiGanDecoder,
    config: VitsConfig,
    device: Device,
    dtype: DType,
}

impl Model {
    pub(crate) fn new(
        tokenizer: VitsTokenizer,
        text_encoder: TextEncoder,
        duration_predictor: DurationModel,
        flow: ResidualCouplingBlock,
        decoder: HifiGanDecoder,
        config: VitsConfig,
        device: Device,
        dtype: DType,
    ) -> Self {
        Self {
            tokenizer,
            text_encoder,
            duration_predictor,
            flow,
            decoder,
            config,
            device,
            dtype,
        }
    }

    /// The checkpoint configuration.
    pub fn config(&self) -> &VitsConfig {
        &self.config
    }

    /// Sample rate of generated audio in Hz.
    pub fn sample_rate(&self) -> u32 {
        self.config.sampling_rate as u32
    }

    /// The text tokenizer.
    pub fn tokenizer(&self) -> &VitsTokenizer {
        &self.tokenizer
    }

    /// Synthesize a waveform for `text`.
    pub fn synthesize(&self, text: &str, options: &SynthesisOptions) -> Result<SynthesisResult> {
        let text = text.trim();
        if text.is_empty() {
            bail!("input text is empty");
        }
        let token_ids = self.tokenizer.encode(text);
        if token_ids.is_empty() {
            bail!("input text contains no characters known to the model vocabulary");
        }
        if let Some(seed) = options.seed {
            self.device.set_seed(seed)?;
        }

        let input_ids = Tensor::from_vec(token_ids.clone(), (1, token_ids.len()), &self.device)?;
        let encoded = self.text_encoder.forward(&input_ids)?;

        // Duration prediction works on (batch, hidden, length) states.
        let hidden_states = encoded.hidden_states.transpose(1, 2)?.contiguous()?;
        let log_durations = self
            .duration_predictor
            .log_durations(&hidden_states, options.noise_scale_duration)?
            .flatten_all()?
            .to_dtype(DType::F32)?
            .to_vec1::<f32>()?;
        let frames = frames_per_token(&log_durations, options.speaking_rate);
        let total_frames = frames.iter().map(|&d| d as usize).sum::<usize>();

        tracing::debug!(
            tokens = token_ids.len(),
            frames = total_frames,
            "predicted durations"
        );

        let prior_means = expand_priors(&encoded.prior_means, &frames)?;
        let prior_log_stddev = expand_priors(&encoded.prior_log_stddev, &frames)?;

        let noise = Tensor::randn(0f32, 1f32, prior_means.shape(), &self.device)?
            .to_dtype(self.dtype)?;
        let latents =
            (prior_means + (noise * prior_log_stddev.exp()?)?.affine(options.noise_scale, 0.0)?)?;

        let latents = self.flow.inverse(&latents)?;
        let audio = self.decoder.forward(&latents)?;

        Ok(SynthesisResult {
            audio,
            sample_rate: self.sample_rate(),
            frames: total_frames,
        })
    }
}

/// Repeat each time column of `(1, channels, length)` by its frame count,
/// producing `(1, channels, total_frames)`.
fn expand_priors(values: &Tensor, frames: &[u32]) -> candle_core::Result<Tensor> {
    let (_, channels, length) = values.dims3()?;
    let dtype = values.dtype();
    let rows = values.to_dtype(DType::F32)?.to_vec3::<f32>()?;
    let total: usize = frames.iter().map(|&d| d as usize).sum();

    let mut expanded = Vec::with_capacity(channels * total);
    for row in &rows[0] {
        for (i, &count) in frames.iter().take(length).enumerate() {
            for _ in 0..count {
                expanded.push(row[i]);
            }
        }
    }
    Tensor::from_vec(expanded, (1, channels, total), values.device())?.to_dtype(dtype)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_priors_repeats_columns() {
        let device = Device::Cpu;
        let values =
            Tensor::from_vec(vec![1f32, 2.0, 3.0, 10.0, 20.0, 30.0], (1, 2, 3), &device).unwrap();
        let expanded = expand_priors(&values, &[2, 0, 1]).unwrap();
        assert_eq!(expanded.dims(), &[1, 2, 3]);
        let rows = expanded.to_vec3::<f32>().unwrap();
        assert_eq!(rows[0][0], vec![1.0, 1.0, 3.0]);
        assert_eq!(rows[0][1], vec![10.0, 10.0, 30.0]);
    }

    #[test]
    fn test_expand_priors_total_length() {
        let device = Device::Cpu;
        let values = Tensor::from_vec(vec![0f32; 4], (1, 2, 2), &device).unwrap();
        let expanded = expand_priors(&values, &[3, 2]).unwrap();
        assert_eq!(expanded.dims(), &[1, 2, 5]);
    }

    #[test]
    fn test_default_options() {
        let options = SynthesisOptions::default();
        assert_eq!(options.noise_scale, 0.667);
        assert_eq!(options.noise_scale_duration, 0.8);
        assert_eq!(options.speaking_rate, 1.0);
        assert!(options.seed.is_none());
    }
}
