//! Token duration prediction.
//!
//! MMS checkpoints use the stochastic predictor: a conditioning conv stack
//! feeding a stack of normalizing flows (an elementwise affine plus
//! spline-based conv flows) that is run in reverse on Gaussian noise to draw
//! log-durations. The deterministic conv predictor is kept for checkpoints
//! that opt out of the stochastic one.

use candle_core::{DType, Result, Tensor};
use candle_nn::{Conv1d, Conv1dConfig, Module, VarBuilder};

use crate::config::VitsConfig;
use crate::nn::spline::spline_inverse;
use crate::nn::{ChannelLayerNorm, conv1d, same_padding};

/// Stack of dilated depthwise convolutions with pointwise mixing, used both
/// for the conditioning net and inside each conv flow.
#[derive(Debug, Clone)]
struct DilatedDepthSeparableConv {
    convs_dilated: Vec<Conv1d>,
    convs_pointwise: Vec<Conv1d>,
    norms_1: Vec<ChannelLayerNorm>,
    norms_2: Vec<ChannelLayerNorm>,
}

impl DilatedDepthSeparableConv {
    fn load(config: &VitsConfig, vb: VarBuilder) -> Result<Self> {
        let channels = config.hidden_size;
        let kernel_size = config.duration_predictor_kernel_size;
        let num_layers = config.depth_separable_num_layers;

        let mut convs_dilated = Vec::with_capacity(num_layers);
        let mut convs_pointwise = Vec::with_capacity(num_layers);
        let mut norms_1 = Vec::with_capacity(num_layers);
        let mut norms_2 = Vec::with_capacity(num_layers);
        for i in 0..num_layers {
            let dilation = kernel_size.pow(i as u32);
            convs_dilated.push(conv1d(
                channels,
                channels,
                kernel_size,
                Conv1dConfig {
                    padding: same_padding(kernel_size, dilation),
                    dilation,
                    groups: channels,
                    ..Default::default()
                },
                vb.pp("convs_dilated").pp(i),
            )?);
            convs_pointwise.push(conv1d(
                channels,
                channels,
                1,
                Conv1dConfig::default(),
                vb.pp("convs_pointwise").pp(i),
            )?);
            norms_1.push(ChannelLayerNorm::new(
                channels,
                config.layer_norm_eps,
                vb.pp("norms_1").pp(i),
            )?);
            norms_2.push(ChannelLayerNorm::new(
                channels,
                config.layer_norm_eps,
                vb.pp("norms_2").pp(i),
            )?);
        }
        Ok(Self {
            convs_dilated,
            convs_pointwise,
            norms_1,
            norms_2,
        })
    }

    fn forward(&self, inputs: &Tensor, global_conditioning: Option<&Tensor>) -> Result<Tensor> {
        let mut inputs = match global_conditioning {
            Some(global) => (inputs + global)?,
            None => inputs.clone(),
        };
        for i in 0..self.convs_dilated.len() {
            let hidden = self.convs_dilated[i].forward(&inputs)?;
            let hidden = self.norms_1[i].forward(&hidden)?.gelu_erf()?;
            let hidden = self.convs_pointwise[i].forward(&hidden)?;
            let hidden = self.norms_2[i].forward(&hidden)?.gelu_erf()?;
            inputs = (inputs + hidden)?;
        }
        Ok(inputs)
    }
}

/// First flow in the stack; only its inverse is used at inference.
#[derive(Debug, Clone)]
struct ElementwiseAffine {
    translate: Tensor,
    log_scale: Tensor,
}

impl ElementwiseAffine {
    fn load(config: &VitsConfig, vb: VarBuilder) -> Result<Self> {
        let channels = config.depth_separable_channels;
        Ok(Self {
            translate: vb.get((channels, 1), "translate")?,
            log_scale: vb.get((channels, 1), "log_scale")?,
        })
    }

    fn inverse(&self, inputs: &Tensor) -> Result<Tensor> {
        inputs
            .broadcast_sub(&self.translate)?
            .broadcast_mul(&self.log_scale.neg()?.exp()?)
    }
}

/// Coupling flow whose transform is a rational-quadratic spline conditioned
/// on the first channel half and the duration conditioning.
#[derive(Debug, Clone)]
struct ConvFlow {
    conv_pre: Conv1d,
    conv_dds: DilatedDepthSeparableConv,
    conv_proj: Conv1d,
    half_channels: usize,
    num_bins: usize,
    tail_bound: f64,
    filter_scale: f64,
}

impl ConvFlow {
    fn load(config: &VitsConfig, vb: VarBuilder) -> Result<Self> {
        let half_channels = config.depth_separable_channels / 2;
        let filter_channels = config.hidden_size;
        let num_bins = config.duration_predictor_flow_bins;
        Ok(Self {
            conv_pre: conv1d(
                half_channels,
                filter_channels,
                1,
                Conv1dConfig::default(),
                vb.pp("conv_pre"),
            )?,
            conv_dds: DilatedDepthSeparableConv::load(config, vb.pp("conv_dds"))?,
            conv_proj: conv1d(
                filter_channels,
                half_channels * (num_bins * 3 - 1),
                1,
                Conv1dConfig::default(),
                vb.pp("conv_proj"),
            )?,
            half_channels,
            num_bins,
            tail_bound: config.duration_predictor_tail_bound,
            filter_scale: (filter_channels as f64).sqrt(),
        })
    }

    fn inverse(&self, inputs: &Tensor, global_conditioning: &Tensor) -> Result<Tensor> {
        let (batch, _, time) = inputs.dims3()?;
        let first_half = inputs.narrow(1, 0, self.half_channels)?.contiguous()?;
        let second_half = inputs.narrow(1, self.half_channels, self.half_channels)?;

        let hidden = self.conv_pre.forward(&first_half)?;
        let hidden = self.conv_dds.forward(&hidden, Some(global_conditioning))?;
        let hidden = self.conv_proj.forward(&hidden)?;

        // (batch, half * (3*bins - 1), time) -> rows of per-step bin params.
        let params = hidden
            .reshape((batch, self.half_channels, self.num_bins * 3 - 1, time))?
            .permute((0, 1, 3, 2))?
            .contiguous()?
            .to_dtype(DType::F32)?
            .reshape((batch * self.half_channels * time, self.num_bins * 3 - 1))?
            .to_vec2::<f32>()?;
        let values = second_half
            .contiguous()?
            .to_dtype(DType::F32)?
            .reshape(batch * self.half_channels * time)?
            .to_vec1::<f32>()?;

        let mut transformed = Vec::with_capacity(values.len());
        for (value, row) in values.iter().zip(params.iter()) {
            let widths: Vec<f32> = row[..self.num_bins]
                .iter()
                .map(|v| v / self.filter_scale as f32)
                .collect();
            let heights: Vec<f32> = row[self.num_bins..2 * self.num_bins]
                .iter()
                .map(|v| v / self.filter_scale as f32)
                .collect();
            let derivatives = &row[2 * self.num_bins..];
            transformed.push(spline_inverse(
                *value,
                &widths,
                &heights,
                derivatives,
                self.tail_bound,
            ));
        }

        let second_half = Tensor::from_vec(
            transformed,
            (batch, self.half_channels, time),
            inputs.device(),
        )?
        .to_dtype(inputs.dtype())?;
        Tensor::cat(&[&first_half, &second_half], 1)
    }
}

/// Flow-based duration predictor sampling log-durations from noise.
#[derive(Debug)]
pub struct StochasticDurationPredictor {
    conv_pre: Conv1d,
    conv_dds: DilatedDepthSeparableConv,
    conv_proj: Conv1d,
    affine: ElementwiseAffine,
    conv_flows: Vec<ConvFlow>,
}

impl StochasticDurationPredictor {
    pub fn load(config: &VitsConfig, vb: VarBuilder) -> Result<Self> {
        let channels = config.hidden_size;
        let kernel_size = config.duration_predictor_kernel_size;
        let flows_vb = vb.pp("flows");
        let affine = ElementwiseAffine::load(config, flows_vb.pp(0))?;
        let mut conv_flows = Vec::with_capacity(config.duration_predictor_num_flows);
        for i in 0..config.duration_predictor_num_flows {
            conv_flows.push(ConvFlow::load(config, flows_vb.pp(i + 1))?);
        }
        Ok(Self {
            conv_pre: conv1d(
                channels,
                channels,
                kernel_size,
                Conv1dConfig {
                    padding: kernel_size / 2,
                    ..Default::default()
                },
                vb.pp("conv_pre"),
            )?,
            conv_dds: DilatedDepthSeparableConv::load(config, vb.pp("conv_dds"))?,
            conv_proj: conv1d(channels, channels, 1, Conv1dConfig::default(), vb.pp("conv_proj"))?,
            affine,
            conv_flows,
        })
    }

    /// Sample log-durations for encoder states `(batch, hidden, time)`.
    pub fn sample(&self, hidden_states: &Tensor, noise_scale: f64) -> Result<Tensor> {
        let conditioning = self.conv_pre.forward(hidden_states)?;
        let conditioning = self.conv_dds.forward(&conditioning, None)?;
        let conditioning = self.conv_proj.forward(&conditioning)?;

        let (batch, _, time) = hidden_states.dims3()?;
        let mut latents = Tensor::randn(0f32, 1f32, (batch, 2, time), hidden_states.device())?
            .to_dtype(hidden_states.dtype())?
            .affine(noise_scale, 0.0)?;

        // Reverse order through the flow stack. The first conv flow is
        // skipped at inference, matching the reference reverse path.
        for flow in self.conv_flows[1..].iter().rev() {
            latents = flow.inverse(&latents, &conditioning)?;
        }
        latents = self.affine.inverse(&latents)?;

        latents.narrow(1, 0, 1)?.contiguous()
    }
}

/// Deterministic conv duration predictor, for checkpoints with
/// `use_stochastic_duration_predictor = false`.
#[derive(Debug)]
pub struct DurationPredictor {
    conv_1: Conv1d,
    norm_1: ChannelLayerNorm,
    conv_2: Conv1d,
    norm_2: ChannelLayerNorm,
    proj: Conv1d,
}

impl DurationPredictor {
    pub fn load(config: &VitsConfig, vb: VarBuilder) -> Result<Self> {
        let kernel_size = config.duration_predictor_kernel_size;
        let filter_channels = config.duration_predictor_filter_channels;
        let padding = kernel_size / 2;
        Ok(Self {
            conv_1: conv1d(
                config.hidden_size,
                filter_channels,
                kernel_size,
                Conv1dConfig {
                    padding,
                    ..Default::default()
                },
                vb.pp("conv_1"),
            )?,
            norm_1: ChannelLayerNorm::new(filter_channels, config.layer_norm_eps, vb.pp("norm_1"))?,
            conv_2: conv1d(
                filter_channels,
                filter_channels,
                kernel_size,
                Conv1dConfig {
                    padding,
                    ..Default::default()
                },
                vb.pp("conv_2"),
            )?,
            norm_2: ChannelLayerNorm::new(filter_channels, config.layer_norm_eps, vb.pp("norm_2"))?,
            proj: conv1d(filter_channels, 1, 1, Conv1dConfig::default(), vb.pp("proj"))?,
        })
    }

    /// Predict log-durations for encoder states `(batch, hidden, time)`.
    pub fn forward(&self, hidden_states: &Tensor) -> Result<Tensor> {
        let xs = self.conv_1.forward(hidden_states)?.relu()?;
        let xs = self.norm_1.forward(&xs)?;
        let xs = self.conv_2.forward(&xs)?.relu()?;
        let xs = self.norm_2.forward(&xs)?;
        self.proj.forward(&xs)
    }
}

/// Either duration predictor, selected by the checkpoint config.
#[derive(Debug)]
pub enum DurationModel {
    Stochastic(StochasticDurationPredictor),
    Deterministic(DurationPredictor),
}

impl DurationModel {
    pub fn load(config: &VitsConfig, vb: VarBuilder) -> Result<Self> {
        if config.use_stochastic_duration_predictor {
            Ok(Self::Stochastic(StochasticDurationPredictor::load(config, vb)?))
        } else {
            Ok(Self::Deterministic(DurationPredictor::load(config, vb)?))
        }
    }

    /// Log-durations `(batch, 1, time)` for encoder states.
    pub fn log_durations(&self, hidden_states: &Tensor, noise_scale: f64) -> Result<Tensor> {
        match self {
            Self::Stochastic(predictor) => predictor.sample(hidden_states, noise_scale),
            Self::Deterministic(predictor) => predictor.forward(hidden_states),
        }
    }
}

/// Convert log-durations to integer frame counts per token.
///
/// `ceil(exp(log_duration) / speaking_rate)` per token; if every duration
/// rounds to zero the first token is given a single frame so downstream
/// stages always see at least one.
pub fn frames_per_token(log_durations: &[f32], speaking_rate: f64) -> Vec<u32> {
    let length_scale = 1.0 / speaking_rate;
    let mut durations: Vec<u32> = log_durations
        .iter()
        .map(|&lw| ((lw as f64).exp() * length_scale).ceil().max(0.0) as u32)
        .collect();
    if durations.iter().all(|&d| d == 0) && !durations.is_empty() {
        durations[0] = 1;
    }
    durations
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frames_per_token_rounds_up() {
        // exp(0) = 1 -> 1 frame; exp(1.0) ~ 2.72 -> 3 frames.
        let frames = frames_per_token(&[0.0, 1.0], 1.0);
        assert_eq!(frames, vec![1, 3]);
    }

    #[test]
    fn test_frames_per_token_speaking_rate() {
        // Doubling the speaking rate halves durations before rounding.
        let frames = frames_per_token(&[1.0], 2.0);
        assert_eq!(frames, vec![2]);
    }

    #[test]
    fn test_frames_per_token_never_all_zero() {
        let frames = frames_per_token(&[-20.0, -20.0], 1.0);
        assert_eq!(frames.iter().sum::<u32>(), 1);
        assert_eq!(frames[0], 1);
    }

    #[test]
    fn test_frames_per_token_negative_logs() {
        // exp(-0.5) ~ 0.61 still rounds up to one frame.
        let frames = frames_per_token(&[-0.5], 1.0);
        assert_eq!(frames, vec![1]);
    }
}
