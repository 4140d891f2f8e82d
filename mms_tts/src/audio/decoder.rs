//! HiFi-GAN waveform decoder.
//!
//! Upsamples the flow latents to audio through a stack of transposed
//! convolutions, each followed by a bank of multi-receptive-field residual
//! blocks whose outputs are averaged.

use candle_core::{Result, Tensor};
use candle_nn::{Conv1d, Conv1dConfig, ConvTranspose1d, ConvTranspose1dConfig, Module, VarBuilder};

use crate::config::VitsConfig;
use crate::nn::{conv1d, conv_transpose1d, same_padding};

fn leaky_relu(xs: &Tensor, slope: f64) -> Result<Tensor> {
    candle_nn::ops::leaky_relu(xs, slope)
}

/// Pair of conv stacks with interleaved leaky ReLUs; the first stack is
/// dilated, the second is not.
#[derive(Debug, Clone)]
struct ResidualBlock {
    convs1: Vec<Conv1d>,
    convs2: Vec<Conv1d>,
    leaky_relu_slope: f64,
}

impl ResidualBlock {
    fn load(
        channels: usize,
        kernel_size: usize,
        dilations: &[usize],
        leaky_relu_slope: f64,
        vb: VarBuilder,
    ) -> Result<Self> {
        let mut convs1 = Vec::with_capacity(dilations.len());
        let mut convs2 = Vec::with_capacity(dilations.len());
        for (i, &dilation) in dilations.iter().enumerate() {
            convs1.push(conv1d(
                channels,
                channels,
                kernel_size,
                Conv1dConfig {
                    padding: same_padding(kernel_size, dilation),
                    dilation,
                    ..Default::default()
                },
                vb.pp("convs1").pp(i),
            )?);
            convs2.push(conv1d(
                channels,
                channels,
                kernel_size,
                Conv1dConfig {
                    padding: same_padding(kernel_size, 1),
                    ..Default::default()
                },
                vb.pp("convs2").pp(i),
            )?);
        }
        Ok(Self {
            convs1,
            convs2,
            leaky_relu_slope,
        })
    }

    fn forward(&self, inputs: &Tensor) -> Result<Tensor> {
        let mut inputs = inputs.clone();
        for (conv1, conv2) in self.convs1.iter().zip(self.convs2.iter()) {
            let hidden = conv1.forward(&leaky_relu(&inputs, self.leaky_relu_slope)?)?;
            let hidden = conv2.forward(&leaky_relu(&hidden, self.leaky_relu_slope)?)?;
            inputs = (inputs + hidden)?;
        }
        Ok(inputs)
    }
}

/// HiFi-GAN generator mapping flow latents `(batch, flow, time)` to a
/// waveform `(batch, 1, time * upsample_factor)`.
#[derive(Debug)]
pub struct HifiGanDecoder {
    conv_pre: Conv1d,
    upsampler: Vec<ConvTranspose1d>,
    resblocks: Vec<ResidualBlock>,
    conv_post: Conv1d,
    num_kernels: usize,
    leaky_relu_slope: f64,
}

impl HifiGanDecoder {
    pub fn load(config: &VitsConfig, vb: VarBuilder) -> Result<Self> {
        let num_kernels = config.resblock_kernel_sizes.len();
        let initial = config.upsample_initial_channel;

        let conv_pre = conv1d(
            config.flow_size,
            initial,
            7,
            Conv1dConfig {
                padding: 3,
                ..Default::default()
            },
            vb.pp("conv_pre"),
        )?;

        let mut upsampler = Vec::with_capacity(config.upsample_rates.len());
        for (i, (&rate, &kernel_size)) in config
            .upsample_rates
            .iter()
            .zip(config.upsample_kernel_sizes.iter())
            .enumerate()
        {
            upsampler.push(conv_transpose1d(
                initial / 2usize.pow(i as u32),
                initial / 2usize.pow(i as u32 + 1),
                kernel_size,
                ConvTranspose1dConfig {
                    stride: rate,
                    padding: (kernel_size - rate) / 2,
                    ..Default::default()
                },
                vb.pp("upsampler").pp(i),
            )?);
        }

        let mut resblocks = Vec::with_capacity(upsampler.len() * num_kernels);
        for i in 0..upsampler.len() {
            let channels = initial / 2usize.pow(i as u32 + 1);
            for (j, (&kernel_size, dilations)) in config
                .resblock_kernel_sizes
                .iter()
                .zip(config.resblock_dilation_sizes.iter())
                .enumerate()
            {
                resblocks.push(ResidualBlock::load(
                    channels,
                    kernel_size,
                    dilations,
                    config.leaky_relu_slope,
                    vb.pp("resblocks").pp(i * num_kernels + j),
                )?);
            }
        }

        let conv_post = conv1d(
            initial / 2usize.pow(upsampler.len() as u32),
            1,
            7,
            Conv1dConfig {
                padding: 3,
                ..Default::default()
            },
            vb.pp("conv_post"),
        )?;

        Ok(Self {
            conv_pre,
            upsampler,
            resblocks,
            conv_post,
            num_kernels,
            leaky_relu_slope: config.leaky_relu_slope,
        })
    }

    pub fn forward(&self, latents: &Tensor) -> Result<Tensor> {
        let mut hidden = self.conv_pre.forward(latents)?;
        for (i, upsample) in self.upsampler.iter().enumerate() {
            hidden = upsample.forward(&leaky_relu(&hidden, self.leaky_relu_slope)?)?;

            let mut sum = self.resblocks[i * self.num_kernels].forward(&hidden)?;
            for j in 1..self.num_kernels {
                sum = (sum + self.resblocks[i * self.num_kernels + j].forward(&hidden)?)?;
            }
            hidden = (sum / self.num_kernels as f64)?;
        }
        // The final activation uses the default slope, not the configured one.
        let hidden = leaky_relu(&hidden, 0.01)?;
        self.conv_post.forward(&hidden)?.tanh()
    }
}
