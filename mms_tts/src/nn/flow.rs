//! Residual-coupling flow between the text prior and the decoder latents.
//!
//! At inference the flow only runs in reverse: latents sampled from the text
//! prior are mapped back through each coupling layer, flipping the channel
//! halves between layers. The coupling layers are mean-only, so the inverse
//! is a plain subtraction of the predicted shift.

use candle_core::{Result, Tensor};
use candle_nn::{Conv1d, Conv1dConfig, Module, VarBuilder};

use crate::config::VitsConfig;
use crate::nn::{conv1d, same_padding};

/// Gated dilated conv stack shared by the coupling layers.
#[derive(Debug, Clone)]
pub struct WaveNet {
    in_layers: Vec<Conv1d>,
    res_skip_layers: Vec<Conv1d>,
    hidden_size: usize,
}

impl WaveNet {
    pub fn load(config: &VitsConfig, num_layers: usize, vb: VarBuilder) -> Result<Self> {
        let hidden_size = config.hidden_size;
        let kernel_size = config.wavenet_kernel_size;
        let mut in_layers = Vec::with_capacity(num_layers);
        let mut res_skip_layers = Vec::with_capacity(num_layers);
        for i in 0..num_layers {
            let dilation = config.wavenet_dilation_rate.pow(i as u32);
            in_layers.push(conv1d(
                hidden_size,
                2 * hidden_size,
                kernel_size,
                Conv1dConfig {
                    padding: same_padding(kernel_size, dilation),
                    dilation,
                    ..Default::default()
                },
                vb.pp("in_layers").pp(i),
            )?);
            // The last layer only produces a skip connection.
            let res_skip_channels = if i < num_layers - 1 {
                2 * hidden_size
            } else {
                hidden_size
            };
            res_skip_layers.push(conv1d(
                hidden_size,
                res_skip_channels,
                1,
                Conv1dConfig::default(),
                vb.pp("res_skip_layers").pp(i),
            )?);
        }
        Ok(Self {
            in_layers,
            res_skip_layers,
            hidden_size,
        })
    }

    pub fn forward(&self, inputs: &Tensor) -> Result<Tensor> {
        let mut inputs = inputs.clone();
        let mut outputs = inputs.zeros_like()?;
        let num_layers = self.in_layers.len();
        for i in 0..num_layers {
            let hidden = self.in_layers[i].forward(&inputs)?;
            let in_act = hidden.narrow(1, 0, self.hidden_size)?;
            let gate_act = hidden.narrow(1, self.hidden_size, self.hidden_size)?;
            let acts = (in_act.tanh()? * candle_nn::ops::sigmoid(&gate_act)?)?;

            let res_skip = self.res_skip_layers[i].forward(&acts)?;
            if i < num_layers - 1 {
                let res = res_skip.narrow(1, 0, self.hidden_size)?;
                let skip = res_skip.narrow(1, self.hidden_size, self.hidden_size)?;
                inputs = (inputs + res)?;
                outputs = (outputs + skip)?;
            } else {
                outputs = (outputs + res_skip)?;
            }
        }
        Ok(outputs)
    }
}

/// Mean-only coupling layer: the first channel half conditions a shift of
/// the second half.
#[derive(Debug, Clone)]
struct ResidualCouplingLayer {
    conv_pre: Conv1d,
    wavenet: WaveNet,
    conv_post: Conv1d,
    half_channels: usize,
}

impl ResidualCouplingLayer {
    fn load(config: &VitsConfig, vb: VarBuilder) -> Result<Self> {
        let half_channels = config.flow_size / 2;
        Ok(Self {
            conv_pre: conv1d(
                half_channels,
                config.hidden_size,
                1,
                Conv1dConfig::default(),
                vb.pp("conv_pre"),
            )?,
            wavenet: WaveNet::load(config, config.prior_encoder_num_wavenet_layers, vb.pp("wavenet"))?,
            conv_post: conv1d(
                config.hidden_size,
                half_channels,
                1,
                Conv1dConfig::default(),
                vb.pp("conv_post"),
            )?,
            half_channels,
        })
    }

    fn inverse(&self, inputs: &Tensor) -> Result<Tensor> {
        let first_half = inputs.narrow(1, 0, self.half_channels)?.contiguous()?;
        let second_half = inputs.narrow(1, self.half_channels, self.half_channels)?;

        let hidden = self.conv_pre.forward(&first_half)?;
        let hidden = self.wavenet.forward(&hidden)?;
        let mean = self.conv_post.forward(&hidden)?;

        let second_half = (second_half - mean)?;
        Tensor::cat(&[&first_half, &second_half], 1)
    }
}

/// Stack of coupling layers with a channel flip between each.
#[derive(Debug)]
pub struct ResidualCouplingBlock {
    flows: Vec<ResidualCouplingLayer>,
    flip_indices: Tensor,
}

impl ResidualCouplingBlock {
    pub fn load(config: &VitsConfig, vb: VarBuilder) -> Result<Self> {
        let flows_vb = vb.pp("flows");
        let mut flows = Vec::with_capacity(config.prior_encoder_num_flows);
        for i in 0..config.prior_encoder_num_flows {
            flows.push(ResidualCouplingLayer::load(config, flows_vb.pp(i))?);
        }
        let reversed: Vec<u32> = (0..config.flow_size as u32).rev().collect();
        let flip_indices = Tensor::from_vec(reversed, config.flow_size, vb.device())?;
        Ok(Self {
            flows,
            flip_indices,
        })
    }

    /// Map prior latents `(batch, flow, time)` back to decoder latents.
    pub fn inverse(&self, inputs: &Tensor) -> Result<Tensor> {
        let mut latents = inputs.clone();
        for flow in self.flows.iter().rev() {
            latents = latents.index_select(&self.flip_indices, 1)?;
            latents = flow.inverse(&latents)?;
        }
        Ok(latents)
    }
}
