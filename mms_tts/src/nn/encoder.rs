//! Text encoder: scaled embeddings, relative-attention transformer layers and
//! the projection to the prior distribution parameters.

use candle_core::{Result, Tensor};
use candle_nn::{Activation, Conv1d, Conv1dConfig, Embedding, Module, VarBuilder, embedding};

use crate::config::VitsConfig;
use crate::nn::attention::RelativeAttention;
use crate::nn::conv1d;

/// Position-wise feed-forward realized as two 1D convolutions over time.
#[derive(Debug, Clone)]
struct FeedForward {
    conv_1: Conv1d,
    conv_2: Conv1d,
    kernel_size: usize,
    activation: Activation,
}

impl FeedForward {
    fn load(config: &VitsConfig, vb: VarBuilder) -> Result<Self> {
        // Padding is applied explicitly so even kernels stay length-preserving.
        let conv_1 = conv1d(
            config.hidden_size,
            config.ffn_dim,
            config.ffn_kernel_size,
            Conv1dConfig::default(),
            vb.pp("conv_1"),
        )?;
        let conv_2 = conv1d(
            config.ffn_dim,
            config.hidden_size,
            config.ffn_kernel_size,
            Conv1dConfig::default(),
            vb.pp("conv_2"),
        )?;
        Ok(Self {
            conv_1,
            conv_2,
            kernel_size: config.ffn_kernel_size,
            activation: config.hidden_act,
        })
    }

    fn pad_time(&self, xs: &Tensor) -> Result<Tensor> {
        if self.kernel_size > 1 {
            xs.pad_with_zeros(2, (self.kernel_size - 1) / 2, self.kernel_size / 2)
        } else {
            Ok(xs.clone())
        }
    }

    /// `(batch, length, hidden)` in, same shape out.
    fn forward(&self, hidden_states: &Tensor) -> Result<Tensor> {
        let xs = hidden_states.transpose(1, 2)?.contiguous()?;
        let xs = self.conv_1.forward(&self.pad_time(&xs)?)?;
        let xs = self.activation.forward(&xs)?;
        let xs = self.conv_2.forward(&self.pad_time(&xs)?)?;
        xs.transpose(1, 2)?.contiguous()
    }
}

#[derive(Debug, Clone)]
struct EncoderLayer {
    attention: RelativeAttention,
    layer_norm: candle_nn::LayerNorm,
    feed_forward: FeedForward,
    final_layer_norm: candle_nn::LayerNorm,
}

impl EncoderLayer {
    fn load(config: &VitsConfig, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            attention: RelativeAttention::load(config, vb.pp("attention"))?,
            layer_norm: candle_nn::layer_norm(
                config.hidden_size,
                config.layer_norm_eps,
                vb.pp("layer_norm"),
            )?,
            feed_forward: FeedForward::load(config, vb.pp("feed_forward"))?,
            final_layer_norm: candle_nn::layer_norm(
                config.hidden_size,
                config.layer_norm_eps,
                vb.pp("final_layer_norm"),
            )?,
        })
    }

    fn forward(&self, hidden_states: &Tensor) -> Result<Tensor> {
        let attn = self.attention.forward(hidden_states)?;
        let hidden_states = self.layer_norm.forward(&(hidden_states + attn)?)?;
        let ff = self.feed_forward.forward(&hidden_states)?;
        self.final_layer_norm.forward(&(hidden_states + ff)?)
    }
}

/// Output of the text encoder.
pub struct EncoderOutput {
    /// Hidden states, `(batch, length, hidden)`.
    pub hidden_states: Tensor,
    /// Prior means, `(batch, flow_size, length)`.
    pub prior_means: Tensor,
    /// Prior log standard deviations, `(batch, flow_size, length)`.
    pub prior_log_stddev: Tensor,
}

/// Transformer text encoder producing prior statistics per token.
#[derive(Debug)]
pub struct TextEncoder {
    embed_tokens: Embedding,
    layers: Vec<EncoderLayer>,
    project: Conv1d,
    embed_scale: f64,
    flow_size: usize,
}

impl TextEncoder {
    pub fn load(config: &VitsConfig, vb: VarBuilder) -> Result<Self> {
        let embed_tokens = embedding(config.vocab_size, config.hidden_size, vb.pp("embed_tokens"))?;
        let layers_vb = vb.pp("encoder").pp("layers");
        let mut layers = Vec::with_capacity(config.num_hidden_layers);
        for i in 0..config.num_hidden_layers {
            layers.push(EncoderLayer::load(config, layers_vb.pp(i))?);
        }
        let project = conv1d(
            config.hidden_size,
            config.flow_size * 2,
            1,
            Conv1dConfig::default(),
            vb.pp("project"),
        )?;
        Ok(Self {
            embed_tokens,
            layers,
            project,
            embed_scale: (config.hidden_size as f64).sqrt(),
            flow_size: config.flow_size,
        })
    }

    /// Encode token ids `(batch, length)` into hidden states and prior stats.
    pub fn forward(&self, input_ids: &Tensor) -> Result<EncoderOutput> {
        let mut hidden_states = self
            .embed_tokens
            .forward(input_ids)?
            .affine(self.embed_scale, 0.0)?;
        for layer in &self.layers {
            hidden_states = layer.forward(&hidden_states)?;
        }
        let stats = self
            .project
            .forward(&hidden_states.transpose(1, 2)?.contiguous()?)?;
        let prior_means = stats.narrow(1, 0, self.flow_size)?.contiguous()?;
        let prior_log_stddev = stats.narrow(1, self.flow_size, self.flow_size)?.contiguous()?;
        Ok(EncoderOutput {
            hidden_states,
            prior_means,
            prior_log_stddev,
        })
    }
}
