//! Windowed relative-position self-attention for the text encoder.
//!
//! Besides the usual scaled dot-product, each head learns relative key/value
//! embeddings over a fixed window. Relative scores are folded into absolute
//! positions (and attention probabilities back into relative positions) with
//! the pad-and-reshape trick from the reference model.

use candle_core::{Result, Tensor};
use candle_nn::{Linear, Module, VarBuilder, linear, linear_no_bias, ops::softmax_last_dim};

use crate::config::VitsConfig;

#[derive(Debug, Clone)]
pub struct RelativeAttention {
    q_proj: Linear,
    k_proj: Linear,
    v_proj: Linear,
    out_proj: Linear,
    emb_rel_k: Option<Tensor>,
    emb_rel_v: Option<Tensor>,
    num_heads: usize,
    head_dim: usize,
    scaling: f64,
}

impl RelativeAttention {
    pub fn load(config: &VitsConfig, vb: VarBuilder) -> Result<Self> {
        let hidden_size = config.hidden_size;
        let num_heads = config.num_attention_heads;
        let head_dim = config.head_dim();

        let project = |name: &str| -> Result<Linear> {
            if config.use_bias {
                linear(hidden_size, hidden_size, vb.pp(name))
            } else {
                linear_no_bias(hidden_size, hidden_size, vb.pp(name))
            }
        };
        let q_proj = project("q_proj")?;
        let k_proj = project("k_proj")?;
        let v_proj = project("v_proj")?;
        let out_proj = project("out_proj")?;

        let (emb_rel_k, emb_rel_v) = match config.window_size {
            Some(window) => (
                Some(vb.get((1, 2 * window + 1, head_dim), "emb_rel_k")?),
                Some(vb.get((1, 2 * window + 1, head_dim), "emb_rel_v")?),
            ),
            None => (None, None),
        };

        Ok(Self {
            q_proj,
            k_proj,
            v_proj,
            out_proj,
            emb_rel_k,
            emb_rel_v,
            num_heads,
            head_dim,
            scaling: (head_dim as f64).powf(-0.5),
        })
    }

    /// Fold `(heads, length, head_dim)` out of `(batch, length, hidden)`.
    fn shape_heads(&self, xs: &Tensor, batch: usize, length: usize) -> Result<Tensor> {
        xs.reshape((batch, length, self.num_heads, self.head_dim))?
            .transpose(1, 2)?
            .reshape((batch * self.num_heads, length, self.head_dim))?
            .contiguous()
    }

    /// Self-attention over `(batch, length, hidden)` hidden states.
    pub fn forward(&self, hidden_states: &Tensor) -> Result<Tensor> {
        let (batch, length, hidden_size) = hidden_states.dims3()?;

        let query = self.q_proj.forward(hidden_states)?;
        let query = self.shape_heads(&query, batch, length)?.affine(self.scaling, 0.0)?;
        let key = self.shape_heads(&self.k_proj.forward(hidden_states)?, batch, length)?;
        let value = self.shape_heads(&self.v_proj.forward(hidden_states)?, batch, length)?;

        let mut attn_weights = query.matmul(&key.transpose(1, 2)?.contiguous()?)?;
        if let Some(emb_rel_k) = &self.emb_rel_k {
            let key_relative = get_relative_embeddings(emb_rel_k, length)?;
            let relative_logits =
                query.broadcast_matmul(&key_relative.transpose(1, 2)?.contiguous()?)?;
            let rel_pos_bias = relative_position_to_absolute_position(&relative_logits)?;
            attn_weights = (attn_weights + rel_pos_bias)?;
        }

        let attn_probs = softmax_last_dim(&attn_weights)?;

        let mut attn_output = attn_probs.matmul(&value)?;
        if let Some(emb_rel_v) = &self.emb_rel_v {
            let value_relative = get_relative_embeddings(emb_rel_v, length)?;
            let relative_weights = absolute_position_to_relative_position(&attn_probs)?;
            attn_output =
                (attn_output + relative_weights.contiguous()?.broadcast_matmul(&value_relative)?)?;
        }

        let attn_output = attn_output
            .reshape((batch, self.num_heads, length, self.head_dim))?
            .transpose(1, 2)?
            .reshape((batch, length, hidden_size))?;
        self.out_proj.forward(&attn_output)
    }
}

/// Slice (and zero-pad when the sequence outgrows the window) the learned
/// relative embeddings to `2 * length - 1` positions.
fn get_relative_embeddings(embeddings: &Tensor, length: usize) -> Result<Tensor> {
    let window = (embeddings.dim(1)? - 1) / 2;
    let pad_length = length.saturating_sub(window + 1);
    let padded = if pad_length > 0 {
        embeddings.pad_with_zeros(1, pad_length, pad_length)?
    } else {
        embeddings.clone()
    };
    let start = (window + 1).saturating_sub(length);
    padded.narrow(1, start, 2 * length - 1)?.contiguous()
}

/// `(bh, L, 2L-1)` relative scores -> `(bh, L, L)` absolute scores, where
/// `abs[i][j] = rel[i][j - i + L - 1]`.
pub(crate) fn relative_position_to_absolute_position(x: &Tensor) -> Result<Tensor> {
    let (batch_heads, length, _) = x.dims3()?;
    let x = x.pad_with_zeros(2, 0, 1)?;
    let x = x.reshape((batch_heads, length * 2 * length))?;
    let x = x.pad_with_zeros(1, 0, length - 1)?;
    let x = x.reshape((batch_heads, length + 1, 2 * length - 1))?;
    x.narrow(1, 0, length)?.narrow(2, length - 1, length)?.contiguous()
}

/// `(bh, L, L)` absolute weights -> `(bh, L, 2L-1)` relative weights; the
/// inverse gather of [`relative_position_to_absolute_position`], with zeros
/// where the relative offset falls outside the sequence.
pub(crate) fn absolute_position_to_relative_position(x: &Tensor) -> Result<Tensor> {
    let (batch_heads, length, _) = x.dims3()?;
    let x = x.pad_with_zeros(2, 0, length - 1)?;
    let x = x.reshape((batch_heads, length * (2 * length - 1)))?;
    let x = x.pad_with_zeros(1, length, 0)?;
    let x = x.reshape((batch_heads, length, 2 * length))?;
    x.narrow(2, 1, 2 * length - 1)?.contiguous()
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    #[test]
    fn test_relative_to_absolute_matches_gather() {
        let device = Device::Cpu;
        let length = 3usize;
        let rel: Vec<f32> = (0..(length * (2 * length - 1))).map(|v| v as f32 + 1.0).collect();
        let rel_t = Tensor::from_vec(rel.clone(), (1, length, 2 * length - 1), &device).unwrap();
        let abs_t = relative_position_to_absolute_position(&rel_t).unwrap();
        let abs: Vec<Vec<f32>> = abs_t.squeeze(0).unwrap().to_vec2().unwrap();
        for i in 0..length {
            for j in 0..length {
                let offset = j + length - 1 - i;
                let expected = rel[i * (2 * length - 1) + offset];
                assert_eq!(abs[i][j], expected, "mismatch at ({i}, {j})");
            }
        }
    }

    #[test]
    fn test_absolute_to_relative_matches_scatter() {
        let device = Device::Cpu;
        let length = 3usize;
        let abs: Vec<f32> = (0..length * length).map(|v| v as f32 + 1.0).collect();
        let abs_t = Tensor::from_vec(abs.clone(), (1, length, length), &device).unwrap();
        let rel_t = absolute_position_to_relative_position(&abs_t).unwrap();
        let rel: Vec<Vec<f32>> = rel_t.squeeze(0).unwrap().to_vec2().unwrap();
        for i in 0..length {
            for k in 0..(2 * length - 1) {
                // rel[i][k] corresponds to absolute column j = i + k - (L-1).
                let expected = match (i + k).checked_sub(length - 1) {
                    Some(j) if j < length => abs[i * length + j],
                    _ => 0.0,
                };
                assert_eq!(rel[i][k], expected, "mismatch at ({i}, {k})");
            }
        }
    }

    #[test]
    fn test_position_transforms_roundtrip_single_element() {
        let device = Device::Cpu;
        let rel = Tensor::from_vec(vec![7.0f32], (1, 1, 1), &device).unwrap();
        let abs = relative_position_to_absolute_position(&rel).unwrap();
        assert_eq!(abs.flatten_all().unwrap().to_vec1::<f32>().unwrap(), vec![7.0]);
        let back = absolute_position_to_relative_position(&abs).unwrap();
        assert_eq!(back.flatten_all().unwrap().to_vec1::<f32>().unwrap(), vec![7.0]);
    }

    #[test]
    fn test_get_relative_embeddings_short_sequence() {
        let device = Device::Cpu;
        // Window 2 -> 5 stored positions, head_dim 1.
        let emb =
            Tensor::from_vec(vec![1.0f32, 2.0, 3.0, 4.0, 5.0], (1, 5, 1), &device).unwrap();
        let sliced = get_relative_embeddings(&emb, 2).unwrap();
        // 2*2-1 = 3 central positions.
        assert_eq!(
            sliced.flatten_all().unwrap().to_vec1::<f32>().unwrap(),
            vec![2.0, 3.0, 4.0]
        );
    }

    #[test]
    fn test_get_relative_embeddings_long_sequence_pads() {
        let device = Device::Cpu;
        let emb =
            Tensor::from_vec(vec![1.0f32, 2.0, 3.0, 4.0, 5.0], (1, 5, 1), &device).unwrap();
        let sliced = get_relative_embeddings(&emb, 4).unwrap();
        let values = sliced.flatten_all().unwrap().to_vec1::<f32>().unwrap();
        assert_eq!(values.len(), 7);
        // Out-of-window positions are zero at both ends.
        assert_eq!(values[0], 0.0);
        assert_eq!(values[6], 0.0);
        assert_eq!(values[1..6], [1.0, 2.0, 3.0, 4.0, 5.0]);
    }
}
