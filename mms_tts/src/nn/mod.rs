//! Neural building blocks shared by the VITS sub-networks.
//!
//! The checkpoint stores most convolution weights under PyTorch weight
//! normalization, so the builders here accept either a plain `weight` tensor
//! or the `weight_g`/`weight_v` pair (and its newer parametrized spelling)
//! and reconstruct the effective weight at load time.

pub mod attention;
pub mod duration;
pub mod encoder;
pub mod flow;
pub mod spline;

use candle_core::{Result, Tensor};
use candle_nn::{
    Conv1d, Conv1dConfig, ConvTranspose1d, ConvTranspose1dConfig, LayerNorm, Module, VarBuilder,
};

/// Load a (possibly weight-normalized) convolution weight tensor.
///
/// Weight normalization stores a direction tensor `v` and a per-output-channel
/// magnitude `g`; the effective weight is `g * v / ||v||` with the norm taken
/// over all dimensions but the first.
fn conv_weight(vb: &VarBuilder, shape: (usize, usize, usize)) -> Result<Tensor> {
    if vb.contains_tensor("weight") {
        return vb.get(shape, "weight");
    }
    let candidates = [
        ("weight_g", "weight_v"),
        (
            "parametrizations.weight.original0",
            "parametrizations.weight.original1",
        ),
    ];
    for (g_name, v_name) in candidates {
        if vb.contains_tensor(v_name) {
            let g = vb.get((shape.0, 1, 1), g_name)?;
            let v = vb.get(shape, v_name)?;
            let norm = v.sqr()?.sum_keepdim((1, 2))?.sqrt()?;
            return v.broadcast_mul(&g.broadcast_div(&norm)?);
        }
    }
    candle_core::bail!(
        "cannot find conv weight of shape {:?} (tried weight, weight_g/weight_v and parametrized variants)",
        shape
    )
}

/// Build a `Conv1d`, reconstructing weight-normalized weights when present.
///
/// The bias is optional because some checkpoint convolutions (e.g. the
/// decoder's final projection) are stored without one.
pub fn conv1d(
    in_channels: usize,
    out_channels: usize,
    kernel_size: usize,
    config: Conv1dConfig,
    vb: VarBuilder,
) -> Result<Conv1d> {
    let weight = conv_weight(&vb, (out_channels, in_channels / config.groups, kernel_size))?;
    let bias = if vb.contains_tensor("bias") {
        Some(vb.get(out_channels, "bias")?)
    } else {
        None
    };
    Ok(Conv1d::new(weight, bias, config))
}

/// Build a `ConvTranspose1d` with the same weight-norm handling.
///
/// PyTorch stores transposed-conv weights as `(in, out, kernel)` with the
/// magnitude along the input-channel dimension.
pub fn conv_transpose1d(
    in_channels: usize,
    out_channels: usize,
    kernel_size: usize,
    config: ConvTranspose1dConfig,
    vb: VarBuilder,
) -> Result<ConvTranspose1d> {
    let weight = conv_weight(&vb, (in_channels, out_channels, kernel_size))?;
    let bias = if vb.contains_tensor("bias") {
        Some(vb.get(out_channels, "bias")?)
    } else {
        None
    };
    Ok(ConvTranspose1d::new(weight, bias, config))
}

/// Padding for a "same"-length dilated convolution with an odd kernel.
pub(crate) fn same_padding(kernel_size: usize, dilation: usize) -> usize {
    (kernel_size * dilation - dilation) / 2
}

/// Layer normalization over the channel dimension of `(batch, channels, time)`
/// tensors, as used between the depth-separable convolutions.
#[derive(Debug, Clone)]
pub struct ChannelLayerNorm(LayerNorm);

impl ChannelLayerNorm {
    pub fn new(channels: usize, eps: f64, vb: VarBuilder) -> Result<Self> {
        Ok(Self(candle_nn::layer_norm(channels, eps, vb)?))
    }
}

impl Module for ChannelLayerNorm {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        self.0
            .forward(&xs.transpose(1, 2)?.contiguous()?)?
            .transpose(1, 2)?
            .contiguous()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use std::collections::HashMap;

    #[test]
    fn test_conv_weight_plain() {
        let device = Device::Cpu;
        let weight = Tensor::ones((4, 2, 3), DType::F32, &device).unwrap();
        let tensors = HashMap::from([("weight".to_string(), weight)]);
        let vb = VarBuilder::from_tensors(tensors, DType::F32, &device);
        let loaded = conv_weight(&vb, (4, 2, 3)).unwrap();
        assert_eq!(loaded.dims(), &[4, 2, 3]);
    }

    #[test]
    fn test_conv_weight_normalized() {
        let device = Device::Cpu;
        // v has a single nonzero entry per output channel, so the effective
        // weight collapses to g at that entry.
        let v = Tensor::from_vec(vec![3.0f32, 0.0, 0.0, 4.0], (2, 1, 2), &device).unwrap();
        let g = Tensor::from_vec(vec![6.0f32, 2.0], (2, 1, 1), &device).unwrap();
        let tensors = HashMap::from([
            ("weight_v".to_string(), v),
            ("weight_g".to_string(), g),
        ]);
        let vb = VarBuilder::from_tensors(tensors, DType::F32, &device);
        let w: Vec<f32> = conv_weight(&vb, (2, 1, 2))
            .unwrap()
            .flatten_all()
            .unwrap()
            .to_vec1()
            .unwrap();
        assert!((w[0] - 6.0).abs() < 1e-5);
        assert!(w[1].abs() < 1e-5);
        assert!(w[2].abs() < 1e-5);
        assert!((w[3] - 2.0).abs() < 1e-5);
    }

    #[test]
    fn test_conv_weight_missing() {
        let device = Device::Cpu;
        let vb = VarBuilder::from_tensors(HashMap::new(), DType::F32, &device);
        assert!(conv_weight(&vb, (1, 1, 1)).is_err());
    }

    #[test]
    fn test_same_padding() {
        assert_eq!(same_padding(3, 1), 1);
        assert_eq!(same_padding(3, 9), 9);
        assert_eq!(same_padding(5, 1), 2);
        assert_eq!(same_padding(11, 5), 25);
    }
}
