//! Model configuration deserialized from the checkpoint's `config.json`.
//!
//! Field defaults match the published `facebook/mms-tts-*` configurations, so
//! a partial config still produces a usable model description.

use candle_nn::Activation;
use serde::Deserialize;

/// Configuration for a VITS text-to-speech checkpoint.
///
/// Only the inference path is described here: text encoder, duration
/// predictor, prior flow and the HiFi-GAN decoder. Training-only sections of
/// the checkpoint (posterior encoder, discriminators) have no counterpart.
#[derive(Debug, Clone, Deserialize)]
pub struct VitsConfig {
    /// Size of the character vocabulary.
    pub vocab_size: usize,

    /// Hidden size of the text encoder and conditioning networks.
    #[serde(default = "default_hidden_size")]
    pub hidden_size: usize,

    /// Number of transformer layers in the text encoder.
    #[serde(default = "default_num_hidden_layers")]
    pub num_hidden_layers: usize,

    /// Number of attention heads per encoder layer.
    #[serde(default = "default_num_attention_heads")]
    pub num_attention_heads: usize,

    /// Relative-attention window size; `None` disables relative attention.
    #[serde(default = "default_window_size")]
    pub window_size: Option<usize>,

    /// Whether attention projections carry a bias.
    #[serde(default = "default_true")]
    pub use_bias: bool,

    /// Inner dimension of the encoder feed-forward convolutions.
    #[serde(default = "default_ffn_dim")]
    pub ffn_dim: usize,

    /// Kernel size of the encoder feed-forward convolutions.
    #[serde(default = "default_ffn_kernel_size")]
    pub ffn_kernel_size: usize,

    /// Activation used by the encoder feed-forward.
    #[serde(default = "default_hidden_act")]
    pub hidden_act: Activation,

    /// Layer norm epsilon for the encoder.
    #[serde(default = "default_layer_norm_eps")]
    pub layer_norm_eps: f64,

    /// Channel count of the latent carried through the prior flow.
    #[serde(default = "default_flow_size")]
    pub flow_size: usize,

    /// Whether the checkpoint uses the stochastic duration predictor.
    #[serde(default = "default_true")]
    pub use_stochastic_duration_predictor: bool,

    /// Kernel size used throughout the duration predictor.
    #[serde(default = "default_duration_predictor_kernel_size")]
    pub duration_predictor_kernel_size: usize,

    /// Filter channels of the deterministic duration predictor.
    #[serde(default = "default_duration_predictor_filter_channels")]
    pub duration_predictor_filter_channels: usize,

    /// Number of conv flows in the stochastic duration predictor.
    #[serde(default = "default_duration_predictor_num_flows")]
    pub duration_predictor_num_flows: usize,

    /// Number of spline bins per conv flow.
    #[serde(default = "default_duration_predictor_flow_bins")]
    pub duration_predictor_flow_bins: usize,

    /// Spline tail bound; inputs outside it pass through linearly.
    #[serde(default = "default_duration_predictor_tail_bound")]
    pub duration_predictor_tail_bound: f64,

    /// Channel count the duration-predictor flows operate on.
    #[serde(default = "default_depth_separable_channels")]
    pub depth_separable_channels: usize,

    /// Layers in each dilated depth-separable conv stack.
    #[serde(default = "default_depth_separable_num_layers")]
    pub depth_separable_num_layers: usize,

    /// Number of residual coupling layers in the prior flow.
    #[serde(default = "default_prior_encoder_num_flows")]
    pub prior_encoder_num_flows: usize,

    /// WaveNet layers inside each coupling layer.
    #[serde(default = "default_prior_encoder_num_wavenet_layers")]
    pub prior_encoder_num_wavenet_layers: usize,

    /// Kernel size of the WaveNet convolutions.
    #[serde(default = "default_wavenet_kernel_size")]
    pub wavenet_kernel_size: usize,

    /// Dilation growth rate of the WaveNet convolutions.
    #[serde(default = "default_wavenet_dilation_rate")]
    pub wavenet_dilation_rate: usize,

    /// Initial channel count of the HiFi-GAN upsampling stack.
    #[serde(default = "default_upsample_initial_channel")]
    pub upsample_initial_channel: usize,

    /// Per-stage upsampling factors of the decoder.
    #[serde(default = "default_upsample_rates")]
    pub upsample_rates: Vec<usize>,

    /// Transposed-conv kernel sizes matching `upsample_rates`.
    #[serde(default = "default_upsample_kernel_sizes")]
    pub upsample_kernel_sizes: Vec<usize>,

    /// Kernel sizes of the decoder residual blocks.
    #[serde(default = "default_resblock_kernel_sizes")]
    pub resblock_kernel_sizes: Vec<usize>,

    /// Dilations of the decoder residual blocks, one list per kernel size.
    #[serde(default = "default_resblock_dilation_sizes")]
    pub resblock_dilation_sizes: Vec<Vec<usize>>,

    /// Negative slope of the decoder's leaky ReLU activations.
    #[serde(default = "default_leaky_relu_slope")]
    pub leaky_relu_slope: f64,

    /// Default speaking rate; durations scale by its inverse.
    #[serde(default = "default_speaking_rate")]
    pub speaking_rate: f64,

    /// Standard deviation multiplier for the prior noise.
    #[serde(default = "default_noise_scale")]
    pub noise_scale: f64,

    /// Standard deviation multiplier for the duration-predictor noise.
    #[serde(default = "default_noise_scale_duration")]
    pub noise_scale_duration: f64,

    /// Output sample rate declared by the checkpoint.
    #[serde(default = "default_sampling_rate")]
    pub sampling_rate: usize,

    /// Number of speakers; MMS checkpoints are single speaker.
    #[serde(default = "default_num_speakers")]
    pub num_speakers: usize,

    /// Speaker embedding size; zero for single-speaker checkpoints.
    #[serde(default)]
    pub speaker_embedding_size: usize,
}

fn default_hidden_size() -> usize {
    192
}
fn default_num_hidden_layers() -> usize {
    6
}
fn default_num_attention_heads() -> usize {
    2
}
fn default_window_size() -> Option<usize> {
    Some(4)
}
fn default_true() -> bool {
    true
}
fn default_ffn_dim() -> usize {
    768
}
fn default_ffn_kernel_size() -> usize {
    3
}
fn default_hidden_act() -> Activation {
    Activation::Relu
}
fn default_layer_norm_eps() -> f64 {
    1e-5
}
fn default_flow_size() -> usize {
    192
}
fn default_duration_predictor_kernel_size() -> usize {
    3
}
fn default_duration_predictor_filter_channels() -> usize {
    256
}
fn default_duration_predictor_num_flows() -> usize {
    4
}
fn default_duration_predictor_flow_bins() -> usize {
    10
}
fn default_duration_predictor_tail_bound() -> f64 {
    5.0
}
fn default_depth_separable_channels() -> usize {
    2
}
fn default_depth_separable_num_layers() -> usize {
    3
}
fn default_prior_encoder_num_flows() -> usize {
    4
}
fn default_prior_encoder_num_wavenet_layers() -> usize {
    4
}
fn default_wavenet_kernel_size() -> usize {
    5
}
fn default_wavenet_dilation_rate() -> usize {
    1
}
fn default_upsample_initial_channel() -> usize {
    512
}
fn default_upsample_rates() -> Vec<usize> {
    vec![8, 8, 2, 2]
}
fn default_upsample_kernel_sizes() -> Vec<usize> {
    vec![16, 16, 4, 4]
}
fn default_resblock_kernel_sizes() -> Vec<usize> {
    vec![3, 7, 11]
}
fn default_resblock_dilation_sizes() -> Vec<Vec<usize>> {
    vec![vec![1, 3, 5], vec![1, 3, 5], vec![1, 3, 5]]
}
fn default_leaky_relu_slope() -> f64 {
    0.1
}
fn default_speaking_rate() -> f64 {
    1.0
}
fn default_noise_scale() -> f64 {
    0.667
}
fn default_noise_scale_duration() -> f64 {
    0.8
}
fn default_sampling_rate() -> usize {
    16000
}
fn default_num_speakers() -> usize {
    1
}

impl VitsConfig {
    /// Load configuration from a JSON string.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Head dimension of the encoder attention.
    pub fn head_dim(&self) -> usize {
        self.hidden_size / self.num_attention_heads
    }

    /// Total upsampling factor of the decoder (samples per latent frame).
    pub fn upsample_factor(&self) -> usize {
        self.upsample_rates.iter().product()
    }
}
