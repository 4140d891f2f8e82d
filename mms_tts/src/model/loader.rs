//! Model loading from a local checkpoint directory.
//!
//! # Example
//!
//! ```no_run
//! use mms_tts::model::{LoaderConfig, ModelLoader};
//! use candle_core::Device;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let loader = ModelLoader::from_local_dir("/path/to/model")?;
//! let model = loader.load_tts_model(&Device::Cpu, &LoaderConfig::default())?;
//! # Ok(())
//! # }
//! ```

use std::path::{Path, PathBuf};

use candle_core::{DType, Device};
use candle_nn::VarBuilder;

use crate::audio::HifiGanDecoder;
use crate::config::VitsConfig;
use crate::model::Model;
use crate::nn::duration::DurationModel;
use crate::nn::encoder::TextEncoder;
use crate::nn::flow::ResidualCouplingBlock;
use crate::text::VitsTokenizer;

/// Configuration for model loading.
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// Data type for model weights (default: F32)
    pub dtype: DType,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self { dtype: DType::F32 }
    }
}

/// Errors that can occur during model loading.
///
/// Each variant maps to one of the checkpoint files: `config.json`,
/// `model.safetensors` or `vocab.json` (plus its optional
/// `tokenizer_config.json`).
#[derive(Debug)]
pub enum LoadError {
    /// `config.json` missing or unreadable
    ConfigError(String),
    /// `model.safetensors` missing
    WeightsError(String),
    /// `vocab.json` missing, or inconsistent with the model's embedding table
    TokenizerError(String),
    /// Candle error while mapping weights or building the networks
    CandleError(candle_core::Error),
    /// Malformed JSON in a checkpoint file
    JsonError(serde_json::Error),
}

impl std::fmt::Display for LoadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ConfigError(msg) => write!(f, "Config error: {}", msg),
            Self::WeightsError(msg) => write!(f, "Weights error: {}", msg),
            Self::TokenizerError(msg) => write!(f, "Tokenizer error: {}", msg),
            Self::CandleError(e) => write!(f, "Candle error: {}", e),
            Self::JsonError(e) => write!(f, "JSON error: {}", e),
        }
    }
}

impl std::error::Error for LoadError {}

impl From<candle_core::Error> for LoadError {
    fn from(e: candle_core::Error) -> Self {
        Self::CandleError(e)
    }
}

impl From<serde_json::Error> for LoadError {
    fn from(e: serde_json::Error) -> Self {
        Self::JsonError(e)
    }
}

/// Loader for VITS checkpoints.
///
/// Handles loading model config, weights and tokenizer vocabulary from a
/// directory.
#[derive(Debug)]
pub struct ModelLoader {
    /// Path to model directory
    model_dir: PathBuf,
    /// Model configuration
    model_config: VitsConfig,
}

impl ModelLoader {
    /// Create a loader from a local model directory.
    ///
    /// The directory should contain:
    /// - `config.json`: model configuration
    /// - `model.safetensors`: model weights
    /// - `vocab.json`: character vocabulary
    /// - `tokenizer_config.json` (optional): tokenizer settings
    pub fn from_local_dir(model_dir: impl AsRef<Path>) -> Result<Self, LoadError> {
        let model_dir = model_dir.as_ref().to_path_buf();

        let config_path = model_dir.join("config.json");
        let config_str = std::fs::read_to_string(&config_path).map_err(|e| {
            LoadError::ConfigError(format!(
                "Failed to read config.json at {}: {}",
                config_path.display(),
                e
            ))
        })?;
        let model_config: VitsConfig = serde_json::from_str(&config_str)?;

        Ok(Self {
            model_dir,
            model_config,
        })
    }

    /// Get the model directory path.
    pub fn model_dir(&self) -> &Path {
        &self.model_dir
    }

    /// Get the model configuration.
    pub fn model_config(&self) -> &VitsConfig {
        &self.model_config
    }

    /// Find the model weights file, preferring safetensors.
    fn find_weights_file(&self) -> Option<PathBuf> {
        let possible_files = ["model.safetensors", "model-00001-of-00001.safetensors"];
        for filename in &possible_files {
            let path = self.model_dir.join(filename);
            if path.exists() {
                return Some(path);
            }
        }
        None
    }

    /// Load the TTS model onto `device`.
    pub fn load_tts_model(
        &self,
        device: &Device,
        config: &LoaderConfig,
    ) -> Result<Model, LoadError> {
        let weights_path = self.find_weights_file().ok_or_else(|| {
            LoadError::WeightsError(format!(
                "No model weights found in {}",
                self.model_dir.display()
            ))
        })?;

        tracing::info!("Loading model weights from {}", weights_path.display());

        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[weights_path], config.dtype, device)?
        };

        let model_config = &self.model_config;
        let text_encoder = TextEncoder::load(model_config, vb.pp("text_encoder"))?;
        let duration_predictor =
            DurationModel::load(model_config, vb.pp("duration_predictor"))?;
        let flow = ResidualCouplingBlock::load(model_config, vb.pp("flow"))?;
        let decoder = HifiGanDecoder::load(model_config, vb.pp("decoder"))?;

        let tokenizer = VitsTokenizer::from_dir(&self.model_dir)
            .map_err(|e| LoadError::TokenizerError(e.to_string()))?;
        if tokenizer.vocab_size() > model_config.vocab_size {
            return Err(LoadError::TokenizerError(format!(
                "vocabulary has {} entries but the model embeds only {}",
                tokenizer.vocab_size(),
                model_config.vocab_size
            )));
        }

        Ok(Model::new(
            tokenizer,
            text_encoder,
            duration_predictor,
            flow,
            decoder,
            model_config.clone(),
            device.clone(),
            config.dtype,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_directory_is_a_config_error() {
        let err = ModelLoader::from_local_dir("/nonexistent/model/dir").unwrap_err();
        assert!(
            matches!(err, LoadError::ConfigError(_)),
            "unexpected error: {err}"
        );
        assert!(err.to_string().contains("config.json"));
    }

    #[test]
    fn test_malformed_config_is_a_json_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("config.json"), "{not json").unwrap();
        let err = ModelLoader::from_local_dir(dir.path()).unwrap_err();
        assert!(
            matches!(err, LoadError::JsonError(_)),
            "unexpected error: {err}"
        );
    }

    #[test]
    fn test_missing_weights_fail_before_model_construction() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("config.json"), r#"{"vocab_size": 40}"#).unwrap();

        let loader = ModelLoader::from_local_dir(dir.path()).unwrap();
        assert_eq!(loader.model_config().vocab_size, 40);

        let err = loader
            .load_tts_model(&Device::Cpu, &LoaderConfig::default())
            .unwrap_err();
        assert!(
            matches!(err, LoadError::WeightsError(_)),
            "unexpected error: {err}"
        );
    }
}
