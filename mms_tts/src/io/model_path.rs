use anyhow::{Context, Result, bail};
use hf_hub::api::sync::Api;
use hf_hub::{Repo, RepoType};
use std::path::{Path, PathBuf};

/// Checkpoint used when no model is specified: Urdu (Arabic script) MMS TTS.
pub const DEFAULT_MODEL_ID: &str = "facebook/mms-tts-urd-script_arabic";

/// Get the model directory, downloading from HuggingFace if needed.
pub fn get_model_path(model: Option<&str>, model_path: Option<&Path>) -> Result<PathBuf> {
    // If local path is specified, use it directly
    if let Some(path) = model_path {
        if !path.exists() {
            bail!("Model path does not exist: {:?}", path);
        }
        return Ok(path.to_path_buf());
    }

    let model_id = model.unwrap_or(DEFAULT_MODEL_ID).to_string();
    tracing::info!(model_id = %model_id, "Downloading model from HuggingFace");

    let api = Api::new().context("Failed to create HuggingFace API")?;
    let repo = api.repo(Repo::new(model_id.clone(), RepoType::Model));

    let mut model_dir: Option<PathBuf> = None;

    for filename in &["config.json", "model.safetensors", "vocab.json"] {
        match repo.get(filename) {
            Ok(path) => {
                tracing::debug!(file = %filename, "Downloaded");
                if model_dir.is_none() {
                    model_dir = path.parent().map(|p| p.to_path_buf());
                }
            }
            Err(e) => {
                bail!("Failed to download {}: {}", filename, e);
            }
        }
    }

    // Tokenizer settings are optional; defaults cover the MMS checkpoints.
    for filename in &["tokenizer_config.json", "special_tokens_map.json"] {
        match repo.get(filename) {
            Ok(_) => tracing::debug!(file = %filename, "Downloaded"),
            Err(_) => tracing::debug!(file = %filename, "Not found"),
        }
    }

    model_dir.ok_or_else(|| anyhow::anyhow!("Failed to determine model directory"))
}
