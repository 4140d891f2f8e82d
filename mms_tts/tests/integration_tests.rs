//! Integration tests that require downloading models from HuggingFace.
//!
//! These tests are gated behind the `integration-tests` feature flag to avoid
//! downloading model files during normal test runs.
//!
//! Run with: `cargo test --features integration-tests`
//!
//! Note: first run downloads ~150MB of model weights.

#![cfg(feature = "integration-tests")]

use std::path::PathBuf;

use candle_core::{DType, Device};

use mms_tts::DEFAULT_MODEL_ID;
use mms_tts::audio::{peak_normalize, write_wav};
use mms_tts::io::get_model_path;
use mms_tts::model::{LoaderConfig, Model, ModelLoader, SynthesisOptions};

const TEST_TEXT: &str = "ہیلو، یہ ایک ٹیسٹ ہے۔";

fn get_model(model_id: &str) -> PathBuf {
    get_model_path(Some(model_id), None).expect("Failed to download model")
}

/// Get the best available device for testing.
fn get_test_device() -> Device {
    #[cfg(feature = "cuda")]
    {
        if let Ok(device) = Device::new_cuda(0) {
            eprintln!("Using CUDA device for tests");
            return device;
        }
    }

    #[cfg(all(target_os = "macos", feature = "metal"))]
    {
        if let Ok(device) = Device::new_metal(0) {
            eprintln!("Using Metal device for tests");
            return device;
        }
    }

    eprintln!("Using CPU device for tests");
    Device::Cpu
}

fn load_default_model(device: &Device) -> Model {
    let model_dir = get_model(DEFAULT_MODEL_ID);
    let loader = ModelLoader::from_local_dir(&model_dir).expect("Failed to create loader");
    loader
        .load_tts_model(device, &LoaderConfig { dtype: DType::F32 })
        .expect("Failed to load model")
}

#[test]
fn test_load_default_model() {
    let device = get_test_device();
    let model = load_default_model(&device);
    assert_eq!(model.sample_rate(), 16_000);
    assert!(model.tokenizer().vocab_size() > 0);
}

#[test]
fn test_synthesize_produces_audio() {
    let device = get_test_device();
    let model = load_default_model(&device);

    let options = SynthesisOptions {
        seed: Some(42),
        ..SynthesisOptions::from_config(model.config())
    };
    let result = model
        .synthesize(TEST_TEXT, &options)
        .expect("Synthesis failed");

    assert_eq!(result.sample_rate, model.sample_rate());
    assert!(result.frames > 0);

    let samples = result.samples().expect("Failed to read samples");
    // One latent frame maps to 256 output samples at the default config.
    assert_eq!(samples.len(), result.frames * model.config().upsample_factor());
    let peak = samples.iter().fold(0f32, |m, s| m.max(s.abs()));
    assert!(peak > 0.0, "generated audio is silent");
    assert!(peak <= 1.0, "decoder output exceeds full scale: {peak}");
}

#[test]
fn test_normalized_audio_hits_full_scale() {
    let device = get_test_device();
    let model = load_default_model(&device);

    let result = model
        .synthesize(TEST_TEXT, &SynthesisOptions::default())
        .expect("Synthesis failed");
    let mut samples = result.samples().expect("Failed to read samples");
    peak_normalize(&mut samples);

    let peak = samples.iter().fold(0f32, |m, s| m.max(s.abs()));
    assert_eq!(peak, 1.0);
}

#[test]
fn test_synthesized_wav_round_trip() {
    let device = get_test_device();
    let model = load_default_model(&device);

    let result = model
        .synthesize(TEST_TEXT, &SynthesisOptions::default())
        .expect("Synthesis failed");
    let mut samples = result.samples().expect("Failed to read samples");
    peak_normalize(&mut samples);

    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let path = dir.path().join("out.wav");
    write_wav(&path, &samples, result.sample_rate).expect("Failed to write WAV");

    let reader = hound::WavReader::open(&path).expect("Failed to open WAV");
    assert_eq!(reader.spec().sample_rate, result.sample_rate);
    assert_eq!(reader.len() as usize, samples.len());
}

#[test]
fn test_empty_input_is_rejected() {
    let device = get_test_device();
    let model = load_default_model(&device);

    assert!(model.synthesize("", &SynthesisOptions::default()).is_err());
    assert!(model.synthesize("   ", &SynthesisOptions::default()).is_err());
}
