//! # Candle MMS-TTS
//!
//! A Rust implementation of VITS text-to-speech inference for the Candle ML
//! framework, targeting the `facebook/mms-tts-*` checkpoints.
//!
//! This crate provides:
//! - High-level model API (`model::Model`)
//! - Character tokenizer for the MMS vocabularies
//! - Waveform post-processing and WAV output (`audio`)
//!
//! ## Architecture Overview
//!
//! VITS synthesizes audio in one pass:
//! 1. Characters are embedded and encoded by a transformer with windowed
//!    relative attention, producing a Gaussian prior per token
//! 2. A flow-based duration predictor samples how many latent frames each
//!    token occupies
//! 3. The prior statistics are expanded to frame rate, sampled, and mapped
//!    through a residual-coupling flow
//! 4. A HiFi-GAN decoder upsamples the latents to the waveform
//!
//! ## Example
//!
//! ```no_run
//! use mms_tts::model::{LoaderConfig, ModelLoader, SynthesisOptions};
//! use candle_core::Device;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let loader = ModelLoader::from_local_dir("/path/to/model")?;
//! let model = loader.load_tts_model(&Device::Cpu, &LoaderConfig::default())?;
//! let result = model.synthesize("ہیلو", &SynthesisOptions::default())?;
//! # Ok(())
//! # }
//! ```

pub mod audio;
pub mod config;
pub mod io;
pub mod model;
pub mod nn;
pub mod text;

pub use config::VitsConfig;
pub use io::DEFAULT_MODEL_ID;
pub use model::{LoaderConfig, Model, ModelLoader, SynthesisOptions, SynthesisResult};
