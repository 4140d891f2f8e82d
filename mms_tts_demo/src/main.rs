//! Web demo for MMS text-to-speech synthesis.
//!
//! Loads a VITS checkpoint and serves a small web UI where text entered in
//! a textbox is synthesized to audio. Can also run one-shot from the command
//! line.
//!
//! # Usage
//!
//! ```bash
//! # Serve the web UI (default model downloads automatically)
//! mms-tts-demo
//!
//! # Serve on a different address
//! mms-tts-demo --host 0.0.0.0 --port 8080
//!
//! # Use another MMS checkpoint
//! mms-tts-demo --model facebook/mms-tts-eng
//!
//! # One-shot synthesis to a WAV file
//! mms-tts-demo --text "ہیلو دنیا" --output hello.wav
//! ```

mod args;
mod server;

use anyhow::{Context, Result, bail};
use candle_core::Device;
use clap::Parser;

use mms_tts::audio::{peak_normalize, write_wav};
use mms_tts::io::get_model_path;
use mms_tts::model::{LoaderConfig, Model, ModelLoader, SynthesisOptions};

use args::Cli;

fn parse_device(name: &str) -> Result<Device> {
    match name {
        "cpu" => Ok(Device::Cpu),
        "cuda" | "cuda:0" => {
            #[cfg(feature = "cuda")]
            {
                Ok(Device::new_cuda(0)?)
            }
            #[cfg(not(feature = "cuda"))]
            {
                bail!("CUDA support not compiled. Rebuild with --features cuda")
            }
        }
        "metal" => {
            #[cfg(feature = "metal")]
            {
                Ok(Device::new_metal(0)?)
            }
            #[cfg(not(feature = "metal"))]
            {
                bail!("Metal support not compiled. Rebuild with --features metal")
            }
        }
        other => bail!("Unknown device: {}. Use cpu, cuda, or metal", other),
    }
}

fn synthesis_options(cli: &Cli, model: &Model) -> SynthesisOptions {
    let mut options = SynthesisOptions::from_config(model.config());
    if let Some(rate) = cli.speaking_rate {
        options.speaking_rate = rate;
    }
    if let Some(scale) = cli.noise_scale {
        options.noise_scale = scale;
    }
    if let Some(scale) = cli.noise_scale_duration {
        options.noise_scale_duration = scale;
    }
    options.seed = cli.seed;
    options
}

fn synthesize_to_file(cli: &Cli, model: &Model, text: &str) -> Result<()> {
    let options = synthesis_options(cli, model);
    let result = model.synthesize(text, &options)?;
    let mut samples = result.samples()?;
    peak_normalize(&mut samples);
    write_wav(&cli.output, &samples, result.sample_rate)?;
    println!(
        "Wrote {} ({} samples at {}Hz)",
        cli.output.display(),
        samples.len(),
        result.sample_rate
    );
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let device = parse_device(&cli.device)?;

    // The model must load before anything is served; a failure here is
    // reported and the process exits without binding the port.
    let model_dir = get_model_path(cli.model.as_deref(), cli.model_path.as_deref())?;
    let loader = ModelLoader::from_local_dir(&model_dir)?;
    let model = loader
        .load_tts_model(&device, &LoaderConfig::default())
        .context("Failed to load model")?;
    tracing::info!(
        sample_rate = model.sample_rate(),
        vocab = model.tokenizer().vocab_size(),
        "Model loaded"
    );

    if let Some(text) = &cli.text {
        return synthesize_to_file(&cli, &model, text);
    }

    let options = synthesis_options(&cli, &model);
    server::serve(model, options, &cli.host, cli.port).await
}
