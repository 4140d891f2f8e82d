use clap::Parser;
use std::path::PathBuf;

/// MMS-TTS demo
///
/// Serve a small web UI for text-to-speech synthesis, or synthesize a single
/// utterance to a WAV file. Models are automatically downloaded from
/// HuggingFace Hub.
#[derive(Parser, Debug)]
#[command(name = "mms-tts-demo")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// HuggingFace model ID (e.g., "facebook/mms-tts-urd-script_arabic")
    #[arg(short = 'M', long)]
    pub model: Option<String>,

    /// Path to a local model directory (overrides --model)
    #[arg(short = 'p', long)]
    pub model_path: Option<PathBuf>,

    /// Synthesize this text to --output and exit instead of serving
    #[arg(short, long)]
    pub text: Option<String>,

    /// Output WAV file path for --text mode
    #[arg(short, long, default_value = "output.wav")]
    pub output: PathBuf,

    /// Address to bind the web UI to
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,

    /// Port to bind the web UI to
    #[arg(long, default_value_t = 5000)]
    pub port: u16,

    /// Device to use (cpu, cuda, metal)
    #[arg(long, default_value = "cpu")]
    pub device: String,

    /// Random seed for reproducible generation
    #[arg(long)]
    pub seed: Option<u64>,

    /// Speaking rate; higher is faster
    #[arg(long)]
    pub speaking_rate: Option<f64>,

    /// Standard deviation multiplier for the prior noise
    #[arg(long)]
    pub noise_scale: Option<f64>,

    /// Standard deviation multiplier for the duration noise
    #[arg(long)]
    pub noise_scale_duration: Option<f64>,
}
