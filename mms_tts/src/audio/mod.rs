//! Waveform post-processing and WAV output.

use std::path::Path;

use anyhow::{Context, Result, bail};

pub mod decoder;

pub use decoder::HifiGanDecoder;

/// Scale samples in place so the loudest one sits at full scale.
///
/// Returns the peak found before scaling. Silent audio is left untouched so
/// the scaling never divides by zero.
pub fn peak_normalize(samples: &mut [f32]) -> f32 {
    let peak = samples.iter().fold(0f32, |max, s| max.max(s.abs()));
    if peak > 0.0 {
        for sample in samples.iter_mut() {
            *sample /= peak;
        }
    }
    peak
}

/// Write mono samples to a 16-bit PCM WAV file.
pub fn write_wav(path: &Path, samples: &[f32], sample_rate: u32) -> Result<()> {
    use hound::{SampleFormat, WavSpec, WavWriter};

    if samples.is_empty() {
        bail!("no audio was generated: the model produced 0 samples");
    }

    let spec = WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut writer = WavWriter::create(path, spec)
        .with_context(|| format!("failed to create WAV file at {}", path.display()))?;
    for &sample in samples {
        let sample = sample.clamp(-1.0, 1.0);
        writer.write_sample((sample * i16::MAX as f32) as i16)?;
    }
    writer.finalize().context("failed to finalize WAV file")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peak_normalize_scales_to_unity() {
        let mut samples = vec![0.1, -0.5, 0.25];
        let peak = peak_normalize(&mut samples);
        assert_eq!(peak, 0.5);
        let max = samples.iter().fold(0f32, |m, s| m.max(s.abs()));
        assert_eq!(max, 1.0);
        assert_eq!(samples[1], -1.0);
    }

    #[test]
    fn test_peak_normalize_preserves_shape() {
        let mut samples = vec![0.2, -0.4];
        peak_normalize(&mut samples);
        // Relative amplitudes survive the scaling.
        assert!((samples[0] / samples[1] + 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_peak_normalize_leaves_silence_alone() {
        let mut samples = vec![0.0; 16];
        let peak = peak_normalize(&mut samples);
        assert_eq!(peak, 0.0);
        assert!(samples.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_write_wav_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        let samples: Vec<f32> = (0..160)
            .map(|i| (i as f32 * 0.1).sin() * 0.8)
            .collect();
        write_wav(&path, &samples, 16_000).unwrap();

        let mut reader = hound::WavReader::open(&path).unwrap();
        let spec = reader.spec();
        assert_eq!(spec.sample_rate, 16_000);
        assert_eq!(spec.channels, 1);
        assert_eq!(spec.bits_per_sample, 16);
        let decoded: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(decoded.len(), samples.len());
        let expected = (samples[1] * i16::MAX as f32) as i16;
        assert_eq!(decoded[1], expected);
    }

    #[test]
    fn test_write_wav_rejects_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.wav");
        assert!(write_wav(&path, &[], 16_000).is_err());
    }
}
