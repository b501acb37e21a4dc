//! Waveform visualization data
//!
//! Buckets decoded PCM into min/max/RMS triples at three resolutions so
//! clients can pick a density matching their viewport. Stored on the
//! media file as `waveform_{samples}` keys.

use serde::{Deserialize, Serialize};
use std::io::Cursor;

use transcribe_core::WaveformResolution;

use crate::PipelineError;

/// One resolution's worth of buckets
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaveformData {
    /// Peak per bucket in [0, 1]
    pub peaks: Vec<f32>,
    /// RMS per bucket in [0, 1]
    pub rms: Vec<f32>,
    pub sample_rate: u32,
    pub duration: f64,
}

/// Bucket raw samples into `target` peaks and RMS values
pub fn bucket_samples(samples: &[f32], target: usize) -> (Vec<f32>, Vec<f32>) {
    if samples.is_empty() || target == 0 {
        return (Vec::new(), Vec::new());
    }
    let bucket_size = (samples.len() as f64 / target as f64).max(1.0);
    let buckets = target.min(samples.len());

    let mut peaks = Vec::with_capacity(buckets);
    let mut rms = Vec::with_capacity(buckets);
    for i in 0..buckets {
        let start = (i as f64 * bucket_size) as usize;
        let end = (((i + 1) as f64 * bucket_size) as usize).min(samples.len());
        let slice = &samples[start..end.max(start + 1)];

        let peak = slice.iter().fold(0.0f32, |acc, s| acc.max(s.abs()));
        let mean_square = slice.iter().map(|s| s * s).sum::<f32>() / slice.len() as f32;
        peaks.push(peak.min(1.0));
        rms.push(mean_square.sqrt().min(1.0));
    }
    (peaks, rms)
}

/// Compute all standard resolutions from decoded samples
pub fn generate_from_samples(
    samples: &[f32],
    sample_rate: u32,
) -> Result<serde_json::Value, PipelineError> {
    if samples.is_empty() {
        return Err(PipelineError::Media("no audio content to render".to_string()));
    }
    let duration = samples.len() as f64 / sample_rate as f64;

    let mut cache = serde_json::Map::new();
    for resolution in WaveformResolution::ALL {
        let (peaks, rms) = bucket_samples(samples, resolution.samples());
        let data = WaveformData {
            peaks,
            rms,
            sample_rate,
            duration,
        };
        cache.insert(resolution.cache_key(), serde_json::to_value(data)?);
    }
    Ok(serde_json::Value::Object(cache))
}

/// Decode a WAV blob and compute waveform data. Non-WAV input is expected
/// to be transcoded before it reaches this stage.
pub fn generate_from_wav(bytes: &[u8]) -> Result<serde_json::Value, PipelineError> {
    let mut reader = hound::WavReader::new(Cursor::new(bytes))
        .map_err(|e| PipelineError::Media(format!("cannot decode audio: {e}")))?;
    let spec = reader.spec();

    let samples: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<Result<_, _>>()
            .map_err(|e| PipelineError::Media(format!("cannot decode audio: {e}")))?,
        hound::SampleFormat::Int => {
            let max = (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / max))
                .collect::<Result<_, _>>()
                .map_err(|e| PipelineError::Media(format!("cannot decode audio: {e}")))?
        },
    };

    // mixdown to mono for visualization
    let mono: Vec<f32> = if spec.channels > 1 {
        samples
            .chunks(spec.channels as usize)
            .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
            .collect()
    } else {
        samples
    };

    generate_from_samples(&mono, spec.sample_rate)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(len: usize, amplitude: f32) -> Vec<f32> {
        (0..len)
            .map(|i| amplitude * (i as f32 * 0.1).sin())
            .collect()
    }

    #[test]
    fn buckets_match_requested_resolution() {
        let samples = sine(44_100, 0.8);
        let (peaks, rms) = bucket_samples(&samples, 500);
        assert_eq!(peaks.len(), 500);
        assert_eq!(rms.len(), 500);
        assert!(peaks.iter().all(|p| (0.0..=1.0).contains(p)));
        // RMS never exceeds the peak of its bucket
        for (p, r) in peaks.iter().zip(&rms) {
            assert!(r <= p);
        }
    }

    #[test]
    fn short_input_yields_fewer_buckets() {
        let samples = sine(100, 0.5);
        let (peaks, _) = bucket_samples(&samples, 500);
        assert_eq!(peaks.len(), 100);
    }

    #[test]
    fn empty_input_is_rejected() {
        assert!(generate_from_samples(&[], 44_100).is_err());
        let (peaks, rms) = bucket_samples(&[], 500);
        assert!(peaks.is_empty() && rms.is_empty());
    }

    #[test]
    fn all_three_resolutions_are_emitted() {
        let value = generate_from_samples(&sine(48_000, 0.9), 48_000).unwrap();
        let map = value.as_object().unwrap();
        assert!(map.contains_key("waveform_500"));
        assert!(map.contains_key("waveform_1000"));
        assert!(map.contains_key("waveform_2000"));

        let small: WaveformData =
            serde_json::from_value(map["waveform_500"].clone()).unwrap();
        assert_eq!(small.peaks.len(), 500);
        assert!((small.duration - 1.0).abs() < 1e-6);
    }

    #[test]
    fn wav_round_trip() {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 8_000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut buf = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut buf, spec).unwrap();
            for i in 0..8_000 {
                let v = ((i as f32 * 0.05).sin() * 16_000.0) as i16;
                writer.write_sample(v).unwrap();
            }
            writer.finalize().unwrap();
        }
        let value = generate_from_wav(buf.get_ref()).unwrap();
        let small: WaveformData =
            serde_json::from_value(value["waveform_500"].clone()).unwrap();
        assert_eq!(small.sample_rate, 8_000);
        assert!((small.duration - 1.0).abs() < 0.01);
        assert!(small.peaks.iter().cloned().fold(0.0f32, f32::max) > 0.3);
    }

    #[test]
    fn garbage_bytes_are_a_media_error() {
        assert!(matches!(
            generate_from_wav(b"not a wav"),
            Err(PipelineError::Media(_))
        ));
    }
}
