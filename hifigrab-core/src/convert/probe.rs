use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::filters::NoiseAssessment;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpectrumBin {
    #[serde(alias = "frequency")]
    pub frequency_hz: f64,
    #[serde(alias = "amplitude")]
    pub amplitude_db: f64,
}

/// Audio stream properties reported by the prober.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioProbe {
    pub sample_rate_hz: Option<u32>,
    pub bits_per_sample: Option<u32>,
    pub bit_rate_bps: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spectrum: Option<Vec<SpectrumBin>>,
}

#[derive(Debug, Deserialize)]
struct ProbeDocument {
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    #[serde(default)]
    sample_rate: Option<Value>,
    #[serde(default)]
    bits_per_sample: Option<Value>,
    #[serde(default)]
    bit_rate: Option<Value>,
    #[serde(default)]
    spectrum: Option<Value>,
}

impl AudioProbe {
    pub fn unknown() -> Self {
        Self::default()
    }

    /// Parses `ffprobe -of json` output. The first stream that reports a
    /// sample rate is taken as the audio stream.
    pub fn parse(json: &str) -> Result<Self, serde_json::Error> {
        let document: ProbeDocument = serde_json::from_str(json)?;
        let stream = document
            .streams
            .iter()
            .find(|stream| stream.sample_rate.is_some())
            .or_else(|| document.streams.first());
        let Some(stream) = stream else {
            return Ok(Self::unknown());
        };
        Ok(Self {
            sample_rate_hz: number(stream.sample_rate.as_ref()).map(|v| v as u32),
            bits_per_sample: number(stream.bits_per_sample.as_ref())
                .filter(|bits| *bits > 0)
                .map(|bits| bits as u32),
            bit_rate_bps: number(stream.bit_rate.as_ref()),
            spectrum: stream.spectrum.as_ref().and_then(spectrum),
        })
    }

    pub fn is_unknown(&self) -> bool {
        self.sample_rate_hz.is_none() && self.bits_per_sample.is_none() && self.bit_rate_bps.is_none()
    }

    pub fn noise_assessment(&self) -> NoiseAssessment {
        self.spectrum
            .as_deref()
            .map(NoiseAssessment::from_spectrum)
            .unwrap_or_else(NoiseAssessment::unknown)
    }

    /// `Sample Rate: 96 kHz, Bitrate: 4000 kbps, Bit Depth: 32`
    pub fn summary(&self) -> String {
        let rate = self
            .sample_rate_hz
            .map(|hz| format!("{} kHz", hz as f64 / 1000.0))
            .unwrap_or_else(|| "N/A".into());
        let bitrate = self
            .bit_rate_bps
            .map(|bps| format!("{} kbps", bps as f64 / 1000.0))
            .unwrap_or_else(|| "N/A".into());
        let depth = self
            .bits_per_sample
            .map(|bits| bits.to_string())
            .unwrap_or_else(|| "N/A".into());
        format!("Sample Rate: {rate}, Bitrate: {bitrate}, Bit Depth: {depth}")
    }
}

fn number(value: Option<&Value>) -> Option<u64> {
    match value? {
        Value::Number(n) => n.as_u64().or_else(|| n.as_f64().map(|f| f as u64)),
        Value::String(s) => s.trim().parse::<f64>().ok().map(|f| f as u64),
        _ => None,
    }
}

fn spectrum(value: &Value) -> Option<Vec<SpectrumBin>> {
    match value {
        Value::String(raw) => serde_json::from_str(raw).ok(),
        other => serde_json::from_value(other.clone()).ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_string_and_numeric_fields() {
        let probe = AudioProbe::parse(
            r#"{"streams":[{"sample_rate":"384000","bits_per_sample":32,"bit_rate":"24576000"}]}"#,
        )
        .unwrap();
        assert_eq!(probe.sample_rate_hz, Some(384_000));
        assert_eq!(probe.bits_per_sample, Some(32));
        assert_eq!(probe.bit_rate_bps, Some(24_576_000));
        assert_eq!(
            probe.summary(),
            "Sample Rate: 384 kHz, Bitrate: 24576 kbps, Bit Depth: 32"
        );
    }

    #[test]
    fn skips_video_stream_and_zero_depth() {
        let probe = AudioProbe::parse(
            r#"{"streams":[{"bit_rate":"900000"},{"sample_rate":"96000","bits_per_sample":0,"bit_rate":"4000000"}]}"#,
        )
        .unwrap();
        assert_eq!(probe.sample_rate_hz, Some(96_000));
        assert_eq!(probe.bits_per_sample, None);
        assert_eq!(probe.bit_rate_bps, Some(4_000_000));
    }

    #[test]
    fn empty_output_is_unknown() {
        let probe = AudioProbe::parse("{}").unwrap();
        assert!(probe.is_unknown());
        assert_eq!(probe.summary(), "Sample Rate: N/A, Bitrate: N/A, Bit Depth: N/A");
        assert!(AudioProbe::parse("not json").is_err());
    }

    #[test]
    fn embedded_spectrum_feeds_noise_assessment() {
        let probe = AudioProbe::parse(
            r#"{"streams":[{"sample_rate":"48000","spectrum":"[{\"frequency\":9000,\"amplitude\":-20}]"}]}"#,
        )
        .unwrap();
        let noise = probe.noise_assessment();
        assert!(noise.hiss);
        assert!(!noise.hum);
        assert!(!AudioProbe::unknown().noise_assessment().needs_reduction());
    }
}
