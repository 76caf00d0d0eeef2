//! Typed audio filter chains. Chains are built as a list of [`FilterStage`]
//! values and only turned into ffmpeg `-af` syntax when a command line is
//! assembled.

use serde::Serialize;

use super::probe::SpectrumBin;
use super::types::{EnhanceOptions, TargetFormat};

/// Hum threshold: energy below this frequency counts as hum.
const HUM_CEILING_HZ: f64 = 100.0;
const HUM_THRESHOLD_DB: f64 = -40.0;
/// Hiss threshold: energy above this frequency counts as hiss.
const HISS_FLOOR_HZ: f64 = 8000.0;
const HISS_THRESHOLD_DB: f64 = -50.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EqPreset {
    Light,
    Strong,
}

impl EqPreset {
    pub fn for_target(format: TargetFormat, include_video: bool) -> Self {
        match format {
            TargetFormat::Mp3 => EqPreset::Light,
            TargetFormat::Mp4 if include_video => EqPreset::Light,
            TargetFormat::Mp4 | TargetFormat::M4a | TargetFormat::Wav | TargetFormat::Flac => {
                EqPreset::Strong
            }
        }
    }

    fn bands(&self) -> &'static [EqBand] {
        match self {
            EqPreset::Light => &LIGHT_BANDS,
            EqPreset::Strong => &STRONG_BANDS,
        }
    }

    fn volume(&self) -> f64 {
        match self {
            EqPreset::Light => 4.0,
            EqPreset::Strong => 8.0,
        }
    }

    fn loudness(&self) -> FilterStage {
        match self {
            EqPreset::Light => FilterStage::LoudnessNormalize {
                integrated: -23.0,
                true_peak: -1.0,
                range: 14.0,
            },
            EqPreset::Strong => FilterStage::LoudnessNormalize {
                integrated: -16.0,
                true_peak: -1.0,
                range: 11.0,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EqBand {
    pub frequency_hz: u32,
    pub width_q: f64,
    pub gain_db: f64,
}

const fn band(frequency_hz: u32, width_q: f64, gain_db: f64) -> EqBand {
    EqBand {
        frequency_hz,
        width_q,
        gain_db,
    }
}

const LIGHT_BANDS: [EqBand; 6] = [
    band(250, 1.0, 2.0),
    band(1000, 0.5, 2.0),
    band(2000, 1.0, 2.0),
    band(1200, 0.3, 4.0),
    band(4000, 1.0, 2.0),
    band(8000, 1.0, -2.0),
];

const STRONG_BANDS: [EqBand; 7] = [
    band(60, 1.5, 4.0),
    band(250, 1.0, 4.0),
    band(500, 0.7, 3.0),
    band(1000, 0.5, 3.0),
    band(1200, 0.3, 4.0),
    band(4000, 1.0, 3.0),
    band(8000, 1.0, 2.0),
];

#[derive(Debug, Clone, PartialEq)]
pub enum FilterStage {
    Equalizer(EqBand),
    Volume(f64),
    DynamicNormalize { peak: f64, max_gain: f64 },
    Compressor {
        ratio: f64,
        threshold_db: f64,
        attack_ms: f64,
        release_ms: f64,
    },
    Limiter { limit: f64 },
    LoudnessNormalize {
        integrated: f64,
        true_peak: f64,
        range: f64,
    },
    NoiseReduction { reduction: f64, floor_db: f64 },
    Reverb { wet_gain_db: f64, room_size: f64 },
    StereoWiden { multiplier: f64 },
}

impl FilterStage {
    pub fn to_ffmpeg(&self) -> String {
        match self {
            FilterStage::Equalizer(band) => format!(
                "equalizer=f={}:t=q:w={}:g={}",
                band.frequency_hz, band.width_q, band.gain_db
            ),
            FilterStage::Volume(gain) => format!("volume={gain}"),
            FilterStage::DynamicNormalize { peak, max_gain } => {
                format!("dynaudnorm=p={peak}:m={max_gain}")
            }
            FilterStage::Compressor {
                ratio,
                threshold_db,
                attack_ms,
                release_ms,
            } => format!(
                "acompressor=ratio={ratio}:threshold={threshold_db}dB:attack={attack_ms}:release={release_ms}"
            ),
            FilterStage::Limiter { limit } => format!("alimiter=limit={limit}"),
            FilterStage::LoudnessNormalize {
                integrated,
                true_peak,
                range,
            } => format!("loudnorm=I={integrated}:TP={true_peak}:LRA={range}"),
            FilterStage::NoiseReduction {
                reduction,
                floor_db,
            } => format!("afftdn=nr={reduction:.1}:nf={floor_db}"),
            FilterStage::Reverb {
                wet_gain_db,
                room_size,
            } => {
                // ffmpeg has no reverb filter; a two-tap echo at the wet gain stands in.
                let wet = 10f64.powf(wet_gain_db / 20.0);
                format!(
                    "aecho=0.8:{room_size}:60|90:{:.3}|{:.3}",
                    wet,
                    wet * 0.7
                )
            }
            FilterStage::StereoWiden { multiplier } => format!("extrastereo=m={multiplier}"),
        }
    }
}

/// Result of looking for hum and hiss in the source audio.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct NoiseAssessment {
    pub hum: bool,
    pub hiss: bool,
}

impl NoiseAssessment {
    /// No analysis was possible. Never triggers noise reduction.
    pub fn unknown() -> Self {
        Self::default()
    }

    pub fn from_spectrum(bins: &[SpectrumBin]) -> Self {
        Self {
            hum: bins
                .iter()
                .any(|bin| bin.frequency_hz < HUM_CEILING_HZ && bin.amplitude_db > HUM_THRESHOLD_DB),
            hiss: bins.iter().any(|bin| {
                bin.frequency_hz > HISS_FLOOR_HZ && bin.amplitude_db > HISS_THRESHOLD_DB
            }),
        }
    }

    pub fn needs_reduction(&self) -> bool {
        self.hum || self.hiss
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FilterChain {
    pub preset: EqPreset,
    pub stages: Vec<FilterStage>,
}

impl FilterChain {
    pub fn to_ffmpeg_arg(&self) -> String {
        let mut out = String::new();
        for (idx, stage) in self.stages.iter().enumerate() {
            if idx > 0 {
                out.push(',');
            }
            out.push_str(&stage.to_ffmpeg());
        }
        out
    }

    pub fn contains_noise_reduction(&self) -> bool {
        self.stages
            .iter()
            .any(|stage| matches!(stage, FilterStage::NoiseReduction { .. }))
    }
}

pub struct FilterChainBuilder;

impl FilterChainBuilder {
    /// Equalization, loudness shaping, optional noise reduction, then
    /// optional spatial effects, in that order.
    pub fn build(
        format: TargetFormat,
        include_video: bool,
        enhance: EnhanceOptions,
        noise: NoiseAssessment,
    ) -> FilterChain {
        let preset = EqPreset::for_target(format, include_video);
        let mut stages: Vec<FilterStage> = preset
            .bands()
            .iter()
            .copied()
            .map(FilterStage::Equalizer)
            .collect();

        stages.push(FilterStage::Volume(preset.volume()));
        stages.push(FilterStage::DynamicNormalize {
            peak: 0.95,
            max_gain: 10.0,
        });
        stages.push(FilterStage::Compressor {
            ratio: 8.0,
            threshold_db: -10.0,
            attack_ms: 5.0,
            release_ms: 50.0,
        });
        stages.push(FilterStage::Limiter { limit: 0.1 });
        stages.push(preset.loudness());

        if noise.needs_reduction() {
            stages.push(FilterStage::NoiseReduction {
                reduction: 1.0,
                floor_db: -20.0,
            });
        }

        if enhance.any() {
            stages.push(FilterStage::Reverb {
                wet_gain_db: -15.0,
                room_size: 0.9,
            });
            stages.push(FilterStage::StereoWiden { multiplier: 0.9 });
        }

        FilterChain { preset, stages }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIGHT_EXPECTED: &str = "equalizer=f=250:t=q:w=1:g=2,equalizer=f=1000:t=q:w=0.5:g=2,\
equalizer=f=2000:t=q:w=1:g=2,equalizer=f=1200:t=q:w=0.3:g=4,equalizer=f=4000:t=q:w=1:g=2,\
equalizer=f=8000:t=q:w=1:g=-2,volume=4,dynaudnorm=p=0.95:m=10,\
acompressor=ratio=8:threshold=-10dB:attack=5:release=50,alimiter=limit=0.1,\
loudnorm=I=-23:TP=-1:LRA=14";

    #[test]
    fn light_chain_matches_reference_filter_string() {
        let chain = FilterChainBuilder::build(
            TargetFormat::Mp3,
            false,
            EnhanceOptions::default(),
            NoiseAssessment::unknown(),
        );
        assert_eq!(chain.to_ffmpeg_arg(), LIGHT_EXPECTED);
    }

    #[test]
    fn strong_chain_uses_louder_targets() {
        let arg = FilterChainBuilder::build(
            TargetFormat::Flac,
            false,
            EnhanceOptions::default(),
            NoiseAssessment::unknown(),
        )
        .to_ffmpeg_arg();
        assert!(arg.starts_with("equalizer=f=60:t=q:w=1.5:g=4,"));
        assert!(arg.contains(",volume=8,"));
        assert!(arg.ends_with("loudnorm=I=-16:TP=-1:LRA=11"));
    }

    #[test]
    fn build_is_deterministic() {
        let enhance = EnhanceOptions {
            reverb: true,
            widening: false,
        };
        for format in TargetFormat::ALL {
            for include_video in [false, true] {
                let a = FilterChainBuilder::build(format, include_video, enhance, NoiseAssessment::unknown());
                let b = FilterChainBuilder::build(format, include_video, enhance, NoiseAssessment::unknown());
                assert_eq!(a, b);
                assert_eq!(a.to_ffmpeg_arg(), b.to_ffmpeg_arg());
            }
        }
    }

    #[test]
    fn mp4_include_video_only_swaps_preset() {
        let enhance = EnhanceOptions::default();
        let with_video =
            FilterChainBuilder::build(TargetFormat::Mp4, true, enhance, NoiseAssessment::unknown());
        let audio_only =
            FilterChainBuilder::build(TargetFormat::Mp4, false, enhance, NoiseAssessment::unknown());
        assert_eq!(with_video.preset, EqPreset::Light);
        assert_eq!(audio_only.preset, EqPreset::Strong);

        let light_reference =
            FilterChainBuilder::build(TargetFormat::Mp3, false, enhance, NoiseAssessment::unknown());
        let strong_reference =
            FilterChainBuilder::build(TargetFormat::Wav, false, enhance, NoiseAssessment::unknown());
        assert_eq!(with_video.stages, light_reference.stages);
        assert_eq!(audio_only.stages, strong_reference.stages);
    }

    #[test]
    fn either_enhancement_appends_both_spatial_stages() {
        for enhance in [
            EnhanceOptions {
                reverb: true,
                widening: false,
            },
            EnhanceOptions {
                reverb: false,
                widening: true,
            },
        ] {
            let arg = FilterChainBuilder::build(
                TargetFormat::Wav,
                false,
                enhance,
                NoiseAssessment::unknown(),
            )
            .to_ffmpeg_arg();
            assert!(arg.ends_with(",aecho=0.8:0.9:60|90:0.178|0.124,extrastereo=m=0.9"), "{arg}");
        }
    }

    #[test]
    fn unknown_noise_never_reduces() {
        let chain = FilterChainBuilder::build(
            TargetFormat::Wav,
            false,
            EnhanceOptions::default(),
            NoiseAssessment::unknown(),
        );
        assert!(!chain.contains_noise_reduction());
    }

    #[test]
    fn hum_in_spectrum_adds_noise_reduction_before_effects() {
        let noise = NoiseAssessment::from_spectrum(&[
            SpectrumBin {
                frequency_hz: 60.0,
                amplitude_db: -30.0,
            },
            SpectrumBin {
                frequency_hz: 12000.0,
                amplitude_db: -80.0,
            },
        ]);
        assert!(noise.hum);
        assert!(!noise.hiss);
        let chain = FilterChainBuilder::build(
            TargetFormat::Flac,
            false,
            EnhanceOptions {
                reverb: true,
                widening: true,
            },
            noise,
        );
        let arg = chain.to_ffmpeg_arg();
        let nr = arg.find("afftdn=nr=1.0:nf=-20").unwrap();
        let echo = arg.find("aecho=").unwrap();
        assert!(nr < echo);
    }
}
