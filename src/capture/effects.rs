//! Mixed-reality-capture effect property bags
//!
//! An effect is an activatable class id plus a bag of named properties. Unset
//! properties fall back to the platform defaults listed on each accessor.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

const VIDEO_EFFECT_ID: &str = "Windows.Media.MixedRealityCapture.MixedRealityCaptureVideoEffect";
const AUDIO_EFFECT_ID: &str = "Windows.Media.MixedRealityCapture.MixedRealityCaptureAudioEffect";

const PROPERTY_MIXER_MODE: &str = "MixerMode";
const PROPERTY_HOLOGRAM_COMPOSITION: &str = "HologramCompositionEnabled";
const PROPERTY_RECORDING_INDICATOR: &str = "RecordingIndicatorEnabled";
const PROPERTY_VIDEO_STABILIZATION: &str = "VideoStabilizationEnabled";
const PROPERTY_GLOBAL_OPACITY: &str = "GlobalOpacityCoefficient";

/// Which audio sources the capture mixes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AudioMixerMode {
    Mic,
    Loopback,
    #[default]
    MicAndLoopback,
}

impl AudioMixerMode {
    pub fn as_u32(self) -> u32 {
        match self {
            AudioMixerMode::Mic => 0,
            AudioMixerMode::Loopback => 1,
            AudioMixerMode::MicAndLoopback => 2,
        }
    }

    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(AudioMixerMode::Mic),
            1 => Some(AudioMixerMode::Loopback),
            2 => Some(AudioMixerMode::MicAndLoopback),
            _ => None,
        }
    }
}

/// What gets attached to a capture session
#[derive(Debug, Clone, PartialEq)]
pub struct EffectDefinition {
    pub activatable_class_id: String,
    pub properties: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MrcAudioEffect {
    properties: Map<String, Value>,
}

impl MrcAudioEffect {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn activatable_class_id(&self) -> &'static str {
        AUDIO_EFFECT_ID
    }

    pub fn properties(&self) -> &Map<String, Value> {
        &self.properties
    }

    /// Defaults to [`AudioMixerMode::MicAndLoopback`]
    pub fn mixer_mode(&self) -> AudioMixerMode {
        self.properties
            .get(PROPERTY_MIXER_MODE)
            .and_then(Value::as_u64)
            .and_then(|v| u32::try_from(v).ok())
            .and_then(AudioMixerMode::from_u32)
            .unwrap_or_default()
    }

    pub fn set_mixer_mode(&mut self, mode: AudioMixerMode) {
        self.properties
            .insert(PROPERTY_MIXER_MODE.into(), Value::from(mode.as_u32()));
    }

    pub fn definition(&self) -> EffectDefinition {
        EffectDefinition {
            activatable_class_id: AUDIO_EFFECT_ID.into(),
            properties: self.properties.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MrcVideoEffect {
    properties: Map<String, Value>,
}

impl MrcVideoEffect {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn activatable_class_id(&self) -> &'static str {
        VIDEO_EFFECT_ID
    }

    pub fn properties(&self) -> &Map<String, Value> {
        &self.properties
    }

    fn flag(&self, key: &str, default: bool) -> bool {
        self.properties
            .get(key)
            .and_then(Value::as_bool)
            .unwrap_or(default)
    }

    /// Defaults to `true`
    pub fn hologram_composition(&self) -> bool {
        self.flag(PROPERTY_HOLOGRAM_COMPOSITION, true)
    }

    pub fn set_hologram_composition(&mut self, enabled: bool) {
        self.properties
            .insert(PROPERTY_HOLOGRAM_COMPOSITION.into(), Value::from(enabled));
    }

    /// Defaults to `true`
    pub fn recording_indicator(&self) -> bool {
        self.flag(PROPERTY_RECORDING_INDICATOR, true)
    }

    pub fn set_recording_indicator(&mut self, enabled: bool) {
        self.properties
            .insert(PROPERTY_RECORDING_INDICATOR.into(), Value::from(enabled));
    }

    /// Defaults to `false`
    pub fn video_stabilization(&self) -> bool {
        self.flag(PROPERTY_VIDEO_STABILIZATION, false)
    }

    pub fn set_video_stabilization(&mut self, enabled: bool) {
        self.properties
            .insert(PROPERTY_VIDEO_STABILIZATION.into(), Value::from(enabled));
    }

    /// Hologram opacity in `[0, 1]`, defaults to `0.9`
    pub fn global_opacity(&self) -> f64 {
        self.properties
            .get(PROPERTY_GLOBAL_OPACITY)
            .and_then(Value::as_f64)
            .unwrap_or(0.9)
    }

    pub fn set_global_opacity(&mut self, opacity: f64) {
        self.properties.insert(
            PROPERTY_GLOBAL_OPACITY.into(),
            Value::from(opacity.clamp(0.0, 1.0)),
        );
    }

    pub fn definition(&self) -> EffectDefinition {
        EffectDefinition {
            activatable_class_id: VIDEO_EFFECT_ID.into(),
            properties: self.properties.clone(),
        }
    }
}

/// Effect options a capture engine applies when MRC is enabled
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EffectSettings {
    pub mixer_mode: AudioMixerMode,
    pub hologram_composition: bool,
    pub recording_indicator: bool,
}

impl Default for EffectSettings {
    fn default() -> Self {
        Self {
            mixer_mode: AudioMixerMode::default(),
            hologram_composition: true,
            recording_indicator: true,
        }
    }
}

impl EffectSettings {
    pub fn video_effect(&self) -> MrcVideoEffect {
        let mut effect = MrcVideoEffect::new();
        effect.set_hologram_composition(self.hologram_composition);
        effect.set_recording_indicator(self.recording_indicator);
        effect
    }

    pub fn audio_effect(&self) -> MrcAudioEffect {
        let mut effect = MrcAudioEffect::new();
        effect.set_mixer_mode(self.mixer_mode);
        effect
    }
}
