//! Capture-side collaborators
//!
//! Device and session access goes through the traits in [`traits`];
//! [`loopback`] provides an in-process implementation producing synthetic
//! samples.

pub mod effects;
pub mod loopback;
mod traits;

pub use effects::{AudioMixerMode, EffectDefinition, EffectSettings, MrcAudioEffect, MrcVideoEffect};
pub use loopback::{LoopbackDevices, LoopbackSession, LoopbackSessionFactory};
pub use traits::{
    CaptureSession, DeviceHandle, DeviceResources, EffectToken, SessionFactory, SessionSettings,
};
