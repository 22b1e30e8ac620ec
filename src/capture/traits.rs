//! Collaborator traits for device and capture-session access
//!
//! The engine never allocates device resources or talks to a platform capture
//! stack itself; it goes through these traits.

use std::sync::Arc;

use async_trait::async_trait;

use super::effects::EffectDefinition;
use crate::error::Result;
use crate::pipeline::StreamSink;

/// Opaque handle to a shared rendering device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceHandle(pub u64);

/// Host-side owner of the shared device
#[async_trait]
pub trait DeviceResources: Send + Sync {
    async fn acquire_shared_device(&self) -> Result<DeviceHandle>;

    /// Give the device back. Called exactly once per successful acquire.
    async fn release_shared_device(&self, device: DeviceHandle);
}

/// Settings a capture session is created with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSettings {
    pub width: u32,
    pub height: u32,
    pub enable_audio: bool,
}

/// Handle returned when an effect is attached to a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EffectToken(pub u64);

#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn create_session(
        &self,
        device: DeviceHandle,
        settings: SessionSettings,
    ) -> Result<Arc<dyn CaptureSession>>;
}

/// A platform capture session acting as the upstream producer of its sinks
#[async_trait]
pub trait CaptureSession: Send + Sync {
    async fn add_effect(&self, effect: EffectDefinition) -> Result<EffectToken>;

    async fn remove_effect(&self, token: EffectToken) -> Result<()>;

    /// Start producing into `sinks`. The session calls `start` on every sink
    /// before its first `process_sample`.
    async fn start_preview(&self, sinks: Vec<Arc<StreamSink>>) -> Result<()>;

    /// Stop producing. Every sink has been stopped when this returns.
    async fn stop_preview(&self) -> Result<()>;

    async fn close(&self);
}
