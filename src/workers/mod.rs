//! Host-facing modules
//!
//! A module is created with the host's device resources and a state callback,
//! runs its own background tasks, and is torn down with [`Module::shutdown`].

use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

pub mod capture_engine;
pub mod operation;
pub mod playback;
pub mod registry;
pub mod scope;

pub use capture_engine::{CaptureEngine, PreviewOptions};
pub use operation::{OperationHandle, OperationKind};
pub use playback::{PlaybackManager, PlaybackSnapshot, PlayerState};
pub use registry::{ModuleHandle, ModuleRegistry};
pub use scope::ResourceScope;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CaptureState {
    PreviewStarted,
    PreviewStopped,
}

/// Tagged event delivered to a module's state callback.
///
/// Serializes as `{"kind": ..., "payload": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "payload")]
pub enum ModuleEvent {
    CaptureStateChanged(CaptureState),
    PlaybackStateChanged(PlaybackSnapshot),
    Failed { code: i32 },
    Closed,
}

/// Host callback; invoked from background tasks, never under an internal lock
pub type StateCallback = Arc<dyn Fn(ModuleEvent) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleKind {
    Capture,
    Playback,
}

/// Lifecycle shared by every module the host can hold
#[async_trait]
pub trait Module: Send + Sync {
    fn kind(&self) -> ModuleKind;

    /// Upcast used by [`ModuleRegistry::get`] to recover the concrete type
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;

    /// Release everything the module owns. Idempotent and infallible.
    async fn shutdown(&self);
}
