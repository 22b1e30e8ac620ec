//! Capture engine: serialized start/stop preview orchestration
//!
//! Start and stop requests share one "current operation" slot. A new request
//! chains behind whatever occupies the slot and only begins once that
//! operation reached its terminal outcome, so two operations never touch the
//! device or session at the same time.
//!
//! A run is built as device → session → effects → sinks. Each completed step
//! pushes its teardown onto the run's [`ResourceScope`]; stopping, or a failed
//! start, unwinds it in reverse.

use std::any::Any;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use log::{debug, error, info, warn};
use tokio::runtime::Handle;

use super::operation::{OperationHandle, OperationKind};
use super::scope::ResourceScope;
use super::{CaptureState, Module, ModuleEvent, ModuleKind, StateCallback};
use crate::capture::{DeviceResources, EffectSettings, SessionFactory, SessionSettings};
use crate::display::SharedSampleBuffer;
use crate::error::{BridgeError, Result};
use crate::pipeline::{MajorType, MediaType, StreamSink};

const VIDEO_SUBTYPE: &str = "NV12";
const AUDIO_SUBTYPE: &str = "Float";
const AUDIO_SAMPLE_RATE: u32 = 48_000;
const AUDIO_CHANNELS: u16 = 2;

const VIDEO_STREAM: u32 = 0;
const AUDIO_STREAM: u32 = 1;

/// Parameters of a `StartPreview` request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreviewOptions {
    pub width: u32,
    pub height: u32,
    pub enable_audio: bool,
    pub enable_mrc: bool,
}

struct ActiveRun {
    options: PreviewOptions,
    sinks: Vec<Arc<StreamSink>>,
    scope: ResourceScope,
}

struct EngineInner {
    devices: Arc<dyn DeviceResources>,
    sessions: Arc<dyn SessionFactory>,
    effects: EffectSettings,
    callback: StateCallback,
    runtime: Handle,

    video_buffer: Arc<SharedSampleBuffer>,
    audio_buffer: Arc<SharedSampleBuffer>,

    /// Most recently queued operation; the shutdown flag is only set while holding it
    current: Mutex<Option<OperationHandle>>,
    next_op: AtomicU64,
    is_shutdown: AtomicBool,
    closed: AtomicBool,

    run: tokio::sync::Mutex<Option<ActiveRun>>,
}

/// Capture module owning the device/session pair of the active run
pub struct CaptureEngine {
    inner: Arc<EngineInner>,
}

impl CaptureEngine {
    /// Must be called from within a tokio runtime, which then runs every
    /// operation of the engine.
    pub fn create(
        devices: Arc<dyn DeviceResources>,
        sessions: Arc<dyn SessionFactory>,
        effects: EffectSettings,
        callback: StateCallback,
    ) -> Result<Self> {
        let runtime = Handle::try_current()
            .map_err(|e| BridgeError::NotInitialized(format!("no async runtime: {}", e)))?;

        Ok(Self {
            inner: Arc::new(EngineInner {
                devices,
                sessions,
                effects,
                callback,
                runtime,
                video_buffer: Arc::new(SharedSampleBuffer::new(MajorType::Video)),
                audio_buffer: Arc::new(SharedSampleBuffer::new(MajorType::Audio)),
                current: Mutex::new(None),
                next_op: AtomicU64::new(0),
                is_shutdown: AtomicBool::new(false),
                closed: AtomicBool::new(false),
                run: tokio::sync::Mutex::new(None),
            }),
        })
    }

    /// Queue a preview start. An already running preview is fully torn down
    /// and rebuilt.
    pub fn start_preview(
        &self,
        width: u32,
        height: u32,
        enable_audio: bool,
        enable_mrc: bool,
    ) -> Result<OperationHandle> {
        if width == 0 || height == 0 {
            return Err(BridgeError::InvalidArgument(format!(
                "preview size {}x{}",
                width, height
            )));
        }

        let options = PreviewOptions {
            width,
            height,
            enable_audio,
            enable_mrc,
        };
        self.enqueue(OperationKind::StartPreview, move |inner| inner.start(options))
    }

    /// Queue a preview stop. Succeeds without doing anything when stopped.
    pub fn stop_preview(&self) -> Result<OperationHandle> {
        self.enqueue(OperationKind::StopPreview, |inner| inner.stop())
    }

    pub async fn shutdown(&self) {
        let inner = &self.inner;
        let current = {
            let mut current = inner.current.lock().unwrap_or_else(PoisonError::into_inner);
            if inner.is_shutdown.swap(true, Ordering::SeqCst) {
                return;
            }
            current.take()
        };

        info!("Capture engine shutting down");

        // Operations are chained, so the newest one finishes last
        if let Some(operation) = current {
            if let Err(e) = operation.wait().await {
                warn!("{} #{} failed during shutdown: {}", operation.kind(), operation.id(), e);
            }
        }

        let active = inner.run.lock().await.take();
        if let Some(active) = active {
            inner.teardown(active).await;
            inner.notify(ModuleEvent::CaptureStateChanged(CaptureState::PreviewStopped));
        }

        if !inner.closed.swap(true, Ordering::SeqCst) {
            inner.notify(ModuleEvent::Closed);
        }
        info!("Capture engine closed");
    }

    pub fn is_shutdown(&self) -> bool {
        self.inner.is_shutdown()
    }

    pub async fn is_previewing(&self) -> bool {
        self.inner.run.lock().await.is_some()
    }

    /// Options of the running preview
    pub async fn preview_options(&self) -> Option<PreviewOptions> {
        self.inner.run.lock().await.as_ref().map(|run| run.options)
    }

    /// Sinks of the running preview, video first
    pub async fn active_sinks(&self) -> Vec<Arc<StreamSink>> {
        self.inner
            .run
            .lock()
            .await
            .as_ref()
            .map(|run| run.sinks.clone())
            .unwrap_or_default()
    }

    pub fn video_buffer(&self) -> Arc<SharedSampleBuffer> {
        self.inner.video_buffer.clone()
    }

    pub fn audio_buffer(&self) -> Arc<SharedSampleBuffer> {
        self.inner.audio_buffer.clone()
    }

    fn enqueue<F, Fut>(&self, kind: OperationKind, work: F) -> Result<OperationHandle>
    where
        F: FnOnce(Arc<EngineInner>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let mut current = self
            .inner
            .current
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if self.inner.is_shutdown() {
            return Err(BridgeError::Shutdown);
        }

        let previous = current.take();
        let inner = self.inner.clone();
        let id = inner.next_op.fetch_add(1, Ordering::Relaxed) + 1;

        let handle = OperationHandle::spawn(&self.inner.runtime, id, kind, async move {
            if let Some(previous) = previous {
                debug!("{} #{} waits for {} #{}", kind, id, previous.kind(), previous.id());
                // The previous outcome belongs to its own caller
                let _ = previous.wait().await;
            }

            if inner.is_shutdown() {
                debug!("{} #{} skipped, engine is shut down", kind, id);
                return Ok(());
            }
            work(inner).await
        });

        *current = Some(handle.clone());
        Ok(handle)
    }
}

impl EngineInner {
    fn is_shutdown(&self) -> bool {
        self.is_shutdown.load(Ordering::SeqCst)
    }

    fn check_shutdown(&self) -> Result<()> {
        if self.is_shutdown() {
            return Err(BridgeError::Shutdown);
        }
        Ok(())
    }

    fn notify(&self, event: ModuleEvent) {
        (self.callback)(event);
    }

    async fn start(self: Arc<Self>, options: PreviewOptions) -> Result<()> {
        let mut events = Vec::new();
        let outcome = {
            let mut run = self.run.lock().await;

            if let Some(previous) = run.take() {
                info!("Preview already running, restarting");
                self.teardown(previous).await;
                events.push(ModuleEvent::CaptureStateChanged(CaptureState::PreviewStopped));
            }

            let mut scope = ResourceScope::new("preview");
            match self.build_run(options, &mut scope).await {
                Ok(sinks) => {
                    info!(
                        "Preview started: {}x{} audio={} mrc={}",
                        options.width, options.height, options.enable_audio, options.enable_mrc
                    );
                    *run = Some(ActiveRun {
                        options,
                        sinks,
                        scope,
                    });
                    events.push(ModuleEvent::CaptureStateChanged(CaptureState::PreviewStarted));
                    Ok(())
                }
                Err(e) => {
                    error!("Start preview failed, rolling back {} step(s): {}", scope.len(), e);
                    scope.release().await;

                    if self.is_shutdown() {
                        warn!("Start preview abandoned by shutdown");
                        Ok(())
                    } else {
                        events.push(ModuleEvent::Failed { code: e.code() });
                        Err(e)
                    }
                }
            }
        };

        for event in events {
            self.notify(event);
        }
        outcome
    }

    async fn stop(self: Arc<Self>) -> Result<()> {
        let active = self.run.lock().await.take();
        let Some(active) = active else {
            debug!("Stop preview: not running");
            return Ok(());
        };

        self.teardown(active).await;
        info!("Preview stopped");
        self.notify(ModuleEvent::CaptureStateChanged(CaptureState::PreviewStopped));
        Ok(())
    }

    async fn build_run(
        &self,
        options: PreviewOptions,
        scope: &mut ResourceScope,
    ) -> Result<Vec<Arc<StreamSink>>> {
        let device = self
            .devices
            .acquire_shared_device()
            .await
            .map_err(|e| BridgeError::acquisition("acquire shared device", e))?;
        {
            let devices = self.devices.clone();
            scope.push("shared device", move || async move {
                devices.release_shared_device(device).await;
            });
        }
        self.check_shutdown()?;

        let settings = SessionSettings {
            width: options.width,
            height: options.height,
            enable_audio: options.enable_audio,
        };
        let session = self
            .sessions
            .create_session(device, settings)
            .await
            .map_err(|e| BridgeError::acquisition("create capture session", e))?;
        {
            let session = session.clone();
            scope.push("capture session", move || async move {
                session.close().await;
            });
        }
        self.check_shutdown()?;

        if options.enable_mrc {
            let mut definitions = vec![self.effects.video_effect().definition()];
            if options.enable_audio {
                definitions.push(self.effects.audio_effect().definition());
            }

            for definition in definitions {
                let token = session
                    .add_effect(definition)
                    .await
                    .map_err(|e| BridgeError::acquisition("attach effect", e))?;

                let session = session.clone();
                scope.push("effect", move || async move {
                    if let Err(e) = session.remove_effect(token).await {
                        warn!("Removing effect {} failed: {}", token.0, e);
                    }
                });
            }
            self.check_shutdown()?;
        }

        let sinks = self.create_sinks(options)?;
        {
            let session = session.clone();
            let sinks = sinks.clone();
            scope.push("stream sinks", move || async move {
                if let Err(e) = session.stop_preview().await {
                    warn!("Stopping preview failed: {}", e);
                }
                for sink in &sinks {
                    sink.shutdown();
                }
            });
        }
        session
            .start_preview(sinks.clone())
            .await
            .map_err(|e| BridgeError::acquisition("start preview", e))?;

        Ok(sinks)
    }

    fn create_sinks(&self, options: PreviewOptions) -> Result<Vec<Arc<StreamSink>>> {
        let mut sinks = vec![Arc::new(StreamSink::new(
            VIDEO_STREAM,
            MediaType::video(VIDEO_SUBTYPE, options.width, options.height),
            self.video_buffer.clone(),
        )?)];

        if options.enable_audio {
            sinks.push(Arc::new(StreamSink::new(
                AUDIO_STREAM,
                MediaType::audio(AUDIO_SUBTYPE, AUDIO_SAMPLE_RATE, AUDIO_CHANNELS),
                self.audio_buffer.clone(),
            )?));
        }
        Ok(sinks)
    }

    async fn teardown(&self, active: ActiveRun) {
        for sink in &active.sinks {
            info!("Stream {} {}", sink.identifier(), sink.health().summary());
        }
        active.scope.release().await;
    }
}

#[async_trait]
impl Module for CaptureEngine {
    fn kind(&self) -> ModuleKind {
        ModuleKind::Capture
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }

    async fn shutdown(&self) {
        CaptureEngine::shutdown(self).await;
    }
}
