//! In-process loopback collaborators
//!
//! A synthetic device owner and capture session that produce timestamped
//! samples stamped with the wall clock. The session answers every
//! `RequestSample` a sink raises with exactly one sample, so the sinks' pull
//! window paces it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use log::{debug, info, warn};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::effects::EffectDefinition;
use super::traits::{
    CaptureSession, DeviceHandle, DeviceResources, EffectToken, SessionFactory, SessionSettings,
};
use crate::error::{BridgeError, Result};
use crate::pipeline::{MediaEvent, MediaSample, SampleSink, StreamSink, Timestamp};

/// Current wall-clock time on the microsecond timeline
pub fn wall_clock() -> Timestamp {
    Timestamp::from_micros(chrono::Utc::now().timestamp_micros())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceEvent {
    Acquired(DeviceHandle),
    Released(DeviceHandle),
}

/// Device owner that hands out numbered handles and records every call
#[derive(Debug, Default)]
pub struct LoopbackDevices {
    next_id: AtomicU64,
    history: Mutex<Vec<DeviceEvent>>,
}

impl LoopbackDevices {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn history(&self) -> Vec<DeviceEvent> {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Acquired handles not yet released
    pub fn outstanding(&self) -> usize {
        self.history().iter().fold(0usize, |n, event| match event {
            DeviceEvent::Acquired(_) => n + 1,
            DeviceEvent::Released(_) => n.saturating_sub(1),
        })
    }

    fn record(&self, event: DeviceEvent) {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}

#[async_trait]
impl DeviceResources for LoopbackDevices {
    async fn acquire_shared_device(&self) -> Result<DeviceHandle> {
        let device = DeviceHandle(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        self.record(DeviceEvent::Acquired(device));
        debug!("Loopback device {} acquired", device.0);
        Ok(device)
    }

    async fn release_shared_device(&self, device: DeviceHandle) {
        self.record(DeviceEvent::Released(device));
        debug!("Loopback device {} released", device.0);
    }
}

/// Creates [`LoopbackSession`]s producing fixed-size samples at a fixed interval
pub struct LoopbackSessionFactory {
    frame_interval: Duration,
    sample_size: usize,
    sessions: Mutex<Vec<Arc<LoopbackSession>>>,
}

impl LoopbackSessionFactory {
    /// `sample_size` is clamped to at least one byte; consumers refuse empty samples
    pub fn new(frame_interval: Duration, sample_size: usize) -> Self {
        Self {
            frame_interval,
            sample_size: sample_size.max(1),
            sessions: Mutex::new(Vec::new()),
        }
    }

    /// Every session created so far, oldest first
    pub fn sessions(&self) -> Vec<Arc<LoopbackSession>> {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl SessionFactory for LoopbackSessionFactory {
    async fn create_session(
        &self,
        device: DeviceHandle,
        settings: SessionSettings,
    ) -> Result<Arc<dyn CaptureSession>> {
        let session = Arc::new(LoopbackSession {
            device,
            settings,
            frame_interval: self.frame_interval,
            payload: Bytes::from(vec![0u8; self.sample_size]),
            next_token: AtomicU64::new(0),
            effects: Mutex::new(HashMap::new()),
            preview: tokio::sync::Mutex::new(None),
            closed: AtomicBool::new(false),
        });

        info!(
            "Loopback session created on device {} ({}x{}, audio: {})",
            device.0, settings.width, settings.height, settings.enable_audio
        );

        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(session.clone());
        Ok(session)
    }
}

struct Preview {
    sinks: Vec<Arc<StreamSink>>,
    cancel: CancellationToken,
    producers: Vec<JoinHandle<()>>,
}

pub struct LoopbackSession {
    device: DeviceHandle,
    settings: SessionSettings,
    frame_interval: Duration,
    payload: Bytes,
    next_token: AtomicU64,
    effects: Mutex<HashMap<EffectToken, EffectDefinition>>,
    preview: tokio::sync::Mutex<Option<Preview>>,
    closed: AtomicBool,
}

impl LoopbackSession {
    pub fn device(&self) -> DeviceHandle {
        self.device
    }

    pub fn settings(&self) -> SessionSettings {
        self.settings
    }

    /// Class ids of the attached effects
    pub fn effects(&self) -> Vec<String> {
        let mut ids: Vec<_> = self
            .effects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|effect| effect.activatable_class_id.clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(BridgeError::InvalidState("session is closed".into()));
        }
        Ok(())
    }

    /// Feed one sink until it stops or shuts down
    async fn produce(
        sink: Arc<StreamSink>,
        payload: Bytes,
        interval: Duration,
        cancel: CancellationToken,
    ) {
        loop {
            match sink.events().next_event().await {
                Ok(MediaEvent::RequestSample) => {
                    tokio::select! {
                        _ = cancel.cancelled() => {}
                        _ = tokio::time::sleep(interval) => {}
                    }
                    // Keep draining until the sink reports Stopped
                    if cancel.is_cancelled() {
                        continue;
                    }

                    let sample = MediaSample::new(payload.clone(), wall_clock()).with_duration(interval);
                    if let Err(e) = sink.process_sample(sample) {
                        debug!("Stream {}: sample refused: {}", sink.identifier(), e);
                    }
                }
                Ok(MediaEvent::Stopped) | Err(_) => break,
                Ok(_) => {}
            }
        }
    }
}

#[async_trait]
impl CaptureSession for LoopbackSession {
    async fn add_effect(&self, effect: EffectDefinition) -> Result<EffectToken> {
        self.ensure_open()?;
        let token = EffectToken(self.next_token.fetch_add(1, Ordering::Relaxed) + 1);
        debug!("Effect {} attached as {}", effect.activatable_class_id, token.0);
        self.effects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(token, effect);
        Ok(token)
    }

    async fn remove_effect(&self, token: EffectToken) -> Result<()> {
        self.effects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&token)
            .map(|_| ())
            .ok_or_else(|| BridgeError::InvalidArgument(format!("unknown effect {}", token.0)))
    }

    async fn start_preview(&self, sinks: Vec<Arc<StreamSink>>) -> Result<()> {
        self.ensure_open()?;
        let mut preview = self.preview.lock().await;
        if preview.is_some() {
            return Err(BridgeError::InvalidState("preview already running".into()));
        }

        let now = wall_clock();
        for (started, sink) in sinks.iter().enumerate() {
            if let Err(e) = sink.start(now, now) {
                for sink in &sinks[..started] {
                    if let Err(e) = sink.stop() {
                        debug!("Stream {}: {}", sink.identifier(), e);
                    }
                }
                return Err(e);
            }
        }

        let cancel = CancellationToken::new();
        let producers = sinks
            .iter()
            .map(|sink| {
                tokio::spawn(Self::produce(
                    sink.clone(),
                    self.payload.clone(),
                    self.frame_interval,
                    cancel.clone(),
                ))
            })
            .collect();

        info!("Loopback preview started with {} stream(s)", sinks.len());
        *preview = Some(Preview {
            sinks,
            cancel,
            producers,
        });
        Ok(())
    }

    async fn stop_preview(&self) -> Result<()> {
        let Some(preview) = self.preview.lock().await.take() else {
            return Ok(());
        };

        preview.cancel.cancel();
        for sink in &preview.sinks {
            if let Err(e) = sink.stop() {
                debug!("Stream {}: {}", sink.identifier(), e);
            }
        }
        for producer in preview.producers {
            if let Err(e) = producer.await {
                warn!("Loopback producer ended abnormally: {}", e);
            }
        }

        info!("Loopback preview stopped");
        Ok(())
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Err(e) = self.stop_preview().await {
            warn!("Stopping preview on close failed: {}", e);
        }
        self.effects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        info!("Loopback session on device {} closed", self.device.0);
    }
}
