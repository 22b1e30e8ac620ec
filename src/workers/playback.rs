//! Playback manager module
//!
//! Drives a media player collaborator and forwards its decoded frames into a
//! host-facing [`SharedSampleBuffer`]. Player events are turned into state
//! callbacks carrying a [`PlaybackSnapshot`].

use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info, warn};
use serde::Serialize;

use super::{Module, ModuleEvent, ModuleKind, StateCallback};
use crate::capture::{DeviceHandle, DeviceResources};
use crate::display::SharedSampleBuffer;
use crate::error::{BridgeError, Result};
use crate::pipeline::{MajorType, MediaSample, SampleConsumer};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum PlayerState {
    #[default]
    Closed,
    Opening,
    Buffering,
    Playing,
    Paused,
    Ended,
}

/// Player state reported to the host; all zero when the player could not be queried
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct PlaybackSnapshot {
    pub state: PlayerState,
    pub width: u32,
    pub height: u32,
    pub can_seek: bool,
    pub duration: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlayerEventKind {
    Opened,
    Ended,
    Failed,
    StateChanged,
    FrameAvailable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerEvent {
    Opened,
    Ended,
    Failed { code: i32 },
    StateChanged,
    FrameAvailable,
}

impl PlayerEvent {
    pub fn kind(&self) -> PlayerEventKind {
        match self {
            PlayerEvent::Opened => PlayerEventKind::Opened,
            PlayerEvent::Ended => PlayerEventKind::Ended,
            PlayerEvent::Failed { .. } => PlayerEventKind::Failed,
            PlayerEvent::StateChanged => PlayerEventKind::StateChanged,
            PlayerEvent::FrameAvailable => PlayerEventKind::FrameAvailable,
        }
    }
}

pub type PlayerEventHandler = Arc<dyn Fn(PlayerEvent) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionToken(pub u64);

/// Platform media player
pub trait MediaPlayer: Send + Sync {
    fn subscribe(&self, kind: PlayerEventKind, handler: PlayerEventHandler) -> SubscriptionToken;

    fn unsubscribe(&self, token: SubscriptionToken);

    /// `None` clears the current source
    fn set_source(&self, uri: Option<&str>) -> Result<()>;

    fn play(&self) -> Result<()>;

    fn pause(&self) -> Result<()>;

    fn snapshot(&self) -> Result<PlaybackSnapshot>;

    /// Current video frame, called on `FrameAvailable`
    fn copy_frame(&self) -> Result<MediaSample>;
}

pub trait PlayerFactory: Send + Sync {
    fn create_player(&self) -> Result<Arc<dyn MediaPlayer>>;
}

const PLAYER_EVENTS: [PlayerEventKind; 5] = [
    PlayerEventKind::Opened,
    PlayerEventKind::Ended,
    PlayerEventKind::Failed,
    PlayerEventKind::StateChanged,
    PlayerEventKind::FrameAvailable,
];

struct ActivePlayer {
    player: Arc<dyn MediaPlayer>,
    subscriptions: Vec<SubscriptionToken>,
}

#[derive(Default)]
struct PlaybackState {
    device: Option<DeviceHandle>,
    buffer: Option<Arc<SharedSampleBuffer>>,
    player: Option<ActivePlayer>,
}

struct PlaybackInner {
    devices: Arc<dyn DeviceResources>,
    players: Arc<dyn PlayerFactory>,
    callback: StateCallback,
    state: Mutex<PlaybackState>,
    is_shutdown: AtomicBool,
    closed: AtomicBool,
}

/// Playback module
pub struct PlaybackManager {
    inner: Arc<PlaybackInner>,
}

impl PlaybackManager {
    pub fn create(
        devices: Arc<dyn DeviceResources>,
        players: Arc<dyn PlayerFactory>,
        callback: StateCallback,
    ) -> Self {
        Self {
            inner: Arc::new(PlaybackInner {
                devices,
                players,
                callback,
                state: Mutex::new(PlaybackState::default()),
                is_shutdown: AtomicBool::new(false),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Create the buffer decoded frames are copied into, replacing any
    /// previous one. Acquires the shared device on first use.
    pub async fn create_playback_buffer(
        &self,
        width: u32,
        height: u32,
    ) -> Result<Arc<SharedSampleBuffer>> {
        if width == 0 || height == 0 {
            return Err(BridgeError::InvalidArgument(format!(
                "playback buffer size {}x{}",
                width, height
            )));
        }
        self.inner.check_shutdown()?;

        let needs_device = self.inner.lock().device.is_none();
        if needs_device {
            let device = self
                .inner
                .devices
                .acquire_shared_device()
                .await
                .map_err(|e| BridgeError::acquisition("acquire shared device", e))?;

            // Another caller may have won the race while we were waiting
            let surplus = {
                let mut state = self.inner.lock();
                if state.device.is_none() && !self.inner.is_shutdown() {
                    state.device = Some(device);
                    None
                } else {
                    Some(device)
                }
            };
            if let Some(device) = surplus {
                self.inner.devices.release_shared_device(device).await;
                self.inner.check_shutdown()?;
            }
        }

        let buffer = Arc::new(SharedSampleBuffer::new(MajorType::Video));
        self.inner.lock().buffer = Some(buffer.clone());
        info!("Playback buffer created ({}x{})", width, height);
        Ok(buffer)
    }

    /// Point the player at `uri`, creating the player on first use
    pub fn load_content(&self, uri: &str) -> Result<()> {
        if uri.is_empty() {
            return Err(BridgeError::InvalidArgument("empty content location".into()));
        }
        self.inner.check_shutdown()?;

        let player = match self.inner.player() {
            Ok(player) => player,
            Err(_) => self.inner.create_player()?,
        };

        info!("Loading {}", uri);
        player.set_source(Some(uri))
    }

    pub fn play(&self) -> Result<()> {
        self.inner.player()?.play()
    }

    pub fn pause(&self) -> Result<()> {
        self.inner.player()?.pause()
    }

    /// Clear the player's source
    pub fn stop(&self) -> Result<()> {
        self.inner.player()?.set_source(None)
    }

    pub fn buffer(&self) -> Option<Arc<SharedSampleBuffer>> {
        self.inner.lock().buffer.clone()
    }

    pub async fn shutdown(&self) {
        let inner = &self.inner;
        if inner.is_shutdown.swap(true, Ordering::SeqCst) {
            return;
        }

        let device = {
            let mut state = inner.lock();
            state.buffer = None;
            if let Some(active) = state.player.take() {
                PlaybackInner::release_player(active);
            }
            state.device.take()
        };

        if let Some(device) = device {
            inner.devices.release_shared_device(device).await;
        }

        if !inner.closed.swap(true, Ordering::SeqCst) {
            (inner.callback)(ModuleEvent::Closed);
        }
        info!("Playback manager closed");
    }
}

impl PlaybackInner {
    fn lock(&self) -> MutexGuard<'_, PlaybackState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_shutdown(&self) -> bool {
        self.is_shutdown.load(Ordering::SeqCst)
    }

    fn check_shutdown(&self) -> Result<()> {
        if self.is_shutdown() {
            return Err(BridgeError::Shutdown);
        }
        Ok(())
    }

    fn player(&self) -> Result<Arc<dyn MediaPlayer>> {
        self.lock()
            .player
            .as_ref()
            .map(|active| active.player.clone())
            .ok_or_else(|| BridgeError::NotInitialized("no media player".into()))
    }

    fn create_player(self: &Arc<Self>) -> Result<Arc<dyn MediaPlayer>> {
        let player = self.players.create_player()?;

        let subscriptions = PLAYER_EVENTS
            .iter()
            .map(|kind| {
                let weak = Arc::downgrade(self);
                let handler: PlayerEventHandler = Arc::new(move |event| {
                    if let Some(inner) = weak.upgrade() {
                        inner.on_player_event(event);
                    }
                });
                player.subscribe(*kind, handler)
            })
            .collect();

        let replaced = self.lock().player.replace(ActivePlayer {
            player: player.clone(),
            subscriptions,
        });
        if let Some(replaced) = replaced {
            Self::release_player(replaced);
        }

        debug!("Media player created");
        Ok(player)
    }

    fn release_player(active: ActivePlayer) {
        for token in active.subscriptions.iter().rev() {
            active.player.unsubscribe(*token);
        }
        debug!("Media player released");
    }

    /// Runs on the player's thread
    fn on_player_event(&self, event: PlayerEvent) {
        let Ok(player) = self.player() else {
            return;
        };

        match event {
            PlayerEvent::Opened | PlayerEvent::StateChanged => {
                let snapshot = player.snapshot().unwrap_or_else(|e| {
                    debug!("Playback state unavailable: {}", e);
                    PlaybackSnapshot::default()
                });
                (self.callback)(ModuleEvent::PlaybackStateChanged(snapshot));
            }
            PlayerEvent::Ended => {
                let snapshot = PlaybackSnapshot {
                    state: PlayerState::Ended,
                    ..Default::default()
                };
                (self.callback)(ModuleEvent::PlaybackStateChanged(snapshot));
            }
            PlayerEvent::Failed { code } => {
                warn!("Media player failed with code {}", code);
                (self.callback)(ModuleEvent::Failed { code });
            }
            PlayerEvent::FrameAvailable => {
                let Some(buffer) = self.lock().buffer.clone() else {
                    return;
                };
                match player.copy_frame() {
                    Ok(frame) => {
                        if let Err(e) = buffer.accept(frame, false) {
                            warn!("Dropping playback frame: {}", e);
                        }
                    }
                    Err(e) => debug!("Frame copy failed: {}", e),
                }
            }
        }
    }
}

#[async_trait]
impl Module for PlaybackManager {
    fn kind(&self) -> ModuleKind {
        ModuleKind::Playback
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }

    async fn shutdown(&self) {
        PlaybackManager::shutdown(self).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::LoopbackDevices;
    use crate::pipeline::Timestamp;
    use bytes::Bytes;
    use std::collections::BTreeMap;
    use std::sync::atomic::AtomicU64;

    #[derive(Default)]
    struct FakePlayer {
        next_token: AtomicU64,
        handlers: Mutex<BTreeMap<u64, (PlayerEventKind, PlayerEventHandler)>>,
        unsubscribed: Mutex<Vec<u64>>,
        sources: Mutex<Vec<Option<String>>>,
        snapshot_fails: AtomicBool,
    }

    impl FakePlayer {
        fn emit(&self, event: PlayerEvent) {
            let handlers: Vec<_> = self
                .handlers
                .lock()
                .unwrap()
                .values()
                .filter(|(kind, _)| *kind == event.kind())
                .map(|(_, handler)| handler.clone())
                .collect();
            for handler in handlers {
                handler(event);
            }
        }
    }

    impl MediaPlayer for FakePlayer {
        fn subscribe(&self, kind: PlayerEventKind, handler: PlayerEventHandler) -> SubscriptionToken {
            let id = self.next_token.fetch_add(1, Ordering::SeqCst) + 1;
            self.handlers.lock().unwrap().insert(id, (kind, handler));
            SubscriptionToken(id)
        }

        fn unsubscribe(&self, token: SubscriptionToken) {
            self.handlers.lock().unwrap().remove(&token.0);
            self.unsubscribed.lock().unwrap().push(token.0);
        }

        fn set_source(&self, uri: Option<&str>) -> Result<()> {
            self.sources.lock().unwrap().push(uri.map(str::to_string));
            Ok(())
        }

        fn play(&self) -> Result<()> {
            Ok(())
        }

        fn pause(&self) -> Result<()> {
            Ok(())
        }

        fn snapshot(&self) -> Result<PlaybackSnapshot> {
            if self.snapshot_fails.load(Ordering::SeqCst) {
                return Err(BridgeError::InvalidState("session unavailable".into()));
            }
            Ok(PlaybackSnapshot {
                state: PlayerState::Playing,
                width: 1920,
                height: 1080,
                can_seek: true,
                duration: Duration::from_secs(90),
            })
        }

        fn copy_frame(&self) -> Result<MediaSample> {
            Ok(MediaSample::new(
                Bytes::from_static(b"frame"),
                Timestamp::from_micros(33_000),
            ))
        }
    }

    struct FakeFactory(Arc<FakePlayer>);

    impl PlayerFactory for FakeFactory {
        fn create_player(&self) -> Result<Arc<dyn MediaPlayer>> {
            Ok(self.0.clone())
        }
    }

    struct Fixture {
        devices: Arc<LoopbackDevices>,
        player: Arc<FakePlayer>,
        events: Arc<Mutex<Vec<ModuleEvent>>>,
        manager: PlaybackManager,
    }

    fn fixture() -> Fixture {
        let devices = Arc::new(LoopbackDevices::new());
        let player = Arc::new(FakePlayer::default());
        let events = Arc::new(Mutex::new(Vec::new()));
        let recorder = events.clone();
        let manager = PlaybackManager::create(
            devices.clone(),
            Arc::new(FakeFactory(player.clone())),
            Arc::new(move |event| recorder.lock().unwrap().push(event)),
        );

        Fixture {
            devices,
            player,
            events,
            manager,
        }
    }

    #[tokio::test]
    async fn test_buffer_creation() {
        let f = fixture();

        assert!(matches!(
            f.manager.create_playback_buffer(0, 720).await,
            Err(BridgeError::InvalidArgument(_))
        ));
        assert_eq!(f.devices.outstanding(), 0);

        f.manager.create_playback_buffer(1280, 720).await.unwrap();
        f.manager.create_playback_buffer(640, 360).await.unwrap();
        assert_eq!(f.devices.history().len(), 1, "device acquired twice");
    }

    #[test]
    fn test_controls_need_a_player() {
        let f = fixture();

        assert!(matches!(f.manager.play(), Err(BridgeError::NotInitialized(_))));
        assert!(matches!(f.manager.pause(), Err(BridgeError::NotInitialized(_))));
        assert!(matches!(f.manager.stop(), Err(BridgeError::NotInitialized(_))));
        assert!(matches!(
            f.manager.load_content(""),
            Err(BridgeError::InvalidArgument(_))
        ));

        f.manager.load_content("file:///clip.mp4").unwrap();
        f.manager.play().unwrap();
        f.manager.stop().unwrap();
        assert_eq!(
            *f.player.sources.lock().unwrap(),
            vec![Some("file:///clip.mp4".to_string()), None]
        );
        assert_eq!(f.player.handlers.lock().unwrap().len(), 5);
    }

    #[test]
    fn test_player_events_become_callbacks() {
        let f = fixture();
        f.manager.load_content("file:///clip.mp4").unwrap();

        f.player.emit(PlayerEvent::Opened);
        f.player.snapshot_fails.store(true, Ordering::SeqCst);
        f.player.emit(PlayerEvent::StateChanged);
        f.player.emit(PlayerEvent::Ended);
        f.player.emit(PlayerEvent::Failed { code: -5 });

        let events = f.events.lock().unwrap();
        assert_eq!(events.len(), 4);
        match &events[0] {
            ModuleEvent::PlaybackStateChanged(snapshot) => {
                assert_eq!(snapshot.state, PlayerState::Playing);
                assert_eq!((snapshot.width, snapshot.height), (1920, 1080));
                assert!(snapshot.can_seek);
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert_eq!(
            events[1],
            ModuleEvent::PlaybackStateChanged(PlaybackSnapshot::default())
        );
        assert_eq!(
            events[2],
            ModuleEvent::PlaybackStateChanged(PlaybackSnapshot {
                state: PlayerState::Ended,
                ..Default::default()
            })
        );
        assert_eq!(events[3], ModuleEvent::Failed { code: -5 });
    }

    #[tokio::test]
    async fn test_frames_reach_buffer() {
        let f = fixture();
        f.manager.load_content("file:///clip.mp4").unwrap();

        // No buffer yet: the frame goes nowhere
        f.player.emit(PlayerEvent::FrameAvailable);

        let buffer = f.manager.create_playback_buffer(1920, 1080).await.unwrap();
        f.player.emit(PlayerEvent::FrameAvailable);
        assert_eq!(buffer.delivered(), 1);
        assert_eq!(
            buffer.latest().unwrap().sample.pts,
            Timestamp::from_micros(33_000)
        );
    }

    #[tokio::test]
    async fn test_shutdown_releases_in_reverse_and_closes_once() {
        let f = fixture();
        f.manager.create_playback_buffer(1280, 720).await.unwrap();
        f.manager.load_content("file:///clip.mp4").unwrap();

        f.manager.shutdown().await;
        f.manager.shutdown().await;

        assert_eq!(*f.player.unsubscribed.lock().unwrap(), vec![5, 4, 3, 2, 1]);
        assert!(f.manager.buffer().is_none());
        assert_eq!(f.devices.outstanding(), 0);
        assert_eq!(*f.events.lock().unwrap(), vec![ModuleEvent::Closed]);

        assert_eq!(
            f.manager.load_content("file:///other.mp4"),
            Err(BridgeError::Shutdown)
        );
        assert!(matches!(
            f.manager.create_playback_buffer(64, 64).await,
            Err(BridgeError::Shutdown)
        ));
    }

    #[test]
    fn test_snapshot_serializes_with_tag() {
        let event = ModuleEvent::Failed { code: 6 };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["kind"], "Failed");
        assert_eq!(json["payload"]["code"], 6);
    }
}
