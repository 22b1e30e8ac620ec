//! Registry mapping opaque host handles to live modules

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::{info, warn};
use once_cell::sync::Lazy;

use super::Module;
use crate::error::{BridgeError, Result};

/// Opaque handle the host keeps for a module
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleHandle(u64);

impl ModuleHandle {
    pub fn id(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ModuleHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "module#{}", self.0)
    }
}

#[derive(Default)]
pub struct ModuleRegistry {
    next_id: AtomicU64,
    modules: Mutex<HashMap<ModuleHandle, Arc<dyn Module>>>,
}

static INSTANCE: Lazy<ModuleRegistry> = Lazy::new(ModuleRegistry::new);

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide registry used by the host glue
    pub fn global() -> &'static ModuleRegistry {
        &INSTANCE
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ModuleHandle, Arc<dyn Module>>> {
        self.modules.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn insert(&self, module: Arc<dyn Module>) -> ModuleHandle {
        let handle = ModuleHandle(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        info!("Registered {:?} module as {}", module.kind(), handle);
        self.lock().insert(handle, module);
        handle
    }

    /// Look a module up by handle and recover its concrete type
    pub fn get<T: Module + 'static>(&self, handle: ModuleHandle) -> Result<Arc<T>> {
        let module = self
            .lock()
            .get(&handle)
            .cloned()
            .ok_or_else(|| BridgeError::InvalidArgument(format!("unknown {}", handle)))?;

        module
            .into_any()
            .downcast::<T>()
            .map_err(|_| BridgeError::InvalidArgument(format!("{} has another type", handle)))
    }

    /// Unregister a module and shut it down
    pub async fn release(&self, handle: ModuleHandle) -> Result<()> {
        let module = self
            .lock()
            .remove(&handle)
            .ok_or_else(|| BridgeError::InvalidArgument(format!("unknown {}", handle)))?;

        module.shutdown().await;
        info!("Released {}", handle);
        Ok(())
    }

    /// Shut every registered module down, newest first
    pub async fn shutdown_all(&self) {
        let mut modules: Vec<_> = self.lock().drain().collect();
        modules.sort_by_key(|(handle, _)| std::cmp::Reverse(*handle));

        if !modules.is_empty() {
            warn!("Shutting down {} module(s) still registered", modules.len());
        }
        for (handle, module) in modules {
            module.shutdown().await;
            info!("Released {}", handle);
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{EffectSettings, LoopbackDevices, LoopbackSessionFactory};
    use crate::workers::{CaptureEngine, ModuleEvent, PlaybackManager};
    use std::time::Duration;

    fn capture_engine(events: Arc<Mutex<Vec<ModuleEvent>>>) -> CaptureEngine {
        CaptureEngine::create(
            Arc::new(LoopbackDevices::new()),
            Arc::new(LoopbackSessionFactory::new(Duration::from_millis(5), 16)),
            EffectSettings::default(),
            Arc::new(move |event| events.lock().unwrap().push(event)),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_insert_get_release() {
        let registry = ModuleRegistry::new();
        let events = Arc::new(Mutex::new(Vec::new()));
        let handle = registry.insert(Arc::new(capture_engine(events.clone())));

        let engine = registry.get::<CaptureEngine>(handle).unwrap();
        engine.start_preview(64, 64, false, false).unwrap().wait().await.unwrap();

        assert!(matches!(
            registry.get::<PlaybackManager>(handle),
            Err(BridgeError::InvalidArgument(_))
        ));

        registry.release(handle).await.unwrap();
        assert!(registry.is_empty());
        assert!(engine.is_shutdown());
        assert_eq!(events.lock().unwrap().last(), Some(&ModuleEvent::Closed));

        assert!(registry.release(handle).await.is_err());
    }

    #[tokio::test]
    async fn test_shutdown_all() {
        let registry = ModuleRegistry::new();
        let events = Arc::new(Mutex::new(Vec::new()));
        let first = registry.insert(Arc::new(capture_engine(events.clone())));
        let second = registry.insert(Arc::new(capture_engine(events.clone())));
        assert_ne!(first, second);
        assert_eq!(registry.len(), 2);

        registry.shutdown_all().await;
        assert!(registry.is_empty());
        assert_eq!(
            events
                .lock()
                .unwrap()
                .iter()
                .filter(|event| **event == ModuleEvent::Closed)
                .count(),
            2
        );
    }
}
