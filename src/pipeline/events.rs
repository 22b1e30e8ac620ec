//! Media event channel
//!
//! One ordered queue per stream. Consumers either block in
//! [`MediaEventQueue::get_event`] or register a single one-shot callback with
//! [`MediaEventQueue::begin_get_event`]. Only one subscriber may be waiting at
//! any time.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

use log::debug;
use serde_json::Value;
use tokio::sync::oneshot;

use super::types::MarkerKind;
use crate::error::{BridgeError, Result};

/// Lifecycle and marker events raised by a stream sink
#[derive(Debug, Clone, PartialEq)]
pub enum MediaEvent {
    /// The stream entered `Started`
    Started,

    /// The stream entered `Stopped`
    Stopped,

    /// The sink wants one more sample from the producer
    RequestSample,

    /// Every sample placed before the marker has been processed
    MarkerReached {
        kind: MarkerKind,
        context: Option<Value>,
    },

    /// Asynchronous failure reported by the stream
    Error { code: i32 },
}

/// One-shot event subscription. Receives `Err(Shutdown)` if the queue shuts
/// down while the subscription is pending.
pub type EventCallback = Box<dyn FnOnce(Result<MediaEvent>) + Send + 'static>;

/// How [`MediaEventQueue::get_event`] behaves on an empty queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GetEventFlags {
    /// Wait until an event is queued or the queue shuts down
    Blocking,
    /// Return `Ok(None)` immediately
    NoWait,
}

/// A callback paired with the outcome it must receive.
///
/// Produced while the stream sink holds its own state lock and run only after
/// that lock is released, so callbacks may call back into the sink.
#[must_use]
pub(crate) struct EventDispatch {
    callback: EventCallback,
    outcome: Result<MediaEvent>,
}

impl EventDispatch {
    pub(crate) fn deliver(self) {
        (self.callback)(self.outcome)
    }
}

#[derive(Default)]
struct QueueInner {
    events: VecDeque<MediaEvent>,
    pending: Option<EventCallback>,
    blocking_waiter: bool,
    shutdown: bool,
}

impl QueueInner {
    fn has_subscriber(&self) -> bool {
        self.pending.is_some() || self.blocking_waiter
    }
}

/// Thread-safe FIFO of [`MediaEvent`]s
///
/// Guarded by its own mutex, independent of the sink's state lock.
#[derive(Default)]
pub struct MediaEventQueue {
    inner: Mutex<QueueInner>,
    available: Condvar,
}

impl MediaEventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, QueueInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append an event, handing it straight to a pending callback if there is one.
    ///
    /// The callback is not invoked here; the caller must deliver the returned
    /// dispatch once it holds no other lock.
    pub(crate) fn enqueue(&self, event: MediaEvent) -> Result<Option<EventDispatch>> {
        let mut inner = self.lock();
        if inner.shutdown {
            return Err(BridgeError::Shutdown);
        }

        if let Some(callback) = inner.pending.take() {
            // A pending callback implies the queue is empty, so this event is next in line
            return Ok(Some(EventDispatch {
                callback,
                outcome: Ok(event),
            }));
        }

        inner.events.push_back(event);
        if inner.blocking_waiter {
            self.available.notify_one();
        }
        Ok(None)
    }

    /// Append an event and deliver it to a pending callback, if any
    pub fn queue_event(&self, event: MediaEvent) -> Result<()> {
        if let Some(dispatch) = self.enqueue(event)? {
            dispatch.deliver();
        }
        Ok(())
    }

    /// Register a one-shot callback for the next event.
    ///
    /// Fails with `MultipleSubscribers` while another callback or a blocking
    /// `get_event` is waiting. If an event is already queued the callback runs
    /// before this call returns.
    pub fn begin_get_event(&self, callback: EventCallback) -> Result<()> {
        let mut inner = self.lock();
        if inner.shutdown {
            return Err(BridgeError::Shutdown);
        }
        if inner.has_subscriber() {
            return Err(BridgeError::MultipleSubscribers);
        }

        match inner.events.pop_front() {
            Some(event) => {
                drop(inner);
                callback(Ok(event));
            }
            None => inner.pending = Some(callback),
        }
        Ok(())
    }

    /// Take the next event synchronously
    pub fn get_event(&self, flags: GetEventFlags) -> Result<Option<MediaEvent>> {
        let mut inner = self.lock();
        if inner.shutdown {
            return Err(BridgeError::Shutdown);
        }
        if inner.has_subscriber() {
            return Err(BridgeError::MultipleSubscribers);
        }

        if let Some(event) = inner.events.pop_front() {
            return Ok(Some(event));
        }
        if flags == GetEventFlags::NoWait {
            return Ok(None);
        }

        inner.blocking_waiter = true;
        loop {
            inner = self
                .available
                .wait(inner)
                .unwrap_or_else(PoisonError::into_inner);

            if inner.shutdown {
                inner.blocking_waiter = false;
                return Err(BridgeError::Shutdown);
            }
            if let Some(event) = inner.events.pop_front() {
                inner.blocking_waiter = false;
                return Ok(Some(event));
            }
        }
    }

    /// Await the next event from async code
    pub async fn next_event(&self) -> Result<MediaEvent> {
        let (tx, rx) = oneshot::channel();
        self.begin_get_event(Box::new(move |outcome| {
            let _ = tx.send(outcome);
        }))?;

        rx.await
            .map_err(|_| BridgeError::Cancelled("event subscription dropped".into()))?
    }

    /// Shut the queue down. Idempotent.
    ///
    /// Queued events are discarded, a pending callback receives
    /// `Err(Shutdown)` and a blocked `get_event` wakes with the same error.
    /// Returns `true` only for the call that performed the shutdown.
    pub fn shutdown(&self) -> bool {
        let mut inner = self.lock();
        if inner.shutdown {
            return false;
        }

        inner.shutdown = true;
        let discarded = inner.events.len();
        inner.events.clear();
        let pending = inner.pending.take();
        self.available.notify_all();
        drop(inner);

        debug!("Event queue shut down ({} undelivered events discarded)", discarded);

        if let Some(callback) = pending {
            callback(Err(BridgeError::Shutdown));
        }
        true
    }

    pub fn is_shutdown(&self) -> bool {
        self.lock().shutdown
    }

    /// Number of queued, undelivered events
    pub fn len(&self) -> usize {
        self.lock().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for MediaEventQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("MediaEventQueue")
            .field("queued", &inner.events.len())
            .field("pending_callback", &inner.pending.is_some())
            .field("shutdown", &inner.shutdown)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_fifo_order() {
        let queue = MediaEventQueue::new();
        queue.queue_event(MediaEvent::Started).unwrap();
        queue.queue_event(MediaEvent::RequestSample).unwrap();
        queue.queue_event(MediaEvent::Stopped).unwrap();

        assert_eq!(queue.len(), 3);
        assert_eq!(
            queue.get_event(GetEventFlags::NoWait).unwrap(),
            Some(MediaEvent::Started)
        );
        assert_eq!(
            queue.get_event(GetEventFlags::NoWait).unwrap(),
            Some(MediaEvent::RequestSample)
        );
        assert_eq!(
            queue.get_event(GetEventFlags::NoWait).unwrap(),
            Some(MediaEvent::Stopped)
        );
        assert_eq!(queue.get_event(GetEventFlags::NoWait).unwrap(), None);
    }

    #[test]
    fn test_second_subscription_rejected() {
        let queue = MediaEventQueue::new();
        queue.begin_get_event(Box::new(|_| {})).unwrap();

        assert_eq!(
            queue.begin_get_event(Box::new(|_| {})),
            Err(BridgeError::MultipleSubscribers)
        );
        assert_eq!(
            queue.get_event(GetEventFlags::NoWait),
            Err(BridgeError::MultipleSubscribers)
        );
    }

    #[test]
    fn test_callback_receives_queued_event() {
        let queue = MediaEventQueue::new();
        let (tx, rx) = mpsc::channel();

        queue
            .begin_get_event(Box::new(move |event| tx.send(event).unwrap()))
            .unwrap();
        queue.queue_event(MediaEvent::Started).unwrap();

        assert_eq!(rx.recv().unwrap(), Ok(MediaEvent::Started));
        // The subscription was consumed; a new one is accepted
        assert!(queue.begin_get_event(Box::new(|_| {})).is_ok());
    }

    #[test]
    fn test_callback_runs_immediately_when_event_waiting() {
        let queue = MediaEventQueue::new();
        queue.queue_event(MediaEvent::Stopped).unwrap();

        let (tx, rx) = mpsc::channel();
        queue
            .begin_get_event(Box::new(move |event| tx.send(event).unwrap()))
            .unwrap();

        assert_eq!(rx.try_recv().unwrap(), Ok(MediaEvent::Stopped));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_shutdown_fails_pending_and_later_subscriptions() {
        let queue = MediaEventQueue::new();
        let (tx, rx) = mpsc::channel();
        queue
            .begin_get_event(Box::new(move |event| tx.send(event).unwrap()))
            .unwrap();

        assert!(queue.shutdown());
        assert!(!queue.shutdown());

        assert_eq!(rx.recv().unwrap(), Err(BridgeError::Shutdown));
        assert!(rx.try_recv().is_err(), "failure path engaged twice");
        assert_eq!(
            queue.begin_get_event(Box::new(|_| {})),
            Err(BridgeError::Shutdown)
        );
        assert_eq!(
            queue.queue_event(MediaEvent::Started),
            Err(BridgeError::Shutdown)
        );
    }

    #[test]
    fn test_blocking_get_wakes_on_event() {
        let queue = Arc::new(MediaEventQueue::new());
        let waiter = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.get_event(GetEventFlags::Blocking))
        };

        thread::sleep(Duration::from_millis(20));
        queue.queue_event(MediaEvent::RequestSample).unwrap();

        assert_eq!(waiter.join().unwrap(), Ok(Some(MediaEvent::RequestSample)));
    }

    #[test]
    fn test_blocking_get_wakes_on_shutdown() {
        let queue = Arc::new(MediaEventQueue::new());
        let waiter = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.get_event(GetEventFlags::Blocking))
        };

        thread::sleep(Duration::from_millis(20));
        queue.shutdown();

        assert_eq!(waiter.join().unwrap(), Err(BridgeError::Shutdown));
    }

    #[test]
    fn test_concurrent_shutdown_engages_once() {
        let queue = Arc::new(MediaEventQueue::new());
        let failures = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        {
            let failures = Arc::clone(&failures);
            queue
                .begin_get_event(Box::new(move |event| {
                    if event.is_err() {
                        failures.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                    }
                }))
                .unwrap();
        }

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || queue.shutdown())
            })
            .collect();
        let engaged = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|engaged| *engaged)
            .count();

        assert_eq!(engaged, 1);
        assert_eq!(failures.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_next_event() {
        let queue = Arc::new(MediaEventQueue::new());
        let producer = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                queue
                    .queue_event(MediaEvent::MarkerReached {
                        kind: MarkerKind::Tick,
                        context: Some(Value::from(7)),
                    })
                    .unwrap();
            })
        };

        let event = queue.next_event().await.unwrap();
        producer.await.unwrap();
        assert_eq!(
            event,
            MediaEvent::MarkerReached {
                kind: MarkerKind::Tick,
                context: Some(Value::from(7)),
            }
        );
    }
}
