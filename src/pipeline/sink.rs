//! Stream sink state machine
//!
//! Receives samples from an upstream producer, normalizes their timestamps
//! against the run's clock offset, paces the producer through a fixed-depth
//! pull window and forwards accepted samples to a downstream consumer.
//!
//! # Locking
//!
//! Two independent mutexes:
//! - the state lock guards the lifecycle state, clock offset, discontinuity
//!   flag, admission counters, media type and consumer reference;
//! - the event queue has its own lock (see [`MediaEventQueue`]).
//!
//! Events are appended to the queue while the state lock is held, which keeps
//! them in the order the transitions happened. Callbacks of event subscribers
//! only run after the state lock has been released.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::{debug, info, warn};
use serde_json::Value;

use super::admission::{Admission, AdmissionController, DropReason};
use super::clock::ClockOffset;
use super::events::{EventCallback, EventDispatch, GetEventFlags, MediaEvent, MediaEventQueue};
use super::health::SinkHealth;
use super::media_type::MediaType;
use super::state::StreamState;
use super::traits::{
    MediaEventGenerator, MediaTypeHandler, Negotiation, SampleConsumer, SampleSink,
};
use super::types::{MajorType, MarkerKind, MediaSample, Timestamp};
use crate::error::{BridgeError, Result};

struct SinkState {
    stream: StreamState,
    clock: ClockOffset,
    admission: AdmissionController,
    set_discontinuity: bool,
    media_type: MediaType,
    consumer: Option<Arc<dyn SampleConsumer>>,
}

/// Sink for a single media stream
pub struct StreamSink {
    identifier: u32,
    major_type: MajorType,
    state: Mutex<SinkState>,
    events: MediaEventQueue,
    health: SinkHealth,
}

impl StreamSink {
    /// Create a sink bound to one consumer and one media type.
    ///
    /// Fails with `InvalidMediaType` if the consumer refuses `media_type`.
    pub fn new(
        identifier: u32,
        media_type: MediaType,
        consumer: Arc<dyn SampleConsumer>,
    ) -> Result<Self> {
        if consumer.negotiate_media_type(&media_type) == Negotiation::Rejected {
            return Err(BridgeError::InvalidMediaType(format!(
                "consumer refused {}",
                media_type
            )));
        }

        Ok(Self {
            identifier,
            major_type: media_type.major,
            state: Mutex::new(SinkState {
                stream: StreamState::Stopped,
                clock: ClockOffset::default(),
                admission: AdmissionController::new(),
                set_discontinuity: false,
                media_type,
                consumer: Some(consumer),
            }),
            events: MediaEventQueue::new(),
            health: SinkHealth::new(),
        })
    }

    fn lock(&self) -> MutexGuard<'_, SinkState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append an event under the state lock, keeping its callback for later
    fn raise(&self, dispatches: &mut Vec<EventDispatch>, event: MediaEvent) {
        match self.events.enqueue(event) {
            Ok(Some(dispatch)) => dispatches.push(dispatch),
            Ok(None) => {}
            Err(e) => warn!("Stream {}: event not queued: {}", self.identifier, e),
        }
    }

    fn deliver(dispatches: Vec<EventDispatch>) {
        for dispatch in dispatches {
            dispatch.deliver();
        }
    }

    pub fn identifier(&self) -> u32 {
        self.identifier
    }

    pub fn state(&self) -> StreamState {
        self.lock().stream
    }

    pub fn clock_offset(&self) -> ClockOffset {
        self.lock().clock
    }

    /// Offset derived from the first eligible sample of the current run
    pub fn start_time_offset(&self) -> Option<Timestamp> {
        self.lock().clock.start_time_offset()
    }

    pub fn outstanding_requests(&self) -> u8 {
        self.lock().admission.outstanding()
    }

    pub fn health(&self) -> &SinkHealth {
        &self.health
    }

    pub fn events(&self) -> &MediaEventQueue {
        &self.events
    }

    /// `Stopped → Started`.
    ///
    /// Resets the clock offset and the pull window, clears the discontinuity
    /// flag, raises `Started` and fills the pull window with `RequestSample`s.
    pub fn start(&self, system_time: Timestamp, clock_start_offset: Timestamp) -> Result<()> {
        let mut dispatches = Vec::new();
        {
            let mut st = self.lock();
            match st.stream {
                StreamState::Shutdown => return Err(BridgeError::Shutdown),
                StreamState::Started => {
                    return Err(BridgeError::InvalidState(format!(
                        "stream {} is already started",
                        self.identifier
                    )));
                }
                StreamState::Stopped => {}
            }

            st.stream = StreamState::Started;
            st.clock = ClockOffset::new(system_time, clock_start_offset);
            st.admission.reset();
            st.set_discontinuity = false;
            self.raise(&mut dispatches, MediaEvent::Started);

            let issued = st.admission.fill_window();
            self.health.record_requests(issued);
            for _ in 0..issued {
                self.raise(&mut dispatches, MediaEvent::RequestSample);
            }
        }
        Self::deliver(dispatches);

        info!(
            "Stream {}: started (system time {}, clock start {})",
            self.identifier, system_time, clock_start_offset
        );
        Ok(())
    }

    /// `Started → Stopped`. Disables sample requests and raises `Stopped`.
    pub fn stop(&self) -> Result<()> {
        let mut dispatches = Vec::new();
        {
            let mut st = self.lock();
            match st.stream {
                StreamState::Shutdown => return Err(BridgeError::Shutdown),
                StreamState::Stopped => {
                    return Err(BridgeError::InvalidState(format!(
                        "stream {} is not started",
                        self.identifier
                    )));
                }
                StreamState::Started => {}
            }

            st.stream = StreamState::Stopped;
            st.admission.disable();
            self.raise(&mut dispatches, MediaEvent::Stopped);
        }
        Self::deliver(dispatches);

        info!("Stream {}: stopped", self.identifier);
        Ok(())
    }

    /// Move to the terminal state from anywhere. Idempotent and infallible.
    ///
    /// Releases the consumer reference and shuts the event queue down; only
    /// the first caller does either.
    pub fn shutdown(&self) {
        let consumer = {
            let mut st = self.lock();
            if st.stream.is_shutdown() {
                return;
            }
            st.stream = StreamState::Shutdown;
            st.admission.disable();
            st.consumer.take()
        };

        self.events.shutdown();
        drop(consumer);

        info!("Stream {}: shut down ({})", self.identifier, self.health.summary());
    }

    /// Normalize, admit and forward one sample. Called with the state lock held.
    fn admit(&self, st: &mut SinkState, mut sample: MediaSample) -> Result<()> {
        if !st.clock.derive(sample.pts) {
            return self.dropped(DropReason::PredatesClockStart, &sample);
        }

        let (Some(pts), Some(dts)) = (st.clock.normalize(sample.pts), st.clock.normalize(sample.dts))
        else {
            return self.dropped(DropReason::TimestampOutOfRange, &sample);
        };

        if let Admission::Drop(reason) = st.admission.on_sample_arrived(pts, dts) {
            return self.dropped(reason, &sample);
        }

        let consumer = st.consumer.clone().ok_or(BridgeError::Shutdown)?;
        let discontinuous = st.set_discontinuity;
        let size = sample.size();
        sample.pts = pts;
        sample.dts = dts;

        consumer.accept(sample, discontinuous)?;

        st.set_discontinuity = false;
        self.health.record_accepted(size);
        Ok(())
    }

    fn dropped(&self, reason: DropReason, sample: &MediaSample) -> Result<()> {
        debug!(
            "Stream {}: dropped sample at {} ({})",
            self.identifier, sample.pts, reason
        );
        self.health.record_drop(reason);
        Ok(())
    }
}

impl SampleSink for StreamSink {
    /// Valid only while `Started`. Drops are silent; a consumer failure is
    /// returned to the producer.
    fn process_sample(&self, sample: MediaSample) -> Result<()> {
        let mut dispatches = Vec::new();
        let outcome = {
            let mut st = self.lock();
            match st.stream {
                StreamState::Shutdown => return Err(BridgeError::Shutdown),
                StreamState::Stopped => {
                    // A pull answered after stop still frees its slot; the
                    // disabled window never re-arms
                    st.admission.on_request_satisfied();
                    self.health.record_rejected();
                    return Err(BridgeError::InvalidState(format!(
                        "stream {} is not started",
                        self.identifier
                    )));
                }
                StreamState::Started => {}
            }

            // Any arriving sample answers one outstanding pull, accepted or not
            let satisfied = st.admission.on_request_satisfied();
            let outcome = self.admit(&mut st, sample);

            if satisfied && st.admission.on_request_issued() {
                self.health.record_requests(1);
                self.raise(&mut dispatches, MediaEvent::RequestSample);
            }
            outcome
        };
        Self::deliver(dispatches);
        outcome
    }

    /// Valid in `Started` or `Stopped`. Nothing is buffered inside the sink,
    /// so the marker is reached as soon as it is placed.
    fn place_marker(&self, kind: MarkerKind, context: Option<Value>) -> Result<()> {
        let mut dispatches = Vec::new();
        {
            let st = self.lock();
            if st.stream.is_shutdown() {
                return Err(BridgeError::Shutdown);
            }

            self.health.record_marker();
            self.raise(&mut dispatches, MediaEvent::MarkerReached { kind, context });
        }
        Self::deliver(dispatches);
        Ok(())
    }

    /// No samples are held between calls, so there is nothing to discard; the
    /// next delivered sample is flagged as discontinuous.
    fn flush(&self) -> Result<()> {
        let mut st = self.lock();
        if st.stream.is_shutdown() {
            return Err(BridgeError::Shutdown);
        }

        st.set_discontinuity = true;
        self.health.record_flush();
        debug!("Stream {}: flushed", self.identifier);
        Ok(())
    }
}

impl MediaEventGenerator for StreamSink {
    fn begin_get_event(&self, callback: EventCallback) -> Result<()> {
        self.events.begin_get_event(callback)
    }

    fn get_event(&self, flags: GetEventFlags) -> Result<Option<MediaEvent>> {
        self.events.get_event(flags)
    }

    fn queue_event(&self, event: MediaEvent) -> Result<()> {
        self.events.queue_event(event)
    }
}

impl MediaTypeHandler for StreamSink {
    fn current_media_type(&self) -> Result<MediaType> {
        let st = self.lock();
        if st.stream.is_shutdown() {
            return Err(BridgeError::Shutdown);
        }
        Ok(st.media_type.clone())
    }

    fn major_type(&self) -> Result<MajorType> {
        if self.lock().stream.is_shutdown() {
            return Err(BridgeError::Shutdown);
        }
        Ok(self.major_type)
    }

    fn media_type_count(&self) -> Result<usize> {
        if self.lock().stream.is_shutdown() {
            return Err(BridgeError::Shutdown);
        }
        Ok(1)
    }

    fn media_type_by_index(&self, index: usize) -> Result<MediaType> {
        let st = self.lock();
        if st.stream.is_shutdown() {
            return Err(BridgeError::Shutdown);
        }
        if index > 0 {
            return Err(BridgeError::NoMoreTypes(index));
        }
        Ok(st.media_type.clone())
    }

    fn is_media_type_supported(&self, candidate: &MediaType) -> Result<()> {
        let st = self.lock();
        if st.stream.is_shutdown() {
            return Err(BridgeError::Shutdown);
        }

        st.media_type.verify(candidate)?;

        let consumer = st.consumer.as_ref().ok_or(BridgeError::Shutdown)?;
        if consumer.negotiate_media_type(candidate) == Negotiation::Rejected {
            return Err(BridgeError::InvalidMediaType(format!(
                "consumer refused {}",
                candidate
            )));
        }
        Ok(())
    }

    /// Legal only while stopped; the format never changes mid-run.
    fn set_current_media_type(&self, media_type: MediaType) -> Result<()> {
        self.is_media_type_supported(&media_type)?;

        let mut st = self.lock();
        match st.stream {
            StreamState::Shutdown => Err(BridgeError::Shutdown),
            StreamState::Started => Err(BridgeError::InvalidState(format!(
                "stream {} cannot change media type while started",
                self.identifier
            ))),
            StreamState::Stopped => {
                debug!("Stream {}: media type set to {}", self.identifier, media_type);
                st.media_type = media_type;
                Ok(())
            }
        }
    }
}

impl Drop for StreamSink {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for StreamSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let st = self.lock();
        f.debug_struct("StreamSink")
            .field("identifier", &self.identifier)
            .field("state", &st.stream)
            .field("media_type", &st.media_type)
            .field("clock", &st.clock)
            .field("outstanding", &st.admission.outstanding())
            .finish()
    }
}
