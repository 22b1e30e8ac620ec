//! Stream sink pipeline
//!
//! Separates the concerns of a single media stream:
//! - Control: the `Stopped`/`Started`/`Shutdown` state machine
//! - Timing: clock offset derivation and timestamp normalization
//! - Pacing: the bounded pull window and monotonicity guards
//! - Signalling: the per-stream event queue
//!
//! # Architecture
//!
//! A producer pushes samples into a [`StreamSink`], which forwards the
//! accepted ones to a [`SampleConsumer`]. The sink pulls from the producer
//! through `RequestSample` events on its [`MediaEventQueue`].

pub mod admission;
pub mod clock;
pub mod events;
pub mod health;
pub mod media_type;
pub mod sink;
pub mod state;
pub mod traits;
pub mod types;

pub use admission::{Admission, AdmissionController, DropReason, MAX_SAMPLE_REQUESTS};
pub use clock::ClockOffset;
pub use events::{EventCallback, GetEventFlags, MediaEvent, MediaEventQueue};
pub use health::{HealthSummary, SinkHealth};
pub use media_type::MediaType;
pub use sink::StreamSink;
pub use state::StreamState;
pub use traits::{MediaEventGenerator, MediaTypeHandler, Negotiation, SampleConsumer, SampleSink};
pub use types::{MajorType, MarkerKind, MediaSample, Timestamp};
