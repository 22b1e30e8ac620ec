//! Capability traits of a stream sink and its downstream consumer
//!
//! A stream sink is one object polymorphic over three capability sets:
//! accepting samples, raising events, and negotiating its media type.

use serde_json::Value;

use super::events::{EventCallback, GetEventFlags, MediaEvent};
use super::media_type::MediaType;
use super::types::{MajorType, MarkerKind, MediaSample};
use crate::error::Result;

/// Answer of a consumer to a proposed media type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Negotiation {
    Accepted,
    Rejected,
}

/// Downstream end of a stream sink, usually a buffer shared with the host.
///
/// `accept` is called with the sink's state lock held, so implementations
/// must not call back into the sink that feeds them.
pub trait SampleConsumer: Send + Sync {
    /// Take ownership of a sample whose timestamps are already normalized
    fn accept(&self, sample: MediaSample, discontinuous: bool) -> Result<()>;

    fn negotiate_media_type(&self, candidate: &MediaType) -> Negotiation;
}

/// Sample intake used by the upstream producer
pub trait SampleSink: Send + Sync {
    fn process_sample(&self, sample: MediaSample) -> Result<()>;

    fn place_marker(&self, kind: MarkerKind, context: Option<Value>) -> Result<()>;

    fn flush(&self) -> Result<()>;
}

/// Event source consumed by the control thread
pub trait MediaEventGenerator: Send + Sync {
    fn begin_get_event(&self, callback: EventCallback) -> Result<()>;

    fn get_event(&self, flags: GetEventFlags) -> Result<Option<MediaEvent>>;

    fn queue_event(&self, event: MediaEvent) -> Result<()>;
}

/// Media type negotiation
pub trait MediaTypeHandler: Send + Sync {
    fn current_media_type(&self) -> Result<MediaType>;

    fn major_type(&self) -> Result<MajorType>;

    fn media_type_count(&self) -> Result<usize>;

    fn media_type_by_index(&self, index: usize) -> Result<MediaType>;

    fn is_media_type_supported(&self, candidate: &MediaType) -> Result<()>;

    fn set_current_media_type(&self, media_type: MediaType) -> Result<()>;
}
