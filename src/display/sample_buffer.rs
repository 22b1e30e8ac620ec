//! Host-facing buffer holding the latest delivered sample of one stream

use std::sync::atomic::{AtomicU64, Ordering};

use log::debug;

use super::triple_buffer::TripleBuffer;
use crate::error::{BridgeError, Result};
use crate::pipeline::{MajorType, MediaSample, MediaType, Negotiation, SampleConsumer};

/// A sample as the host sees it: normalized timestamps plus the
/// discontinuity flag it was delivered with
#[derive(Debug, Clone)]
pub struct DeliveredSample {
    pub sample: MediaSample,
    pub discontinuous: bool,

    /// 1-based position in the delivery order
    pub sequence: u64,
}

/// Downstream end of a stream sink, read by the host
///
/// Only the newest sample is kept; the host is expected to poll at its own
/// frame rate and skip whatever it missed.
pub struct SharedSampleBuffer {
    major: MajorType,
    slots: TripleBuffer<Option<DeliveredSample>>,
    delivered: AtomicU64,
}

impl SharedSampleBuffer {
    pub fn new(major: MajorType) -> Self {
        Self {
            major,
            slots: TripleBuffer::new(|| None),
            delivered: AtomicU64::new(0),
        }
    }

    pub fn major_type(&self) -> MajorType {
        self.major
    }

    /// Newest delivered sample, if any was ever delivered
    pub fn latest(&self) -> Option<DeliveredSample> {
        self.slots.read().clone()
    }

    /// Whether a sample arrived since the last [`latest`](Self::latest)
    pub fn has_new_sample(&self) -> bool {
        self.slots.has_fresh()
    }

    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }
}

impl SampleConsumer for SharedSampleBuffer {
    /// Refuses samples without payload; the host has nothing to read from them.
    fn accept(&self, sample: MediaSample, discontinuous: bool) -> Result<()> {
        if sample.size() == 0 {
            return Err(BridgeError::Consumer(format!(
                "{} buffer: empty sample at {}",
                self.major, sample.pts
            )));
        }

        let sequence = self.delivered.fetch_add(1, Ordering::Relaxed) + 1;
        if discontinuous {
            debug!("{} buffer: discontinuity at {}", self.major, sample.pts);
        }

        self.slots.publish(|slot| {
            *slot = Some(DeliveredSample {
                sample,
                discontinuous,
                sequence,
            });
        });
        Ok(())
    }

    fn negotiate_media_type(&self, candidate: &MediaType) -> Negotiation {
        if candidate.major == self.major {
            Negotiation::Accepted
        } else {
            Negotiation::Rejected
        }
    }
}

impl std::fmt::Debug for SharedSampleBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedSampleBuffer")
            .field("major", &self.major)
            .field("delivered", &self.delivered())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::Timestamp;
    use bytes::Bytes;

    fn sample(pts: i64) -> MediaSample {
        MediaSample::new(Bytes::from_static(b"frame"), Timestamp::from_micros(pts))
    }

    #[test]
    fn test_latest_sample_wins() {
        let buffer = SharedSampleBuffer::new(MajorType::Video);
        assert!(buffer.latest().is_none());

        buffer.accept(sample(10), false).unwrap();
        buffer.accept(sample(20), true).unwrap();
        assert!(buffer.has_new_sample());

        let latest = buffer.latest().unwrap();
        assert_eq!(latest.sample.pts, Timestamp::from_micros(20));
        assert!(latest.discontinuous);
        assert_eq!(latest.sequence, 2);
        assert!(!buffer.has_new_sample());
        assert_eq!(buffer.delivered(), 2);
    }

    #[test]
    fn test_empty_sample_refused() {
        let buffer = SharedSampleBuffer::new(MajorType::Video);
        let empty = MediaSample::new(Bytes::new(), Timestamp::from_micros(10));

        assert!(matches!(buffer.accept(empty, false), Err(BridgeError::Consumer(_))));
        assert!(buffer.latest().is_none());
        assert_eq!(buffer.delivered(), 0);
    }

    #[test]
    fn test_negotiates_by_major_type() {
        let buffer = SharedSampleBuffer::new(MajorType::Audio);
        assert_eq!(
            buffer.negotiate_media_type(&MediaType::audio("Float", 48_000, 2)),
            Negotiation::Accepted
        );
        assert_eq!(
            buffer.negotiate_media_type(&MediaType::video("NV12", 640, 480)),
            Negotiation::Rejected
        );
    }
}
