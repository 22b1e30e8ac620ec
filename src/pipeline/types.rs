//! Core types for the stream sink

use bytes::Bytes;
use std::time::Duration;

/// Timestamp on a media timeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Timestamp {
    /// Microseconds on the producer's clock (raw) or the run's timeline (normalized)
    pub micros: i64,
}

impl Timestamp {
    pub const ZERO: Timestamp = Timestamp { micros: 0 };

    /// Create a new timestamp from microseconds
    pub fn from_micros(micros: i64) -> Self {
        Self { micros }
    }

    /// Create a timestamp from a duration since the timeline origin
    pub fn from_duration(duration: Duration) -> Self {
        Self {
            micros: duration.as_micros() as i64,
        }
    }

    /// Convert to duration, clamping negative values to zero
    pub fn as_duration(&self) -> Duration {
        Duration::from_micros(self.micros.max(0) as u64)
    }

    /// Add a duration to this timestamp, saturating at the end of the timeline
    pub fn add(&self, duration: Duration) -> Self {
        let micros = i64::try_from(duration.as_micros()).unwrap_or(i64::MAX);
        Self {
            micros: self.micros.saturating_add(micros),
        }
    }

    /// Signed distance from `origin` to this timestamp, `None` if it does not fit
    pub fn since(&self, origin: Timestamp) -> Option<Timestamp> {
        self.micros.checked_sub(origin.micros).map(Self::from_micros)
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}µs", self.micros)
    }
}

/// Major type of a media stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum MajorType {
    Video,
    Audio,
}

impl std::fmt::Display for MajorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MajorType::Video => write!(f, "Video"),
            MajorType::Audio => write!(f, "Audio"),
        }
    }
}

/// One timestamped unit of media handed from a producer to a stream sink.
///
/// The payload is opaque to the sink. Ownership moves into
/// [`crate::pipeline::StreamSink::process_sample`] and ends either at the
/// downstream consumer or in a drop.
#[derive(Clone)]
pub struct MediaSample {
    /// Encoded or raw media data
    pub data: Bytes,

    /// Presentation timestamp
    pub pts: Timestamp,

    /// Decode timestamp; equals `pts` unless the producer reorders frames
    pub dts: Timestamp,

    /// Sample duration, if known
    pub duration: Option<Duration>,
}

impl MediaSample {
    /// Sample whose decode time equals its presentation time
    pub fn new(data: Bytes, pts: Timestamp) -> Self {
        Self {
            data,
            pts,
            dts: pts,
            duration: None,
        }
    }

    /// Sample with a distinct decode timestamp
    pub fn with_dts(data: Bytes, pts: Timestamp, dts: Timestamp) -> Self {
        Self {
            data,
            pts,
            dts,
            duration: None,
        }
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    /// Get the size of the sample data in bytes
    pub fn size(&self) -> usize {
        self.data.len()
    }
}

impl std::fmt::Debug for MediaSample {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut debug = f.debug_struct("MediaSample");
        debug
            .field("pts", &self.pts)
            .field("dts", &self.dts)
            .field("size", &self.size());

        if let Some(duration) = self.duration {
            debug.field("duration", &duration);
        }

        debug.finish()
    }
}

/// Kind of marker placed into a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerKind {
    Default,
    EndOfSegment,
    Tick,
    Event,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_since() {
        let raw = Timestamp::from_micros(1050);
        assert_eq!(raw.since(Timestamp::from_micros(100)), Some(Timestamp::from_micros(950)));
        assert_eq!(
            Timestamp::from_micros(400).since(Timestamp::from_micros(500)),
            Some(Timestamp::from_micros(-100))
        );
    }

    #[test]
    fn test_timestamp_since_overflow() {
        assert_eq!(Timestamp::from_micros(i64::MIN).since(Timestamp::from_micros(1)), None);
        assert_eq!(Timestamp::from_micros(i64::MAX).since(Timestamp::from_micros(-1)), None);
        assert_eq!(
            Timestamp::from_micros(i64::MAX).add(Duration::from_secs(1)).micros,
            i64::MAX
        );
    }

    #[test]
    fn test_negative_duration_clamps() {
        assert_eq!(Timestamp::from_micros(-5).as_duration(), Duration::ZERO);
        assert_eq!(
            Timestamp::from_duration(Duration::from_millis(3)).micros,
            3000
        );
    }

    #[test]
    fn test_sample_defaults_dts_to_pts() {
        let sample = MediaSample::new(Bytes::from_static(b"abc"), Timestamp::from_micros(7));
        assert_eq!(sample.dts, sample.pts);
        assert_eq!(sample.size(), 3);
        assert!(sample.duration.is_none());
    }
}
