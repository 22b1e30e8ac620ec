//! Media type description and verification

use serde::{Deserialize, Serialize};

use super::types::MajorType;
use crate::error::{BridgeError, Result};

/// Negotiated format of a stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaType {
    pub major: MajorType,

    /// Subtype tag, e.g. `NV12`, `BGRA8`, `PCM`, `Float`
    pub subtype: String,

    /// Frame width (video only)
    #[serde(default)]
    pub width: Option<u32>,

    /// Frame height (video only)
    #[serde(default)]
    pub height: Option<u32>,

    /// Sample rate (audio only)
    #[serde(default)]
    pub sample_rate: Option<u32>,

    /// Number of channels (audio only)
    #[serde(default)]
    pub channels: Option<u16>,
}

impl MediaType {
    pub fn video(subtype: &str, width: u32, height: u32) -> Self {
        Self {
            major: MajorType::Video,
            subtype: subtype.to_string(),
            width: Some(width),
            height: Some(height),
            sample_rate: None,
            channels: None,
        }
    }

    pub fn audio(subtype: &str, sample_rate: u32, channels: u16) -> Self {
        Self {
            major: MajorType::Audio,
            subtype: subtype.to_string(),
            width: None,
            height: None,
            sample_rate: Some(sample_rate),
            channels: Some(channels),
        }
    }

    /// Check `candidate` against this type's major type and subtype.
    ///
    /// Never downgrades: anything that does not match exactly is refused with
    /// `InvalidMediaType`.
    pub fn verify(&self, candidate: &MediaType) -> Result<()> {
        if candidate.major != self.major {
            return Err(BridgeError::InvalidMediaType(format!(
                "major type {} does not match {}",
                candidate.major, self.major
            )));
        }

        if !candidate.subtype.eq_ignore_ascii_case(&self.subtype) {
            return Err(BridgeError::InvalidMediaType(format!(
                "subtype {} does not match {}",
                candidate.subtype, self.subtype
            )));
        }

        Ok(())
    }
}

impl std::fmt::Display for MediaType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.major {
            MajorType::Video => write!(
                f,
                "{}/{} {}x{}",
                self.major,
                self.subtype,
                self.width.unwrap_or(0),
                self.height.unwrap_or(0)
            ),
            MajorType::Audio => write!(
                f,
                "{}/{} {}Hz {}ch",
                self.major,
                self.subtype,
                self.sample_rate.unwrap_or(0),
                self.channels.unwrap_or(0)
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verify_rejects_other_major_type() {
        let video = MediaType::video("NV12", 1280, 720);
        let audio = MediaType::audio("NV12", 48_000, 2);

        assert!(matches!(
            video.verify(&audio),
            Err(BridgeError::InvalidMediaType(_))
        ));
    }

    #[test]
    fn test_verify_rejects_other_subtype() {
        let video = MediaType::video("NV12", 1280, 720);
        let bgra = MediaType::video("BGRA8", 1280, 720);

        assert!(matches!(
            video.verify(&bgra),
            Err(BridgeError::InvalidMediaType(_))
        ));
        assert!(video.verify(&MediaType::video("nv12", 640, 480)).is_ok());
    }

    #[test]
    fn test_display() {
        assert_eq!(
            MediaType::video("NV12", 1280, 720).to_string(),
            "Video/NV12 1280x720"
        );
        assert_eq!(
            MediaType::audio("Float", 48_000, 2).to_string(),
            "Audio/Float 48000Hz 2ch"
        );
    }
}
