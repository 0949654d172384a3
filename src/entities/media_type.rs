//! Media type tag - selects buffer instance and conversion path

use serde::{Deserialize, Serialize};

/// Kind of elementary stream a frame or block belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MediaType {
    Audio,
    Video,
    Subtitle,
    Data,
}

impl MediaType {
    /// All known media types, in buffer-construction order
    pub const ALL: [MediaType; 4] = [
        MediaType::Audio,
        MediaType::Video,
        MediaType::Subtitle,
        MediaType::Data,
    ];

    /// True for types that materialize into renderable blocks
    pub fn has_blocks(self) -> bool {
        matches!(self, MediaType::Audio | MediaType::Video)
    }

    pub fn name(self) -> &'static str {
        match self {
            MediaType::Audio => "audio",
            MediaType::Video => "video",
            MediaType::Subtitle => "subtitle",
            MediaType::Data => "data",
        }
    }
}

impl std::fmt::Display for MediaType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
