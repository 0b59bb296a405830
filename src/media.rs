use crate::catalog::{ClipDescriptor, MediaVariant};

pub const DEFAULT_FILE_TYPE: &str = "video/mp4";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoSource {
    pub playback_url: String,
    pub label: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

impl VideoSource {
    fn from_variant(variant: &MediaVariant) -> Self {
        Self {
            playback_url: variant.link.trim().to_string(),
            label: variant.label(),
            width: variant.width,
            height: variant.height,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Playable(VideoSource),
    Unavailable,
}

impl Resolution {
    pub fn source(&self) -> Option<&VideoSource> {
        match self {
            Resolution::Playable(source) => Some(source),
            Resolution::Unavailable => None,
        }
    }

    pub fn is_playable(&self) -> bool {
        matches!(self, Resolution::Playable(_))
    }
}

/// Picks the one file a clip will play from. Never fails: a descriptor
/// without a usable link resolves to `Unavailable`.
pub fn resolve(descriptor: &ClipDescriptor, file_type: &str) -> Resolution {
    select_variant(&descriptor.video_files, file_type)
        .map(|variant| Resolution::Playable(VideoSource::from_variant(variant)))
        .unwrap_or(Resolution::Unavailable)
}

pub fn select_variant<'a>(variants: &'a [MediaVariant], file_type: &str) -> Option<&'a MediaVariant> {
    let usable: Vec<&MediaVariant> = variants
        .iter()
        .filter(|variant| !variant.link.trim().is_empty())
        .collect();

    let portrait: Vec<&MediaVariant> = usable
        .iter()
        .copied()
        .filter(|variant| variant.is_portrait() && variant.file_type.eq_ignore_ascii_case(file_type))
        .collect();

    tallest(portrait.iter().copied().filter(|variant| variant.is_hd()))
        .or_else(|| tallest(portrait.iter().copied()))
        .or_else(|| usable.first().copied())
}

// Ties keep the earliest variant.
fn tallest<'a>(variants: impl Iterator<Item = &'a MediaVariant>) -> Option<&'a MediaVariant> {
    variants.fold(None::<&'a MediaVariant>, |best, candidate| match best {
        Some(current) if current.height.unwrap_or(0) >= candidate.height.unwrap_or(0) => {
            Some(current)
        }
        _ => Some(candidate),
    })
}
