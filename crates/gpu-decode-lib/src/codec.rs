use crate::error::SessionError;

/// Codec identifiers as reported by the container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodecTag {
    Mpeg1Video,
    Mpeg2Video,
    Mpeg4,
    Wmv3,
    Vc1,
    H264,
    Hevc,
    Vp8,
    Vp9,
    Mjpeg,
    Av1,
    /// Anything else, carrying the container's codec name.
    Other(String),
}

/// Codecs the hardware decoder accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CodecId {
    Mpeg1,
    Mpeg2,
    Mpeg4,
    Vc1,
    H264,
    Jpeg,
    Hevc,
    Vp8,
    Vp9,
    Av1,
}

impl std::fmt::Display for CodecTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CodecTag::Other(name) => write!(f, "{}", name),
            tag => write!(f, "{:?}", tag),
        }
    }
}

pub fn map_codec(tag: &CodecTag) -> Result<CodecId, SessionError> {
    let id = match tag {
        CodecTag::Mpeg1Video => CodecId::Mpeg1,
        CodecTag::Mpeg2Video => CodecId::Mpeg2,
        CodecTag::Mpeg4 => CodecId::Mpeg4,
        CodecTag::Wmv3 | CodecTag::Vc1 => CodecId::Vc1,
        CodecTag::H264 => CodecId::H264,
        CodecTag::Hevc => CodecId::Hevc,
        CodecTag::Vp8 => CodecId::Vp8,
        CodecTag::Vp9 => CodecId::Vp9,
        CodecTag::Mjpeg => CodecId::Jpeg,
        CodecTag::Av1 => CodecId::Av1,
        CodecTag::Other(name) => return Err(SessionError::UnsupportedCodec(name.clone())),
    };
    Ok(id)
}
