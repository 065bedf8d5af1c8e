use gpu_decode_types::MediaLibError;
use stabby::string::String as StabbyString;
use thiserror::Error;

/// Failures surfaced by a decode session.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// The source is unreadable or the container cannot be parsed.
    #[error("failed to open source '{path}': {reason}")]
    SourceOpen { path: String, reason: String },

    /// The container's codec has no hardware decoder mapping.
    #[error("unsupported codec: {0}")]
    UnsupportedCodec(String),

    /// Invalid device index or a driver level context failure.
    #[error("GPU device {device}: {reason}")]
    Device { device: usize, reason: String },

    /// The decoder rejected the codec, profile or context.
    #[error("decoder init failed: {0}")]
    DecoderInit(String),

    /// Malformed bitstream or driver decode failure.
    #[error("decode failed: {0}")]
    Decode(String),

    /// Reading the container failed after it was opened.
    #[error("demux failed: {0}")]
    Demux(String),

    /// A previous decode error left the session unusable.
    #[error("session is unusable after an earlier error")]
    Poisoned,

    /// The backend was not compiled into this build.
    #[error("{0} backend is not available in this build")]
    Unavailable(&'static str),
}

impl SessionError {
    pub(crate) fn device(device: usize, reason: impl std::fmt::Display) -> Self {
        SessionError::Device {
            device,
            reason: reason.to_string(),
        }
    }
}

impl From<SessionError> for MediaLibError {
    fn from(err: SessionError) -> Self {
        let message = StabbyString::from(err.to_string().as_str());
        match err {
            SessionError::SourceOpen { .. } => MediaLibError::SourceOpen(message),
            SessionError::UnsupportedCodec(_) => MediaLibError::UnsupportedCodec(message),
            SessionError::Device { .. } | SessionError::Unavailable(_) => {
                MediaLibError::Device(message)
            }
            SessionError::DecoderInit(_) => MediaLibError::DecoderInit(message),
            SessionError::Decode(_) | SessionError::Demux(_) | SessionError::Poisoned => {
                MediaLibError::Decode(message)
            }
        }
    }
}
