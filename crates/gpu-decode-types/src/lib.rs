use stabby::boxed::Box;
use stabby::dynptr;
use stabby::result::Result;
use stabby::string::String;
use stabby::vec::Vec;

#[stabby::stabby]
#[repr(stabby)]
#[derive(Debug, Clone)]
pub enum MediaLibError {
    SourceOpen(String),
    UnsupportedCodec(String),
    Device(String),
    DecoderInit(String),
    Decode(String),
    Unknown(String),
}

impl MediaLibError {
    /// Short category name, stable across library versions.
    pub fn kind(&self) -> &'static str {
        self.match_ref(
            |_| "source-open",
            |_| "unsupported-codec",
            |_| "device",
            |_| "decoder-init",
            |_| "decode",
            |_| "unknown",
        )
    }

    pub fn message(&self) -> std::string::String {
        self.match_ref(
            |e| e.to_string(),
            |e| e.to_string(),
            |e| e.to_string(),
            |e| e.to_string(),
            |e| e.to_string(),
            |e| e.to_string(),
        )
    }
}

impl std::fmt::Display for MediaLibError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind(), self.message())
    }
}

/// Options passed to `open_session`.
#[stabby::stabby]
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub device_index: u32,
    /// Upper bound on chunks pulled for a single frame, 0 means unbounded.
    pub max_chunks_per_frame: u32,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            device_index: 0,
            max_chunks_per_frame: 0,
        }
    }
}

#[stabby::stabby]
#[derive(Debug, Clone, Copy)]
pub struct StreamMetadata {
    pub width: u32,
    pub height: u32,
    pub fps_num: i32,
    pub fps_den: i32,
    /// Zero when the container does not report a duration.
    pub duration_us: i64,
}

/// A decoded frame resident in GPU memory. Elements are unsigned bytes.
/// A frame with `numel() == 0` is the end-of-stream sentinel.
#[stabby::stabby]
pub trait GpuFrame {
    extern "C" fn numel(&self) -> usize;
    extern "C" fn rows(&self) -> usize;
    extern "C" fn cols(&self) -> usize;
    extern "C" fn width(&self) -> u32;
    extern "C" fn height(&self) -> u32;
    extern "C" fn pts(&self) -> i64;
    extern "C" fn device_index(&self) -> u32;
    extern "C" fn device_ptr(&self) -> u64;
    extern "C" fn download(&self) -> Result<Vec<u8>, MediaLibError>;
}

pub type GpuFrameResult = Result<dynptr!(Box<dyn GpuFrame>), MediaLibError>;

#[stabby::stabby]
pub struct SessionClosed {}

#[stabby::stabby]
pub trait GpuDecodeSession {
    extern "C" fn decode(&mut self) -> GpuFrameResult;
    extern "C" fn metadata(&self) -> StreamMetadata;
    extern "C" fn close(&mut self) -> Result<SessionClosed, MediaLibError>;
}

pub type GpuDecodeSessionResult =
    Result<dynptr!(Box<dyn GpuDecodeSession>), MediaLibError>;

#[stabby::stabby]
pub struct MediaLibInit {}
