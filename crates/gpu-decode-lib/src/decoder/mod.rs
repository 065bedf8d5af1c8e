#[cfg(feature = "nvdec")]
mod nvdec;

#[cfg(feature = "nvdec")]
pub use self::nvdec::NvdecDecoder;

use crate::error::SessionError;
use crate::frame::VideoFrame;

/// A hardware decoder bound to a GPU context.
///
/// Decoders buffer internally: one submission may yield no frame, one frame,
/// or several frames fetched over later calls.
pub trait HardwareDecoder {
    /// Submits one chunk. An empty chunk flushes the decoder at end of stream
    /// and may be repeated.
    fn submit(&mut self, chunk: &[u8]) -> Result<(), SessionError>;

    /// Returns a completed frame, or [`VideoFrame::empty`] when none is ready.
    /// Never pulls more input.
    fn fetch_frame(&mut self) -> Result<VideoFrame, SessionError>;

    /// Frees decoder resources. Must run before the owning context is
    /// released. Calling it again is a no-op.
    fn release(&mut self);
}
