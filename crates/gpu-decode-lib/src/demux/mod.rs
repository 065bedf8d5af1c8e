#[cfg(feature = "ffmpeg")]
mod ffmpeg;

#[cfg(feature = "ffmpeg")]
pub use self::ffmpeg::FfmpegDemuxer;

use crate::codec::CodecTag;
use crate::error::SessionError;
use gpu_decode_types::StreamMetadata;

/// Pulls encoded video chunks out of a container.
pub trait Demuxer {
    fn codec_tag(&self) -> CodecTag;

    fn metadata(&self) -> StreamMetadata;

    /// Returns the next chunk of encoded video. The slice stays valid until
    /// the next call. An empty slice means the container is exhausted, and
    /// every later call returns an empty slice as well.
    fn next_chunk(&mut self) -> Result<&[u8], SessionError>;
}
