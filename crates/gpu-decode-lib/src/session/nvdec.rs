use std::path::Path;

use super::Backend;
use crate::codec::CodecId;
use crate::decoder::NvdecDecoder;
use crate::demux::FfmpegDemuxer;
use crate::error::SessionError;
use crate::gpu::cuda::CudaDriver;
use crate::gpu::ContextHandle;

/// FFmpeg demuxing, NVDEC decoding, CUDA driver API context handling.
pub struct NvdecBackend {
    driver: CudaDriver,
}

impl NvdecBackend {
    pub fn new() -> Result<Self, SessionError> {
        ffmpeg_next::init().map_err(|e| SessionError::Decode(e.to_string()))?;
        Ok(Self {
            driver: CudaDriver::new()?,
        })
    }
}

impl Backend for NvdecBackend {
    type Driver = CudaDriver;
    type Demuxer = FfmpegDemuxer;
    type Decoder = NvdecDecoder;

    fn driver(&self) -> &CudaDriver {
        &self.driver
    }

    fn open_demuxer(&self, source: &Path) -> Result<FfmpegDemuxer, SessionError> {
        FfmpegDemuxer::open(source)
    }

    fn init_decoder(
        &self,
        context: ContextHandle,
        device: usize,
        codec: CodecId,
        demuxer: &FfmpegDemuxer,
    ) -> Result<NvdecDecoder, SessionError> {
        let stream = self.driver.stream(device)?;
        NvdecDecoder::new(context, device, codec, demuxer.parameters().clone(), stream)
    }
}
