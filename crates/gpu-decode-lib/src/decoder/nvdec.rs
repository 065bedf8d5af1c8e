use std::collections::VecDeque;
use std::ffi::CString;
use std::ptr::null_mut;
use std::sync::Arc;

use cudarc::driver::sys::CUdeviceptr;
use cudarc::driver::CudaStream;
use ffmpeg_next::codec::{self, Id, Parameters};
use ffmpeg_next::ffi::{
    av_buffer_ref, av_buffer_unref, av_hwdevice_ctx_create, AVBufferRef, AVCodecContext,
    AVHWDeviceType, AVHWFramesContext, AVPixelFormat,
};
use ffmpeg_next::{frame, Packet};

use super::HardwareDecoder;
use crate::codec::CodecId;
use crate::error::SessionError;
use crate::frame::{nv12_rows, padded_width, VideoFrame};
use crate::gpu::cuda::{DeviceBuffer, PlaneCopy};
use crate::gpu::ContextHandle;

/// `AV_CUDA_USE_PRIMARY_CONTEXT` from hwcontext_cuda.h.
const AV_CUDA_USE_PRIMARY_CONTEXT: i32 = 1;

extern "C" fn get_cuda_format(
    _ctx: *mut AVCodecContext,
    pix_fmts: *const AVPixelFormat,
) -> AVPixelFormat {
    let mut i = 0;
    unsafe {
        loop {
            let format = *pix_fmts.offset(i);
            if format == AVPixelFormat::AV_PIX_FMT_NONE {
                break;
            }
            if format == AVPixelFormat::AV_PIX_FMT_CUDA {
                return format;
            }
            i += 1;
        }
    }
    log::warn!("Decoder did not offer CUDA surfaces");
    AVPixelFormat::AV_PIX_FMT_NONE
}

/// FFmpeg decoder for a mapped codec. `stream` is the container's codec id:
/// WMV3 shares the VC-1 hardware profile but has its own header syntax.
fn ffmpeg_codec(codec: CodecId, stream: Id) -> Id {
    match codec {
        CodecId::Vc1 if stream == Id::WMV3 => Id::WMV3,
        CodecId::Mpeg1 => Id::MPEG1VIDEO,
        CodecId::Mpeg2 => Id::MPEG2VIDEO,
        CodecId::Mpeg4 => Id::MPEG4,
        CodecId::Vc1 => Id::VC1,
        CodecId::H264 => Id::H264,
        CodecId::Jpeg => Id::MJPEG,
        CodecId::Hevc => Id::HEVC,
        CodecId::Vp8 => Id::VP8,
        CodecId::Vp9 => Id::VP9,
        CodecId::Av1 => Id::AV1,
    }
}

/// NVDEC decoding through FFmpeg's CUDA hwaccel.
///
/// The CUDA device context is created with the primary-context flag, so the
/// decoder runs in the same primary context the session retained. Surfaces
/// are copied out into caller-owned [`DeviceBuffer`]s as packed NV12.
pub struct NvdecDecoder {
    decoder: Option<codec::decoder::Video>,
    hw_device: *mut AVBufferRef,
    device: usize,
    stream: Arc<CudaStream>,
    ready: VecDeque<frame::Video>,
    eof_sent: bool,
}

impl NvdecDecoder {
    /// Opens a decoder for the stream described by `parameters`, keeping its
    /// extradata and coded size. Output frames are packed on `stream`.
    pub fn new(
        context: ContextHandle,
        device: usize,
        codec: CodecId,
        parameters: Parameters,
        stream: Arc<CudaStream>,
    ) -> Result<Self, SessionError> {
        let id = ffmpeg_codec(codec, parameters.id());
        let ffmpeg_codec = ffmpeg_next::decoder::find(id)
            .ok_or_else(|| SessionError::DecoderInit(format!("no FFmpeg decoder for {:?}", id)))?;

        let mut hw_device: *mut AVBufferRef = null_mut();
        let ordinal = CString::new(device.to_string())
            .map_err(|e| SessionError::DecoderInit(e.to_string()))?;
        unsafe {
            if av_hwdevice_ctx_create(
                &mut hw_device,
                AVHWDeviceType::AV_HWDEVICE_TYPE_CUDA,
                ordinal.as_ptr(),
                null_mut(),
                AV_CUDA_USE_PRIMARY_CONTEXT,
            ) < 0
            {
                return Err(SessionError::DecoderInit(format!(
                    "Failed to create CUDA device context on device {}",
                    device
                )));
            }
        }

        let mut decoder_context = match codec::Context::from_parameters(parameters) {
            Ok(decoder_context) => decoder_context,
            Err(e) => {
                unsafe { av_buffer_unref(&mut hw_device) };
                return Err(SessionError::DecoderInit(e.to_string()));
            }
        };
        unsafe {
            let raw = decoder_context.as_mut_ptr();
            (*raw).get_format = Some(get_cuda_format);
            let hw_ref = av_buffer_ref(hw_device);
            if hw_ref.is_null() {
                av_buffer_unref(&mut hw_device);
                return Err(SessionError::DecoderInit(
                    "Failed to reference hardware context".into(),
                ));
            }
            (*raw).hw_device_ctx = hw_ref;
        }

        let decoder = match decoder_context
            .decoder()
            .open_as(ffmpeg_codec)
            .and_then(|opened| opened.video())
        {
            Ok(decoder) => decoder,
            Err(e) => {
                unsafe { av_buffer_unref(&mut hw_device) };
                return Err(SessionError::DecoderInit(e.to_string()));
            }
        };

        log::debug!(
            "Initialised NVDEC {:?} decoder on device {} (context {:#x})",
            codec,
            device,
            context.as_raw()
        );

        Ok(Self {
            decoder: Some(decoder),
            hw_device,
            device,
            stream,
            ready: VecDeque::new(),
            eof_sent: false,
        })
    }

    fn decoder(&mut self) -> Result<&mut codec::decoder::Video, SessionError> {
        self.decoder
            .as_mut()
            .ok_or_else(|| SessionError::Decode("decoder already released".into()))
    }

    /// Pulls one decoded frame out of FFmpeg, if any is ready.
    fn receive(&mut self) -> Result<Option<frame::Video>, SessionError> {
        let mut decoded = frame::Video::empty();
        match self.decoder()?.receive_frame(&mut decoded) {
            Ok(()) => Ok(Some(decoded)),
            Err(ffmpeg_next::Error::Eof) => Ok(None),
            Err(ffmpeg_next::Error::Other { errno }) if errno == ffmpeg_next::error::EAGAIN => {
                Ok(None)
            }
            Err(e) => Err(SessionError::Decode(e.to_string())),
        }
    }

    fn to_video_frame(&self, decoded: &frame::Video) -> Result<VideoFrame, SessionError> {
        let raw = unsafe { decoded.as_ptr() };
        let (format, sw_format) = unsafe {
            let hw_frames = (*raw).hw_frames_ctx;
            let sw_format = if hw_frames.is_null() {
                AVPixelFormat::AV_PIX_FMT_NONE
            } else {
                (*((*hw_frames).data as *const AVHWFramesContext)).sw_format
            };
            ((*raw).format, sw_format)
        };
        if format != AVPixelFormat::AV_PIX_FMT_CUDA as i32 {
            return Err(SessionError::Decode(
                "decoder produced a frame outside GPU memory".into(),
            ));
        }
        if sw_format != AVPixelFormat::AV_PIX_FMT_NV12 {
            return Err(SessionError::Decode(format!(
                "unsupported surface format {:?}",
                sw_format
            )));
        }

        let width = decoded.width();
        let height = decoded.height();
        let planes = unsafe {
            [
                PlaneCopy {
                    src: (*raw).data[0] as CUdeviceptr,
                    src_pitch: (*raw).linesize[0] as usize,
                    rows: height as usize,
                },
                PlaneCopy {
                    src: (*raw).data[1] as CUdeviceptr,
                    src_pitch: (*raw).linesize[1] as usize,
                    rows: nv12_rows(height) - height as usize,
                },
            ]
        };
        let buffer =
            DeviceBuffer::pack_planes(&self.stream, self.device, padded_width(width), &planes)?;
        let pts = decoded
            .pts()
            .unwrap_or_else(|| unsafe { (*raw).best_effort_timestamp });

        Ok(VideoFrame::nv12(Box::new(buffer), width, height, pts))
    }
}

impl HardwareDecoder for NvdecDecoder {
    fn submit(&mut self, chunk: &[u8]) -> Result<(), SessionError> {
        if chunk.is_empty() {
            if !self.eof_sent {
                self.eof_sent = true;
                self.decoder()?
                    .send_eof()
                    .map_err(|e| SessionError::Decode(e.to_string()))?;
            }
            return Ok(());
        }

        let packet = Packet::copy(chunk);
        loop {
            match self.decoder()?.send_packet(&packet) {
                Ok(()) => return Ok(()),
                // Output queue is full: move finished frames aside and retry.
                Err(ffmpeg_next::Error::Other { errno }) if errno == ffmpeg_next::error::EAGAIN => {
                    match self.receive()? {
                        Some(decoded) => self.ready.push_back(decoded),
                        None => {
                            return Err(SessionError::Decode(
                                "decoder refused input without producing output".into(),
                            ))
                        }
                    }
                }
                Err(e) => return Err(SessionError::Decode(e.to_string())),
            }
        }
    }

    fn fetch_frame(&mut self) -> Result<VideoFrame, SessionError> {
        let decoded = match self.ready.pop_front() {
            Some(decoded) => Some(decoded),
            None => self.receive()?,
        };
        match decoded {
            Some(decoded) => self.to_video_frame(&decoded),
            None => Ok(VideoFrame::empty()),
        }
    }

    fn release(&mut self) {
        self.ready.clear();
        if self.decoder.take().is_some() {
            log::debug!("Released NVDEC decoder on device {}", self.device);
        }
        unsafe {
            if !self.hw_device.is_null() {
                av_buffer_unref(&mut self.hw_device);
            }
        }
    }
}

impl Drop for NvdecDecoder {
    fn drop(&mut self) {
        self.release();
    }
}
