use std::ffi::CString;
use std::path::Path;
use std::ptr::null_mut;

use ffmpeg_next::codec::{Id, Parameters};
use ffmpeg_next::ffi::{
    av_bsf_alloc, av_bsf_free, av_bsf_get_by_name, av_bsf_init, av_bsf_receive_packet,
    av_bsf_send_packet, avcodec_parameters_copy, AVBSFContext,
};
use ffmpeg_next::{format, media, Packet};
use gpu_decode_types::StreamMetadata;

use super::Demuxer;
use crate::codec::CodecTag;
use crate::error::SessionError;

/// Containers that carry H.264/HEVC in length-prefixed (AVCC) form.
const AVCC_CONTAINERS: [&str; 3] = ["QuickTime / MOV", "FLV (Flash Video)", "Matroska / WebM"];

/// Demuxes the best video stream of a container with FFmpeg.
///
/// H.264 and HEVC from MP4-like containers are rewritten to Annex-B so
/// parameter sets travel in-band, which is what hardware parsers expect.
pub struct FfmpegDemuxer {
    input_context: format::context::Input,
    video_stream_index: usize,
    codec_id: Id,
    metadata: StreamMetadata,
    parameters: Parameters,
    bsf: Option<BitstreamFilter>,
    current: Packet,
    eof: bool,
}

impl FfmpegDemuxer {
    pub fn open(path: &Path) -> Result<Self, SessionError> {
        let source_error = |reason: String| SessionError::SourceOpen {
            path: path.display().to_string(),
            reason,
        };

        let input_context = format::input(path).map_err(|e| source_error(e.to_string()))?;

        let (video_stream_index, codec_id, metadata, parameters) = {
            let stream = input_context
                .streams()
                .best(media::Type::Video)
                .ok_or_else(|| source_error("No video stream found".into()))?;
            let parameters = stream.parameters();
            // SAFETY: parameters points at the stream's codecpar.
            let (width, height) = unsafe {
                let raw = parameters.as_ptr();
                ((*raw).width.max(0) as u32, (*raw).height.max(0) as u32)
            };
            let rate = stream.avg_frame_rate();
            let duration = input_context.duration();
            let metadata = StreamMetadata {
                width,
                height,
                fps_num: rate.numerator(),
                fps_den: rate.denominator(),
                duration_us: if duration > 0 { duration } else { 0 },
            };
            (stream.index(), parameters.id(), metadata, parameters)
        };

        let format_name = input_context.format().description().to_string();
        let needs_annexb = AVCC_CONTAINERS.contains(&format_name.as_str());
        let bsf = match codec_id {
            Id::H264 if needs_annexb => {
                Some(BitstreamFilter::new("h264_mp4toannexb", &parameters, path)?)
            }
            Id::HEVC if needs_annexb => {
                Some(BitstreamFilter::new("hevc_mp4toannexb", &parameters, path)?)
            }
            _ => None,
        };

        log::debug!(
            "Opened {} ({}), video stream {} codec {:?}{}",
            path.display(),
            format_name,
            video_stream_index,
            codec_id,
            if bsf.is_some() { " with annexb filter" } else { "" }
        );

        Ok(Self {
            input_context,
            video_stream_index,
            codec_id,
            metadata,
            parameters,
            bsf,
            current: Packet::empty(),
            eof: false,
        })
    }

    /// Codec parameters of the selected stream, including out-of-band
    /// headers (avcC, VC-1 sequence header, MPEG-4 VOL).
    pub fn parameters(&self) -> &Parameters {
        &self.parameters
    }

    /// Reads the next non-empty packet of the video stream. `None` at end of file.
    fn read_video_packet(&mut self) -> Result<Option<Packet>, SessionError> {
        loop {
            let mut packet = Packet::empty();
            match packet.read(&mut self.input_context) {
                Ok(()) => {
                    let has_data = packet.data().map_or(false, |d| !d.is_empty());
                    if packet.stream() == self.video_stream_index && has_data {
                        return Ok(Some(packet));
                    }
                }
                Err(ffmpeg_next::Error::Eof) => return Ok(None),
                Err(e) => return Err(SessionError::Demux(e.to_string())),
            }
        }
    }

    fn advance(&mut self) -> Result<(), SessionError> {
        if self.eof {
            self.current = Packet::empty();
            return Ok(());
        }

        let Some(mut bsf) = self.bsf.take() else {
            match self.read_video_packet()? {
                Some(packet) => self.current = packet,
                None => {
                    self.eof = true;
                    self.current = Packet::empty();
                }
            }
            return Ok(());
        };

        let result = self.advance_filtered(&mut bsf);
        self.bsf = Some(bsf);
        result
    }

    fn advance_filtered(&mut self, bsf: &mut BitstreamFilter) -> Result<(), SessionError> {
        loop {
            let mut filtered = Packet::empty();
            match bsf.receive(&mut filtered)? {
                Received::Packet => {
                    if filtered.data().map_or(false, |d| !d.is_empty()) {
                        self.current = filtered;
                        return Ok(());
                    }
                }
                Received::Drained => {
                    self.eof = true;
                    self.current = Packet::empty();
                    return Ok(());
                }
                Received::NeedsInput => {
                    let packet = self.read_video_packet()?;
                    bsf.send(packet)?;
                }
            }
        }
    }
}

impl Demuxer for FfmpegDemuxer {
    fn codec_tag(&self) -> CodecTag {
        match self.codec_id {
            Id::MPEG1VIDEO => CodecTag::Mpeg1Video,
            Id::MPEG2VIDEO => CodecTag::Mpeg2Video,
            Id::MPEG4 => CodecTag::Mpeg4,
            Id::WMV3 => CodecTag::Wmv3,
            Id::VC1 => CodecTag::Vc1,
            Id::H264 => CodecTag::H264,
            Id::HEVC => CodecTag::Hevc,
            Id::VP8 => CodecTag::Vp8,
            Id::VP9 => CodecTag::Vp9,
            Id::MJPEG => CodecTag::Mjpeg,
            Id::AV1 => CodecTag::Av1,
            other => CodecTag::Other(format!("{:?}", other).to_lowercase()),
        }
    }

    fn metadata(&self) -> StreamMetadata {
        self.metadata
    }

    fn next_chunk(&mut self) -> Result<&[u8], SessionError> {
        self.advance()?;
        Ok(self.current.data().unwrap_or(&[]))
    }
}

enum Received {
    Packet,
    NeedsInput,
    Drained,
}

struct BitstreamFilter {
    ctx: *mut AVBSFContext,
    flushed: bool,
}

impl BitstreamFilter {
    fn new(name: &str, parameters: &Parameters, source: &Path) -> Result<Self, SessionError> {
        let init_error = |what: &str| SessionError::SourceOpen {
            path: source.display().to_string(),
            reason: format!("bitstream filter {} {}", name, what),
        };
        let c_name = CString::new(name).map_err(|_| init_error("name"))?;

        unsafe {
            let filter = av_bsf_get_by_name(c_name.as_ptr());
            if filter.is_null() {
                return Err(init_error("not found"));
            }
            let mut ctx: *mut AVBSFContext = null_mut();
            if av_bsf_alloc(filter, &mut ctx) < 0 {
                return Err(init_error("allocation failed"));
            }
            let bsf = Self {
                ctx,
                flushed: false,
            };
            if avcodec_parameters_copy((*ctx).par_in, parameters.as_ptr()) < 0 {
                return Err(init_error("parameter copy failed"));
            }
            if av_bsf_init(ctx) < 0 {
                return Err(init_error("init failed"));
            }
            Ok(bsf)
        }
    }

    /// Feeds a packet, or the flush signal for `None`.
    fn send(&mut self, packet: Option<Packet>) -> Result<(), SessionError> {
        let ret = match packet {
            Some(mut packet) => unsafe { av_bsf_send_packet(self.ctx, packet.as_mut_ptr()) },
            None if self.flushed => return Ok(()),
            None => {
                self.flushed = true;
                unsafe { av_bsf_send_packet(self.ctx, null_mut()) }
            }
        };
        if ret < 0 {
            return Err(SessionError::Demux(ffmpeg_next::Error::from(ret).to_string()));
        }
        Ok(())
    }

    fn receive(&mut self, out: &mut Packet) -> Result<Received, SessionError> {
        let ret = unsafe { av_bsf_receive_packet(self.ctx, out.as_mut_ptr()) };
        if ret >= 0 {
            return Ok(Received::Packet);
        }
        match ffmpeg_next::Error::from(ret) {
            ffmpeg_next::Error::Eof => Ok(Received::Drained),
            ffmpeg_next::Error::Other { errno } if errno == ffmpeg_next::error::EAGAIN => {
                if self.flushed {
                    Ok(Received::Drained)
                } else {
                    Ok(Received::NeedsInput)
                }
            }
            e => Err(SessionError::Demux(e.to_string())),
        }
    }
}

impl Drop for BitstreamFilter {
    fn drop(&mut self) {
        unsafe {
            if !self.ctx.is_null() {
                av_bsf_free(&mut self.ctx);
            }
        }
    }
}
