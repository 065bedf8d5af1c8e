//! Small Matroska clips written on the fly for demuxer and decoder tests.

use std::path::Path;

use ffmpeg_next::codec::{self, Id};
use ffmpeg_next::ffi::{self, AVMediaType};
use ffmpeg_next::{encoder, format, frame, packet, Error, Packet, Rational};

pub const WIDTH: u32 = 128;
pub const HEIGHT: u32 = 96;

const FRAME_RATE: i32 = 25;

/// A minimal avcC record: one SPS, one PPS, 4 byte NAL lengths.
pub const AVCC: [u8; 17] = [
    0x01, 0x42, 0x00, 0x1e, 0xff, 0xe1, 0x00, 0x04, 0x67, 0x42, 0x00, 0x1e, 0x01, 0x00, 0x02,
    0x68, 0xce,
];

fn time_base() -> Rational {
    Rational::new(1, FRAME_RATE)
}

unsafe fn new_stream(output: &mut format::context::Output) -> Result<*mut ffi::AVStream, Error> {
    let stream = ffi::avformat_new_stream(output.as_mut_ptr(), std::ptr::null());
    if stream.is_null() {
        return Err(Error::Unknown);
    }
    (*stream).time_base = time_base().into();
    Ok(stream)
}

fn write_packet(
    output: &mut format::context::Output,
    index: usize,
    data: &[u8],
    pts: i64,
) -> Result<(), Error> {
    let mut packet = Packet::copy(data);
    packet.set_stream(index);
    packet.set_pts(Some(pts));
    packet.set_dts(Some(pts));
    packet.set_duration(1);
    packet.set_flags(packet::Flags::KEY);
    let stream_time_base = output
        .stream(index)
        .map(|s| s.time_base())
        .ok_or(Error::StreamNotFound)?;
    packet.rescale_ts(time_base(), stream_time_base);
    packet.write_interleaved(output)
}

/// Muxes `packets` as-is into a video track of `codec`. With `with_audio` a
/// PCM track is interleaved, one audio packet after each video packet.
pub fn mux_raw(
    path: &Path,
    codec: Id,
    extradata: &[u8],
    packets: &[Vec<u8>],
    with_audio: bool,
) -> Result<(), Error> {
    ffmpeg_next::init()?;
    let mut output = format::output(&path)?;

    // SAFETY: the streams belong to `output`; extradata is allocated with
    // av_mallocz and the required padding, and freed by FFmpeg.
    unsafe {
        let video = new_stream(&mut output)?;
        let par = (*video).codecpar;
        (*par).codec_type = AVMediaType::AVMEDIA_TYPE_VIDEO;
        (*par).codec_id = codec.into();
        (*par).width = WIDTH as i32;
        (*par).height = HEIGHT as i32;
        if !extradata.is_empty() {
            let size = extradata.len() + ffi::AV_INPUT_BUFFER_PADDING_SIZE as usize;
            let buffer = ffi::av_mallocz(size) as *mut u8;
            if buffer.is_null() {
                return Err(Error::Unknown);
            }
            std::ptr::copy_nonoverlapping(extradata.as_ptr(), buffer, extradata.len());
            (*par).extradata = buffer;
            (*par).extradata_size = extradata.len() as i32;
        }

        if with_audio {
            let audio = new_stream(&mut output)?;
            let par = (*audio).codecpar;
            (*par).codec_type = AVMediaType::AVMEDIA_TYPE_AUDIO;
            (*par).codec_id = Id::PCM_S16LE.into();
            (*par).sample_rate = 8000;
            (*par).bits_per_coded_sample = 16;
            (*par).block_align = 2;
            ffi::av_channel_layout_default(&mut (*par).ch_layout, 1);
        }
    }

    output.write_header()?;
    // 40 ms of 8 kHz mono s16.
    let silence = vec![0u8; 640];
    for (i, data) in packets.iter().enumerate() {
        write_packet(&mut output, 0, data, i as i64)?;
        if with_audio {
            write_packet(&mut output, 1, &silence, i as i64)?;
        }
    }
    output.write_trailer()
}

fn drain(
    video: &mut encoder::video::Encoder,
    output: &mut format::context::Output,
    stream_time_base: Rational,
) -> Result<(), Error> {
    let mut packet = Packet::empty();
    while video.receive_packet(&mut packet).is_ok() {
        packet.set_stream(0);
        packet.rescale_ts(time_base(), stream_time_base);
        packet.write_interleaved(output)?;
    }
    Ok(())
}

/// Encodes `frames` frames of MPEG-2 video with FFmpeg's built-in encoder.
pub fn encode_mpeg2(path: &Path, frames: usize) -> Result<(), Error> {
    ffmpeg_next::init()?;
    let codec = encoder::find(Id::MPEG2VIDEO).ok_or(Error::EncoderNotFound)?;
    let mut output = format::output(&path)?;

    let mut video = codec::context::Context::new_with_codec(codec)
        .encoder()
        .video()?;
    video.set_width(WIDTH);
    video.set_height(HEIGHT);
    video.set_format(format::Pixel::YUV420P);
    video.set_time_base(time_base());
    video.set_frame_rate(Some(Rational::new(FRAME_RATE, 1)));
    if output
        .format()
        .flags()
        .contains(format::flag::Flags::GLOBAL_HEADER)
    {
        video.set_flags(codec::flag::Flags::GLOBAL_HEADER);
    }
    let mut video = video.open_as(codec)?;

    {
        let mut stream = output.add_stream(codec)?;
        stream.set_parameters(&video);
        stream.set_time_base(time_base());
    }
    output.write_header()?;
    let stream_time_base = output
        .stream(0)
        .map(|s| s.time_base())
        .ok_or(Error::StreamNotFound)?;

    for i in 0..frames {
        let mut picture = frame::Video::new(format::Pixel::YUV420P, WIDTH, HEIGHT);
        picture.data_mut(0).fill((i * 16) as u8);
        picture.data_mut(1).fill(128);
        picture.data_mut(2).fill(128);
        picture.set_pts(Some(i as i64));
        video.send_frame(&picture)?;
        drain(&mut video, &mut output, stream_time_base)?;
    }
    video.send_eof()?;
    drain(&mut video, &mut output, stream_time_base)?;
    output.write_trailer()
}
