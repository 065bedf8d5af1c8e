//! The decode session: one source, one device, one decoder.
//!
//! A session owns its demuxer and hardware decoder and holds one retain of
//! the device's primary context for its lifetime. `decode()` pulls chunks
//! from the demuxer into the decoder until a frame comes out or the source
//! runs dry.
//!
//! # Thread Safety
//! A session is driven from a single thread. Several sessions may live in one
//! process, on the same or different devices; each GPU call selects its own
//! session's device and restores the previous selection afterwards.

#[cfg(feature = "nvdec")]
mod nvdec;

#[cfg(feature = "nvdec")]
pub use self::nvdec::NvdecBackend;

use std::path::{Path, PathBuf};

use gpu_decode_types::StreamMetadata;

use crate::codec::{map_codec, CodecId};
use crate::config::SessionConfig;
use crate::decoder::HardwareDecoder;
use crate::demux::Demuxer;
use crate::error::SessionError;
use crate::frame::VideoFrame;
use crate::gpu::{ContextHandle, DeviceGuard, GpuDriver, PrimaryContext};

/// The collaborators a session is built from.
pub trait Backend {
    type Driver: GpuDriver;
    type Demuxer: Demuxer;
    type Decoder: HardwareDecoder;

    fn driver(&self) -> &Self::Driver;

    /// Opens the container. Must not touch the GPU.
    fn open_demuxer(&self, source: &Path) -> Result<Self::Demuxer, SessionError>;

    /// Creates a decoder bound to `context`. Runs with `device` selected.
    /// `demuxer` is the opened source, for codec parameters such as
    /// sequence headers carried out of band.
    fn init_decoder(
        &self,
        context: ContextHandle,
        device: usize,
        codec: CodecId,
        demuxer: &Self::Demuxer,
    ) -> Result<Self::Decoder, SessionError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Decoding,
    Finished,
    Poisoned,
}

pub struct DecodeSession<B: Backend> {
    backend: B,
    source: PathBuf,
    config: SessionConfig,
    codec: CodecId,
    demuxer: B::Demuxer,
    decoder: Option<B::Decoder>,
    // Some once the primary context is retained; taken on release.
    context: Option<PrimaryContext>,
    state: State,
    frames_decoded: u64,
}

impl<B: Backend> DecodeSession<B> {
    pub fn open(backend: B, source: &Path, config: SessionConfig) -> Result<Self, SessionError> {
        let device = config.device_index;
        let demuxer = backend.open_demuxer(source)?;

        let context = PrimaryContext::acquire(backend.driver(), device)?;

        let (decoder, codec) = match Self::init_decoder(&backend, &demuxer, &context) {
            Ok(initialised) => initialised,
            Err(e) => {
                if let Err(release_err) = context.release(backend.driver()) {
                    log::warn!(
                        "Failed to release context on device {} after open error: {}",
                        device,
                        release_err
                    );
                }
                return Err(e);
            }
        };

        log::info!(
            "Opened decode session for {} on device {} ({:?})",
            source.display(),
            device,
            codec
        );

        Ok(Self {
            backend,
            source: source.to_path_buf(),
            config,
            codec,
            demuxer,
            decoder: Some(decoder),
            context: Some(context),
            state: State::Decoding,
            frames_decoded: 0,
        })
    }

    fn init_decoder(
        backend: &B,
        demuxer: &B::Demuxer,
        context: &PrimaryContext,
    ) -> Result<(B::Decoder, CodecId), SessionError> {
        let tag = demuxer.codec_tag();
        let codec = map_codec(&tag)?;
        let _guard = DeviceGuard::new(backend.driver(), context.device())?;
        let decoder = backend.init_decoder(context.handle(), context.device(), codec, demuxer)?;
        Ok((decoder, codec))
    }

    /// Returns the next frame in display order.
    ///
    /// An empty frame means the stream has ended; it keeps being returned on
    /// later calls. Any decode or demux error is terminal for the session.
    pub fn decode(&mut self) -> Result<VideoFrame, SessionError> {
        match self.state {
            State::Finished => return Ok(VideoFrame::empty()),
            State::Poisoned => return Err(SessionError::Poisoned),
            State::Decoding => {}
        }

        match self.pull_frame() {
            Ok(frame) => {
                if frame.is_empty() {
                    log::debug!(
                        "End of stream for {} after {} frames",
                        self.source.display(),
                        self.frames_decoded
                    );
                    self.state = State::Finished;
                } else {
                    self.frames_decoded += 1;
                }
                Ok(frame)
            }
            Err(e) => {
                self.state = State::Poisoned;
                Err(e)
            }
        }
    }

    fn pull_frame(&mut self) -> Result<VideoFrame, SessionError> {
        let decoder = self.decoder.as_mut().ok_or(SessionError::Poisoned)?;
        let _guard = DeviceGuard::new(self.backend.driver(), self.config.device_index)?;

        let mut pulled = 0usize;
        loop {
            let chunk = self.demuxer.next_chunk()?;
            let chunk_len = chunk.len();
            decoder.submit(chunk)?;
            let frame = decoder.fetch_frame()?;

            if !frame.is_empty() || chunk_len == 0 {
                return Ok(frame);
            }

            pulled += 1;
            if let Some(limit) = self.config.max_chunks_per_frame {
                if pulled >= limit {
                    return Err(SessionError::Decode(format!(
                        "no frame after {} chunks",
                        pulled
                    )));
                }
            }
        }
    }

    /// Releases the decoder, then the context. Prefer this over dropping so
    /// that teardown errors reach the caller.
    pub fn close(mut self) -> Result<(), SessionError> {
        self.teardown()
    }

    fn teardown(&mut self) -> Result<(), SessionError> {
        let device = self.config.device_index;
        let driver = self.backend.driver();
        let mut result = Ok(());

        if let Some(mut decoder) = self.decoder.take() {
            match DeviceGuard::new(driver, device) {
                Ok(_guard) => decoder.release(),
                Err(e) => {
                    decoder.release();
                    result = Err(e);
                }
            }
        }

        if let Some(context) = self.context.take() {
            if let Err(e) = context.release(driver) {
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }

        log::debug!("Closed decode session for {}", self.source.display());
        result
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn device(&self) -> usize {
        self.config.device_index
    }

    pub fn codec(&self) -> CodecId {
        self.codec
    }

    pub fn metadata(&self) -> StreamMetadata {
        self.demuxer.metadata()
    }

    pub fn frames_decoded(&self) -> u64 {
        self.frames_decoded
    }
}

impl<B: Backend> Drop for DecodeSession<B> {
    fn drop(&mut self) {
        if self.decoder.is_none() && self.context.is_none() {
            return;
        }
        if let Err(e) = self.teardown() {
            log::warn!(
                "Error tearing down decode session for {}: {}",
                self.source.display(),
                e
            );
        }
    }
}
