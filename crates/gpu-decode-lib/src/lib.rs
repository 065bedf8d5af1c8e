pub mod codec;
pub mod config;
pub mod decoder;
pub mod demux;
pub mod error;
pub mod frame;
pub mod gpu;
pub mod session;
#[cfg(test)]
mod testing;

use std::path::Path;

use gpu_decode_types::{
    GpuDecodeSession, GpuDecodeSessionResult, GpuFrame, GpuFrameResult, MediaLibError,
    MediaLibInit, SessionClosed, SessionOptions, StreamMetadata,
};

pub use codec::{map_codec, CodecId, CodecTag};
pub use config::SessionConfig;
pub use error::SessionError;
pub use frame::{ElementType, FrameBuffer, VideoFrame};
pub use session::{Backend, DecodeSession};

#[stabby::stabby]
#[stabby::export]
pub fn init_decode_lib() -> stabby::result::Result<MediaLibInit, MediaLibError> {
    match init_backends() {
        Ok(_) => Ok(MediaLibInit {}).into(),
        Err(e) => Err(MediaLibError::from(e)).into(),
    }
}

#[cfg(feature = "ffmpeg")]
fn init_backends() -> Result<(), SessionError> {
    ffmpeg_next::init().map_err(|e| SessionError::Decode(e.to_string()))
}

#[cfg(not(feature = "ffmpeg"))]
fn init_backends() -> Result<(), SessionError> {
    Ok(())
}

struct GpuFrameWrapper {
    inner: VideoFrame,
}

impl GpuFrame for GpuFrameWrapper {
    extern "C" fn numel(&self) -> usize {
        self.inner.numel()
    }

    extern "C" fn rows(&self) -> usize {
        self.inner.shape().first().copied().unwrap_or(0)
    }

    extern "C" fn cols(&self) -> usize {
        self.inner.shape().get(1).copied().unwrap_or(0)
    }

    extern "C" fn width(&self) -> u32 {
        self.inner.width()
    }

    extern "C" fn height(&self) -> u32 {
        self.inner.height()
    }

    extern "C" fn pts(&self) -> i64 {
        self.inner.pts()
    }

    extern "C" fn device_index(&self) -> u32 {
        self.inner.device().unwrap_or(0) as u32
    }

    extern "C" fn device_ptr(&self) -> u64 {
        self.inner.device_ptr()
    }

    extern "C" fn download(&self) -> stabby::result::Result<stabby::vec::Vec<u8>, MediaLibError> {
        match self.inner.to_host() {
            Ok(bytes) => Ok(stabby::vec::Vec::from(bytes.as_slice())).into(),
            Err(e) => Err(MediaLibError::from(e)).into(),
        }
    }
}

#[cfg_attr(not(feature = "nvdec"), allow(dead_code))]
struct GpuDecodeSessionWrapper<B: Backend> {
    session: Option<DecodeSession<B>>,
}

impl<B: Backend> GpuDecodeSession for GpuDecodeSessionWrapper<B> {
    extern "C" fn decode(&mut self) -> GpuFrameResult {
        let Some(session) = self.session.as_mut() else {
            return Err(MediaLibError::from(SessionError::Poisoned)).into();
        };
        match session.decode() {
            Ok(frame) => {
                let wrapper = GpuFrameWrapper { inner: frame };
                Ok(stabby::boxed::Box::new(wrapper).into()).into()
            }
            Err(e) => Err(MediaLibError::from(e)).into(),
        }
    }

    extern "C" fn metadata(&self) -> StreamMetadata {
        match &self.session {
            Some(session) => session.metadata(),
            None => StreamMetadata {
                width: 0,
                height: 0,
                fps_num: 0,
                fps_den: 1,
                duration_us: 0,
            },
        }
    }

    extern "C" fn close(&mut self) -> stabby::result::Result<SessionClosed, MediaLibError> {
        match self.session.take() {
            Some(session) => match session.close() {
                Ok(()) => Ok(SessionClosed {}).into(),
                Err(e) => Err(MediaLibError::from(e)).into(),
            },
            None => Ok(SessionClosed {}).into(),
        }
    }
}

#[stabby::stabby]
#[stabby::export]
pub fn open_session(
    path_str: stabby::string::String,
    options: SessionOptions,
) -> GpuDecodeSessionResult {
    let path_str = path_str.to_string();
    let path = Path::new(&path_str);
    let config = SessionConfig::from(&options);

    match open_backend_session(path, config) {
        Ok(session) => session,
        Err(e) => Err(MediaLibError::from(e)).into(),
    }
}

#[cfg(feature = "nvdec")]
fn open_backend_session(
    path: &Path,
    config: SessionConfig,
) -> Result<GpuDecodeSessionResult, SessionError> {
    let backend = session::NvdecBackend::new()?;
    let session = DecodeSession::open(backend, path, config)?;
    let wrapper = GpuDecodeSessionWrapper {
        session: Some(session),
    };
    Ok(Ok(stabby::boxed::Box::new(wrapper).into()).into())
}

#[cfg(not(feature = "nvdec"))]
fn open_backend_session(
    _path: &Path,
    _config: SessionConfig,
) -> Result<GpuDecodeSessionResult, SessionError> {
    Err(SessionError::Unavailable("nvdec"))
}

#[stabby::stabby]
#[stabby::export]
pub fn init_logging() {
    #[cfg(feature = "ffmpeg")]
    ffmpeg_next::util::log::set_level(ffmpeg_next::util::log::Level::Warning);
    let _ = pretty_env_logger::try_init();
}
