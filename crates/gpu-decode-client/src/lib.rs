use std::path::{Path, PathBuf};
use std::sync::Arc;

pub use gpu_decode_types;
use gpu_decode_types::{
    GpuDecodeSession, GpuDecodeSessionDyn, GpuDecodeSessionDynMut, GpuDecodeSessionResult,
    GpuFrame, GpuFrameDyn, MediaLibError, MediaLibInit, SessionOptions, StreamMetadata,
};
use libloading::Library;
use stabby::libloading::StabbyLibrary;


#[derive(Debug)]
pub enum ClientError {
    MediaLibError(MediaLibError),
    UnknownError(String),
}

impl From<MediaLibError> for ClientError {
    fn from(error: MediaLibError) -> Self {
        ClientError::MediaLibError(error)
    }
}

impl From<Box<dyn std::error::Error + Send + Sync>> for ClientError {
    fn from(error: Box<dyn std::error::Error + Send + Sync>) -> Self {
        ClientError::UnknownError(error.to_string())
    }
}

impl std::fmt::Display for ClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClientError::MediaLibError(e) => write!(f, "{}", e),
            ClientError::UnknownError(s) => write!(f, "Unknown error: {}", s),
        }
    }
}
impl std::error::Error for ClientError {}

impl ClientError {
    /// Category of a library error, `None` for loader errors.
    pub fn kind(&self) -> Option<&'static str> {
        match self {
            ClientError::MediaLibError(e) => Some(e.kind()),
            ClientError::UnknownError(_) => None,
        }
    }
}

type OpenSessionFn = extern "C" fn(stabby::string::String, SessionOptions) -> GpuDecodeSessionResult;

/// Handle to a loaded decode library.
pub struct DecodeClient {
    open_session: OpenSessionFn,
    init_logging: extern "C" fn(),
    library: Arc<Library>,
}

/// Platform file name of the shared library.
pub fn library_file_name() -> &'static str {
    if cfg!(target_os = "windows") {
        "gpu_decode_lib.dll"
    } else if cfg!(target_os = "macos") {
        "libgpu_decode_lib.dylib"
    } else {
        "libgpu_decode_lib.so"
    }
}

/// Library location from `GPU_DECODE_LIB_PATH`, else `./target/debug`.
pub fn default_library_path() -> PathBuf {
    std::env::var("GPU_DECODE_LIB_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("./target/debug").join(library_file_name()))
}

pub fn load(lib: &Path) -> Result<DecodeClient, ClientError> {
    let library = unsafe { Library::new(lib) }
        .map_err(|e| ClientError::UnknownError(e.to_string()))?;

    let init_decode_lib = *unsafe {
        library
            .get_stabbied::<extern "C" fn() -> stabby::result::Result<MediaLibInit, MediaLibError>>(
                b"init_decode_lib",
            )
    }?;
    init_decode_lib().match_owned(|_| Ok(()), |e| Err(ClientError::MediaLibError(e)))?;

    let open_session = *unsafe { library.get_stabbied::<OpenSessionFn>(b"open_session") }?;
    let init_logging = *unsafe { library.get_stabbied::<extern "C" fn()>(b"init_logging") }?;

    Ok(DecodeClient {
        open_session,
        init_logging,
        library: Arc::new(library),
    })
}

impl DecodeClient {
    pub fn init_logging(&self) {
        (self.init_logging)()
    }

    pub fn open(&self, path: &Path, options: SessionOptions) -> Result<Session, ClientError> {
        let path = path
            .to_str()
            .ok_or_else(|| ClientError::UnknownError(format!("non UTF-8 path {:?}", path)))?;
        let inner = (self.open_session)(stabby::string::String::from(path), options)
            .match_owned(Ok, |e| Err(ClientError::MediaLibError(e)))?;
        Ok(Session {
            inner: Some(inner),
            library: self.library.clone(),
        })
    }
}

/// An open decode session. Dropping it closes the session.
pub struct Session {
    inner: Option<stabby::dynptr!(stabby::boxed::Box<dyn GpuDecodeSession>)>,
    // Declared last so the library outlives the session's vtable.
    library: Arc<Library>,
}

impl Session {
    /// Next frame, or an empty frame once the stream has ended.
    pub fn decode(&mut self) -> Result<Frame, ClientError> {
        let inner = self
            .inner
            .as_mut()
            .ok_or_else(|| ClientError::UnknownError("session is closed".into()))?;
        let frame = inner
            .decode()
            .match_owned(Ok, |e| Err(ClientError::MediaLibError(e)))?;
        Ok(Frame {
            inner: frame,
            _library: self.library.clone(),
        })
    }

    pub fn metadata(&self) -> Option<StreamMetadata> {
        self.inner.as_ref().map(|inner| inner.metadata())
    }

    pub fn close(mut self) -> Result<(), ClientError> {
        match self.inner.as_mut() {
            Some(inner) => inner
                .close()
                .match_owned(|_| Ok(()), |e| Err(ClientError::MediaLibError(e))),
            None => Ok(()),
        }
    }
}

pub struct Frame {
    inner: stabby::dynptr!(stabby::boxed::Box<dyn GpuFrame>),
    _library: Arc<Library>,
}

impl Frame {
    pub fn is_empty(&self) -> bool {
        self.inner.numel() == 0
    }

    pub fn numel(&self) -> usize {
        self.inner.numel()
    }

    /// `[rows, cols]` of the packed NV12 buffer.
    pub fn shape(&self) -> [usize; 2] {
        [self.inner.rows(), self.inner.cols()]
    }

    pub fn width(&self) -> u32 {
        self.inner.width()
    }

    pub fn height(&self) -> u32 {
        self.inner.height()
    }

    pub fn pts(&self) -> i64 {
        self.inner.pts()
    }

    pub fn device_index(&self) -> u32 {
        self.inner.device_index()
    }

    pub fn device_ptr(&self) -> u64 {
        self.inner.device_ptr()
    }

    /// Copies the frame into host memory.
    pub fn download(&self) -> Result<Vec<u8>, ClientError> {
        self.inner.download().match_owned(
            |bytes| Ok(bytes.as_slice().to_vec()),
            |e| Err(ClientError::MediaLibError(e)),
        )
    }
}
