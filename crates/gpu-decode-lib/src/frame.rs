use crate::error::SessionError;

/// GPU memory backing a decoded frame.
pub trait FrameBuffer: Send {
    fn device(&self) -> usize;
    fn device_ptr(&self) -> u64;
    fn len(&self) -> usize;
    fn copy_to_host(&self) -> Result<Vec<u8>, SessionError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementType {
    U8,
}

/// A decoded picture owned by the caller. The zero-element frame means
/// "no frame"; see [`crate::session::DecodeSession::decode`].
pub struct VideoFrame {
    buffer: Option<Box<dyn FrameBuffer>>,
    shape: Vec<usize>,
    dtype: ElementType,
    width: u32,
    height: u32,
    pts: i64,
}

impl VideoFrame {
    pub fn empty() -> Self {
        Self {
            buffer: None,
            shape: vec![0],
            dtype: ElementType::U8,
            width: 0,
            height: 0,
            pts: 0,
        }
    }

    /// Wraps an NV12 picture: a luma plane followed by interleaved chroma,
    /// both rows `padded_width(width)` bytes wide.
    pub fn nv12(buffer: Box<dyn FrameBuffer>, width: u32, height: u32, pts: i64) -> Self {
        let shape = vec![nv12_rows(height), padded_width(width)];
        debug_assert!(buffer.len() >= shape.iter().product());
        Self {
            buffer: Some(buffer),
            shape,
            dtype: ElementType::U8,
            width,
            height,
            pts,
        }
    }

    pub fn numel(&self) -> usize {
        self.shape.iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.numel() == 0
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn dtype(&self) -> ElementType {
        self.dtype
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pts(&self) -> i64 {
        self.pts
    }

    pub fn buffer(&self) -> Option<&dyn FrameBuffer> {
        self.buffer.as_deref()
    }

    pub fn device(&self) -> Option<usize> {
        self.buffer.as_ref().map(|b| b.device())
    }

    pub fn device_ptr(&self) -> u64 {
        self.buffer.as_ref().map_or(0, |b| b.device_ptr())
    }

    pub fn to_host(&self) -> Result<Vec<u8>, SessionError> {
        match &self.buffer {
            Some(buffer) => {
                let mut bytes = buffer.copy_to_host()?;
                bytes.truncate(self.numel());
                Ok(bytes)
            }
            None => Ok(Vec::new()),
        }
    }
}

impl std::fmt::Debug for VideoFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VideoFrame")
            .field("shape", &self.shape)
            .field("dtype", &self.dtype)
            .field("pts", &self.pts)
            .field("device_ptr", &format_args!("{:#x}", self.device_ptr()))
            .finish()
    }
}

/// NV12 rows are even width; odd widths are rounded up.
pub fn padded_width(width: u32) -> usize {
    ((width as usize) + 1) & !1
}

pub fn nv12_rows(height: u32) -> usize {
    let height = height as usize;
    height + (height + 1) / 2
}
