use gpu_decode_types::SessionOptions;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    pub device_index: usize,
    /// Fail `decode()` when this many chunks go by without a frame.
    /// `None` keeps pulling until the demuxer is exhausted.
    pub max_chunks_per_frame: Option<usize>,
}

impl SessionConfig {
    pub fn new(device_index: usize) -> Self {
        Self {
            device_index,
            max_chunks_per_frame: None,
        }
    }

    pub fn with_max_chunks_per_frame(mut self, limit: usize) -> Self {
        self.max_chunks_per_frame = Some(limit);
        self
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::new(0)
    }
}

impl From<&SessionOptions> for SessionConfig {
    fn from(options: &SessionOptions) -> Self {
        Self {
            device_index: options.device_index as usize,
            max_chunks_per_frame: match options.max_chunks_per_frame {
                0 => None,
                limit => Some(limit as usize),
            },
        }
    }
}
