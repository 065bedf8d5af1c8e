//! Recording test doubles for the driver, demuxer and decoder.
//!
//! All doubles built from one [`FakeDriver`] share its call log and its
//! notion of the currently selected device, so tests can check both the
//! order of calls and which device was active when each one ran.

#[cfg(feature = "ffmpeg")]
pub mod clips;

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use gpu_decode_types::StreamMetadata;

use crate::codec::{CodecId, CodecTag};
use crate::decoder::HardwareDecoder;
use crate::demux::Demuxer;
use crate::error::SessionError;
use crate::frame::{FrameBuffer, VideoFrame};
use crate::gpu::{ContextHandle, GpuDriver};
use crate::session::Backend;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Select(usize),
    Restore(Option<usize>),
    Retain { device: usize, active: Option<usize> },
    Release { device: usize, active: Option<usize> },
    DecoderInit { device: usize, active: Option<usize> },
    Submit { device: usize, len: usize, active: Option<usize> },
    Fetch { device: usize, active: Option<usize> },
    DecoderRelease { device: usize, active: Option<usize> },
}

struct DriverState {
    device_count: usize,
    current: Cell<Option<usize>>,
    calls: RefCell<Vec<Call>>,
    retains: Cell<usize>,
    releases: Cell<usize>,
    fail_retain: Cell<bool>,
    fail_select: Cell<bool>,
    decoder_inits: RefCell<Vec<(CodecTag, CodecId)>>,
}

#[derive(Clone)]
pub struct FakeDriver {
    state: Rc<DriverState>,
}

impl FakeDriver {
    pub fn new(device_count: usize) -> Self {
        Self {
            state: Rc::new(DriverState {
                device_count,
                current: Cell::new(None),
                calls: RefCell::new(Vec::new()),
                retains: Cell::new(0),
                releases: Cell::new(0),
                fail_retain: Cell::new(false),
                fail_select: Cell::new(false),
                decoder_inits: RefCell::new(Vec::new()),
            }),
        }
    }

    pub fn set_current(&self, device: Option<usize>) {
        self.state.current.set(device);
    }

    pub fn current_device(&self) -> Option<usize> {
        self.state.current.get()
    }

    pub fn fail_retain(&self) {
        self.state.fail_retain.set(true);
    }

    /// Makes every later `select` fail, as a lost context would.
    pub fn fail_select(&self) {
        self.state.fail_select.set(true);
    }

    /// Stream codec tag and mapped codec seen by each decoder init.
    pub fn decoder_inits(&self) -> Vec<(CodecTag, CodecId)> {
        self.state.decoder_inits.borrow().clone()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.calls.borrow().clone()
    }

    /// The call log without guard bookkeeping.
    pub fn gpu_calls(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| !matches!(c, Call::Select(_) | Call::Restore(_)))
            .collect()
    }

    pub fn retains(&self) -> usize {
        self.state.retains.get()
    }

    pub fn releases(&self) -> usize {
        self.state.releases.get()
    }

    fn record(&self, call: Call) {
        self.state.calls.borrow_mut().push(call);
    }
}

impl GpuDriver for FakeDriver {
    type Selection = Option<usize>;

    fn device_count(&self) -> Result<usize, SessionError> {
        Ok(self.state.device_count)
    }

    fn current(&self) -> Result<Option<usize>, SessionError> {
        Ok(self.state.current.get())
    }

    fn select(&self, device: usize) -> Result<(), SessionError> {
        if self.state.fail_select.get() {
            return Err(SessionError::device(device, "cuCtxSetCurrent failed"));
        }
        self.record(Call::Select(device));
        self.state.current.set(Some(device));
        Ok(())
    }

    fn restore(&self, selection: Option<usize>) -> Result<(), SessionError> {
        self.record(Call::Restore(selection));
        self.state.current.set(selection);
        Ok(())
    }

    fn retain_primary_context(&self, device: usize) -> Result<ContextHandle, SessionError> {
        if self.state.fail_retain.get() {
            return Err(SessionError::device(device, "cuDevicePrimaryCtxRetain failed"));
        }
        self.record(Call::Retain {
            device,
            active: self.current_device(),
        });
        self.state.retains.set(self.state.retains.get() + 1);
        Ok(ContextHandle::from_raw(0x1000 + device))
    }

    fn release_primary_context(&self, device: usize) -> Result<(), SessionError> {
        self.record(Call::Release {
            device,
            active: self.current_device(),
        });
        self.state.releases.set(self.state.releases.get() + 1);
        Ok(())
    }
}

pub struct FakeDemuxer {
    tag: CodecTag,
    packets: VecDeque<Vec<u8>>,
    current: Vec<u8>,
}

impl Demuxer for FakeDemuxer {
    fn codec_tag(&self) -> CodecTag {
        self.tag.clone()
    }

    fn metadata(&self) -> StreamMetadata {
        StreamMetadata {
            width: 2,
            height: 2,
            fps_num: 30,
            fps_den: 1,
            duration_us: 100_000,
        }
    }

    fn next_chunk(&mut self) -> Result<&[u8], SessionError> {
        self.current = self.packets.pop_front().unwrap_or_default();
        Ok(&self.current)
    }
}

/// What the scripted decoder does with each submission.
#[derive(Debug, Clone, Default)]
pub struct DecoderScript {
    /// Frame ids that become ready after the n-th non-empty submission.
    pub on_submit: Vec<Vec<i64>>,
    /// Frame ids that become ready on the first flush.
    pub on_flush: Vec<i64>,
    /// Fail the n-th non-empty submission with a decode error.
    pub fail_submit: Option<usize>,
}

impl DecoderScript {
    /// One frame per packet, no reordering delay.
    pub fn passthrough(frames: usize) -> Self {
        Self {
            on_submit: (0..frames as i64).map(|i| vec![i + 1]).collect(),
            ..Default::default()
        }
    }
}

pub struct FakeDecoder {
    driver: FakeDriver,
    device: usize,
    script: DecoderScript,
    submitted: usize,
    flushed: bool,
    ready: VecDeque<i64>,
    released: bool,
}

impl HardwareDecoder for FakeDecoder {
    fn submit(&mut self, chunk: &[u8]) -> Result<(), SessionError> {
        self.driver.record(Call::Submit {
            device: self.device,
            len: chunk.len(),
            active: self.driver.current_device(),
        });
        if chunk.is_empty() {
            if !self.flushed {
                self.flushed = true;
                self.ready.extend(self.script.on_flush.iter().copied());
            }
            return Ok(());
        }
        let index = self.submitted;
        self.submitted += 1;
        if self.script.fail_submit == Some(index) {
            return Err(SessionError::Decode("corrupt slice header".into()));
        }
        if let Some(frames) = self.script.on_submit.get(index) {
            self.ready.extend(frames.iter().copied());
        }
        Ok(())
    }

    fn fetch_frame(&mut self) -> Result<VideoFrame, SessionError> {
        self.driver.record(Call::Fetch {
            device: self.device,
            active: self.driver.current_device(),
        });
        Ok(match self.ready.pop_front() {
            Some(id) => VideoFrame::nv12(
                Box::new(FakeBuffer {
                    device: self.device,
                    id,
                }),
                2,
                2,
                id,
            ),
            None => VideoFrame::empty(),
        })
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.driver.record(Call::DecoderRelease {
            device: self.device,
            active: self.driver.current_device(),
        });
    }
}

pub struct FakeBuffer {
    device: usize,
    id: i64,
}

impl FrameBuffer for FakeBuffer {
    fn device(&self) -> usize {
        self.device
    }

    fn device_ptr(&self) -> u64 {
        0xd000_0000 + self.id as u64
    }

    fn len(&self) -> usize {
        6
    }

    fn copy_to_host(&self) -> Result<Vec<u8>, SessionError> {
        Ok(vec![self.id as u8; 6])
    }
}

pub struct FakeBackend {
    pub driver: FakeDriver,
    pub source: PathBuf,
    pub tag: CodecTag,
    pub packets: Vec<Vec<u8>>,
    pub script: DecoderScript,
    pub fail_decoder_init: bool,
}

impl FakeBackend {
    pub fn new(driver: &FakeDriver, packets: usize, script: DecoderScript) -> Self {
        Self {
            driver: driver.clone(),
            source: PathBuf::from("clip.mp4"),
            tag: CodecTag::H264,
            packets: (0..packets).map(|i| vec![0, 0, 1, i as u8]).collect(),
            script,
            fail_decoder_init: false,
        }
    }
}

impl Backend for FakeBackend {
    type Driver = FakeDriver;
    type Demuxer = FakeDemuxer;
    type Decoder = FakeDecoder;

    fn driver(&self) -> &FakeDriver {
        &self.driver
    }

    fn open_demuxer(&self, source: &Path) -> Result<FakeDemuxer, SessionError> {
        if source != self.source {
            return Err(SessionError::SourceOpen {
                path: source.display().to_string(),
                reason: "No such file or directory".into(),
            });
        }
        Ok(FakeDemuxer {
            tag: self.tag.clone(),
            packets: self.packets.iter().cloned().collect(),
            current: Vec::new(),
        })
    }

    fn init_decoder(
        &self,
        _context: ContextHandle,
        device: usize,
        codec: CodecId,
        demuxer: &FakeDemuxer,
    ) -> Result<FakeDecoder, SessionError> {
        self.driver.record(Call::DecoderInit {
            device,
            active: self.driver.current_device(),
        });
        self.driver
            .state
            .decoder_inits
            .borrow_mut()
            .push((demuxer.codec_tag(), codec));
        if self.fail_decoder_init {
            return Err(SessionError::DecoderInit("profile not supported".into()));
        }
        Ok(FakeDecoder {
            driver: self.driver.clone(),
            device,
            script: self.script.clone(),
            submitted: 0,
            flushed: false,
            ready: VecDeque::new(),
            released: false,
        })
    }
}
