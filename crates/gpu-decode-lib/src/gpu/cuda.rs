//! CUDA driver API backend via cudarc.
//!
//! The "current device" of the driver API is the calling thread's current
//! context. Selecting a device binds its primary context; the driver keeps
//! one cudarc [`CudaContext`] per device for that, created lazily. Sessions
//! take their own retain on top of it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use cudarc::driver::sys::{self, CUcontext, CUdeviceptr, CUmemorytype, CUDA_MEMCPY2D};
use cudarc::driver::{CudaContext, CudaSlice, CudaStream, DevicePtrMut, DriverError};

use super::{ContextHandle, GpuDriver};
use crate::error::SessionError;
use crate::frame::FrameBuffer;

/// The thread's current context when a guard was created.
pub struct CurrentContext(CUcontext);

fn current_context() -> Result<CurrentContext, DriverError> {
    let mut ctx: CUcontext = std::ptr::null_mut();
    // SAFETY: writes the current context (possibly null) to a valid pointer.
    unsafe { sys::cuCtxGetCurrent(&mut ctx) }.result()?;
    Ok(CurrentContext(ctx))
}

fn set_current_context(selection: CurrentContext) -> Result<(), DriverError> {
    // SAFETY: the context was current earlier and is kept alive by whoever
    // made it current.
    unsafe { sys::cuCtxSetCurrent(selection.0) }.result()
}

/// Runs `f` and puts the thread's current context back afterwards. cudarc
/// binds the buffer's context for every operation it performs.
fn preserving_current<T>(device: usize, f: impl FnOnce() -> T) -> T {
    let saved = current_context();
    let result = f();
    match saved.and_then(set_current_context) {
        Ok(()) => {}
        Err(e) => log::warn!("Failed to restore current context after using device {}: {}", device, e),
    }
    result
}

#[derive(Debug)]
pub struct CudaDriver {
    contexts: Mutex<HashMap<usize, Arc<CudaContext>>>,
}

impl CudaDriver {
    pub fn new() -> Result<Self, SessionError> {
        cudarc::driver::result::init()
            .map_err(|e| SessionError::device(0, format!("cuInit failed: {e}")))?;
        Ok(Self {
            contexts: Mutex::new(HashMap::new()),
        })
    }

    fn cu_device(device: usize) -> Result<sys::CUdevice, SessionError> {
        let mut cu_device: sys::CUdevice = 0;
        // SAFETY: writes one CUdevice to a valid pointer.
        unsafe { sys::cuDeviceGet(&mut cu_device, device as i32) }
            .result()
            .map_err(|e| SessionError::device(device, format!("cuDeviceGet failed: {e}")))?;
        Ok(cu_device)
    }

    /// The device's primary context as a cudarc handle.
    pub fn context(&self, device: usize) -> Result<Arc<CudaContext>, SessionError> {
        let mut contexts = self
            .contexts
            .lock()
            .map_err(|_| SessionError::device(device, "device table lock poisoned"))?;
        if let Some(ctx) = contexts.get(&device) {
            return Ok(ctx.clone());
        }
        let ctx = CudaContext::new(device)
            .map_err(|e| SessionError::device(device, format!("primary context: {e}")))?;
        contexts.insert(device, ctx.clone());
        Ok(ctx)
    }

    /// Stream used to pack decoded frames on `device`.
    pub fn stream(&self, device: usize) -> Result<Arc<CudaStream>, SessionError> {
        Ok(self.context(device)?.default_stream())
    }
}

impl GpuDriver for CudaDriver {
    type Selection = CurrentContext;

    fn device_count(&self) -> Result<usize, SessionError> {
        let count = CudaContext::device_count()
            .map_err(|e| SessionError::device(0, format!("cuDeviceGetCount failed: {e}")))?;
        Ok(count.max(0) as usize)
    }

    fn current(&self) -> Result<CurrentContext, SessionError> {
        current_context().map_err(|e| SessionError::device(0, format!("cuCtxGetCurrent failed: {e}")))
    }

    fn select(&self, device: usize) -> Result<(), SessionError> {
        self.context(device)?
            .bind_to_thread()
            .map_err(|e| SessionError::device(device, format!("cuCtxSetCurrent failed: {e}")))
    }

    fn restore(&self, selection: CurrentContext) -> Result<(), SessionError> {
        set_current_context(selection)
            .map_err(|e| SessionError::device(0, format!("cuCtxSetCurrent failed: {e}")))
    }

    fn retain_primary_context(&self, device: usize) -> Result<ContextHandle, SessionError> {
        let cu_device = Self::cu_device(device)?;
        let mut ctx: CUcontext = std::ptr::null_mut();
        // SAFETY: cu_device is valid, ctx is a valid out pointer.
        unsafe { sys::cuDevicePrimaryCtxRetain(&mut ctx, cu_device) }
            .result()
            .map_err(|e| SessionError::device(device, format!("primary context retain: {e}")))?;
        Ok(ContextHandle::from_raw(ctx as usize))
    }

    fn release_primary_context(&self, device: usize) -> Result<(), SessionError> {
        let cu_device = Self::cu_device(device)?;
        // SAFETY: paired with a successful retain on the same device.
        unsafe { sys::cuDevicePrimaryCtxRelease_v2(cu_device) }
            .result()
            .map_err(|e| SessionError::device(device, format!("primary context release: {e}")))
    }
}

/// A contiguous allocation in device memory, freed on drop.
///
/// The slice keeps its stream and through it the primary context alive, so
/// frames stay valid after the session that produced them is closed.
#[derive(Debug)]
pub struct DeviceBuffer {
    // Only None while dropping.
    inner: Option<CudaSlice<u8>>,
    stream: Arc<CudaStream>,
    device_ptr: CUdeviceptr,
    len: usize,
    device: usize,
}

/// One plane of a pitched source surface.
pub struct PlaneCopy {
    pub src: CUdeviceptr,
    pub src_pitch: usize,
    pub rows: usize,
}

impl DeviceBuffer {
    /// Allocates `rows * width_bytes` on `stream` and packs the planes into
    /// it, one after another.
    pub fn pack_planes(
        stream: &Arc<CudaStream>,
        device: usize,
        width_bytes: usize,
        planes: &[PlaneCopy],
    ) -> Result<Self, SessionError> {
        let rows: usize = planes.iter().map(|p| p.rows).sum();
        let len = rows * width_bytes;

        preserving_current(device, || {
            let mut inner = stream
                .alloc_zeros::<u8>(len)
                .map_err(|e| SessionError::Decode(format!("frame allocation of {len} bytes: {e}")))?;

            let device_ptr = {
                let (dst, _record) = inner.device_ptr_mut(stream);
                let mut dst_offset = 0;
                for plane in planes {
                    // SAFETY: CUDA_MEMCPY2D is a plain C struct; zero is a valid start.
                    let mut copy: CUDA_MEMCPY2D = unsafe { std::mem::zeroed() };
                    copy.srcMemoryType = CUmemorytype::CU_MEMORYTYPE_DEVICE;
                    copy.srcDevice = plane.src;
                    copy.srcPitch = plane.src_pitch;
                    copy.dstMemoryType = CUmemorytype::CU_MEMORYTYPE_DEVICE;
                    copy.dstDevice = dst + dst_offset as CUdeviceptr;
                    copy.dstPitch = width_bytes;
                    copy.WidthInBytes = width_bytes;
                    copy.Height = plane.rows;
                    // SAFETY: source rows are within the decoder surface,
                    // destination rows within the allocation above.
                    unsafe { sys::cuMemcpy2DAsync_v2(&copy, stream.cu_stream()) }
                        .result()
                        .map_err(|e| SessionError::Decode(format!("surface copy failed: {e}")))?;
                    dst_offset += plane.rows * width_bytes;
                }
                dst
            };
            // The decoder reuses its surface once this returns.
            stream
                .synchronize()
                .map_err(|e| SessionError::Decode(format!("surface copy failed: {e}")))?;

            Ok(Self {
                inner: Some(inner),
                stream: stream.clone(),
                device_ptr,
                len,
                device,
            })
        })
    }
}

impl FrameBuffer for DeviceBuffer {
    fn device(&self) -> usize {
        self.device
    }

    fn device_ptr(&self) -> u64 {
        self.device_ptr
    }

    fn len(&self) -> usize {
        self.len
    }

    fn copy_to_host(&self) -> Result<Vec<u8>, SessionError> {
        let inner = self
            .inner
            .as_ref()
            .ok_or_else(|| SessionError::Decode("frame buffer already freed".into()))?;
        let mut host = vec![0u8; self.len];
        preserving_current(self.device, || {
            self.stream
                .memcpy_dtoh(inner, &mut host)
                .and_then(|()| self.stream.synchronize())
                .map_err(|e| SessionError::Decode(format!("device to host copy: {e}")))
        })?;
        Ok(host)
    }
}

impl Drop for DeviceBuffer {
    fn drop(&mut self) {
        let inner = self.inner.take();
        preserving_current(self.device, || drop(inner));
    }
}
