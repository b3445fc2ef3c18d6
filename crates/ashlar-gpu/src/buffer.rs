//! Buffer resources.
//!
//! [`BufferObject`] owns a buffer, its allocation, and optionally a texel
//! view. It keeps its [`GpuContext`] alive and returns its memory to the
//! allocator on drop.

use crate::command::execute_single_time_commands;
use crate::context::GpuContext;
use crate::error::{GpuError, Result};
use crate::memory::MemoryUsage;
use ash::vk;
use bytemuck::Pod;
use gpu_allocator::vulkan::Allocation;
use std::sync::Arc;

/// A buffer with its memory.
pub struct BufferObject {
    ctx: Arc<GpuContext>,
    buffer: vk::Buffer,
    allocation: Option<Allocation>,
    size: vk::DeviceSize,
    memory_usage: MemoryUsage,
    usage: vk::BufferUsageFlags,
    device_address: Option<vk::DeviceAddress>,
    view: Option<vk::BufferView>,
}

impl BufferObject {
    /// Create a buffer of `size` bytes.
    ///
    /// A device address is queried when the usage asks for one and the device
    /// supports it.
    pub fn new(
        ctx: &Arc<GpuContext>,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        memory_usage: MemoryUsage,
        name: &str,
    ) -> Result<Self> {
        if size == 0 {
            return Err(GpuError::OutOfRange(format!("buffer '{name}' has zero size")));
        }

        let mut usage = usage;
        if !ctx.capabilities().supports_buffer_device_address {
            usage &= !vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS;
        }

        let create_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let (buffer, allocation) = ctx
            .allocator()
            .lock()
            .allocate_buffer(&create_info, memory_usage, name)?;

        let device_address = usage
            .contains(vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS)
            .then(|| unsafe {
                let info = vk::BufferDeviceAddressInfo::default().buffer(buffer);
                ctx.device().get_buffer_device_address(&info)
            });

        unsafe { ctx.labels().name_object(buffer, name) };
        tracing::debug!("Created buffer '{name}' ({size} bytes, {memory_usage:?})");

        Ok(Self {
            ctx: Arc::clone(ctx),
            buffer,
            allocation: Some(allocation),
            size,
            memory_usage,
            usage,
            device_address,
            view: None,
        })
    }

    /// Host-visible buffer used as a copy source.
    pub fn staging(ctx: &Arc<GpuContext>, size: vk::DeviceSize) -> Result<Self> {
        Self::new(
            ctx,
            size,
            vk::BufferUsageFlags::TRANSFER_SRC,
            MemoryUsage::CpuToGpu,
            "staging",
        )
    }

    /// Host-visible buffer used as a copy destination for readbacks.
    pub fn readback(ctx: &Arc<GpuContext>, size: vk::DeviceSize) -> Result<Self> {
        Self::new(
            ctx,
            size,
            vk::BufferUsageFlags::TRANSFER_DST,
            MemoryUsage::GpuToCpu,
            "readback",
        )
    }

    /// Host-writable uniform buffer.
    pub fn uniform(ctx: &Arc<GpuContext>, size: vk::DeviceSize, name: &str) -> Result<Self> {
        Self::new(
            ctx,
            size,
            vk::BufferUsageFlags::UNIFORM_BUFFER,
            MemoryUsage::CpuToGpu,
            name,
        )
    }

    /// Storage buffer, also usable as a copy source and destination.
    pub fn storage(
        ctx: &Arc<GpuContext>,
        size: vk::DeviceSize,
        memory_usage: MemoryUsage,
        name: &str,
    ) -> Result<Self> {
        Self::new(
            ctx,
            size,
            vk::BufferUsageFlags::STORAGE_BUFFER
                | vk::BufferUsageFlags::TRANSFER_SRC
                | vk::BufferUsageFlags::TRANSFER_DST
                | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS,
            memory_usage,
            name,
        )
    }

    /// Vertex buffer filled with `data`.
    pub fn vertex<T: Pod>(ctx: &Arc<GpuContext>, data: &[T], memory_usage: MemoryUsage) -> Result<Self> {
        Self::with_data(
            ctx,
            bytemuck::cast_slice(data),
            vk::BufferUsageFlags::VERTEX_BUFFER,
            memory_usage,
            "vertices",
        )
    }

    /// Index buffer filled with `data`.
    pub fn index<T: Pod>(ctx: &Arc<GpuContext>, data: &[T], memory_usage: MemoryUsage) -> Result<Self> {
        Self::with_data(
            ctx,
            bytemuck::cast_slice(data),
            vk::BufferUsageFlags::INDEX_BUFFER,
            memory_usage,
            "indices",
        )
    }

    /// Create a buffer holding `bytes`.
    ///
    /// GPU-only buffers are filled through a staging buffer and a blocking
    /// copy; host-visible ones are written directly.
    pub fn with_data(
        ctx: &Arc<GpuContext>,
        bytes: &[u8],
        usage: vk::BufferUsageFlags,
        memory_usage: MemoryUsage,
        name: &str,
    ) -> Result<Self> {
        let size = bytes.len() as vk::DeviceSize;
        if memory_usage.is_host_visible() {
            let mut buffer = Self::new(ctx, size, usage, memory_usage, name)?;
            buffer.upload(0, bytes)?;
            return Ok(buffer);
        }

        let mut staging = Self::staging(ctx, size)?;
        staging.upload(0, bytes)?;

        let buffer = Self::new(
            ctx,
            size,
            usage | vk::BufferUsageFlags::TRANSFER_DST,
            memory_usage,
            name,
        )?;
        copy_buffer(ctx, &staging, &buffer, size)?;
        Ok(buffer)
    }

    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    pub fn memory_usage(&self) -> MemoryUsage {
        self.memory_usage
    }

    pub fn usage(&self) -> vk::BufferUsageFlags {
        self.usage
    }

    /// Device address, when requested at creation and supported.
    pub fn device_address(&self) -> Option<vk::DeviceAddress> {
        self.device_address
    }

    /// Texel view created with [`create_view`](Self::create_view).
    pub fn view(&self) -> Option<vk::BufferView> {
        self.view
    }

    /// Descriptor info covering the whole buffer.
    pub fn descriptor_info(&self) -> vk::DescriptorBufferInfo {
        vk::DescriptorBufferInfo::default()
            .buffer(self.buffer)
            .offset(0)
            .range(vk::WHOLE_SIZE)
    }

    fn check_range(&self, offset: vk::DeviceSize, len: usize) -> Result<std::ops::Range<usize>> {
        let end = offset
            .checked_add(len as vk::DeviceSize)
            .filter(|end| *end <= self.size)
            .ok_or_else(|| {
                GpuError::OutOfRange(format!(
                    "{len} bytes at offset {offset} in a {} byte buffer",
                    self.size
                ))
            })?;
        Ok(offset as usize..end as usize)
    }

    /// Copy `bytes` into the buffer at `offset`.
    ///
    /// Fails with [`GpuError::NotHostVisible`] for GPU-only buffers.
    pub fn upload(&mut self, offset: vk::DeviceSize, bytes: &[u8]) -> Result<()> {
        self.memory_usage.ensure_host_access()?;
        let range = self.check_range(offset, bytes.len())?;
        let mapped = self
            .allocation
            .as_mut()
            .and_then(Allocation::mapped_slice_mut)
            .ok_or(GpuError::NotHostVisible)?;
        mapped[range].copy_from_slice(bytes);
        Ok(())
    }

    /// Copy plain data into the start of the buffer.
    pub fn upload_pod<T: Pod>(&mut self, data: &[T]) -> Result<()> {
        self.upload(0, bytemuck::cast_slice(data))
    }

    /// Read `len` bytes starting at `offset`.
    ///
    /// Fails with [`GpuError::NotHostVisible`] for GPU-only buffers.
    pub fn download(&self, offset: vk::DeviceSize, len: usize) -> Result<Vec<u8>> {
        self.memory_usage.ensure_host_access()?;
        let range = self.check_range(offset, len)?;
        let mapped = self
            .allocation
            .as_ref()
            .and_then(Allocation::mapped_slice)
            .ok_or(GpuError::NotHostVisible)?;
        Ok(mapped[range].to_vec())
    }

    /// Read the buffer as a vector of plain values.
    pub fn download_pod<T: Pod>(&self, count: usize) -> Result<Vec<T>> {
        let stride = std::mem::size_of::<T>().max(1);
        let bytes = self.download(0, count * std::mem::size_of::<T>())?;
        Ok(bytes
            .chunks_exact(stride)
            .map(bytemuck::pod_read_unaligned)
            .collect())
    }

    /// Create a texel buffer view over `range` bytes at `offset`.
    pub fn create_view(
        &mut self,
        format: vk::Format,
        offset: vk::DeviceSize,
        range: vk::DeviceSize,
    ) -> Result<vk::BufferView> {
        let info = vk::BufferViewCreateInfo::default()
            .buffer(self.buffer)
            .format(format)
            .offset(offset)
            .range(range);
        let view = unsafe { self.ctx.device().create_buffer_view(&info, None)? };
        if let Some(old) = self.view.replace(view) {
            unsafe { self.ctx.device().destroy_buffer_view(old, None) };
        }
        Ok(view)
    }
}

impl Drop for BufferObject {
    fn drop(&mut self) {
        unsafe {
            if let Some(view) = self.view.take() {
                self.ctx.device().destroy_buffer_view(view, None);
            }
            self.ctx.device().destroy_buffer(self.buffer, None);
        }
        if let Some(allocation) = self.allocation.take() {
            if let Err(e) = self.ctx.allocator().lock().free(allocation) {
                tracing::warn!("Failed to free buffer memory: {e}");
            }
        }
    }
}

/// Copy `size` bytes between buffers, blocking until done.
pub fn copy_buffer(
    ctx: &GpuContext,
    src: &BufferObject,
    dst: &BufferObject,
    size: vk::DeviceSize,
) -> Result<()> {
    if size > src.size() || size > dst.size() {
        return Err(GpuError::OutOfRange(format!(
            "copy of {size} bytes from {} into {} bytes",
            src.size(),
            dst.size()
        )));
    }

    let region = vk::BufferCopy::default().size(size);
    unsafe {
        execute_single_time_commands(ctx, |cmd| {
            ctx.device()
                .cmd_copy_buffer(cmd, src.handle(), dst.handle(), &[region]);
        })
    }
}
