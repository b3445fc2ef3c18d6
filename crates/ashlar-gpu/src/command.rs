//! Command buffer management.
//!
//! One-off work (layout transitions, uploads, mip blits) goes through the
//! blocking single-time helpers. Steady-state per-frame work records into a
//! [`CommandRing`], one command buffer and fence per frame slot.

use crate::context::{GpuContext, QueueKind};
use crate::error::{check_device_lost, Result};
use crate::frame::{FrameSlot, PerFrame};
use crate::sync::{create_fence, reset_fence, wait_for_fence};
use ash::vk;
use std::sync::Arc;

/// Begin recording a command buffer.
///
/// # Safety
/// The device and command buffer must be valid.
pub unsafe fn begin_command_buffer(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    flags: vk::CommandBufferUsageFlags,
) -> Result<()> {
    let begin_info = vk::CommandBufferBeginInfo::default().flags(flags);
    device.begin_command_buffer(cmd, &begin_info)?;
    Ok(())
}

/// End recording a command buffer.
///
/// # Safety
/// The device and command buffer must be valid.
pub unsafe fn end_command_buffer(device: &ash::Device, cmd: vk::CommandBuffer) -> Result<()> {
    device.end_command_buffer(cmd)?;
    Ok(())
}

/// Allocate primary command buffers from a pool, holding the pool lock.
///
/// # Safety
/// `pool` must have been created from the context's device.
pub unsafe fn allocate_command_buffers(
    ctx: &GpuContext,
    pool: vk::CommandPool,
    count: u32,
) -> Result<Vec<vk::CommandBuffer>> {
    let alloc_info = vk::CommandBufferAllocateInfo::default()
        .command_pool(pool)
        .level(vk::CommandBufferLevel::PRIMARY)
        .command_buffer_count(count);

    let _guard = ctx.lock_command_pools();
    let buffers = ctx.device().allocate_command_buffers(&alloc_info)?;
    Ok(buffers)
}

/// A recording one-off command buffer.
#[must_use = "single-time commands must be flushed"]
pub struct SingleTimeCommands {
    cmd: vk::CommandBuffer,
    pool: vk::CommandPool,
}

impl SingleTimeCommands {
    /// The command buffer to record into.
    pub fn command_buffer(&self) -> vk::CommandBuffer {
        self.cmd
    }
}

/// Allocate and begin a one-off primary command buffer.
///
/// Uses the graphics queue's pool unless `pool` is given.
///
/// # Safety
/// A supplied pool must belong to the graphics queue family of `ctx`.
pub unsafe fn begin_single_time_commands(
    ctx: &GpuContext,
    pool: Option<vk::CommandPool>,
) -> Result<SingleTimeCommands> {
    let pool = pool.unwrap_or(ctx.queue(QueueKind::Graphics).command_pool);
    let cmd = allocate_command_buffers(ctx, pool, 1)?[0];

    if let Err(e) = begin_command_buffer(ctx.device(), cmd, vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT) {
        free_command_buffer(ctx, pool, cmd);
        return Err(e);
    }

    Ok(SingleTimeCommands { cmd, pool })
}

/// End, submit and wait for one-off commands, then free them.
///
/// Blocks until the GPU finishes. The throwaway fence and the command buffer
/// are released on every path.
///
/// # Safety
/// Everything recorded must reference live objects.
#[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
pub unsafe fn flush_single_time_commands(ctx: &GpuContext, commands: SingleTimeCommands) -> Result<()> {
    let SingleTimeCommands { cmd, pool } = commands;
    let device = ctx.device();

    let result = (|| {
        end_command_buffer(device, cmd)?;
        let fence = create_fence(device, false)?;

        let cmd_buffers = [cmd];
        let submit_info = vk::SubmitInfo::default().command_buffers(&cmd_buffers);
        let submitted = ctx
            .submit(QueueKind::Graphics, &[submit_info], fence)
            .and_then(|()| wait_for_fence(device, fence, u64::MAX));

        device.destroy_fence(fence, None);
        submitted
    })();

    free_command_buffer(ctx, pool, cmd);
    result
}

/// Record and run one-off commands on the graphics queue, blocking until done.
///
/// # Safety
/// Commands recorded by `f` must reference live objects.
pub unsafe fn execute_single_time_commands<F>(ctx: &GpuContext, f: F) -> Result<()>
where
    F: FnOnce(vk::CommandBuffer),
{
    let commands = begin_single_time_commands(ctx, None)?;
    f(commands.command_buffer());
    flush_single_time_commands(ctx, commands)
}

unsafe fn free_command_buffer(ctx: &GpuContext, pool: vk::CommandPool, cmd: vk::CommandBuffer) {
    let _guard = ctx.lock_command_pools();
    ctx.device().free_command_buffers(pool, &[cmd]);
}

/// Per-frame command buffers with their completion fences.
///
/// The command buffer and fence of a slot are always used together; a slot's
/// command buffer is only reset after its fence has been waited on.
pub struct CommandRing {
    ctx: Arc<GpuContext>,
    kind: QueueKind,
    commands: PerFrame<vk::CommandBuffer>,
    fences: PerFrame<vk::Fence>,
}

impl CommandRing {
    /// Allocate one command buffer and one signaled fence per slot.
    pub fn new(ctx: Arc<GpuContext>, kind: QueueKind) -> Result<Self> {
        let pool = ctx.queue(kind).command_pool;
        let buffers = unsafe { allocate_command_buffers(&ctx, pool, crate::frame::IMAGE_COUNT as u32)? };
        let commands = PerFrame::from_fn(|slot| buffers[slot.index()]);

        let fences = PerFrame::try_from_fn(|_| unsafe { create_fence(ctx.device(), true) });
        let fences = match fences {
            Ok(fences) => fences,
            Err(e) => {
                let _guard = ctx.lock_command_pools();
                unsafe { ctx.device().free_command_buffers(pool, &buffers) };
                return Err(e);
            }
        };

        for (slot, cmd) in commands.enumerate() {
            unsafe {
                ctx.labels()
                    .name_object(*cmd, &format!("{kind:?} frame commands {}", slot.index()));
            }
        }

        Ok(Self {
            ctx,
            kind,
            commands,
            fences,
        })
    }

    /// Queue this ring submits to.
    pub fn queue_kind(&self) -> QueueKind {
        self.kind
    }

    /// Command buffer of a slot.
    pub fn command_buffer(&self, slot: FrameSlot) -> vk::CommandBuffer {
        self.commands[slot]
    }

    /// Fence of a slot.
    pub fn fence(&self, slot: FrameSlot) -> vk::Fence {
        self.fences[slot]
    }

    /// Block until the slot's last submission completed.
    pub fn wait(&self, slot: FrameSlot) -> Result<()> {
        unsafe { wait_for_fence(self.ctx.device(), self.fences[slot], u64::MAX) }
    }

    /// Unsignal the slot's fence ahead of a new submission.
    pub fn reset_fence(&self, slot: FrameSlot) -> Result<()> {
        unsafe { reset_fence(self.ctx.device(), self.fences[slot]) }
    }

    /// Reset the slot's command buffer and begin recording.
    ///
    /// Call [`wait`](Self::wait) for the slot first.
    pub fn begin(&self, slot: FrameSlot) -> Result<vk::CommandBuffer> {
        let cmd = self.commands[slot];
        unsafe {
            self.ctx
                .device()
                .reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())?;
            begin_command_buffer(self.ctx.device(), cmd, vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT)?;
        }
        Ok(cmd)
    }

    /// Wait, reset the fence and begin recording, for rings that do not present.
    pub fn begin_frame(&self, slot: FrameSlot) -> Result<vk::CommandBuffer> {
        self.wait(slot)?;
        self.reset_fence(slot)?;
        self.begin(slot)
    }

    /// End recording and submit, signaling the slot's fence.
    ///
    /// `wait` pairs each semaphore with the stage that must not start before it.
    /// If ending or submitting fails, an empty batch still consumes `wait` and
    /// signals the fence, so the next [`wait`](Self::wait) on the slot returns.
    pub fn submit(
        &self,
        slot: FrameSlot,
        wait: &[(vk::Semaphore, vk::PipelineStageFlags)],
        signal: &[vk::Semaphore],
    ) -> Result<()> {
        let cmd = self.commands[slot];
        let (wait_semaphores, wait_stages): (Vec<_>, Vec<_>) = wait.iter().copied().unzip();
        let cmd_buffers = [cmd];
        let submit_info = vk::SubmitInfo::default()
            .command_buffers(&cmd_buffers)
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .signal_semaphores(signal);

        let result = unsafe {
            end_command_buffer(self.ctx.device(), cmd)
                .and_then(|()| self.ctx.submit(self.kind, &[submit_info], self.fences[slot]))
        };
        if result.is_err() {
            let fallback = vk::SubmitInfo::default()
                .wait_semaphores(&wait_semaphores)
                .wait_dst_stage_mask(&wait_stages);
            if let Err(e) = unsafe { self.ctx.submit(self.kind, &[fallback], self.fences[slot]) } {
                tracing::error!("Failed to signal fence of slot {} after a failed submit: {e}", slot.index());
            }
        }
        result
    }

    /// Wait for every slot.
    pub fn wait_all(&self) -> Result<()> {
        let fences: Vec<vk::Fence> = self.fences.iter().copied().collect();
        unsafe {
            self.ctx
                .device()
                .wait_for_fences(&fences, true, u64::MAX)
                .map_err(|e| check_device_lost(e, "command ring wait"))
        }
    }
}

impl Drop for CommandRing {
    fn drop(&mut self) {
        if let Err(e) = self.wait_all() {
            tracing::warn!("Dropping command ring with work in flight: {e}");
        }
        let pool = self.ctx.queue(self.kind).command_pool;
        let buffers: Vec<vk::CommandBuffer> = self.commands.iter().copied().collect();
        unsafe {
            for fence in self.fences.iter() {
                self.ctx.device().destroy_fence(*fence, None);
            }
            let _guard = self.ctx.lock_command_pools();
            self.ctx.device().free_command_buffers(pool, &buffers);
        }
    }
}
