//! GPU timestamp queries.
//!
//! [`GpuTimer`] keeps one query pool per frame slot. Scopes are written into the
//! slot's command buffer and read back once the slot's fence has been waited
//! on, so resolving never stalls the GPU.

use crate::context::GpuContext;
use crate::error::{check_device_lost, Result};
use crate::frame::{FrameSlot, PerFrame};
use ash::vk;
use std::sync::Arc;

/// Scopes per frame slot; each uses two queries.
pub const MAX_SCOPES: u32 = 32;

/// Handle to an open scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScopeToken(u32);

/// Resolved duration of one scope.
#[derive(Debug, Clone, PartialEq)]
pub struct ScopeTiming {
    pub name: String,
    pub milliseconds: f64,
}

#[derive(Debug)]
struct Scope {
    name: String,
    closed: bool,
}

/// Convert a pair of raw timestamps to milliseconds.
///
/// Only the low `valid_bits` of each value are meaningful; a wrapped counter is
/// handled by modular subtraction.
pub fn ticks_to_ms(start: u64, end: u64, period_ns: f32, valid_bits: u32) -> f64 {
    let mask = if valid_bits >= 64 {
        u64::MAX
    } else {
        (1u64 << valid_bits) - 1
    };
    let ticks = (end & mask).wrapping_sub(start & mask) & mask;
    ticks as f64 * f64::from(period_ns) / 1_000_000.0
}

/// Named GPU timing scopes, one query pool per frame slot.
pub struct GpuTimer {
    ctx: Arc<GpuContext>,
    pools: Option<PerFrame<vk::QueryPool>>,
    scopes: PerFrame<Vec<Scope>>,
    period_ns: f32,
    valid_bits: u32,
}

impl GpuTimer {
    /// Create the timer. It is disabled when the graphics queue has no valid timestamp bits.
    pub fn new(ctx: &Arc<GpuContext>) -> Self {
        let valid_bits = unsafe {
            ctx.instance()
                .get_physical_device_queue_family_properties(ctx.physical_device())
                .get(ctx.graphics_queue_family() as usize)
                .map_or(0, |props| props.timestamp_valid_bits)
        };
        let period_ns = ctx.capabilities().timestamp_period;

        let pools = if valid_bits == 0 || period_ns <= 0.0 {
            tracing::warn!("Graphics queue does not support timestamps, GPU timing disabled");
            None
        } else {
            let device = ctx.device();
            let info = vk::QueryPoolCreateInfo::default()
                .query_type(vk::QueryType::TIMESTAMP)
                .query_count(MAX_SCOPES * 2);
            let pools = PerFrame::try_from_fn(|_| unsafe { device.create_query_pool(&info, None) });
            match pools {
                Ok(pools) => Some(pools),
                Err(e) => {
                    tracing::warn!("Failed to create timestamp query pools: {e}");
                    None
                }
            }
        };

        Self {
            ctx: Arc::clone(ctx),
            pools,
            scopes: PerFrame::from_fn(|_| Vec::new()),
            period_ns,
            valid_bits,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.pools.is_some()
    }

    /// Reset the slot's queries. Record before the first scope of the frame.
    ///
    /// # Safety
    /// `cmd` must be recording outside a render pass, and the slot's previous
    /// submission must have completed.
    pub unsafe fn reset(&mut self, cmd: vk::CommandBuffer, slot: FrameSlot) {
        self.scopes[slot].clear();
        if let Some(pools) = &self.pools {
            unsafe {
                self.ctx
                    .device()
                    .cmd_reset_query_pool(cmd, pools[slot], 0, MAX_SCOPES * 2);
            }
        }
    }

    /// Open a scope. Returns `None` when timing is disabled or the slot is full.
    ///
    /// # Safety
    /// `cmd` must be recording and the slot must have been [`reset`](Self::reset) this frame.
    pub unsafe fn begin_scope(&mut self, cmd: vk::CommandBuffer, slot: FrameSlot, name: &str) -> Option<ScopeToken> {
        let pools = self.pools.as_ref()?;
        let scopes = &mut self.scopes[slot];
        let index = u32::try_from(scopes.len()).ok().filter(|&i| i < MAX_SCOPES);
        let Some(index) = index else {
            tracing::warn!("Timestamp scope '{name}' dropped, {MAX_SCOPES} scopes already open");
            return None;
        };

        unsafe {
            self.ctx
                .device()
                .cmd_write_timestamp(cmd, vk::PipelineStageFlags::TOP_OF_PIPE, pools[slot], index * 2);
        }
        scopes.push(Scope {
            name: name.to_owned(),
            closed: false,
        });
        Some(ScopeToken(index))
    }

    /// Close a scope opened with [`begin_scope`](Self::begin_scope).
    ///
    /// # Safety
    /// `cmd` must be the command buffer the scope was opened in.
    pub unsafe fn end_scope(&mut self, cmd: vk::CommandBuffer, slot: FrameSlot, token: ScopeToken) {
        let Some(pools) = &self.pools else {
            return;
        };
        let Some(scope) = self.scopes[slot].get_mut(token.0 as usize) else {
            return;
        };
        unsafe {
            self.ctx
                .device()
                .cmd_write_timestamp(cmd, vk::PipelineStageFlags::BOTTOM_OF_PIPE, pools[slot], token.0 * 2 + 1);
        }
        scope.closed = true;
    }

    /// Read back the slot's closed scopes.
    ///
    /// Call after the slot's fence has been waited on; open scopes are skipped.
    pub fn resolve(&self, slot: FrameSlot) -> Result<Vec<ScopeTiming>> {
        let Some(pools) = &self.pools else {
            return Ok(Vec::new());
        };

        let mut timings = Vec::new();
        for (index, scope) in self.scopes[slot].iter().enumerate() {
            if !scope.closed {
                continue;
            }
            let mut ticks = [0u64; 2];
            let result = unsafe {
                self.ctx.device().get_query_pool_results(
                    pools[slot],
                    index as u32 * 2,
                    &mut ticks,
                    vk::QueryResultFlags::TYPE_64 | vk::QueryResultFlags::WAIT,
                )
            };
            result.map_err(|e| check_device_lost(e, "timestamp readback"))?;
            timings.push(ScopeTiming {
                name: scope.name.clone(),
                milliseconds: ticks_to_ms(ticks[0], ticks[1], self.period_ns, self.valid_bits),
            });
        }
        Ok(timings)
    }
}

impl Drop for GpuTimer {
    fn drop(&mut self) {
        if let Some(pools) = &self.pools {
            for &pool in pools.iter() {
                unsafe { self.ctx.device().destroy_query_pool(pool, None) };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ticks_scale_by_period() {
        // 1000 ticks at 1ns
        assert!((ticks_to_ms(1_000, 2_000, 1.0, 64) - 0.001).abs() < 1e-12);
        // 2.5ms at 10ns per tick
        assert!((ticks_to_ms(0, 250_000, 10.0, 64) - 2.5).abs() < 1e-9);
    }

    #[test]
    fn ticks_wrap_within_valid_bits() {
        let max = (1u64 << 36) - 1;
        assert!((ticks_to_ms(max - 9, 10, 1.0, 36) - 20.0e-6).abs() < 1e-12);
        // Bits above the valid range are ignored
        assert!((ticks_to_ms(1 << 40, (1 << 40) + 5, 1.0, 36) - 5.0e-6).abs() < 1e-12);
    }
}
