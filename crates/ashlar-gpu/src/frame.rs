//! Frame pacing.
//!
//! Every per-frame resource (command buffer, fence, semaphore pair) lives in a
//! [`PerFrame`] ring indexed by a [`FrameSlot`]. Slots can only be produced by
//! a [`FrameCursor`] or [`FrameSlot::all`], so an out-of-range index cannot be
//! constructed. [`FramePacer`] drives the acquire/record/submit/present cycle
//! against a [`PresentationBackend`].

use crate::error::Result;
use std::ops::{Index, IndexMut};

/// Number of swapchain images and frames in flight.
pub const IMAGE_COUNT: usize = 3;

/// A frame-in-flight index in `[0, IMAGE_COUNT)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct FrameSlot(usize);

impl FrameSlot {
    /// The slot used after creation and after every resize.
    pub const FIRST: Self = Self(0);

    /// Raw index, always below [`IMAGE_COUNT`].
    pub const fn index(self) -> usize {
        self.0
    }

    /// The slot following this one, wrapping around.
    #[must_use]
    pub const fn next(self) -> Self {
        Self((self.0 + 1) % IMAGE_COUNT)
    }

    /// All slots in order.
    pub fn all() -> impl Iterator<Item = Self> {
        (0..IMAGE_COUNT).map(Self)
    }
}

/// One value per frame slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PerFrame<T>([T; IMAGE_COUNT]);

impl<T> PerFrame<T> {
    /// Build one value per slot.
    pub fn from_fn(mut f: impl FnMut(FrameSlot) -> T) -> Self {
        Self(std::array::from_fn(|i| f(FrameSlot(i))))
    }

    /// Build one value per slot, stopping at the first error.
    ///
    /// Values created before the failure are dropped.
    pub fn try_from_fn<E>(
        mut f: impl FnMut(FrameSlot) -> std::result::Result<T, E>,
    ) -> std::result::Result<Self, E> {
        let mut items = Vec::with_capacity(IMAGE_COUNT);
        for slot in FrameSlot::all() {
            items.push(f(slot)?);
        }
        match <[T; IMAGE_COUNT]>::try_from(items) {
            Ok(array) => Ok(Self(array)),
            Err(_) => unreachable!("one item per frame slot"),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.0.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.0.iter_mut()
    }

    /// Pairs of slot and value.
    pub fn enumerate(&self) -> impl Iterator<Item = (FrameSlot, &T)> {
        self.0.iter().enumerate().map(|(i, v)| (FrameSlot(i), v))
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> PerFrame<U> {
        PerFrame(self.0.map(f))
    }
}

impl<T: Default> Default for PerFrame<T> {
    fn default() -> Self {
        Self::from_fn(|_| T::default())
    }
}

impl<T> Index<FrameSlot> for PerFrame<T> {
    type Output = T;

    fn index(&self, slot: FrameSlot) -> &T {
        &self.0[slot.0]
    }
}

impl<T> IndexMut<FrameSlot> for PerFrame<T> {
    fn index_mut(&mut self, slot: FrameSlot) -> &mut T {
        &mut self.0[slot.0]
    }
}

/// The frame index state machine.
///
/// Advances modulo [`IMAGE_COUNT`] after each present and resets to
/// [`FrameSlot::FIRST`] on resize.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameCursor {
    current: FrameSlot,
}

impl FrameCursor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> FrameSlot {
        self.current
    }

    pub fn advance(&mut self) {
        self.current = self.current.next();
    }

    pub fn reset(&mut self) {
        self.current = FrameSlot::FIRST;
    }
}

/// Result of acquiring a swapchain image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// An image is ready. `suboptimal` images are still rendered; the resize
    /// happens after present.
    Acquired { image_index: u32, suboptimal: bool },
    /// The swapchain no longer matches the surface.
    OutOfDate,
}

/// Result of presenting a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentOutcome {
    Presented,
    Suboptimal,
    OutOfDate,
}

impl PresentOutcome {
    /// Whether the swapchain must be recreated.
    pub fn needs_resize(self) -> bool {
        !matches!(self, Self::Presented)
    }
}

/// The device side of frame pacing.
///
/// Implemented by the swapchain presenter; tests substitute a fake.
pub trait PresentationBackend {
    /// Block until the work last submitted from `slot` has completed.
    fn wait_fence(&mut self, slot: FrameSlot) -> Result<()>;

    /// Acquire the next image, signaling the slot's image-available semaphore.
    fn acquire(&mut self, slot: FrameSlot) -> Result<AcquireOutcome>;

    /// Return the slot's fence to the unsignaled state.
    fn reset_fence(&mut self, slot: FrameSlot) -> Result<()>;

    /// Reset the slot's command buffer and begin recording into it.
    fn begin_commands(&mut self, slot: FrameSlot) -> Result<()>;

    /// End recording and submit, waiting on image-available, signaling
    /// render-finished and the slot's fence.
    ///
    /// The fence must end up signaled even when this fails.
    fn submit(&mut self, slot: FrameSlot, image_index: u32) -> Result<()>;

    /// Present `image_index`, waiting on the slot's render-finished semaphore.
    fn present(&mut self, slot: FrameSlot, image_index: u32) -> Result<PresentOutcome>;

    /// Recreate the swapchain for the current surface size.
    fn resize(&mut self) -> Result<()>;
}

/// A frame between [`FramePacer::begin_frame`] and [`FramePacer::end_frame`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub struct ActiveFrame {
    pub slot: FrameSlot,
    pub image_index: u32,
}

/// Drives the per-frame acquire/record/submit/present cycle.
pub struct FramePacer<B> {
    backend: B,
    cursor: FrameCursor,
    resizes: u64,
}

impl<B: PresentationBackend> FramePacer<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            cursor: FrameCursor::new(),
            resizes: 0,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn into_backend(self) -> B {
        self.backend
    }

    /// The slot the next frame will use.
    pub fn current_slot(&self) -> FrameSlot {
        self.cursor.current()
    }

    /// Number of swapchain recreations so far.
    pub fn resize_count(&self) -> u64 {
        self.resizes
    }

    /// Start a frame.
    ///
    /// Waits for the slot's previous submission before touching its fence or
    /// command buffer. Returns `None` when the swapchain was out of date; it
    /// has been recreated and the caller must skip this frame.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub fn begin_frame(&mut self) -> Result<Option<ActiveFrame>> {
        let slot = self.cursor.current();
        self.backend.wait_fence(slot)?;

        let image_index = match self.backend.acquire(slot)? {
            AcquireOutcome::Acquired { image_index, .. } => image_index,
            AcquireOutcome::OutOfDate => {
                tracing::debug!("Swapchain out of date on acquire");
                self.resize()?;
                return Ok(None);
            }
        };

        // Only reset once an image is certain, so a skipped frame leaves the
        // fence signaled for the next wait.
        self.backend.reset_fence(slot)?;
        self.backend.begin_commands(slot)?;

        Ok(Some(ActiveFrame { slot, image_index }))
    }

    /// Submit and present a frame, then advance to the next slot.
    ///
    /// A suboptimal or out-of-date present recreates the swapchain. A failed
    /// submit keeps the slot, which the next frame reuses.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub fn end_frame(&mut self, frame: ActiveFrame) -> Result<PresentOutcome> {
        self.backend.submit(frame.slot, frame.image_index)?;
        let outcome = self.backend.present(frame.slot, frame.image_index)?;
        self.cursor.advance();

        if outcome.needs_resize() {
            tracing::debug!("Swapchain {outcome:?} on present");
            self.resize()?;
        }
        Ok(outcome)
    }

    /// Recreate the swapchain now (e.g. after a window resize event).
    pub fn resize(&mut self) -> Result<()> {
        self.backend.resize()?;
        self.cursor.reset();
        self.resizes += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GpuError;
    use ash::vk;
    use std::collections::VecDeque;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Call {
        Wait(FrameSlot),
        Acquire(FrameSlot),
        ResetFence(FrameSlot),
        Begin(FrameSlot),
        Submit(FrameSlot, u32),
        Present(FrameSlot, u32),
        Resize,
    }

    /// GPU work completes only when its fence is waited on.
    #[derive(Default)]
    struct FakeBackend {
        calls: Vec<Call>,
        pending: PerFrame<bool>,
        fence_signaled: PerFrame<bool>,
        acquire_results: VecDeque<AcquireOutcome>,
        present_results: VecDeque<PresentOutcome>,
        next_image: u32,
        fail_submits: usize,
    }

    impl FakeBackend {
        fn new() -> Self {
            Self {
                fence_signaled: PerFrame::from_fn(|_| true),
                ..Self::default()
            }
        }

        fn resizes(&self) -> usize {
            self.calls.iter().filter(|c| **c == Call::Resize).count()
        }
    }

    impl PresentationBackend for FakeBackend {
        fn wait_fence(&mut self, slot: FrameSlot) -> Result<()> {
            self.calls.push(Call::Wait(slot));
            if !self.fence_signaled[slot] && !self.pending[slot] {
                return Err(GpuError::InvalidState("wait on a fence that never signals".into()));
            }
            self.pending[slot] = false;
            self.fence_signaled[slot] = true;
            Ok(())
        }

        fn acquire(&mut self, slot: FrameSlot) -> Result<AcquireOutcome> {
            self.calls.push(Call::Acquire(slot));
            Ok(self.acquire_results.pop_front().unwrap_or_else(|| {
                let image_index = self.next_image;
                self.next_image = (self.next_image + 1) % IMAGE_COUNT as u32;
                AcquireOutcome::Acquired {
                    image_index,
                    suboptimal: false,
                }
            }))
        }

        fn reset_fence(&mut self, slot: FrameSlot) -> Result<()> {
            assert!(!self.pending[slot], "fence reset while work in flight");
            self.calls.push(Call::ResetFence(slot));
            self.fence_signaled[slot] = false;
            Ok(())
        }

        fn begin_commands(&mut self, slot: FrameSlot) -> Result<()> {
            assert!(!self.pending[slot], "command buffer reset while its fence is unsignaled");
            self.calls.push(Call::Begin(slot));
            Ok(())
        }

        fn submit(&mut self, slot: FrameSlot, image_index: u32) -> Result<()> {
            self.calls.push(Call::Submit(slot, image_index));
            if self.fail_submits > 0 {
                // Nothing was queued but the fence is signaled, as the command ring does
                self.fail_submits -= 1;
                self.fence_signaled[slot] = true;
                return Err(GpuError::Vulkan(vk::Result::ERROR_OUT_OF_HOST_MEMORY));
            }
            self.pending[slot] = true;
            Ok(())
        }

        fn present(&mut self, slot: FrameSlot, image_index: u32) -> Result<PresentOutcome> {
            self.calls.push(Call::Present(slot, image_index));
            Ok(self
                .present_results
                .pop_front()
                .unwrap_or(PresentOutcome::Presented))
        }

        fn resize(&mut self) -> Result<()> {
            self.calls.push(Call::Resize);
            self.next_image = 0;
            Ok(())
        }
    }

    fn run_frame(pacer: &mut FramePacer<FakeBackend>) -> Option<PresentOutcome> {
        let frame = pacer.begin_frame().unwrap()?;
        Some(pacer.end_frame(frame).unwrap())
    }

    #[test]
    fn slots_are_bounded_and_wrap() {
        let mut cursor = FrameCursor::new();
        let mut seen = Vec::new();
        for _ in 0..(IMAGE_COUNT * 2 + 1) {
            seen.push(cursor.current().index());
            cursor.advance();
        }
        assert_eq!(seen, vec![0, 1, 2, 0, 1, 2, 0]);
        cursor.reset();
        assert_eq!(cursor.current(), FrameSlot::FIRST);
        assert!(FrameSlot::all().all(|s| s.index() < IMAGE_COUNT));
    }

    #[test]
    fn per_frame_indexing() {
        let mut ring = PerFrame::from_fn(|slot| slot.index() * 10);
        ring[FrameSlot::FIRST.next()] += 1;
        assert_eq!(ring.iter().copied().collect::<Vec<_>>(), vec![0, 11, 20]);

        let failed: std::result::Result<PerFrame<usize>, &str> =
            PerFrame::try_from_fn(|slot| if slot.index() == 2 { Err("boom") } else { Ok(1) });
        assert_eq!(failed, Err("boom"));
    }

    #[test]
    fn every_call_of_a_frame_uses_the_same_slot() {
        let mut pacer = FramePacer::new(FakeBackend::new());
        for _ in 0..7 {
            assert_eq!(run_frame(&mut pacer), Some(PresentOutcome::Presented));
        }

        let calls = &pacer.backend().calls;
        assert_eq!(calls.len(), 7 * 6);
        for (frame, chunk) in calls.chunks(6).enumerate() {
            let slot = FrameSlot(frame % IMAGE_COUNT);
            let image = (frame % IMAGE_COUNT) as u32;
            assert_eq!(
                chunk,
                &[
                    Call::Wait(slot),
                    Call::Acquire(slot),
                    Call::ResetFence(slot),
                    Call::Begin(slot),
                    Call::Submit(slot, image),
                    Call::Present(slot, image),
                ]
            );
        }
    }

    #[test]
    fn command_buffer_is_never_reset_while_in_flight() {
        let mut pacer = FramePacer::new(FakeBackend::new());
        // The fake asserts on any reset of pending work; more frames than slots
        // forces every slot to be reused.
        for _ in 0..(IMAGE_COUNT * 4) {
            run_frame(&mut pacer);
        }

        let calls = &pacer.backend().calls;
        for (i, call) in calls.iter().enumerate() {
            if let Call::Begin(slot) = call {
                let last_submit = calls[..i]
                    .iter()
                    .rposition(|c| matches!(c, Call::Submit(s, _) if s == slot));
                if let Some(submit) = last_submit {
                    assert!(calls[submit..i].contains(&Call::Wait(*slot)));
                }
            }
        }
    }

    #[test]
    fn out_of_date_acquire_resizes_once_and_skips_the_frame() {
        let mut pacer = FramePacer::new(FakeBackend::new());

        // Move off slot 0 first.
        run_frame(&mut pacer);
        assert_eq!(pacer.current_slot(), FrameSlot(1));
        pacer
            .backend_mut()
            .acquire_results
            .push_back(AcquireOutcome::OutOfDate);

        let skipped = pacer.begin_frame().unwrap();
        assert!(skipped.is_none());
        assert_eq!(pacer.backend().resizes(), 1);
        assert_eq!(pacer.resize_count(), 1);
        assert_eq!(pacer.current_slot(), FrameSlot::FIRST);
        assert!(!pacer
            .backend()
            .calls
            .contains(&Call::ResetFence(FrameSlot(1))));

        // Rendering resumes without another resize.
        assert_eq!(run_frame(&mut pacer), Some(PresentOutcome::Presented));
        assert_eq!(pacer.backend().resizes(), 1);
    }

    #[test]
    fn suboptimal_present_resizes_and_restarts_at_first_slot() {
        let mut pacer = FramePacer::new(FakeBackend::new());
        run_frame(&mut pacer);
        pacer
            .backend_mut()
            .present_results
            .push_back(PresentOutcome::Suboptimal);

        assert_eq!(run_frame(&mut pacer), Some(PresentOutcome::Suboptimal));
        assert_eq!(pacer.backend().resizes(), 1);
        assert_eq!(pacer.current_slot(), FrameSlot::FIRST);
    }

    #[test]
    fn suboptimal_acquire_still_renders() {
        let mut backend = FakeBackend::new();
        backend.acquire_results.push_back(AcquireOutcome::Acquired {
            image_index: 2,
            suboptimal: true,
        });
        let mut pacer = FramePacer::new(backend);

        let frame = pacer.begin_frame().unwrap().unwrap();
        assert_eq!(frame.image_index, 2);
        assert_eq!(pacer.backend().resizes(), 0);
    }

    #[test]
    fn failed_submit_leaves_the_slot_usable() {
        let mut pacer = FramePacer::new(FakeBackend::new());
        pacer.backend_mut().fail_submits = 1;

        let frame = pacer.begin_frame().unwrap().unwrap();
        assert!(pacer.end_frame(frame).is_err());
        assert_eq!(pacer.current_slot(), frame.slot);

        // The fake rejects a wait on a fence that can never signal
        let retry = pacer.begin_frame().unwrap().unwrap();
        assert_eq!(retry.slot, frame.slot);
        assert_eq!(pacer.end_frame(retry).unwrap(), PresentOutcome::Presented);
        assert_eq!(pacer.current_slot(), frame.slot.next());
    }
}
