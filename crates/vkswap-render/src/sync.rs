// SPDX-License-Identifier: CEPL-1.0
//! Frame synchronization: the long-lived semaphores/fence and the
//! acquire → record → submit → present state machine.
//!
//! One frame is in flight at most. Every frame ends with a queue-idle wait,
//! so the next acquire can reuse the same semaphores.
use ash::vk;
use tracing::{debug, warn};

use crate::device::{PresentDevice, Submission};
use crate::error::{CallContext, PresentError};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameState {
    Idle,
    Acquiring,
    Acquired,
    Recording,
    Submitted,
    Presenting,
}

/// Created once when the presenter is first prepared, destroyed at shutdown.
/// Resizes never touch these.
#[derive(Clone, Copy, Debug)]
pub struct FrameSyncSet {
    pub acquire: vk::Semaphore,
    pub render_complete: vk::Semaphore,
    pub overlay_complete: Option<vk::Semaphore>,
    pub in_flight: vk::Fence,
}

impl FrameSyncSet {
    pub fn create<D: PresentDevice>(
        device: &mut D,
        with_overlay: bool,
    ) -> Result<Self, PresentError> {
        let acquire = device.create_semaphore().call("vkCreateSemaphore")?;
        let render_complete = device.create_semaphore().call("vkCreateSemaphore")?;
        let overlay_complete = if with_overlay {
            Some(device.create_semaphore().call("vkCreateSemaphore")?)
        } else {
            None
        };
        let in_flight = device.create_fence(true).call("vkCreateFence")?;
        Ok(Self {
            acquire,
            render_complete,
            overlay_complete,
            in_flight,
        })
    }

    pub fn destroy<D: PresentDevice>(self, device: &mut D) {
        device.destroy_fence(self.in_flight);
        if let Some(s) = self.overlay_complete {
            device.destroy_semaphore(s);
        }
        device.destroy_semaphore(self.render_complete);
        device.destroy_semaphore(self.acquire);
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AcquireOutcome {
    Ready(u32),
    /// Out of date or suboptimal. The controller is back in `Idle` and the
    /// acquire semaphore is unsignaled.
    Stale,
    /// Timed out or not ready; nothing was signaled.
    TimedOut,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PresentOutcome {
    Presented,
    Stale,
    /// Timed out or not ready; the image never reached the screen.
    Dropped,
}

pub struct FrameSync {
    set: FrameSyncSet,
    state: FrameState,
    image_index: Option<u32>,
    overlay_submitted: bool,
}

impl FrameSync {
    pub fn new(set: FrameSyncSet) -> Self {
        Self {
            set,
            state: FrameState::Idle,
            image_index: None,
            overlay_submitted: false,
        }
    }

    pub fn state(&self) -> FrameState {
        self.state
    }

    pub fn set(&self) -> &FrameSyncSet {
        &self.set
    }

    pub fn image_index(&self) -> Option<u32> {
        self.image_index
    }

    fn advance(&mut self, from: FrameState, to: FrameState) -> Result<(), PresentError> {
        if self.state != from {
            return Err(PresentError::InvalidTransition {
                from: self.state,
                to,
            });
        }
        self.state = to;
        Ok(())
    }

    /// `Idle → Acquiring → Acquired`, or back to `Idle` on a stale chain or
    /// timeout.
    pub fn acquire<D: PresentDevice>(
        &mut self,
        device: &mut D,
        swapchain: vk::SwapchainKHR,
        timeout_ns: u64,
    ) -> Result<AcquireOutcome, PresentError> {
        self.advance(FrameState::Idle, FrameState::Acquiring)?;

        match device.acquire_next_image(swapchain, timeout_ns, self.set.acquire) {
            Ok((index, false)) => {
                self.image_index = Some(index);
                self.state = FrameState::Acquired;
                Ok(AcquireOutcome::Ready(index))
            }
            Ok((index, true)) => {
                // Suboptimal still signals the semaphore; consume it so the
                // next acquire starts from an unsignaled state.
                debug!("acquire: image {index} suboptimal, draining acquire semaphore");
                self.drain_acquire(device)?;
                self.state = FrameState::Idle;
                Ok(AcquireOutcome::Stale)
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                debug!("acquire: swapchain out of date");
                self.state = FrameState::Idle;
                Ok(AcquireOutcome::Stale)
            }
            Err(vk::Result::TIMEOUT) | Err(vk::Result::NOT_READY) => {
                self.state = FrameState::Idle;
                Ok(AcquireOutcome::TimedOut)
            }
            Err(e) => Err(PresentError::vk("vkAcquireNextImageKHR", e)),
        }
    }

    fn drain_acquire<D: PresentDevice>(&mut self, device: &mut D) -> Result<(), PresentError> {
        let drain = Submission {
            cmd: None,
            wait: self.set.acquire,
            wait_stage: vk::PipelineStageFlags::TOP_OF_PIPE,
            signal: None,
            fence: vk::Fence::null(),
        };
        device.submit(&drain).call("vkQueueSubmit")?;
        device.queue_wait_idle().call("vkQueueWaitIdle")
    }

    /// `Acquired → Recording`. Waits for the previous use of the in-flight
    /// fence before the command buffer is rewritten.
    pub fn begin_recording<D: PresentDevice>(&mut self, device: &mut D) -> Result<(), PresentError> {
        self.advance(FrameState::Acquired, FrameState::Recording)?;
        device
            .wait_and_reset_fence(self.set.in_flight)
            .call("vkWaitForFences")
    }

    /// `Recording → Submitted`. The frame's work waits on the acquire
    /// semaphore at color-attachment output and signals render-complete.
    /// With an overlay command buffer, a second submit chains
    /// render-complete into overlay-complete.
    pub fn submit<D: PresentDevice>(
        &mut self,
        device: &mut D,
        cmd: vk::CommandBuffer,
        overlay_cmd: Option<vk::CommandBuffer>,
    ) -> Result<(), PresentError> {
        self.advance(FrameState::Recording, FrameState::Submitted)?;

        let main = Submission {
            cmd: Some(cmd),
            wait: self.set.acquire,
            wait_stage: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            signal: Some(self.set.render_complete),
            fence: self.set.in_flight,
        };
        device.submit(&main).call("vkQueueSubmit")?;

        if let (Some(overlay), Some(done)) = (overlay_cmd, self.set.overlay_complete) {
            let chained = Submission {
                cmd: Some(overlay),
                wait: self.set.render_complete,
                wait_stage: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
                signal: Some(done),
                fence: vk::Fence::null(),
            };
            device.submit(&chained).call("vkQueueSubmit")?;
            self.overlay_submitted = true;
        }
        Ok(())
    }

    /// `Submitted → Presenting`.
    pub fn present<D: PresentDevice>(
        &mut self,
        device: &mut D,
        swapchain: vk::SwapchainKHR,
    ) -> Result<PresentOutcome, PresentError> {
        self.advance(FrameState::Submitted, FrameState::Presenting)?;

        let index = self.image_index.unwrap_or_default();
        let wait = match (self.overlay_submitted, self.set.overlay_complete) {
            (true, Some(done)) => done,
            _ => self.set.render_complete,
        };

        match device.present(swapchain, index, wait) {
            Ok(false) => Ok(PresentOutcome::Presented),
            Ok(true) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                debug!("present: swapchain stale");
                Ok(PresentOutcome::Stale)
            }
            Err(vk::Result::TIMEOUT) | Err(vk::Result::NOT_READY) => {
                warn!("present timed out, frame dropped");
                Ok(PresentOutcome::Dropped)
            }
            Err(e) => Err(PresentError::vk("vkQueuePresentKHR", e)),
        }
    }

    /// `Presenting → Idle` after the queue drains.
    pub fn finish<D: PresentDevice>(&mut self, device: &mut D) -> Result<(), PresentError> {
        self.advance(FrameState::Presenting, FrameState::Idle)?;
        self.image_index = None;
        self.overlay_submitted = false;
        device.queue_wait_idle().call("vkQueueWaitIdle")
    }

    pub fn into_set(self) -> FrameSyncSet {
        self.set
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockDevice;

    fn setup(with_overlay: bool) -> (MockDevice, FrameSync, vk::SwapchainKHR) {
        let mut dev = MockDevice::new(800, 600);
        let set = FrameSyncSet::create(&mut dev, with_overlay).unwrap();
        let sc = dev.fake_swapchain(3);
        (dev, FrameSync::new(set), sc)
    }

    fn cmd(dev: &mut MockDevice) -> vk::CommandBuffer {
        dev.allocate_command_buffers(1).unwrap()[0]
    }

    #[test]
    fn full_cycle_returns_to_idle() {
        let (mut dev, mut sync, sc) = setup(false);
        let cb = cmd(&mut dev);

        assert_eq!(sync.acquire(&mut dev, sc, u64::MAX).unwrap(), AcquireOutcome::Ready(0));
        assert_eq!(sync.state(), FrameState::Acquired);
        sync.begin_recording(&mut dev).unwrap();
        assert_eq!(sync.state(), FrameState::Recording);
        sync.submit(&mut dev, cb, None).unwrap();
        assert_eq!(sync.state(), FrameState::Submitted);
        assert_eq!(sync.present(&mut dev, sc).unwrap(), PresentOutcome::Presented);
        assert_eq!(sync.state(), FrameState::Presenting);
        sync.finish(&mut dev).unwrap();
        assert_eq!(sync.state(), FrameState::Idle);

        let set = *sync.set();
        let submit = dev.submissions[0];
        assert_eq!(submit.wait, set.acquire);
        assert_eq!(submit.wait_stage, vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT);
        assert_eq!(submit.signal, Some(set.render_complete));
        assert_eq!(submit.fence, set.in_flight);
        assert_eq!(dev.presents[0].2, set.render_complete);
    }

    #[test]
    fn out_of_order_calls_are_rejected() {
        let (mut dev, mut sync, sc) = setup(false);
        let cb = cmd(&mut dev);

        assert!(matches!(
            sync.submit(&mut dev, cb, None),
            Err(PresentError::InvalidTransition {
                from: FrameState::Idle,
                to: FrameState::Submitted
            })
        ));
        sync.acquire(&mut dev, sc, u64::MAX).unwrap();
        assert!(matches!(
            sync.acquire(&mut dev, sc, u64::MAX),
            Err(PresentError::InvalidTransition {
                from: FrameState::Acquired,
                ..
            })
        ));
    }

    #[test]
    fn out_of_date_acquire_goes_back_to_idle() {
        let (mut dev, mut sync, sc) = setup(false);
        dev.acquire_script.push_back(Err(vk::Result::ERROR_OUT_OF_DATE_KHR));

        assert_eq!(sync.acquire(&mut dev, sc, u64::MAX).unwrap(), AcquireOutcome::Stale);
        assert_eq!(sync.state(), FrameState::Idle);
        assert!(dev.submissions.is_empty());
    }

    #[test]
    fn suboptimal_acquire_drains_the_semaphore() {
        let (mut dev, mut sync, sc) = setup(false);
        dev.acquire_script.push_back(Ok((1, true)));

        assert_eq!(sync.acquire(&mut dev, sc, u64::MAX).unwrap(), AcquireOutcome::Stale);
        assert_eq!(sync.state(), FrameState::Idle);

        let drain = dev.submissions[0];
        assert_eq!(drain.cmd, None);
        assert_eq!(drain.wait, sync.set().acquire);
        assert!(!dev.is_signaled(sync.set().acquire));

        // Reusing the semaphore is legal again.
        assert_eq!(sync.acquire(&mut dev, sc, u64::MAX).unwrap(), AcquireOutcome::Ready(0));
        assert!(dev.violations().is_empty());
    }

    #[test]
    fn timeout_is_not_an_error() {
        let (mut dev, mut sync, sc) = setup(false);
        dev.acquire_script.push_back(Err(vk::Result::TIMEOUT));
        assert_eq!(sync.acquire(&mut dev, sc, 1_000).unwrap(), AcquireOutcome::TimedOut);
        assert_eq!(sync.state(), FrameState::Idle);
    }

    #[test]
    fn unexpected_acquire_status_is_fatal() {
        let (mut dev, mut sync, sc) = setup(false);
        dev.acquire_script.push_back(Err(vk::Result::ERROR_DEVICE_LOST));
        let err = sync.acquire(&mut dev, sc, u64::MAX).unwrap_err();
        assert!(err.is_device_lost());
    }

    #[test]
    fn overlay_chains_render_complete_into_overlay_complete() {
        let (mut dev, mut sync, sc) = setup(true);
        let cb = cmd(&mut dev);
        let overlay_cb = cmd(&mut dev);

        sync.acquire(&mut dev, sc, u64::MAX).unwrap();
        sync.begin_recording(&mut dev).unwrap();
        sync.submit(&mut dev, cb, Some(overlay_cb)).unwrap();
        sync.present(&mut dev, sc).unwrap();
        sync.finish(&mut dev).unwrap();

        let set = *sync.set();
        let overlay_done = set.overlay_complete.unwrap();
        assert_eq!(dev.submissions.len(), 2);
        assert_eq!(dev.submissions[1].cmd, Some(overlay_cb));
        assert_eq!(dev.submissions[1].wait, set.render_complete);
        assert_eq!(dev.submissions[1].signal, Some(overlay_done));
        assert_eq!(dev.presents[0], (sc, 0, overlay_done));
    }

    #[test]
    fn stale_present_is_reported_not_fatal() {
        let (mut dev, mut sync, sc) = setup(false);
        let cb = cmd(&mut dev);
        dev.present_script.push_back(Err(vk::Result::ERROR_OUT_OF_DATE_KHR));

        sync.acquire(&mut dev, sc, u64::MAX).unwrap();
        sync.begin_recording(&mut dev).unwrap();
        sync.submit(&mut dev, cb, None).unwrap();
        assert_eq!(sync.present(&mut dev, sc).unwrap(), PresentOutcome::Stale);
        sync.finish(&mut dev).unwrap();
        assert_eq!(sync.state(), FrameState::Idle);
    }

    #[test]
    fn timed_out_present_is_dropped() {
        let (mut dev, mut sync, sc) = setup(false);
        let cb = cmd(&mut dev);
        dev.present_script.push_back(Err(vk::Result::NOT_READY));

        sync.acquire(&mut dev, sc, u64::MAX).unwrap();
        sync.begin_recording(&mut dev).unwrap();
        sync.submit(&mut dev, cb, None).unwrap();
        assert_eq!(sync.present(&mut dev, sc).unwrap(), PresentOutcome::Dropped);
        sync.finish(&mut dev).unwrap();
        assert_eq!(sync.state(), FrameState::Idle);
    }

    #[test]
    fn sync_set_is_destroyed_exactly_once() {
        let (mut dev, sync, _sc) = setup(true);
        assert_eq!(dev.tracker.live("semaphore"), 3);
        sync.into_set().destroy(&mut dev);
        assert_eq!(dev.tracker.live("semaphore"), 0);
        assert_eq!(dev.tracker.live("fence"), 0);
        assert!(dev.violations().is_empty());
    }
}
