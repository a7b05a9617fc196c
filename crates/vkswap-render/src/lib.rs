// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
//! Swapchain and presentation core.
//!
//! Everything here talks to the GPU through [`PresentDevice`], so the same
//! negotiation, recreation and frame sequencing logic runs against `ash` in
//! the application and against a tracking mock in tests.

pub mod collab;
pub mod device;
pub mod driver;
pub mod error;
pub mod negotiate;
mod resize;
pub mod swapchain;
pub mod sync;

#[cfg(test)]
pub(crate) mod mock;

pub use collab::{FrameStats, FrameTarget, OverlayListener, SceneRenderer, TargetInfo, ViewListener};
pub use device::{DepthTarget, PresentDevice, Submission};
pub use driver::{FrameOutcome, Presenter};
pub use error::PresentError;
pub use swapchain::{Swapchain, SwapchainConfig, SwapchainImage};
pub use sync::{FrameState, FrameSync, FrameSyncSet};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RenderSize {
    pub width: u32,
    pub height: u32,
}

impl RenderSize {
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

pub trait Renderer {
    fn prepare(&mut self) -> Result<(), PresentError>;
    fn render_frame(&mut self) -> Result<FrameOutcome, PresentError>;
    fn on_resize(&mut self, size: RenderSize) -> Result<(), PresentError>;
    fn set_vsync(&mut self, _on: bool) -> Result<(), PresentError> {
        Ok(())
    }
    fn shutdown(&mut self);
}
