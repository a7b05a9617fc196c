// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
//! `ash` implementation of the present core plus the demo scene and the
//! frame-rate bar drawn on top of it.
use ash::vk;
use vkswap_render::PresentError;

mod device;
mod instance;
mod overlay;
mod scene;

pub use device::{AshDevice, DeviceOptions};
pub use overlay::FrameBarOverlay;
pub use scene::TriangleScene;

/// `map_err` adapter naming the failed Vulkan call.
pub(crate) fn failed(call: &'static str) -> impl FnOnce(vk::Result) -> PresentError {
    move |status| PresentError::vk(call, status)
}
