// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use thiserror::Error;

use crate::sync::FrameState;

/// Errors leaving the present core. Every variant is unrecoverable: stale
/// swapchains are handled internally and never surface here.
#[derive(Debug, Error)]
pub enum PresentError {
    #[error("{call} failed with {status:?} ({})", .status.as_raw())]
    Vk {
        call: &'static str,
        status: vk::Result,
    },

    #[error("surface exposes no formats")]
    NoSurfaceFormats,

    #[error("surface exposes no present modes")]
    NoPresentModes,

    #[error("no acceptable SRGB surface format among {0:?}")]
    NoAcceptableFormat(Vec<vk::Format>),

    #[error("frame state cannot go from {from:?} to {to:?}")]
    InvalidTransition { from: FrameState, to: FrameState },

    #[error(transparent)]
    Collaborator(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl PresentError {
    pub fn vk(call: &'static str, status: vk::Result) -> Self {
        PresentError::Vk { call, status }
    }

    /// Numeric status for `Vk` errors.
    pub fn status(&self) -> Option<vk::Result> {
        match self {
            PresentError::Vk { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_device_lost(&self) -> bool {
        matches!(
            self.status(),
            Some(vk::Result::ERROR_DEVICE_LOST) | Some(vk::Result::ERROR_SURFACE_LOST_KHR)
        )
    }
}

/// Shorthand for `map_err(PresentError::vk(call, ..))`.
pub(crate) trait CallContext<T> {
    fn call(self, name: &'static str) -> Result<T, PresentError>;
}

impl<T> CallContext<T> for Result<T, vk::Result> {
    fn call(self, name: &'static str) -> Result<T, PresentError> {
        self.map_err(|status| PresentError::vk(name, status))
    }
}
