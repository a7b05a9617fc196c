// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BackendError {
    /// A protocol global, device node or display the variant needs is missing.
    #[error("{0} unavailable")]
    Unavailable(String),

    #[error("{call} failed with {status:?} ({})", .status.as_raw())]
    Vk {
        call: &'static str,
        status: vk::Result,
    },

    #[error("window system: {0}")]
    WindowSystem(String),

    #[error("{0} not supported by this backend")]
    Unsupported(&'static str),

    #[error("backend used before init")]
    NotInitialized,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Handle(#[from] raw_window_handle::HandleError),

    #[error("no window backend could be initialised ({})", summarize(.0))]
    AllFailed(Vec<(&'static str, String)>),
}

fn summarize(failures: &[(&'static str, String)]) -> String {
    failures
        .iter()
        .map(|(name, why)| format!("{name}: {why}"))
        .collect::<Vec<_>>()
        .join("; ")
}

impl BackendError {
    pub fn vk(call: &'static str, status: vk::Result) -> Self {
        BackendError::Vk { call, status }
    }
}

impl From<winit::error::EventLoopError> for BackendError {
    fn from(e: winit::error::EventLoopError) -> Self {
        BackendError::WindowSystem(e.to_string())
    }
}

impl From<winit::error::OsError> for BackendError {
    fn from(e: winit::error::OsError) -> Self {
        BackendError::WindowSystem(e.to_string())
    }
}
