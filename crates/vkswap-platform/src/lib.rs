// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
//! Window backends: one variant per host display system, tried in a fixed
//! order at startup.
use std::ffi::CStr;
use std::time::Duration;

use ash::vk;
use bitflags::bitflags;
use tracing::{info, warn};
use vkswap_core::{FormatPolicy, WindowSettings};

mod error;
mod toplevel;
#[cfg(target_os = "linux")]
mod console;
#[cfg(target_os = "linux")]
mod display;
#[cfg(target_os = "linux")]
mod shell;

pub use error::BackendError;
pub use toplevel::Toplevel;
#[cfg(target_os = "linux")]
pub use display::DirectDisplay;
#[cfg(target_os = "linux")]
pub use shell::SimpleShell;

// re-export so the app and the ash device see the same winit/ash versions
pub use ash;
pub use winit;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Key {
    Escape,
    Q,
    F,
    V,
    O,
    Other,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WindowEvent {
    Resized { width: u32, height: u32 },
    CloseRequested,
    KeyPressed(Key),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventMode {
    /// `poll_events` once per loop iteration.
    Polling,
    /// `wait_for_event` with a frame-sized timeout.
    Blocking,
}

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct BackendFeatures: u32 {
        const FULLSCREEN = 1 << 0;
        const OUTPUT_ENUMERATION = 1 << 1;
        const TITLE = 1 << 2;
        const BLOCKING_EVENTS = 1 << 3;
    }
}

/// The Vulkan objects a backend needs to build its surface.
#[derive(Clone, Copy)]
pub struct VkHost<'a> {
    pub entry: &'a ash::Entry,
    pub instance: &'a ash::Instance,
}

pub trait WindowBackend {
    fn name(&self) -> &'static str;

    /// Connects to the display system and opens the window. A failure leaves
    /// the backend unusable; it is dropped and the next variant is tried.
    fn init(&mut self, settings: &WindowSettings) -> Result<(), BackendError>;

    /// Instance extensions needed by `create_surface`.
    fn required_extensions(&self) -> Result<Vec<&'static CStr>, BackendError>;

    /// # Safety
    /// The surface must be destroyed before the backend is dropped, and
    /// `host.instance` must have been created with `required_extensions`.
    unsafe fn create_surface(&mut self, host: &VkHost<'_>) -> Result<vk::SurfaceKHR, BackendError>;

    /// Whether `queue_family` of `physical_device` can present to this
    /// backend's display.
    fn check_presentation_support(
        &self,
        host: &VkHost<'_>,
        physical_device: vk::PhysicalDevice,
        queue_family: u32,
    ) -> bool;

    fn poll_events(&mut self) -> Result<Vec<WindowEvent>, BackendError>;

    fn wait_for_event(&mut self, _timeout: Duration) -> Result<Option<WindowEvent>, BackendError> {
        Err(BackendError::Unsupported("blocking event wait"))
    }

    /// One loop iteration's worth of events, honouring `event_mode`.
    fn next_events(&mut self, frame_budget: Duration) -> Result<Vec<WindowEvent>, BackendError> {
        match self.event_mode() {
            EventMode::Polling => self.poll_events(),
            EventMode::Blocking => Ok(self.wait_for_event(frame_budget)?.into_iter().collect()),
        }
    }

    fn event_mode(&self) -> EventMode {
        EventMode::Polling
    }

    fn features(&self) -> BackendFeatures;

    fn update_title(&mut self, title: &str);

    fn request_fullscreen(&mut self, on: bool);

    fn is_fullscreen(&self) -> bool;

    /// Current drawable size in pixels.
    fn size(&self) -> (u32, u32);

    fn format_policy(&self) -> FormatPolicy {
        FormatPolicy::PreferBgraUnorm
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackendKind {
    Toplevel,
    SimpleShell,
    DirectDisplay,
}

pub type BackendCtor = fn() -> Box<dyn WindowBackend>;

impl BackendKind {
    /// Richer protocol first, direct display last.
    pub const FALLBACK_ORDER: [BackendKind; 3] = [
        BackendKind::Toplevel,
        BackendKind::SimpleShell,
        BackendKind::DirectDisplay,
    ];

    pub fn constructor(self) -> BackendCtor {
        match self {
            BackendKind::Toplevel => make_toplevel,
            #[cfg(target_os = "linux")]
            BackendKind::SimpleShell => make_simple_shell,
            #[cfg(target_os = "linux")]
            BackendKind::DirectDisplay => make_direct_display,
            #[cfg(not(target_os = "linux"))]
            _ => make_toplevel,
        }
    }

    /// The constructor list for `only`, or the whole fallback order.
    pub fn chain(only: Option<BackendKind>) -> Vec<BackendCtor> {
        match only {
            Some(kind) => vec![kind.constructor()],
            None => Self::FALLBACK_ORDER
                .iter()
                .filter(|k| cfg!(target_os = "linux") || **k == BackendKind::Toplevel)
                .map(|k| k.constructor())
                .collect(),
        }
    }
}

fn make_toplevel() -> Box<dyn WindowBackend> {
    Box::new(Toplevel::new())
}

#[cfg(target_os = "linux")]
fn make_simple_shell() -> Box<dyn WindowBackend> {
    Box::new(SimpleShell::new())
}

#[cfg(target_os = "linux")]
fn make_direct_display() -> Box<dyn WindowBackend> {
    Box::new(DirectDisplay::new())
}

/// Constructs and initialises each variant in order until one succeeds.
/// Each variant gets exactly one attempt; failed ones are dropped before the
/// next is built.
pub fn select_backend(
    chain: &[BackendCtor],
    settings: &WindowSettings,
) -> Result<Box<dyn WindowBackend>, BackendError> {
    let mut failures = Vec::new();
    let chosen = chain.iter().find_map(|make| {
        let mut backend = make();
        match backend.init(settings) {
            Ok(()) => Some(backend),
            Err(e) => {
                warn!("window backend {} failed: {e}", backend.name());
                failures.push((backend.name(), e.to_string()));
                None
            }
        }
    });

    match chosen {
        Some(backend) => {
            let (w, h) = backend.size();
            info!(
                "window backend = {} ({w}x{h}, {:?}, {:?})",
                backend.name(),
                backend.event_mode(),
                backend.features()
            );
            Ok(backend)
        }
        None => Err(BackendError::AllFailed(failures)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static RICH_ATTEMPTS: AtomicUsize = AtomicUsize::new(0);
    static SIMPLE_ATTEMPTS: AtomicUsize = AtomicUsize::new(0);
    static DIRECT_ATTEMPTS: AtomicUsize = AtomicUsize::new(0);

    struct Fake {
        name: &'static str,
        ok: bool,
        attempts: &'static AtomicUsize,
    }

    impl WindowBackend for Fake {
        fn name(&self) -> &'static str {
            self.name
        }
        fn init(&mut self, _: &WindowSettings) -> Result<(), BackendError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            if self.ok {
                Ok(())
            } else {
                Err(BackendError::Unavailable(format!("{} display", self.name)))
            }
        }
        fn required_extensions(&self) -> Result<Vec<&'static CStr>, BackendError> {
            Ok(Vec::new())
        }
        unsafe fn create_surface(&mut self, _: &VkHost<'_>) -> Result<vk::SurfaceKHR, BackendError> {
            Err(BackendError::NotInitialized)
        }
        fn check_presentation_support(&self, _: &VkHost<'_>, _: vk::PhysicalDevice, _: u32) -> bool {
            false
        }
        fn poll_events(&mut self) -> Result<Vec<WindowEvent>, BackendError> {
            Ok(vec![WindowEvent::CloseRequested])
        }
        fn features(&self) -> BackendFeatures {
            BackendFeatures::empty()
        }
        fn update_title(&mut self, _: &str) {}
        fn request_fullscreen(&mut self, _: bool) {}
        fn is_fullscreen(&self) -> bool {
            false
        }
        fn size(&self) -> (u32, u32) {
            (1, 1)
        }
    }

    fn reset() {
        RICH_ATTEMPTS.store(0, Ordering::SeqCst);
        SIMPLE_ATTEMPTS.store(0, Ordering::SeqCst);
        DIRECT_ATTEMPTS.store(0, Ordering::SeqCst);
    }

    fn rich_fails() -> Box<dyn WindowBackend> {
        Box::new(Fake {
            name: "rich",
            ok: false,
            attempts: &RICH_ATTEMPTS,
        })
    }
    fn simple_works() -> Box<dyn WindowBackend> {
        Box::new(Fake {
            name: "simple",
            ok: true,
            attempts: &SIMPLE_ATTEMPTS,
        })
    }
    fn simple_fails() -> Box<dyn WindowBackend> {
        Box::new(Fake {
            name: "simple",
            ok: false,
            attempts: &SIMPLE_ATTEMPTS,
        })
    }
    fn direct_works() -> Box<dyn WindowBackend> {
        Box::new(Fake {
            name: "direct",
            ok: true,
            attempts: &DIRECT_ATTEMPTS,
        })
    }
    fn direct_fails() -> Box<dyn WindowBackend> {
        Box::new(Fake {
            name: "direct",
            ok: false,
            attempts: &DIRECT_ATTEMPTS,
        })
    }

    // One test touches the counters so parallel test threads cannot race.
    #[test]
    fn fallback_chain() {
        let settings = WindowSettings::default();

        reset();
        let chosen = select_backend(&[rich_fails, simple_works, direct_works], &settings).unwrap();
        assert_eq!(chosen.name(), "simple");
        assert_eq!(RICH_ATTEMPTS.load(Ordering::SeqCst), 1);
        assert_eq!(SIMPLE_ATTEMPTS.load(Ordering::SeqCst), 1);
        assert_eq!(DIRECT_ATTEMPTS.load(Ordering::SeqCst), 0);

        reset();
        let err = match select_backend(&[rich_fails, simple_fails, direct_fails], &settings) {
            Err(e) => e,
            Ok(_) => panic!("every variant failed"),
        };
        assert_eq!(RICH_ATTEMPTS.load(Ordering::SeqCst), 1);
        assert_eq!(SIMPLE_ATTEMPTS.load(Ordering::SeqCst), 1);
        assert_eq!(DIRECT_ATTEMPTS.load(Ordering::SeqCst), 1);
        match err {
            BackendError::AllFailed(f) => {
                let names: Vec<_> = f.iter().map(|(n, _)| *n).collect();
                assert_eq!(names, ["rich", "simple", "direct"]);
            }
            other => panic!("unexpected {other}"),
        }
    }

    #[test]
    fn empty_chain_fails() {
        assert!(matches!(
            select_backend(&[], &WindowSettings::default()),
            Err(BackendError::AllFailed(f)) if f.is_empty()
        ));
    }

    #[test]
    fn single_kind_chain() {
        assert_eq!(BackendKind::chain(Some(BackendKind::Toplevel)).len(), 1);
        #[cfg(target_os = "linux")]
        assert_eq!(BackendKind::chain(None).len(), 3);
    }

    #[test]
    fn polling_backends_reject_blocking_waits() {
        let mut fake = Fake {
            name: "poll",
            ok: true,
            attempts: &RICH_ATTEMPTS,
        };
        assert!(matches!(
            fake.wait_for_event(Duration::from_millis(1)),
            Err(BackendError::Unsupported(_))
        ));
        assert_eq!(
            fake.next_events(Duration::ZERO).unwrap(),
            vec![WindowEvent::CloseRequested]
        );
    }
}
