// SPDX-License-Identifier: CEPL-1.0
//! Desktop toplevel window through winit, pumped without blocking once per
//! frame.
use std::ffi::CStr;
use std::time::Duration;

use ash::vk;
use tracing::{debug, info};
use vkswap_core::WindowSettings;
use winit::application::ApplicationHandler;
use winit::dpi::PhysicalSize;
use winit::event::{ElementState, KeyEvent, WindowEvent as WinitEvent};
use winit::event_loop::{ActiveEventLoop, EventLoop};
use winit::keyboard::{Key as LogicalKey, NamedKey};
use winit::monitor::MonitorHandle;
use winit::platform::pump_events::{EventLoopExtPumpEvents, PumpStatus};
use winit::raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use winit::window::{Fullscreen, Window, WindowId};

use crate::{BackendError, BackendFeatures, Key, VkHost, WindowBackend, WindowEvent};

/// Pumps during `init` until the window exists.
const INIT_PUMP_LIMIT: usize = 200;

#[derive(Default)]
struct Handler {
    settings: WindowSettings,
    window: Option<Window>,
    create_error: Option<String>,
    events: Vec<WindowEvent>,
}

impl ApplicationHandler for Handler {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }
        let (w, h) = (self.settings.width, self.settings.height);
        let mut attrs = Window::default_attributes()
            .with_title(self.settings.title.clone())
            .with_inner_size(PhysicalSize::new(w, h));
        if self.settings.fullscreen {
            attrs = attrs.with_fullscreen(Some(fullscreen_target(
                event_loop.available_monitors(),
                w,
                h,
            )));
        }
        match event_loop.create_window(attrs) {
            Ok(window) => self.window = Some(window),
            Err(e) => self.create_error = Some(e.to_string()),
        }
    }

    fn window_event(&mut self, _event_loop: &ActiveEventLoop, _id: WindowId, event: WinitEvent) {
        match event {
            WinitEvent::CloseRequested => self.events.push(WindowEvent::CloseRequested),
            WinitEvent::Resized(size) => self.events.push(WindowEvent::Resized {
                width: size.width,
                height: size.height,
            }),
            WinitEvent::KeyboardInput {
                event:
                    KeyEvent {
                        logical_key,
                        state: ElementState::Pressed,
                        repeat: false,
                        ..
                    },
                ..
            } => self.events.push(WindowEvent::KeyPressed(map_key(&logical_key))),
            _ => {}
        }
    }
}

/// Exclusive fullscreen on the first monitor offering a video mode of
/// exactly `w`x`h`, else borderless on the current monitor.
fn fullscreen_target(monitors: impl Iterator<Item = MonitorHandle>, w: u32, h: u32) -> Fullscreen {
    let wanted = PhysicalSize::new(w, h);
    for monitor in monitors {
        if let Some(mode) = monitor.video_modes().find(|m| m.size() == wanted) {
            info!(
                "exclusive fullscreen on {}: {w}x{h} @ {:.2} Hz",
                monitor.name().unwrap_or_else(|| "unnamed output".to_owned()),
                mode.refresh_rate_millihertz() as f32 / 1000.0
            );
            return Fullscreen::Exclusive(mode);
        }
    }
    debug!("no output mode matches {w}x{h}, using borderless fullscreen");
    Fullscreen::Borderless(None)
}

fn map_key(key: &LogicalKey) -> Key {
    match key {
        LogicalKey::Named(NamedKey::Escape) => Key::Escape,
        LogicalKey::Character(c) => match c.as_str() {
            "q" | "Q" => Key::Q,
            "f" | "F" => Key::F,
            "v" | "V" => Key::V,
            "o" | "O" => Key::O,
            _ => Key::Other,
        },
        _ => Key::Other,
    }
}

pub struct Toplevel {
    // window before event loop: drop order matters
    handler: Handler,
    event_loop: Option<EventLoop<()>>,
    fullscreen: bool,
}

impl Toplevel {
    pub fn new() -> Self {
        Self {
            handler: Handler::default(),
            event_loop: None,
            fullscreen: false,
        }
    }

    fn window(&self) -> Result<&Window, BackendError> {
        self.handler.window.as_ref().ok_or(BackendError::NotInitialized)
    }

    fn pump(&mut self, timeout: Duration) -> Result<(), BackendError> {
        let event_loop = self.event_loop.as_mut().ok_or(BackendError::NotInitialized)?;
        if let PumpStatus::Exit(code) = event_loop.pump_app_events(Some(timeout), &mut self.handler) {
            debug!("winit event loop exited with {code}");
            self.handler.events.push(WindowEvent::CloseRequested);
        }
        Ok(())
    }
}

impl Default for Toplevel {
    fn default() -> Self {
        Self::new()
    }
}

impl WindowBackend for Toplevel {
    fn name(&self) -> &'static str {
        "toplevel"
    }

    fn init(&mut self, settings: &WindowSettings) -> Result<(), BackendError> {
        self.handler.settings = settings.clone();
        self.fullscreen = settings.fullscreen;
        self.event_loop = Some(EventLoop::new()?);

        for _ in 0..INIT_PUMP_LIMIT {
            self.pump(Duration::from_millis(5))?;
            if let Some(e) = self.handler.create_error.take() {
                return Err(BackendError::WindowSystem(e));
            }
            if self.handler.window.is_some() {
                // size events from creation are superseded by the first prepare
                self.handler.events.clear();
                return Ok(());
            }
        }
        Err(BackendError::WindowSystem("window never became ready".into()))
    }

    fn required_extensions(&self) -> Result<Vec<&'static CStr>, BackendError> {
        let display = self.window()?.display_handle()?.as_raw();
        let names = ash_window::enumerate_required_extensions(display)
            .map_err(|e| BackendError::vk("enumerate_required_extensions", e))?;
        // ash_window hands out pointers to 'static extension name constants
        Ok(names
            .iter()
            .map(|&p| unsafe { CStr::from_ptr(p) })
            .collect())
    }

    unsafe fn create_surface(&mut self, host: &VkHost<'_>) -> Result<vk::SurfaceKHR, BackendError> {
        let window = self.window()?;
        let dh = window.display_handle()?.as_raw();
        let wh = window.window_handle()?.as_raw();
        unsafe { ash_window::create_surface(host.entry, host.instance, dh, wh, None) }
            .map_err(|e| BackendError::vk("ash_window::create_surface", e))
    }

    /// winit has no display-level query; the per-surface support check made
    /// during device selection decides.
    fn check_presentation_support(&self, _: &VkHost<'_>, _: vk::PhysicalDevice, _: u32) -> bool {
        true
    }

    fn poll_events(&mut self) -> Result<Vec<WindowEvent>, BackendError> {
        self.pump(Duration::ZERO)?;
        Ok(std::mem::take(&mut self.handler.events))
    }

    fn features(&self) -> BackendFeatures {
        BackendFeatures::FULLSCREEN | BackendFeatures::OUTPUT_ENUMERATION | BackendFeatures::TITLE
    }

    fn update_title(&mut self, title: &str) {
        if let Some(w) = &self.handler.window {
            w.set_title(title);
        }
    }

    fn request_fullscreen(&mut self, on: bool) {
        let Some(window) = &self.handler.window else {
            return;
        };
        let target = on.then(|| {
            let (w, h) = (self.handler.settings.width, self.handler.settings.height);
            fullscreen_target(window.available_monitors(), w, h)
        });
        window.set_fullscreen(target);
        self.fullscreen = on;
    }

    fn is_fullscreen(&self) -> bool {
        self.fullscreen
    }

    fn size(&self) -> (u32, u32) {
        self.handler.window.as_ref().map_or(
            (self.handler.settings.width, self.handler.settings.height),
            |w| {
                let s = w.inner_size();
                (s.width, s.height)
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_map_case_insensitively() {
        assert_eq!(map_key(&LogicalKey::Named(NamedKey::Escape)), Key::Escape);
        assert_eq!(map_key(&LogicalKey::Character("q".into())), Key::Q);
        assert_eq!(map_key(&LogicalKey::Character("F".into())), Key::F);
        assert_eq!(map_key(&LogicalKey::Character("v".into())), Key::V);
        assert_eq!(map_key(&LogicalKey::Character("o".into())), Key::O);
        assert_eq!(map_key(&LogicalKey::Character("x".into())), Key::Other);
        assert_eq!(map_key(&LogicalKey::Named(NamedKey::Enter)), Key::Other);
    }

    #[test]
    fn uninitialised_backend_reports_settings_size() {
        let t = Toplevel::new();
        assert_eq!(t.size(), (1280, 720));
        assert!(matches!(t.required_extensions(), Err(BackendError::NotInitialized)));
    }
}
