// SPDX-License-Identifier: CEPL-1.0
//! Bare `wl_shell` client: one surface, made fullscreen or toplevel, with an
//! optional keyboard. Protocol events land in `Dispatch` impls on
//! [`ShellState`].
use std::ffi::{c_void, CStr};
use std::io::ErrorKind;
use std::ptr::NonNull;

use ash::vk;
use raw_window_handle::{
    RawDisplayHandle, RawWindowHandle, WaylandDisplayHandle, WaylandWindowHandle,
};
use tracing::{debug, info};
use vkswap_core::WindowSettings;
use wayland_client::backend::WaylandError;
use wayland_client::protocol::{
    wl_compositor, wl_keyboard, wl_output, wl_registry, wl_seat, wl_shell, wl_shell_surface,
    wl_surface,
};
use wayland_client::{delegate_noop, Connection, Dispatch, EventQueue, Proxy, QueueHandle, WEnum};

use crate::{BackendError, BackendFeatures, Key, VkHost, WindowBackend, WindowEvent};

struct Output {
    output: wl_output::WlOutput,
    /// Current mode: width, height, refresh in mHz.
    mode: Option<(u32, u32, i32)>,
}

#[derive(Default)]
struct ShellState {
    compositor: Option<wl_compositor::WlCompositor>,
    shell: Option<wl_shell::WlShell>,
    seat: Option<wl_seat::WlSeat>,
    keyboard: Option<wl_keyboard::WlKeyboard>,
    outputs: Vec<Output>,
    size: (u32, u32),
    events: Vec<WindowEvent>,
}

impl Dispatch<wl_registry::WlRegistry, ()> for ShellState {
    fn event(
        state: &mut Self,
        registry: &wl_registry::WlRegistry,
        event: wl_registry::Event,
        _: &(),
        _: &Connection,
        qh: &QueueHandle<Self>,
    ) {
        let wl_registry::Event::Global {
            name,
            interface,
            version,
        } = event
        else {
            return;
        };
        match interface.as_str() {
            "wl_compositor" => {
                state.compositor = Some(registry.bind(name, version.min(4), qh, ()));
            }
            "wl_shell" => state.shell = Some(registry.bind(name, 1, qh, ())),
            "wl_seat" if state.seat.is_none() => {
                state.seat = Some(registry.bind(name, version.min(5), qh, ()));
            }
            "wl_output" => {
                let index = state.outputs.len();
                let output = registry.bind(name, version.min(2), qh, index);
                state.outputs.push(Output { output, mode: None });
            }
            _ => {}
        }
    }
}

impl Dispatch<wl_output::WlOutput, usize> for ShellState {
    fn event(
        state: &mut Self,
        _: &wl_output::WlOutput,
        event: wl_output::Event,
        index: &usize,
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
        if let wl_output::Event::Mode {
            flags: WEnum::Value(flags),
            width,
            height,
            refresh,
        } = event
        {
            if flags.contains(wl_output::Mode::Current) {
                if let Some(out) = state.outputs.get_mut(*index) {
                    out.mode = Some((width.max(0) as u32, height.max(0) as u32, refresh));
                }
            }
        }
    }
}

impl Dispatch<wl_seat::WlSeat, ()> for ShellState {
    fn event(
        state: &mut Self,
        seat: &wl_seat::WlSeat,
        event: wl_seat::Event,
        _: &(),
        _: &Connection,
        qh: &QueueHandle<Self>,
    ) {
        if let wl_seat::Event::Capabilities {
            capabilities: WEnum::Value(caps),
        } = event
        {
            if caps.contains(wl_seat::Capability::Keyboard) && state.keyboard.is_none() {
                state.keyboard = Some(seat.get_keyboard(qh, ()));
            }
        }
    }
}

impl Dispatch<wl_keyboard::WlKeyboard, ()> for ShellState {
    fn event(
        state: &mut Self,
        _: &wl_keyboard::WlKeyboard,
        event: wl_keyboard::Event,
        _: &(),
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
        if let wl_keyboard::Event::Key {
            key,
            state: WEnum::Value(wl_keyboard::KeyState::Pressed),
            ..
        } = event
        {
            state.events.push(WindowEvent::KeyPressed(key_from_evdev(key)));
        }
    }
}

impl Dispatch<wl_shell_surface::WlShellSurface, ()> for ShellState {
    fn event(
        state: &mut Self,
        shell_surface: &wl_shell_surface::WlShellSurface,
        event: wl_shell_surface::Event,
        _: &(),
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
        match event {
            wl_shell_surface::Event::Ping { serial } => shell_surface.pong(serial),
            wl_shell_surface::Event::Configure { width, height, .. } => {
                if width > 0 && height > 0 {
                    let size = (width as u32, height as u32);
                    if size != state.size {
                        state.size = size;
                        state.events.push(WindowEvent::Resized {
                            width: size.0,
                            height: size.1,
                        });
                    }
                }
            }
            _ => {}
        }
    }
}

delegate_noop!(ShellState: wl_compositor::WlCompositor);
delegate_noop!(ShellState: wl_shell::WlShell);
delegate_noop!(ShellState: ignore wl_surface::WlSurface);

/// Linux evdev key codes.
fn key_from_evdev(code: u32) -> Key {
    match code {
        1 => Key::Escape,
        16 => Key::Q,
        33 => Key::F,
        47 => Key::V,
        24 => Key::O,
        _ => Key::Other,
    }
}

struct Session {
    conn: Connection,
    queue: EventQueue<ShellState>,
    surface: wl_surface::WlSurface,
    shell_surface: wl_shell_surface::WlShellSurface,
}

pub struct SimpleShell {
    session: Option<Session>,
    state: ShellState,
    requested: (u32, u32),
    fullscreen: bool,
}

fn dispatch_error(e: impl std::fmt::Display) -> BackendError {
    BackendError::WindowSystem(format!("wayland dispatch: {e}"))
}

impl SimpleShell {
    pub fn new() -> Self {
        Self {
            session: None,
            state: ShellState::default(),
            requested: (0, 0),
            fullscreen: false,
        }
    }

    fn session(&self) -> Result<&Session, BackendError> {
        self.session.as_ref().ok_or(BackendError::NotInitialized)
    }

    fn display_ptr(&self) -> Result<NonNull<c_void>, BackendError> {
        let ptr = self.session()?.conn.backend().display_ptr();
        NonNull::new(ptr.cast::<c_void>()).ok_or(BackendError::NotInitialized)
    }

    /// The output whose current mode matches the requested size, for
    /// driver-level mode switching.
    fn matching_output(&self) -> Option<&wl_output::WlOutput> {
        let (w, h) = self.requested;
        self.state.outputs.iter().find_map(|o| match o.mode {
            Some((mw, mh, refresh)) if mw == w && mh == h => {
                info!(
                    "fullscreen on output {}: {w}x{h} @ {:.2} Hz",
                    o.output.id(),
                    refresh as f32 / 1000.0
                );
                Some(&o.output)
            }
            _ => None,
        })
    }

    fn apply_fullscreen(&self, on: bool) {
        let Some(session) = &self.session else {
            return;
        };
        if on {
            let output = self.matching_output();
            let method = if output.is_some() {
                wl_shell_surface::FullscreenMethod::Driver
            } else {
                wl_shell_surface::FullscreenMethod::Default
            };
            session.shell_surface.set_fullscreen(method, 0, output);
        } else {
            session.shell_surface.set_toplevel();
        }
        session.surface.commit();
    }
}

impl Default for SimpleShell {
    fn default() -> Self {
        Self::new()
    }
}

impl WindowBackend for SimpleShell {
    fn name(&self) -> &'static str {
        "simple-shell"
    }

    fn init(&mut self, settings: &WindowSettings) -> Result<(), BackendError> {
        let conn = Connection::connect_to_env()
            .map_err(|e| BackendError::Unavailable(format!("wayland display ({e})")))?;
        let mut queue = conn.new_event_queue();
        let qh = queue.handle();
        let _registry = conn.display().get_registry(&qh, ());

        // globals, then seat capabilities and output modes
        queue.roundtrip(&mut self.state).map_err(dispatch_error)?;
        queue.roundtrip(&mut self.state).map_err(dispatch_error)?;

        let compositor = self
            .state
            .compositor
            .clone()
            .ok_or_else(|| BackendError::Unavailable("wl_compositor global".into()))?;
        let shell = self
            .state
            .shell
            .clone()
            .ok_or_else(|| BackendError::Unavailable("wl_shell global".into()))?;
        if self.state.keyboard.is_none() {
            debug!("no keyboard on the seat; quit with the window system");
        }

        let surface = compositor.create_surface(&qh, ());
        let shell_surface = shell.get_shell_surface(&surface, &qh, ());
        shell_surface.set_title(settings.title.clone());

        self.requested = (settings.width, settings.height);
        self.state.size = self.requested;
        self.fullscreen = settings.fullscreen;
        self.session = Some(Session {
            conn,
            queue,
            surface,
            shell_surface,
        });
        self.apply_fullscreen(settings.fullscreen);

        let Some(session) = self.session.as_mut() else {
            return Err(BackendError::NotInitialized);
        };
        session
            .queue
            .roundtrip(&mut self.state)
            .map_err(dispatch_error)?;
        self.state.events.clear();
        Ok(())
    }

    fn required_extensions(&self) -> Result<Vec<&'static CStr>, BackendError> {
        Ok(vec![ash::khr::surface::NAME, ash::khr::wayland_surface::NAME])
    }

    unsafe fn create_surface(&mut self, host: &VkHost<'_>) -> Result<vk::SurfaceKHR, BackendError> {
        let display = self.display_ptr()?;
        let surface_ptr = self.session()?.surface.id().as_ptr();
        let surface = NonNull::new(surface_ptr.cast::<c_void>()).ok_or(BackendError::NotInitialized)?;

        let dh = RawDisplayHandle::Wayland(WaylandDisplayHandle::new(display));
        let wh = RawWindowHandle::Wayland(WaylandWindowHandle::new(surface));
        unsafe { ash_window::create_surface(host.entry, host.instance, dh, wh, None) }
            .map_err(|e| BackendError::vk("vkCreateWaylandSurfaceKHR", e))
    }

    fn check_presentation_support(
        &self,
        host: &VkHost<'_>,
        physical_device: vk::PhysicalDevice,
        queue_family: u32,
    ) -> bool {
        let Ok(display) = self.display_ptr() else {
            return false;
        };
        let loader = ash::khr::wayland_surface::Instance::new(host.entry, host.instance);
        // the connection keeps the display alive for the duration of the call
        unsafe {
            loader.get_physical_device_wayland_presentation_support(
                physical_device,
                queue_family,
                &mut *display.as_ptr().cast::<vk::wl_display>(),
            )
        }
    }

    fn poll_events(&mut self) -> Result<Vec<WindowEvent>, BackendError> {
        let Some(session) = self.session.as_mut() else {
            return Err(BackendError::NotInitialized);
        };
        session.queue.flush().map_err(dispatch_error)?;
        if let Some(guard) = session.queue.prepare_read() {
            match guard.read() {
                Ok(_) => {}
                Err(WaylandError::Io(e)) if e.kind() == ErrorKind::WouldBlock => {}
                Err(e) => return Err(dispatch_error(e)),
            }
        }
        session
            .queue
            .dispatch_pending(&mut self.state)
            .map_err(dispatch_error)?;
        Ok(std::mem::take(&mut self.state.events))
    }

    fn features(&self) -> BackendFeatures {
        BackendFeatures::FULLSCREEN | BackendFeatures::OUTPUT_ENUMERATION | BackendFeatures::TITLE
    }

    fn update_title(&mut self, title: &str) {
        if let Some(s) = &self.session {
            s.shell_surface.set_title(title.to_owned());
        }
    }

    fn request_fullscreen(&mut self, on: bool) {
        self.apply_fullscreen(on);
        self.fullscreen = on;
    }

    fn is_fullscreen(&self) -> bool {
        self.fullscreen
    }

    fn size(&self) -> (u32, u32) {
        self.state.size
    }
}

impl Drop for SimpleShell {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            session.surface.destroy();
            let _ = session.conn.flush();
        }
    }
}
