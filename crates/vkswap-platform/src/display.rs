// SPDX-License-Identifier: CEPL-1.0
//! Direct-to-display output through `VK_KHR_display`, no compositor. Owns
//! the console for input and exclusive access.
use std::ffi::CStr;
use std::time::Duration;

use ash::vk;
use tracing::{debug, info};
use vkswap_core::{FormatPolicy, WindowSettings};

use crate::console::{event_from_byte, Console};
use crate::{BackendError, BackendFeatures, EventMode, VkHost, WindowBackend, WindowEvent};

/// Mode whose visible region equals the request, else the first listed.
fn pick_mode(
    modes: &[vk::DisplayModePropertiesKHR],
    width: u32,
    height: u32,
) -> Option<&vk::DisplayModePropertiesKHR> {
    modes
        .iter()
        .find(|m| {
            let r = m.parameters.visible_region;
            r.width == width && r.height == height
        })
        .or_else(|| modes.first())
}

pub struct DirectDisplay {
    console: Option<Console>,
    requested: (u32, u32),
    size: (u32, u32),
    physical_device: vk::PhysicalDevice,
}

impl DirectDisplay {
    pub fn new() -> Self {
        Self {
            console: None,
            requested: (0, 0),
            size: (0, 0),
            physical_device: vk::PhysicalDevice::null(),
        }
    }

    /// First display of `pd` with a usable mode and plane.
    unsafe fn surface_on(
        &mut self,
        loader: &ash::khr::display::Instance,
        pd: vk::PhysicalDevice,
    ) -> Result<Option<vk::SurfaceKHR>, BackendError> {
        let displays = unsafe { loader.get_physical_device_display_properties(pd) }
            .map_err(|e| BackendError::vk("vkGetPhysicalDeviceDisplayPropertiesKHR", e))?;
        let Some(props) = displays.first() else {
            return Ok(None);
        };

        let modes = unsafe { loader.get_display_mode_properties(pd, props.display) }
            .map_err(|e| BackendError::vk("vkGetDisplayModePropertiesKHR", e))?;
        let (w, h) = self.requested;
        let Some(mode) = pick_mode(&modes, w, h) else {
            return Ok(None);
        };

        let planes = unsafe { loader.get_physical_device_display_plane_properties(pd) }
            .map_err(|e| BackendError::vk("vkGetPhysicalDeviceDisplayPlanePropertiesKHR", e))?;
        let plane = (0..planes.len() as u32).find(|&i| {
            unsafe { loader.get_display_plane_supported_displays(pd, i) }
                .map(|d| d.contains(&props.display))
                .unwrap_or(false)
        });
        let Some(plane) = plane else {
            return Ok(None);
        };

        let extent = mode.parameters.visible_region;
        let ci = vk::DisplaySurfaceCreateInfoKHR::default()
            .display_mode(mode.display_mode)
            .plane_index(plane)
            .plane_stack_index(planes[plane as usize].current_stack_index)
            .transform(vk::SurfaceTransformFlagsKHR::IDENTITY)
            .global_alpha(1.0)
            .alpha_mode(vk::DisplayPlaneAlphaFlagsKHR::OPAQUE)
            .image_extent(extent);
        let surface = unsafe { loader.create_display_plane_surface(&ci, None) }
            .map_err(|e| BackendError::vk("vkCreateDisplayPlaneSurfaceKHR", e))?;

        info!(
            "direct display: {}x{} @ {:.2} Hz on plane {plane} (native {}x{})",
            extent.width,
            extent.height,
            mode.parameters.refresh_rate as f32 / 1000.0,
            props.physical_resolution.width,
            props.physical_resolution.height
        );
        self.size = (extent.width, extent.height);
        self.physical_device = pd;
        Ok(Some(surface))
    }
}

impl Default for DirectDisplay {
    fn default() -> Self {
        Self::new()
    }
}

impl WindowBackend for DirectDisplay {
    fn name(&self) -> &'static str {
        "direct-display"
    }

    fn init(&mut self, settings: &WindowSettings) -> Result<(), BackendError> {
        self.console = Some(Console::acquire()?);
        self.requested = (settings.width, settings.height);
        self.size = self.requested;
        Ok(())
    }

    fn required_extensions(&self) -> Result<Vec<&'static CStr>, BackendError> {
        Ok(vec![ash::khr::surface::NAME, ash::khr::display::NAME])
    }

    unsafe fn create_surface(&mut self, host: &VkHost<'_>) -> Result<vk::SurfaceKHR, BackendError> {
        let loader = ash::khr::display::Instance::new(host.entry, host.instance);
        let devices = unsafe { host.instance.enumerate_physical_devices() }
            .map_err(|e| BackendError::vk("vkEnumeratePhysicalDevices", e))?;
        for pd in devices {
            if let Some(surface) = unsafe { self.surface_on(&loader, pd) }? {
                return Ok(surface);
            }
        }
        Err(BackendError::Unavailable("display output with a usable plane".into()))
    }

    /// Only the GPU that owns the chosen display can scan out to it.
    fn check_presentation_support(&self, _: &VkHost<'_>, physical_device: vk::PhysicalDevice, _: u32) -> bool {
        physical_device == self.physical_device
    }

    fn poll_events(&mut self) -> Result<Vec<WindowEvent>, BackendError> {
        Ok(self.wait_for_event(Duration::ZERO)?.into_iter().collect())
    }

    /// Console input only; no page-flip event is waited on, FIFO presentation paces frames.
    fn wait_for_event(&mut self, timeout: Duration) -> Result<Option<WindowEvent>, BackendError> {
        let console = self.console.as_mut().ok_or(BackendError::NotInitialized)?;
        Ok(console.read_byte(timeout)?.map(event_from_byte))
    }

    fn event_mode(&self) -> EventMode {
        EventMode::Blocking
    }

    fn features(&self) -> BackendFeatures {
        BackendFeatures::FULLSCREEN
            | BackendFeatures::OUTPUT_ENUMERATION
            | BackendFeatures::BLOCKING_EVENTS
    }

    fn update_title(&mut self, title: &str) {
        debug!("{title}");
    }

    /// Always fullscreen.
    fn request_fullscreen(&mut self, _on: bool) {}

    fn is_fullscreen(&self) -> bool {
        true
    }

    fn size(&self) -> (u32, u32) {
        self.size
    }

    fn format_policy(&self) -> FormatPolicy {
        FormatPolicy::StrictSrgb
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mode(w: u32, h: u32, refresh: u32) -> vk::DisplayModePropertiesKHR {
        vk::DisplayModePropertiesKHR {
            display_mode: vk::DisplayModeKHR::null(),
            parameters: vk::DisplayModeParametersKHR {
                visible_region: vk::Extent2D {
                    width: w,
                    height: h,
                },
                refresh_rate: refresh,
            },
        }
    }

    #[test]
    fn exact_mode_wins() {
        let modes = [mode(1920, 1080, 60_000), mode(1280, 720, 60_000)];
        let m = pick_mode(&modes, 1280, 720).unwrap();
        assert_eq!(m.parameters.visible_region.width, 1280);
    }

    #[test]
    fn first_mode_is_the_fallback() {
        let modes = [mode(1920, 1080, 60_000), mode(1280, 720, 60_000)];
        let m = pick_mode(&modes, 800, 600).unwrap();
        assert_eq!(m.parameters.visible_region.width, 1920);
        assert!(pick_mode(&[], 800, 600).is_none());
    }

    #[test]
    fn strict_formats_and_blocking_events() {
        let d = DirectDisplay::new();
        assert_eq!(d.format_policy(), FormatPolicy::StrictSrgb);
        assert_eq!(d.event_mode(), EventMode::Blocking);
        assert!(d.features().contains(BackendFeatures::BLOCKING_EVENTS));
    }
}
