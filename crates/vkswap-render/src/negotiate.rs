// SPDX-License-Identifier: CEPL-1.0
//! Surface capability negotiation.
//!
//! Pure selection functions over what the surface reports, plus
//! [`negotiate`] which queries a [`PresentDevice`] and assembles a
//! [`SwapchainConfig`].
use ash::vk;
use tracing::{info, warn};
use vkswap_core::{FormatPolicy, PresentSettings};

use crate::device::PresentDevice;
use crate::error::{CallContext, PresentError};
use crate::swapchain::SwapchainConfig;

pub const DEFAULT_FORMAT: vk::Format = vk::Format::B8G8R8A8_UNORM;

/// Accepted by the strict policy, best first.
const SRGB_WHITELIST: [vk::Format; 3] = [
    vk::Format::B8G8R8A8_SRGB,
    vk::Format::R8G8B8A8_SRGB,
    vk::Format::A8B8G8R8_SRGB_PACK32,
];

/// Formats some display drivers offer that the strict policy refuses to
/// coerce into.
const STRICT_REJECTED: [vk::Format; 4] = [
    vk::Format::R5G6B5_UNORM_PACK16,
    vk::Format::B5G6R5_UNORM_PACK16,
    vk::Format::R8G8B8_SRGB,
    vk::Format::B8G8R8_SRGB,
];

const ALPHA_PRIORITY: [vk::CompositeAlphaFlagsKHR; 4] = [
    vk::CompositeAlphaFlagsKHR::OPAQUE,
    vk::CompositeAlphaFlagsKHR::PRE_MULTIPLIED,
    vk::CompositeAlphaFlagsKHR::POST_MULTIPLIED,
    vk::CompositeAlphaFlagsKHR::INHERIT,
];

pub fn select_format(
    formats: &[vk::SurfaceFormatKHR],
) -> Result<(vk::Format, vk::ColorSpaceKHR), PresentError> {
    let first = formats.first().ok_or(PresentError::NoSurfaceFormats)?;

    // A lone UNDEFINED entry means the surface has no preference.
    if formats.len() == 1 && first.format == vk::Format::UNDEFINED {
        return Ok((DEFAULT_FORMAT, first.color_space));
    }

    let chosen = formats
        .iter()
        .find(|f| f.format == DEFAULT_FORMAT)
        .unwrap_or(first);
    Ok((chosen.format, chosen.color_space))
}

pub fn select_format_strict(
    formats: &[vk::SurfaceFormatKHR],
) -> Result<(vk::Format, vk::ColorSpaceKHR), PresentError> {
    if formats.is_empty() {
        return Err(PresentError::NoSurfaceFormats);
    }

    for f in formats.iter().filter(|f| STRICT_REJECTED.contains(&f.format)) {
        warn!("surface format {:?} is not supported, skipping", f.format);
    }

    SRGB_WHITELIST
        .iter()
        .find_map(|want| formats.iter().find(|f| f.format == *want))
        .map(|f| (f.format, f.color_space))
        .ok_or_else(|| PresentError::NoAcceptableFormat(formats.iter().map(|f| f.format).collect()))
}

/// FIFO when vsync is on; otherwise MAILBOX, then IMMEDIATE, then FIFO.
pub fn select_present_mode(modes: &[vk::PresentModeKHR], vsync: bool) -> vk::PresentModeKHR {
    if vsync {
        return vk::PresentModeKHR::FIFO;
    }

    [vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::IMMEDIATE]
        .into_iter()
        .find(|m| modes.contains(m))
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

/// Resolves the swapchain extent and writes it back into `requested`.
pub fn select_extent(
    caps: &vk::SurfaceCapabilitiesKHR,
    requested: &mut vk::Extent2D,
) -> vk::Extent2D {
    let extent = if caps.current_extent.width == u32::MAX {
        vk::Extent2D {
            width: requested
                .width
                .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
            height: requested
                .height
                .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
        }
    } else {
        caps.current_extent
    };
    *requested = extent;
    extent
}

/// One more than the minimum, capped by the maximum (0 means no maximum).
pub fn select_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let wanted = caps.min_image_count + 1;
    if caps.max_image_count > 0 {
        wanted.min(caps.max_image_count)
    } else {
        wanted
    }
}

pub fn select_transform(caps: &vk::SurfaceCapabilitiesKHR) -> vk::SurfaceTransformFlagsKHR {
    if caps
        .supported_transforms
        .contains(vk::SurfaceTransformFlagsKHR::IDENTITY)
    {
        vk::SurfaceTransformFlagsKHR::IDENTITY
    } else {
        caps.current_transform
    }
}

pub fn select_composite_alpha(caps: &vk::SurfaceCapabilitiesKHR) -> vk::CompositeAlphaFlagsKHR {
    ALPHA_PRIORITY
        .into_iter()
        .find(|a| caps.supported_composite_alpha.contains(*a))
        .unwrap_or(vk::CompositeAlphaFlagsKHR::OPAQUE)
}

/// Queries the surface and builds the configuration for the next swapchain.
/// `requested` is updated to the extent actually chosen.
pub fn negotiate<D: PresentDevice>(
    device: &D,
    requested: &mut vk::Extent2D,
    settings: &PresentSettings,
) -> Result<SwapchainConfig, PresentError> {
    let caps = device
        .surface_capabilities()
        .call("vkGetPhysicalDeviceSurfaceCapabilitiesKHR")?;
    let formats = device
        .surface_formats()
        .call("vkGetPhysicalDeviceSurfaceFormatsKHR")?;
    let modes = device
        .surface_present_modes()
        .call("vkGetPhysicalDeviceSurfacePresentModesKHR")?;

    if modes.is_empty() {
        return Err(PresentError::NoPresentModes);
    }

    let (format, color_space) = match settings.format_policy {
        FormatPolicy::PreferBgraUnorm => select_format(&formats)?,
        FormatPolicy::StrictSrgb => select_format_strict(&formats)?,
    };
    let present_mode = select_present_mode(&modes, settings.vsync);
    let extent = select_extent(&caps, requested);
    let image_count = select_image_count(&caps);

    // Screenshot-style readback needs TRANSFER_SRC on the chain images.
    let transfer_src = device
        .format_features(format)
        .contains(vk::FormatFeatureFlags::BLIT_DST)
        && caps
            .supported_usage_flags
            .contains(vk::ImageUsageFlags::TRANSFER_SRC);

    let config = SwapchainConfig {
        format,
        color_space,
        present_mode,
        image_count,
        extent,
        pre_transform: select_transform(&caps),
        composite_alpha: select_composite_alpha(&caps),
        transfer_src,
    };

    info!(
        "format: {:?} / {:?}, present_mode: {:?}, vsync={}, extent: {}x{}, images(min={} → picked={}), transfer_src={}",
        config.format,
        config.color_space,
        config.present_mode,
        settings.vsync,
        extent.width,
        extent.height,
        caps.min_image_count,
        image_count,
        transfer_src,
    );

    Ok(config)
}
