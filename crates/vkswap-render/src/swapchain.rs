// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use tracing::{debug, error};

use crate::device::PresentDevice;
use crate::error::{CallContext, PresentError};

/// Negotiated once per (re)creation; never changes for the lifetime of one
/// [`Swapchain`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SwapchainConfig {
    pub format: vk::Format,
    pub color_space: vk::ColorSpaceKHR,
    pub present_mode: vk::PresentModeKHR,
    pub image_count: u32,
    pub extent: vk::Extent2D,
    pub pre_transform: vk::SurfaceTransformFlagsKHR,
    pub composite_alpha: vk::CompositeAlphaFlagsKHR,
    pub transfer_src: bool,
}

impl SwapchainConfig {
    pub fn image_usage(&self) -> vk::ImageUsageFlags {
        let mut usage = vk::ImageUsageFlags::COLOR_ATTACHMENT;
        if self.transfer_src {
            usage |= vk::ImageUsageFlags::TRANSFER_SRC;
        }
        usage
    }
}

/// The image belongs to the presentation engine; the view and framebuffer
/// belong to us.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SwapchainImage {
    pub image: vk::Image,
    pub view: vk::ImageView,
    pub framebuffer: Option<vk::Framebuffer>,
}

pub struct Swapchain {
    handle: vk::SwapchainKHR,
    config: SwapchainConfig,
    images: Vec<SwapchainImage>,
}

impl Swapchain {
    /// Builds a new chain. `previous` is handed to the presentation engine as
    /// the reuse hint and destroyed only once the new chain and all its views
    /// exist. The old chain is retired even when creation fails, so it is
    /// destroyed on that path too.
    pub fn create<D: PresentDevice>(
        device: &mut D,
        config: SwapchainConfig,
        previous: Option<Swapchain>,
    ) -> Result<Swapchain, PresentError> {
        let old = previous
            .as_ref()
            .map_or(vk::SwapchainKHR::null(), |p| p.handle);

        let built = Self::build(device, config, old);

        if let Some(previous) = previous {
            previous.destroy(device);
        }
        built
    }

    fn build<D: PresentDevice>(
        device: &mut D,
        config: SwapchainConfig,
        old: vk::SwapchainKHR,
    ) -> Result<Swapchain, PresentError> {
        let handle = device
            .create_swapchain(&config, old)
            .call("vkCreateSwapchainKHR")?;

        let raw_images = match device.swapchain_images(handle) {
            Ok(images) => images,
            Err(e) => {
                device.destroy_swapchain(handle);
                return Err(PresentError::vk("vkGetSwapchainImagesKHR", e));
            }
        };

        let mut images = Vec::with_capacity(raw_images.len());
        for image in raw_images {
            match device.create_image_view(image, config.format) {
                Ok(view) => images.push(SwapchainImage {
                    image,
                    view,
                    framebuffer: None,
                }),
                Err(e) => {
                    for img in &images {
                        device.destroy_image_view(img.view);
                    }
                    device.destroy_swapchain(handle);
                    return Err(PresentError::vk("vkCreateImageView", e));
                }
            }
        }

        debug!(
            "swapchain {:?} created with {} images (old {:?})",
            handle,
            images.len(),
            old
        );

        Ok(Swapchain {
            handle,
            config,
            images,
        })
    }

    /// One framebuffer per image: the image view plus the shared depth view.
    pub fn attach_framebuffers<D: PresentDevice>(
        &mut self,
        device: &mut D,
        render_pass: vk::RenderPass,
        depth_view: vk::ImageView,
    ) -> Result<(), PresentError> {
        self.detach_framebuffers(device);
        for i in 0..self.images.len() {
            let attachments = [self.images[i].view, depth_view];
            match device.create_framebuffer(render_pass, &attachments, self.config.extent) {
                Ok(fb) => self.images[i].framebuffer = Some(fb),
                Err(e) => {
                    self.detach_framebuffers(device);
                    return Err(PresentError::vk("vkCreateFramebuffer", e));
                }
            }
        }
        Ok(())
    }

    pub fn detach_framebuffers<D: PresentDevice>(&mut self, device: &mut D) {
        for img in &mut self.images {
            if let Some(fb) = img.framebuffer.take() {
                device.destroy_framebuffer(fb);
            }
        }
    }

    /// Framebuffers, then views, then the chain itself.
    pub fn destroy<D: PresentDevice>(mut self, device: &mut D) {
        self.detach_framebuffers(device);
        for img in self.images.drain(..) {
            device.destroy_image_view(img.view);
        }
        device.destroy_swapchain(self.handle);
        self.handle = vk::SwapchainKHR::null();
    }

    pub fn handle(&self) -> vk::SwapchainKHR {
        self.handle
    }

    pub fn config(&self) -> &SwapchainConfig {
        &self.config
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.config.extent
    }

    pub fn images(&self) -> &[SwapchainImage] {
        &self.images
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        if self.handle != vk::SwapchainKHR::null() {
            error!(
                "swapchain {:?} dropped without destroy(); {} views leaked",
                self.handle,
                self.images.len()
            );
        }
    }
}
