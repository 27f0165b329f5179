// SPDX-License-Identifier: CEPL-1.0
//! Swapchain policy and lifecycle.
//!
//! The `choose_*` helpers are pure functions of what the surface reports.
//! [`SwapchainManager`] owns the current chain and tracks whether it can still
//! be presented to.

use ash::vk;
use forge_render::{PresentPreference, RenderSize};
use tracing::{debug, info, warn};

use crate::backend::{ChainInfo, GpuBackend, SurfaceSupport};
use crate::error::RenderError;

/// Everything needed to create one swapchain.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SwapchainDesc {
    pub format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
    pub image_count: u32,
    pub transform: vk::SurfaceTransformFlagsKHR,
}

/// 8-bit BGRA sRGB when offered, else the first advertised format.
pub fn choose_surface_format(
    formats: &[vk::SurfaceFormatKHR],
) -> Result<vk::SurfaceFormatKHR, RenderError> {
    formats
        .iter()
        .copied()
        .find(|f| {
            f.format == vk::Format::B8G8R8A8_SRGB
                && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .or_else(|| formats.first().copied())
        .ok_or(RenderError::NoSurfaceFormat)
}

/// FIFO is always available, so it is the fallback.
pub fn choose_present_mode(
    modes: &[vk::PresentModeKHR],
    pref: PresentPreference,
) -> vk::PresentModeKHR {
    match pref {
        PresentPreference::LowLatency if modes.contains(&vk::PresentModeKHR::MAILBOX) => {
            vk::PresentModeKHR::MAILBOX
        }
        _ => vk::PresentModeKHR::FIFO,
    }
}

fn clamp_axis(value: u32, min: u32, max: u32) -> u32 {
    let v = value.max(min);
    // max == 0: no upper bound reported
    if max == 0 {
        v
    } else {
        v.min(max.max(min))
    }
}

/// Window size clamped into the surface bounds. A `u32::MAX` current extent
/// means the surface takes its size from the swapchain, so the window size is
/// used as is.
pub fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, window: RenderSize) -> vk::Extent2D {
    if caps.current_extent.width == u32::MAX {
        return vk::Extent2D {
            width: window.width,
            height: window.height,
        };
    }
    vk::Extent2D {
        width: clamp_axis(
            window.width,
            caps.min_image_extent.width,
            caps.max_image_extent.width,
        ),
        height: clamp_axis(
            window.height,
            caps.min_image_extent.height,
            caps.max_image_extent.height,
        ),
    }
}

/// One more than the minimum, so the driver never blocks us on its own image.
pub fn choose_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let desired = caps.min_image_count + 1;
    if caps.max_image_count > 0 {
        desired.min(caps.max_image_count)
    } else {
        desired
    }
}

pub fn describe(
    support: &SurfaceSupport,
    window: RenderSize,
    pref: PresentPreference,
) -> Result<SwapchainDesc, RenderError> {
    Ok(SwapchainDesc {
        format: choose_surface_format(&support.formats)?,
        present_mode: choose_present_mode(&support.present_modes, pref),
        extent: choose_extent(&support.caps, window),
        image_count: choose_image_count(&support.caps),
        transform: support.caps.current_transform,
    })
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ChainState {
    Ready,
    /// Reported out of date or suboptimal; rebuild before the next submit.
    Stale,
    /// Window has no drawable area.
    Suspended,
}

/// Result of [`SwapchainManager::rebuild`].
pub enum Rebuild<C> {
    Suspended,
    Rebuilt {
        /// Previous chain, kept alive for the caller to destroy after its
        /// dependents.
        retired: Option<C>,
        format_changed: bool,
        extent_changed: bool,
    },
}

pub struct SwapchainManager<B: GpuBackend> {
    chain: Option<B::Chain>,
    state: ChainState,
    preference: PresentPreference,
}

impl<B: GpuBackend> SwapchainManager<B> {
    pub fn new(preference: PresentPreference) -> Self {
        Self {
            chain: None,
            state: ChainState::Stale,
            preference,
        }
    }

    pub fn current(&self) -> Option<&B::Chain> {
        self.chain.as_ref()
    }

    pub fn is_suspended(&self) -> bool {
        self.state == ChainState::Suspended
    }

    pub fn needs_rebuild(&self) -> bool {
        self.chain.is_none() || self.state != ChainState::Ready
    }

    pub fn mark_stale(&mut self) {
        if self.state == ChainState::Ready {
            self.state = ChainState::Stale;
        }
    }

    pub fn suspend(&mut self) {
        if self.state != ChainState::Suspended {
            info!(target: "forge::render", "drawable area is 0x0, rendering suspended");
        }
        self.state = ChainState::Suspended;
    }

    /// A rebuild failed for a transient reason: hold rendering until the next
    /// frame request retries it. The current chain, if any, stays owned here.
    pub fn defer(&mut self, cause: &RenderError) {
        warn!(target: "forge::render", "swapchain rebuild deferred: {cause}");
        self.state = ChainState::Suspended;
    }

    /// Builds a chain for `window`. The caller must have drained every frame
    /// slot that references the current chain.
    pub fn rebuild(
        &mut self,
        backend: &mut B,
        window: RenderSize,
    ) -> Result<Rebuild<B::Chain>, RenderError> {
        if window.is_empty() {
            self.suspend();
            return Ok(Rebuild::Suspended);
        }

        let support = backend.surface_support()?;
        let desc = describe(&support, window, self.preference)?;
        if desc.extent.width == 0 || desc.extent.height == 0 {
            self.suspend();
            return Ok(Rebuild::Suspended);
        }

        let chain = backend.create_chain(&desc, self.chain.as_ref())?;
        debug!(
            target: "forge::render",
            "swapchain: {:?} {:?}, {}x{}, {} images",
            desc.format.format,
            desc.present_mode,
            desc.extent.width,
            desc.extent.height,
            chain.image_count()
        );

        let retired = self.chain.replace(chain);
        let (format_changed, extent_changed) = match &retired {
            Some(old) => (
                old.format() != desc.format,
                old.extent() != desc.extent,
            ),
            None => (true, true),
        };
        if self.state == ChainState::Suspended {
            info!(target: "forge::render", "swapchain usable again, rendering resumed");
        }
        self.state = ChainState::Ready;

        Ok(Rebuild::Rebuilt {
            retired,
            format_changed,
            extent_changed,
        })
    }

    /// Hands the current chain over for teardown.
    pub fn take(&mut self) -> Option<B::Chain> {
        self.state = ChainState::Stale;
        self.chain.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    fn caps(current: (u32, u32), min: (u32, u32), max: (u32, u32)) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: current.0,
                height: current.1,
            },
            min_image_extent: vk::Extent2D {
                width: min.0,
                height: min.1,
            },
            max_image_extent: vk::Extent2D {
                width: max.0,
                height: max.1,
            },
            ..Default::default()
        }
    }

    fn fmt(format: vk::Format, color_space: vk::ColorSpaceKHR) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space,
        }
    }

    #[test]
    fn prefers_bgra_srgb() {
        let formats = [
            fmt(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            fmt(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];
        assert_eq!(
            choose_surface_format(&formats).unwrap().format,
            vk::Format::B8G8R8A8_SRGB
        );
    }

    #[test]
    fn falls_back_to_first_format() {
        let formats = [
            fmt(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            fmt(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::EXTENDED_SRGB_LINEAR_EXT),
        ];
        assert_eq!(
            choose_surface_format(&formats).unwrap().format,
            vk::Format::R8G8B8A8_UNORM
        );
        assert!(matches!(
            choose_surface_format(&[]),
            Err(RenderError::NoSurfaceFormat)
        ));
    }

    #[test]
    fn present_mode_prefers_mailbox() {
        let both = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX];
        assert_eq!(
            choose_present_mode(&both, PresentPreference::LowLatency),
            vk::PresentModeKHR::MAILBOX
        );
        assert_eq!(
            choose_present_mode(&both, PresentPreference::Fifo),
            vk::PresentModeKHR::FIFO
        );
        assert_eq!(
            choose_present_mode(&[vk::PresentModeKHR::IMMEDIATE], PresentPreference::LowLatency),
            vk::PresentModeKHR::FIFO
        );
    }

    #[test]
    fn sentinel_extent_uses_window_verbatim() {
        let c = caps((u32::MAX, u32::MAX), (100, 100), (200, 200));
        assert_eq!(
            choose_extent(&c, RenderSize::new(800, 600)),
            vk::Extent2D {
                width: 800,
                height: 600
            }
        );
    }

    #[test]
    fn extent_is_clamped_to_bounds() {
        let c = caps((640, 480), (320, 240), (1024, 768));
        assert_eq!(
            choose_extent(&c, RenderSize::new(4000, 100)),
            vk::Extent2D {
                width: 1024,
                height: 240
            }
        );
    }

    #[test]
    fn extent_clamp_holds_for_random_bounds() {
        let mut rng = ChaCha8Rng::seed_from_u64(0x5eed);
        for _ in 0..2_000 {
            let min = (rng.gen_range(0..512), rng.gen_range(0..512));
            // roughly one in four bounds unbounded
            let max_axis = |rng: &mut ChaCha8Rng, lo: u32| {
                if rng.gen_ratio(1, 4) {
                    0
                } else {
                    rng.gen_range(lo.max(1)..4096)
                }
            };
            let max = (max_axis(&mut rng, min.0), max_axis(&mut rng, min.1));
            let window = RenderSize::new(rng.gen_range(0..5000), rng.gen_range(0..5000));
            let c = caps((window.width, window.height), min, max);

            let expect = |v: u32, lo: u32, hi: u32| {
                if hi == 0 {
                    v.max(lo)
                } else {
                    v.clamp(lo, hi)
                }
            };
            let got = choose_extent(&c, window);
            assert_eq!(got.width, expect(window.width, min.0, max.0), "{min:?} {max:?} {window:?}");
            assert_eq!(got.height, expect(window.height, min.1, max.1), "{min:?} {max:?} {window:?}");
        }
    }

    #[test]
    fn image_count_is_min_plus_one_within_max() {
        let mut c = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 0,
            ..Default::default()
        };
        assert_eq!(choose_image_count(&c), 3);
        c.max_image_count = 2;
        assert_eq!(choose_image_count(&c), 2);
        c.max_image_count = 8;
        assert_eq!(choose_image_count(&c), 3);
    }
}
