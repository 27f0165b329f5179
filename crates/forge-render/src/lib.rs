// SPDX-License-Identifier: CEPL-1.0
use anyhow::Result;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

pub mod draw;
pub mod settings;

pub use draw::{DrawCommand, DrawList, DrawSource, Material, MeshId, Vertex};
pub use settings::{PresentPreference, RenderSettings, SeverityLevel, ValidationMode};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RenderSize {
    pub width: u32,
    pub height: u32,
}

impl RenderSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Zero area means the window is minimized and nothing can be presented.
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Current pixel size of the window's drawable area.
pub trait DrawableSize {
    fn drawable_size(&self) -> RenderSize;
}

/// Everything a renderer needs from the window: native handles to build a
/// surface from, and the drawable size to build a swapchain for.
pub trait WindowTarget: HasWindowHandle + HasDisplayHandle + DrawableSize {}

impl<T> WindowTarget for T where T: HasWindowHandle + HasDisplayHandle + DrawableSize {}

/// What happened to one frame request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameOutcome {
    /// Submitted and presented.
    Presented { slot: usize, image_index: u32 },
    /// Submitted, but present reported the swapchain stale; it has been rebuilt.
    PresentedStale { slot: usize, image_index: u32 },
    /// Acquire found the swapchain out of date; rebuilt, nothing submitted.
    Skipped,
    /// Window has no drawable area; rendering waits for a usable size.
    Suspended,
}

impl FrameOutcome {
    pub fn was_submitted(&self) -> bool {
        matches!(
            self,
            FrameOutcome::Presented { .. } | FrameOutcome::PresentedStale { .. }
        )
    }
}

/// Frame-submission hooks the application drives.
pub trait Renderer {
    fn resize(&mut self, size: RenderSize) -> Result<()>;
    fn render(&mut self, window: &dyn DrawableSize, scene: &dyn DrawSource) -> Result<FrameOutcome>;
    fn set_clear_color(&mut self, rgba: [f32; 4]);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_axis_is_empty() {
        assert!(RenderSize::new(0, 600).is_empty());
        assert!(RenderSize::new(800, 0).is_empty());
        assert!(!RenderSize::new(1, 1).is_empty());
    }

    #[test]
    fn only_submitted_outcomes_count() {
        assert!(FrameOutcome::Presented { slot: 0, image_index: 2 }.was_submitted());
        assert!(FrameOutcome::PresentedStale { slot: 1, image_index: 0 }.was_submitted());
        assert!(!FrameOutcome::Skipped.was_submitted());
        assert!(!FrameOutcome::Suspended.was_submitted());
    }
}
