// SPDX-License-Identifier: CEPL-1.0
//! Window side of the render module. winit is re-exported so the app needs
//! no direct dependency on it.
use std::sync::Arc;

use anyhow::Result;
use forge_render::{DrawableSize, RenderSize};
use raw_window_handle::{
    DisplayHandle, HandleError, HasDisplayHandle, HasWindowHandle, WindowHandle,
};
use tracing::info;
use winit::{dpi::LogicalSize, event_loop::ActiveEventLoop, window::Window};

pub use winit;

#[derive(Clone, Debug)]
pub struct WindowDesc {
    pub title: String,
    pub width: u32,
    pub height: u32,
}

impl Default for WindowDesc {
    fn default() -> Self {
        Self {
            title: "forge".into(),
            width: 1280,
            height: 720,
        }
    }
}

/// A winit window the renderer can build a surface from and size a
/// swapchain against.
#[derive(Clone, Debug)]
pub struct AppWindow {
    inner: Arc<Window>,
}

impl AppWindow {
    pub fn create(event_loop: &ActiveEventLoop, desc: &WindowDesc) -> Result<Self> {
        let attrs = Window::default_attributes()
            .with_title(desc.title.as_str())
            .with_inner_size(LogicalSize::new(desc.width, desc.height));
        let window = event_loop.create_window(attrs)?;

        let size = window.inner_size();
        info!(
            target: "forge::platform",
            "window created: {}x{} px (scale {:.2})",
            size.width,
            size.height,
            window.scale_factor()
        );
        Ok(Self {
            inner: Arc::new(window),
        })
    }

    pub fn id(&self) -> winit::window::WindowId {
        self.inner.id()
    }

    pub fn request_redraw(&self) {
        self.inner.request_redraw();
    }

    pub fn window(&self) -> &Window {
        &self.inner
    }
}

impl DrawableSize for AppWindow {
    fn drawable_size(&self) -> RenderSize {
        let size = self.inner.inner_size();
        RenderSize::new(size.width, size.height)
    }
}

impl HasWindowHandle for AppWindow {
    fn window_handle(&self) -> Result<WindowHandle<'_>, HandleError> {
        self.inner.window_handle()
    }
}

impl HasDisplayHandle for AppWindow {
    fn display_handle(&self) -> Result<DisplayHandle<'_>, HandleError> {
        self.inner.display_handle()
    }
}
