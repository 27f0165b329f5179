// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use forge_core::{EngineConfig, FileSource};
use forge_render::{
    DrawSource, DrawableSize, FrameOutcome, MeshId, RenderSettings, RenderSize, Renderer, Vertex,
    WindowTarget,
};
use tracing::{debug, info};

use crate::backend::{Acquired, ChainInfo, FrameRecording, GpuBackend, Presented};
use crate::error::{ErrorClass, RenderError};
use crate::frame::FrameSynchronizer;
use crate::swapchain::{Rebuild, SwapchainManager};
use crate::vk_backend::VkBackend;

/// Owns the swapchain, pipeline state and frame slots for one window, and
/// drives them through a [`GpuBackend`].
pub struct RenderModule<B: GpuBackend> {
    swapchain: SwapchainManager<B>,
    /// Pipeline plus the color format it was built for.
    pipeline: Option<(B::Pipeline, vk::Format)>,
    targets: Option<B::Targets>,
    sync: FrameSynchronizer,
    clear_color: [f32; 4],
    /// Drawable size the current chain was built for.
    window_size: RenderSize,
    backend: B,
}

pub type VkRenderModule = RenderModule<VkBackend>;

impl<B: GpuBackend> RenderModule<B> {
    /// Builds the first swapchain. A zero `size` starts suspended; the chain
    /// and pipeline are then built on the first frame with a usable size.
    pub fn new(
        backend: B,
        settings: &RenderSettings,
        size: RenderSize,
    ) -> Result<Self, RenderError> {
        let sync = FrameSynchronizer::new(backend.frame_slots(), settings.fence_timeout());
        let mut module = Self {
            swapchain: SwapchainManager::new(settings.present_mode),
            pipeline: None,
            targets: None,
            sync,
            clear_color: settings.clear_color,
            window_size: size,
            backend,
        };
        module.recreate_swapchain(size)?;
        Ok(module)
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn frame_sync(&self) -> &FrameSynchronizer {
        &self.sync
    }

    pub fn is_suspended(&self) -> bool {
        self.swapchain.is_suspended()
    }

    pub fn extent(&self) -> Option<vk::Extent2D> {
        self.swapchain.current().map(ChainInfo::extent)
    }

    pub fn surface_format(&self) -> Option<vk::SurfaceFormatKHR> {
        self.swapchain.current().map(ChainInfo::format)
    }

    pub fn clear_color(&self) -> [f32; 4] {
        self.clear_color
    }

    pub fn set_clear_color(&mut self, rgba: [f32; 4]) {
        self.clear_color = rgba;
    }

    /// Rebuilds the swapchain for `size`. Safe to call repeatedly.
    ///
    /// A zero `size` only suspends: nothing is waited on or destroyed. A
    /// recoverable failure (surface out of date mid-resize) also suspends, and
    /// the next frame request retries; only fatal errors are returned.
    pub fn recreate_swapchain(&mut self, size: RenderSize) -> Result<(), RenderError> {
        if size.is_empty() {
            self.window_size = size;
            self.swapchain.suspend();
            return Ok(());
        }

        match self.rebuild_for(size) {
            Err(e) if e.class() == ErrorClass::Recoverable => {
                self.swapchain.defer(&e);
                Ok(())
            }
            other => other,
        }
    }

    /// `window_size` only moves once a chain for `size` exists.
    fn rebuild_for(&mut self, size: RenderSize) -> Result<(), RenderError> {
        // STRICT ORDER:
        // 1) Stop submitting; drain the slots, then the device
        // 2) New swapchain with the old handle as the retirement hint
        // 3) Old framebuffers/depth, THEN the retired chain whose views they used
        // 4) Pipeline only if the color format changed
        // 5) New targets; image ownership history starts over
        self.sync.wait_all(&mut self.backend)?;
        self.backend.wait_idle()?;

        let (retired, extent_changed) = match self.swapchain.rebuild(&mut self.backend, size)? {
            Rebuild::Suspended => {
                self.window_size = size;
                return Ok(());
            }
            Rebuild::Rebuilt {
                retired,
                extent_changed,
                ..
            } => (retired, extent_changed),
        };
        self.window_size = size;

        if let Some(targets) = self.targets.take() {
            self.backend.destroy_targets(targets);
        }
        if let Some(old) = retired {
            self.backend.destroy_chain(old);
        }

        let chain = self.swapchain.current().ok_or(RenderError::NoSwapchain)?;
        let format = chain.format().format;
        if self.pipeline.as_ref().map(|(_, f)| *f) != Some(format) {
            if let Some((old, old_format)) = self.pipeline.take() {
                info!(
                    target: "forge::render",
                    "color format {:?} -> {:?}, rebuilding pipeline",
                    old_format,
                    format
                );
                self.backend.destroy_pipeline(old);
            }
            let pipeline = self.backend.build_pipeline(format)?;
            self.pipeline = Some((pipeline, format));
        }

        let (pipeline, _) = self.pipeline.as_ref().ok_or(RenderError::NoSwapchain)?;
        self.targets = Some(self.backend.build_targets(chain, pipeline)?);
        self.sync.on_swapchain_rebuilt(chain.image_count());

        let extent = chain.extent();
        if extent_changed {
            info!(
                target: "forge::render",
                "swapchain rebuilt: {}x{}, {} images",
                extent.width,
                extent.height,
                chain.image_count()
            );
        } else {
            debug!(target: "forge::render", "swapchain rebuilt at unchanged extent");
        }
        Ok(())
    }

    /// Renders one frame of `scene` at the window's current size.
    pub fn render_frame(
        &mut self,
        window: &dyn DrawableSize,
        scene: &dyn DrawSource,
    ) -> Result<FrameOutcome, RenderError> {
        let size = window.drawable_size();
        if size.is_empty() {
            self.swapchain.suspend();
            return Ok(FrameOutcome::Suspended);
        }
        if self.swapchain.needs_rebuild() || size != self.window_size {
            self.recreate_swapchain(size)?;
            if self.swapchain.needs_rebuild() {
                return Ok(FrameOutcome::Suspended);
            }
        }

        // 1) Slot fence (bounded; a timeout is device loss)
        let slot = self.sync.begin(&mut self.backend)?;

        // 2) Acquire; out of date aborts the frame, the slot stays current
        let chain = self.swapchain.current().ok_or(RenderError::NoSwapchain)?;
        let image_index = match self.backend.acquire(chain, slot, self.sync.timeout())? {
            Acquired::OutOfDate => {
                debug!(target: "forge::render", "acquire: swapchain out of date, frame skipped");
                self.swapchain.mark_stale();
                self.recreate_swapchain(size)?;
                return Ok(FrameOutcome::Skipped);
            }
            Acquired::Image { index, suboptimal } => {
                if suboptimal {
                    self.swapchain.mark_stale();
                }
                index
            }
        };

        // 3) Wait out any other slot still rendering into this image
        self.sync.claim_image(&mut self.backend, slot, image_index)?;

        // 4) Reset, record, submit
        let (pipeline, _) = self.pipeline.as_ref().ok_or(RenderError::NoSwapchain)?;
        let targets = self.targets.as_ref().ok_or(RenderError::NoSwapchain)?;
        self.backend.reset_slot(slot)?;
        self.backend.record(&FrameRecording {
            slot,
            image_index,
            pipeline,
            targets,
            clear_color: self.clear_color,
            scene,
        })?;
        self.backend.submit(slot, image_index, targets)?;
        self.sync.mark_submitted(slot, image_index);

        // 5) Present; staleness is handled here, never surfaced
        let chain = self.swapchain.current().ok_or(RenderError::NoSwapchain)?;
        let presented = self.backend.present(chain, slot, image_index)?;

        // 6) Next slot
        self.sync.advance();

        if presented == Presented::Optimal && !self.swapchain.needs_rebuild() {
            return Ok(FrameOutcome::Presented { slot, image_index });
        }
        debug!(target: "forge::render", "present: swapchain stale, rebuilding");
        self.swapchain.mark_stale();
        self.recreate_swapchain(size)?;
        Ok(FrameOutcome::PresentedStale { slot, image_index })
    }
}

impl RenderModule<VkBackend> {
    /// Opens the device for `window` and builds the first swapchain.
    pub fn init<W>(
        engine: &EngineConfig,
        settings: &RenderSettings,
        window: &W,
        files: &dyn FileSource,
    ) -> Result<Self, RenderError>
    where
        W: WindowTarget + ?Sized,
    {
        let backend = VkBackend::new(engine, settings, window, files)?;
        Self::new(backend, settings, window.drawable_size())
    }

    pub fn upload_mesh(
        &mut self,
        vertices: &[Vertex],
        indices: &[u32],
    ) -> Result<MeshId, RenderError> {
        self.backend.upload_mesh(vertices, indices)
    }

    pub fn validation_enabled(&self) -> bool {
        self.backend.validation_enabled()
    }
}

impl<B: GpuBackend> Renderer for RenderModule<B> {
    fn resize(&mut self, size: RenderSize) -> anyhow::Result<()> {
        self.recreate_swapchain(size)?;
        Ok(())
    }

    fn render(
        &mut self,
        window: &dyn DrawableSize,
        scene: &dyn DrawSource,
    ) -> anyhow::Result<FrameOutcome> {
        Ok(self.render_frame(window, scene)?)
    }

    fn set_clear_color(&mut self, rgba: [f32; 4]) {
        RenderModule::set_clear_color(self, rgba);
    }
}

// STRICT TEARDOWN ORDER:
// - drain frame slots, device idle
// - framebuffers/depth BEFORE pipeline and image views
// - pipeline & layouts BEFORE swapchain
// - swapchain views, then handle
// - backend (device-scoped objects, then the device context) drops last
impl<B: GpuBackend> Drop for RenderModule<B> {
    fn drop(&mut self) {
        let _ = self.sync.wait_all(&mut self.backend);
        let _ = self.backend.wait_idle();

        if let Some(targets) = self.targets.take() {
            self.backend.destroy_targets(targets);
        }
        if let Some((pipeline, _)) = self.pipeline.take() {
            self.backend.destroy_pipeline(pipeline);
        }
        if let Some(chain) = self.swapchain.take() {
            self.backend.destroy_chain(chain);
        }
    }
}
