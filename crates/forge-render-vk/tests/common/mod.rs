// SPDX-License-Identifier: CEPL-1.0
//! In-memory `GpuBackend` that records every call and counts live objects.
#![allow(dead_code)]

use forge_render::{DrawableSize, RenderSettings, RenderSize};
use forge_render_vk::backend::{FrameRecording, SurfaceSupport};
use forge_render_vk::swapchain::SwapchainDesc;
use forge_render_vk::{
    vk, Acquired, ChainInfo, FenceStatus, GpuBackend, Presented, RenderError, RenderModule,
};
use std::cell::RefCell;
use std::collections::{BTreeSet, VecDeque};
use std::rc::Rc;
use std::time::Duration;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
    CreateChain {
        id: u32,
        old: Option<u32>,
        extent: (u32, u32),
    },
    DestroyChain(u32),
    BuildPipeline(u32),
    DestroyPipeline(u32),
    BuildTargets {
        id: u32,
        chain: u32,
    },
    DestroyTargets(u32),
    Wait(usize),
    Reset(usize),
    Acquire {
        slot: usize,
    },
    Record {
        slot: usize,
        image: u32,
        draws: usize,
    },
    Submit {
        slot: usize,
        image: u32,
    },
    Present {
        slot: usize,
        image: u32,
    },
    WaitIdle,
}

#[derive(Debug)]
pub struct SimChain {
    pub id: u32,
    pub format: vk::SurfaceFormatKHR,
    pub extent: vk::Extent2D,
    pub images: usize,
}

impl ChainInfo for SimChain {
    fn format(&self) -> vk::SurfaceFormatKHR {
        self.format
    }

    fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    fn image_count(&self) -> usize {
        self.images
    }
}

#[derive(Debug)]
pub struct SimPipeline {
    pub id: u32,
    pub format: vk::Format,
}

#[derive(Debug)]
pub struct SimTargets {
    pub id: u32,
    pub chain: u32,
}

#[derive(Debug, Default)]
pub struct SimState {
    pub support: SurfaceSupport,
    pub events: Vec<Event>,

    pub live_chains: usize,
    pub live_views: usize,
    pub live_pipelines: usize,
    pub live_targets: usize,
    pub chains_built: usize,
    pub pipelines_built: usize,
    pub targets_built: usize,

    /// Front entries override round-robin image selection.
    pub acquire_script: VecDeque<Acquired>,
    pub present_script: VecDeque<Presented>,
    /// Slots whose fence never signals.
    pub hung: BTreeSet<usize>,
    /// Returned once by the next `create_chain` instead of a chain.
    pub fail_next_create: Option<RenderError>,
    pub last_clear: Option<[f32; 4]>,

    pending: Vec<bool>,
    next_image: u32,
    next_id: u32,
}

impl SimState {
    fn id(&mut self) -> u32 {
        self.next_id += 1;
        self.next_id
    }

    pub fn count(&self, pred: impl Fn(&Event) -> bool) -> usize {
        self.events.iter().filter(|e| pred(e)).count()
    }

    pub fn position(&self, event: &Event) -> Option<usize> {
        self.events.iter().position(|e| e == event)
    }

    pub fn submitted_slots(&self) -> Vec<usize> {
        self.events
            .iter()
            .filter_map(|e| match e {
                Event::Submit { slot, .. } => Some(*slot),
                _ => None,
            })
            .collect()
    }
}

pub type SimHandle = Rc<RefCell<SimState>>;

pub struct SimBackend {
    slots: usize,
    state: SimHandle,
}

pub const SURFACE_FORMAT: vk::SurfaceFormatKHR = vk::SurfaceFormatKHR {
    format: vk::Format::B8G8R8A8_SRGB,
    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
};

/// Surface that sizes itself from the swapchain, offering 2..=4 images.
pub fn default_support() -> SurfaceSupport {
    SurfaceSupport {
        caps: vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 4,
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D {
                width: 1,
                height: 1,
            },
            max_image_extent: vk::Extent2D {
                width: 8192,
                height: 8192,
            },
            current_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
            ..Default::default()
        },
        formats: vec![SURFACE_FORMAT],
        present_modes: vec![vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX],
    }
}

impl SimBackend {
    pub fn new(slots: usize) -> (Self, SimHandle) {
        let state = Rc::new(RefCell::new(SimState {
            support: default_support(),
            pending: vec![false; slots],
            ..Default::default()
        }));
        (
            Self {
                slots,
                state: state.clone(),
            },
            state,
        )
    }
}

impl GpuBackend for SimBackend {
    type Chain = SimChain;
    type Pipeline = SimPipeline;
    type Targets = SimTargets;

    fn frame_slots(&self) -> usize {
        self.slots
    }

    fn surface_support(&mut self) -> Result<SurfaceSupport, RenderError> {
        Ok(self.state.borrow().support.clone())
    }

    fn create_chain(
        &mut self,
        desc: &SwapchainDesc,
        old: Option<&SimChain>,
    ) -> Result<SimChain, RenderError> {
        let mut s = self.state.borrow_mut();
        if let Some(err) = s.fail_next_create.take() {
            return Err(err);
        }
        let id = s.id();
        let images = desc.image_count as usize;
        s.events.push(Event::CreateChain {
            id,
            old: old.map(|c| c.id),
            extent: (desc.extent.width, desc.extent.height),
        });
        s.live_chains += 1;
        s.live_views += images;
        s.chains_built += 1;
        s.next_image = 0;
        Ok(SimChain {
            id,
            format: desc.format,
            extent: desc.extent,
            images,
        })
    }

    fn destroy_chain(&mut self, chain: SimChain) {
        let mut s = self.state.borrow_mut();
        s.events.push(Event::DestroyChain(chain.id));
        s.live_chains -= 1;
        s.live_views -= chain.images;
    }

    fn build_pipeline(&mut self, format: vk::Format) -> Result<SimPipeline, RenderError> {
        let mut s = self.state.borrow_mut();
        let id = s.id();
        s.events.push(Event::BuildPipeline(id));
        s.live_pipelines += 1;
        s.pipelines_built += 1;
        Ok(SimPipeline { id, format })
    }

    fn destroy_pipeline(&mut self, pipeline: SimPipeline) {
        let mut s = self.state.borrow_mut();
        s.events.push(Event::DestroyPipeline(pipeline.id));
        s.live_pipelines -= 1;
    }

    fn build_targets(
        &mut self,
        chain: &SimChain,
        _pipeline: &SimPipeline,
    ) -> Result<SimTargets, RenderError> {
        let mut s = self.state.borrow_mut();
        let id = s.id();
        s.events.push(Event::BuildTargets {
            id,
            chain: chain.id,
        });
        s.live_targets += 1;
        s.targets_built += 1;
        Ok(SimTargets {
            id,
            chain: chain.id,
        })
    }

    fn destroy_targets(&mut self, targets: SimTargets) {
        let mut s = self.state.borrow_mut();
        s.events.push(Event::DestroyTargets(targets.id));
        s.live_targets -= 1;
    }

    fn wait_slot(&mut self, slot: usize, _timeout: Duration) -> Result<FenceStatus, RenderError> {
        let mut s = self.state.borrow_mut();
        s.events.push(Event::Wait(slot));
        if s.hung.contains(&slot) {
            return Ok(FenceStatus::TimedOut);
        }
        s.pending[slot] = false;
        Ok(FenceStatus::Signaled)
    }

    fn reset_slot(&mut self, slot: usize) -> Result<(), RenderError> {
        self.state.borrow_mut().events.push(Event::Reset(slot));
        Ok(())
    }

    fn acquire(
        &mut self,
        chain: &SimChain,
        slot: usize,
        _timeout: Duration,
    ) -> Result<Acquired, RenderError> {
        let mut s = self.state.borrow_mut();
        s.events.push(Event::Acquire { slot });
        if let Some(scripted) = s.acquire_script.pop_front() {
            return Ok(scripted);
        }
        let index = s.next_image % chain.images as u32;
        s.next_image = s.next_image.wrapping_add(1);
        Ok(Acquired::Image {
            index,
            suboptimal: false,
        })
    }

    fn record(
        &mut self,
        frame: &FrameRecording<'_, SimPipeline, SimTargets>,
    ) -> Result<(), RenderError> {
        let mut s = self.state.borrow_mut();
        s.last_clear = Some(frame.clear_color);
        s.events.push(Event::Record {
            slot: frame.slot,
            image: frame.image_index,
            draws: frame.scene.draw_commands().len(),
        });
        Ok(())
    }

    fn submit(
        &mut self,
        slot: usize,
        image_index: u32,
        _targets: &SimTargets,
    ) -> Result<(), RenderError> {
        let mut s = self.state.borrow_mut();
        s.events.push(Event::Submit {
            slot,
            image: image_index,
        });
        s.pending[slot] = true;
        Ok(())
    }

    fn present(
        &mut self,
        _chain: &SimChain,
        slot: usize,
        image_index: u32,
    ) -> Result<Presented, RenderError> {
        let mut s = self.state.borrow_mut();
        s.events.push(Event::Present {
            slot,
            image: image_index,
        });
        Ok(s.present_script.pop_front().unwrap_or(Presented::Optimal))
    }

    fn wait_idle(&mut self) -> Result<(), RenderError> {
        self.state.borrow_mut().events.push(Event::WaitIdle);
        Ok(())
    }
}

/// Window stand-in with a settable drawable size.
pub struct FakeWindow(pub RenderSize);

impl DrawableSize for FakeWindow {
    fn drawable_size(&self) -> RenderSize {
        self.0
    }
}

pub fn settings(slots: usize) -> RenderSettings {
    RenderSettings {
        frames_in_flight: slots,
        fence_timeout_ms: 50,
        ..Default::default()
    }
}

pub fn module(slots: usize, size: RenderSize) -> (RenderModule<SimBackend>, SimHandle) {
    let (backend, state) = SimBackend::new(slots);
    let module = RenderModule::new(backend, &settings(slots), size).expect("sim module");
    (module, state)
}

pub fn empty_scene() -> forge_render::DrawList {
    forge_render::DrawList::default()
}
