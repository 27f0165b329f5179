// SPDX-License-Identifier: CEPL-1.0
mod common;

use common::{empty_scene, module, Event, FakeWindow, SURFACE_FORMAT};
use forge_render::{FrameOutcome, RenderSize, Renderer};
use forge_render_vk::{vk, RenderError};
use pretty_assertions::assert_eq;

const SIZE: RenderSize = RenderSize::new(800, 600);

fn chain_ids(events: &[Event]) -> Vec<(u32, Option<u32>)> {
    events
        .iter()
        .filter_map(|e| match e {
            Event::CreateChain { id, old, .. } => Some((*id, *old)),
            _ => None,
        })
        .collect()
}

#[test]
fn first_chain_matches_the_window() {
    let (m, state) = module(2, SIZE);

    assert_eq!(
        m.extent(),
        Some(vk::Extent2D {
            width: 800,
            height: 600
        })
    );
    assert_eq!(m.surface_format(), Some(SURFACE_FORMAT));
    assert!(!m.is_suspended());

    let s = state.borrow();
    assert_eq!((s.chains_built, s.pipelines_built, s.targets_built), (1, 1, 1));
    assert_eq!(s.live_views, 3);
    assert_eq!(chain_ids(&s.events), vec![(1, None)]);
}

#[test]
fn resize_to_zero_suspends_without_touching_gpu_objects() {
    let (mut m, state) = module(2, SIZE);
    let before = state.borrow().events.len();

    Renderer::resize(&mut m, RenderSize::new(0, 0)).unwrap();

    assert!(m.is_suspended());
    let s = state.borrow();
    assert_eq!(s.events.len(), before);
    assert_eq!(s.live_chains, 1);
    assert_eq!(s.pipelines_built, 1);
}

#[test]
fn resize_rebuilds_chain_and_targets_but_keeps_the_pipeline() {
    let (mut m, state) = module(2, SIZE);

    m.recreate_swapchain(RenderSize::new(1024, 768)).unwrap();

    assert_eq!(
        m.extent(),
        Some(vk::Extent2D {
            width: 1024,
            height: 768
        })
    );
    let s = state.borrow();
    assert_eq!(s.chains_built, 2);
    assert_eq!(s.targets_built, 2);
    assert_eq!(s.pipelines_built, 1);
    assert_eq!((s.live_chains, s.live_targets, s.live_pipelines), (1, 1, 1));

    let chains = chain_ids(&s.events);
    let (first, _) = chains[0];
    let (second, old) = chains[1];
    assert_eq!(old, Some(first));

    // the new chain exists before the retired one is released, and the
    // retired chain outlives the framebuffers built on its views
    let created = s
        .position(&Event::CreateChain {
            id: second,
            old: Some(first),
            extent: (1024, 768),
        })
        .unwrap();
    let retired = s.position(&Event::DestroyChain(first)).unwrap();
    let old_targets = s
        .events
        .iter()
        .position(|e| matches!(e, Event::DestroyTargets(_)))
        .unwrap();
    assert!(created < retired);
    assert!(old_targets < retired);
}

#[test]
fn repeated_recreate_is_idempotent() {
    let (mut m, state) = module(2, SIZE);
    let format = m.surface_format();
    let extent = m.extent();

    m.recreate_swapchain(SIZE).unwrap();
    m.recreate_swapchain(SIZE).unwrap();

    assert_eq!(m.surface_format(), format);
    assert_eq!(m.extent(), extent);
    let s = state.borrow();
    assert_eq!(s.live_chains, 1);
    assert_eq!(s.live_views, 3);
    assert_eq!(s.live_targets, 1);
    assert_eq!(s.pipelines_built, 1);
}

#[test]
fn format_change_rebuilds_the_pipeline() {
    let (mut m, state) = module(2, SIZE);
    let unorm = vk::SurfaceFormatKHR {
        format: vk::Format::R8G8B8A8_UNORM,
        color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
    };
    state.borrow_mut().support.formats = vec![unorm];

    m.recreate_swapchain(SIZE).unwrap();

    assert_eq!(m.surface_format(), Some(unorm));
    let s = state.borrow();
    assert_eq!(s.pipelines_built, 2);
    assert_eq!(s.live_pipelines, 1);
    assert_eq!(s.count(|e| matches!(e, Event::DestroyPipeline(_))), 1);
}

#[test]
fn recreate_drains_slots_before_building() {
    let (mut m, state) = module(2, SIZE);
    let win = FakeWindow(SIZE);
    let scene = empty_scene();
    m.render_frame(&win, &scene).unwrap();
    m.render_frame(&win, &scene).unwrap();

    m.recreate_swapchain(RenderSize::new(640, 480)).unwrap();

    let s = state.borrow();
    let create = s
        .events
        .iter()
        .rposition(|e| matches!(e, Event::CreateChain { .. }))
        .unwrap();
    let idle = s
        .events
        .iter()
        .rposition(|e| *e == Event::WaitIdle)
        .unwrap();
    let w0 = s.position(&Event::Wait(0)).unwrap();
    let w1 = s.position(&Event::Wait(1)).unwrap();
    assert!(w0 < idle && w1 < idle && idle < create, "{:?}", s.events);
    assert_eq!(m.frame_sync().frames_in_flight(), 0);
}

#[test]
fn extent_is_clamped_to_surface_bounds() {
    let (mut m, state) = module(2, SIZE);
    {
        let mut s = state.borrow_mut();
        let caps = &mut s.support.caps;
        caps.current_extent = vk::Extent2D {
            width: 1000,
            height: 700,
        };
        caps.max_image_extent = vk::Extent2D {
            width: 1000,
            height: 700,
        };
    }

    m.recreate_swapchain(RenderSize::new(1280, 720)).unwrap();

    assert_eq!(
        m.extent(),
        Some(vk::Extent2D {
            width: 1000,
            height: 700
        })
    );
}

#[test]
fn starting_minimized_defers_everything_to_the_first_real_frame() {
    let (mut m, state) = module(2, RenderSize::new(0, 0));
    assert!(m.is_suspended());
    assert_eq!(m.extent(), None);
    assert!(state.borrow().events.is_empty());

    let out = m
        .render_frame(&FakeWindow(RenderSize::new(640, 480)), &empty_scene())
        .unwrap();

    assert_eq!(
        out,
        FrameOutcome::Presented {
            slot: 0,
            image_index: 0
        }
    );
    let s = state.borrow();
    assert_eq!(chain_ids(&s.events), vec![(1, None)]);
    assert_eq!(s.pipelines_built, 1);
}

#[test]
fn drop_releases_everything_in_order() {
    let (mut m, state) = module(2, SIZE);
    let win = FakeWindow(SIZE);
    for _ in 0..5 {
        m.render_frame(&win, &empty_scene()).unwrap();
    }
    m.recreate_swapchain(RenderSize::new(1024, 768)).unwrap();

    drop(m);

    let s = state.borrow();
    assert_eq!(
        (s.live_chains, s.live_views, s.live_pipelines, s.live_targets),
        (0, 0, 0, 0)
    );
    let tail = &s.events[s.events.len() - 4..];
    assert!(
        matches!(
            tail,
            [
                Event::WaitIdle,
                Event::DestroyTargets(_),
                Event::DestroyPipeline(_),
                Event::DestroyChain(_),
            ]
        ),
        "{tail:?}"
    );
}

#[test]
fn out_of_date_during_resize_suspends_and_retries() {
    let (mut m, state) = module(2, SIZE);
    let big = RenderSize::new(1024, 768);
    state.borrow_mut().fail_next_create = Some(RenderError::OutOfDate);

    Renderer::resize(&mut m, big).unwrap();

    assert!(m.is_suspended());
    assert_eq!(state.borrow().chains_built, 1);

    let out = m.render_frame(&FakeWindow(big), &empty_scene()).unwrap();
    assert!(out.was_submitted());
    assert!(!m.is_suspended());
    assert_eq!(
        m.extent(),
        Some(vk::Extent2D {
            width: 1024,
            height: 768
        })
    );
    let s = state.borrow();
    assert_eq!((s.chains_built, s.live_chains), (2, 1));
    assert_eq!(s.pipelines_built, 1);
}

#[test]
fn failed_rebuild_never_presents_on_the_old_extent() {
    let (mut m, state) = module(2, SIZE);
    let big = RenderSize::new(1024, 768);
    let win = FakeWindow(big);
    state.borrow_mut().fail_next_create = Some(RenderError::OutOfDate);

    assert_eq!(
        m.render_frame(&win, &empty_scene()).unwrap(),
        FrameOutcome::Suspended
    );
    assert_eq!(
        state
            .borrow()
            .count(|e| matches!(e, Event::Submit { .. })),
        0
    );

    m.render_frame(&win, &empty_scene()).unwrap();
    let s = state.borrow();
    assert_eq!(s.count(|e| matches!(e, Event::Submit { .. })), 1);
    assert!(s.events.contains(&Event::CreateChain {
        id: 4,
        old: Some(1),
        extent: (1024, 768)
    }));
}

#[test]
fn fatal_rebuild_failure_still_surfaces() {
    let (mut m, state) = module(2, SIZE);
    state.borrow_mut().fail_next_create = Some(RenderError::DeviceLost);

    let err = m.recreate_swapchain(RenderSize::new(1024, 768)).unwrap_err();

    assert!(err.is_fatal(), "{err}");
    assert!(!m.is_suspended());
}
