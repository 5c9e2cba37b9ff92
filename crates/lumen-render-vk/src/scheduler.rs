// SPDX-License-Identifier: CEPL-1.0
//! Frames-in-flight loop.
//!
//! Per tick, for slot `i`:
//! 1. wait for slot `i`'s fence (bounded; a timeout is a device hang)
//! 2. resize pending or acquire out of date: rebuild and skip the tick
//! 3. reset the fence, only after 1 succeeded
//! 4. record, 5. submit, 6. present
//! 7. advance to `(i + 1) % F`
//!
//! The GPU side is behind [`FrameBackend`] so the ordering can be checked
//! without a device.

use lumen_core::ResizeSignal;
use lumen_render::{RenderSize, SurfaceStatus, WindowEvents};
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::error::Result;
use crate::sync::slot_count;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Acquire {
    Image { index: u32, suboptimal: bool },
    OutOfDate,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Present {
    Done,
    /// Out of date or suboptimal; the chain should be rebuilt.
    Stale,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoopState {
    Running,
    Resizing,
    ShuttingDown,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TickOutcome {
    Presented,
    Skipped,
    Closed,
}

/// GPU operations the scheduler sequences. `slot` is always in
/// `0..frames_in_flight()`.
pub trait FrameBackend {
    fn frames_in_flight(&self) -> usize;
    /// Block on the slot's fence. Must fail with `DeviceHang` on timeout.
    fn wait_for_slot(&mut self, slot: usize, timeout: Duration) -> Result<()>;
    fn acquire(&mut self, slot: usize) -> Result<Acquire>;
    fn reset_slot(&mut self, slot: usize) -> Result<()>;
    fn record(&mut self, slot: usize, image: u32) -> Result<()>;
    fn submit(&mut self, slot: usize) -> Result<()>;
    fn present(&mut self, slot: usize, image: u32) -> Result<Present>;
    fn wait_idle(&mut self) -> Result<()>;
    /// Rebuild the chain for `size` and replace every semaphore. Called with
    /// the device idle.
    fn rebuild(&mut self, size: RenderSize) -> Result<()>;
}

pub struct FrameScheduler<B: FrameBackend> {
    backend: B,
    frame_in_flight: usize,
    state: LoopState,
    resize: ResizeSignal,
    fence_timeout: Duration,
}

impl<B: FrameBackend> FrameScheduler<B> {
    /// Fails when the backend reports no frame slots.
    pub fn new(backend: B, resize: ResizeSignal, fence_timeout: Duration) -> Result<Self> {
        slot_count(backend.frames_in_flight())?;
        Ok(Self {
            backend,
            frame_in_flight: 0,
            state: LoopState::Running,
            resize,
            fence_timeout,
        })
    }

    pub fn frame_in_flight(&self) -> usize {
        self.frame_in_flight
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn resize_signal(&self) -> &ResizeSignal {
        &self.resize
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    /// Runs until the window asks to close, then drains the device.
    pub fn run_loop(&mut self, window: &mut dyn WindowEvents) -> Result<()> {
        let mut frames = 0u32;
        let mut last_report = Instant::now();

        let result = loop {
            match self.tick(window) {
                Ok(TickOutcome::Closed) => break Ok(()),
                Ok(TickOutcome::Presented) => frames = frames.saturating_add(1),
                Ok(TickOutcome::Skipped) => {}
                Err(e) => break Err(e),
            }

            let now = Instant::now();
            if now.duration_since(last_report).as_secs_f32() >= 1.0 {
                info!("fps ~ {frames}");
                frames = 0;
                last_report = now;
            }
        };

        self.state = LoopState::ShuttingDown;
        let drained = self.backend.wait_idle();
        info!("render loop stopped");
        result.and(drained)
    }

    pub fn tick(&mut self, window: &mut dyn WindowEvents) -> Result<TickOutcome> {
        if self.state == LoopState::ShuttingDown {
            return Ok(TickOutcome::Closed);
        }
        if window.poll_events() == SurfaceStatus::CloseRequested {
            self.state = LoopState::ShuttingDown;
            return Ok(TickOutcome::Closed);
        }

        let slot = self.frame_in_flight;
        self.backend.wait_for_slot(slot, self.fence_timeout)?;

        if self.resize.is_raised() {
            return self.recover(window);
        }
        let (image, suboptimal) = match self.backend.acquire(slot)? {
            Acquire::Image { index, suboptimal } => (index, suboptimal),
            Acquire::OutOfDate => return self.recover(window),
        };

        self.backend.reset_slot(slot)?;
        self.backend.record(slot, image)?;
        self.backend.submit(slot)?;
        let present = self.backend.present(slot, image)?;

        self.frame_in_flight = (slot + 1) % self.backend.frames_in_flight();

        if present == Present::Stale || suboptimal || self.resize.is_raised() {
            // This frame still completes; only the next acquire needs the new chain.
            if self.recover(window)? == TickOutcome::Closed {
                return Ok(TickOutcome::Closed);
            }
        }
        Ok(TickOutcome::Presented)
    }

    fn recover(&mut self, window: &mut dyn WindowEvents) -> Result<TickOutcome> {
        self.state = LoopState::Resizing;
        // Consume first: a resize arriving during the rebuild raises it again.
        self.resize.take();

        let mut size = window.framebuffer_size();
        while size.is_empty() {
            debug!("framebuffer is {}x{}, waiting", size.width, size.height);
            if window.wait_events() == SurfaceStatus::CloseRequested {
                self.state = LoopState::ShuttingDown;
                return Ok(TickOutcome::Closed);
            }
            size = window.framebuffer_size();
        }

        self.backend.wait_idle()?;
        self.backend.rebuild(size)?;
        self.state = LoopState::Running;
        Ok(TickOutcome::Skipped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::VkError;
    use std::collections::VecDeque;

    #[derive(Clone, Debug, PartialEq, Eq)]
    enum Ev {
        Wait(usize),
        Acquire(usize),
        Reset(usize),
        Record(usize, u32),
        Submit(usize),
        Present(usize, u32),
        WaitIdle,
        Rebuild(u32, u32),
    }

    #[derive(Default)]
    struct Mock {
        frames: usize,
        images: u32,
        next_image: u32,
        log: Vec<Ev>,
        acquire_script: VecDeque<Acquire>,
        present_script: VecDeque<Present>,
        hang_on_wait: bool,
    }

    impl Mock {
        fn new(frames: usize) -> Self {
            Self {
                frames,
                images: 3,
                ..Default::default()
            }
        }

        fn submits(&self) -> Vec<usize> {
            self.log
                .iter()
                .filter_map(|e| match e {
                    Ev::Submit(s) => Some(*s),
                    _ => None,
                })
                .collect()
        }
    }

    impl FrameBackend for Mock {
        fn frames_in_flight(&self) -> usize {
            self.frames
        }
        fn wait_for_slot(&mut self, slot: usize, timeout: Duration) -> Result<()> {
            if self.hang_on_wait {
                return Err(VkError::DeviceHang { slot, timeout });
            }
            self.log.push(Ev::Wait(slot));
            Ok(())
        }
        fn acquire(&mut self, slot: usize) -> Result<Acquire> {
            self.log.push(Ev::Acquire(slot));
            if let Some(a) = self.acquire_script.pop_front() {
                return Ok(a);
            }
            let index = self.next_image;
            self.next_image = (self.next_image + 1) % self.images;
            Ok(Acquire::Image {
                index,
                suboptimal: false,
            })
        }
        fn reset_slot(&mut self, slot: usize) -> Result<()> {
            self.log.push(Ev::Reset(slot));
            Ok(())
        }
        fn record(&mut self, slot: usize, image: u32) -> Result<()> {
            self.log.push(Ev::Record(slot, image));
            Ok(())
        }
        fn submit(&mut self, slot: usize) -> Result<()> {
            self.log.push(Ev::Submit(slot));
            Ok(())
        }
        fn present(&mut self, slot: usize, image: u32) -> Result<Present> {
            self.log.push(Ev::Present(slot, image));
            Ok(self.present_script.pop_front().unwrap_or(Present::Done))
        }
        fn wait_idle(&mut self) -> Result<()> {
            self.log.push(Ev::WaitIdle);
            Ok(())
        }
        fn rebuild(&mut self, size: RenderSize) -> Result<()> {
            self.log.push(Ev::Rebuild(size.width, size.height));
            Ok(())
        }
    }

    struct FakeWindow {
        sizes: VecDeque<RenderSize>,
        size: RenderSize,
        close_after_polls: Option<usize>,
        polls: usize,
        waits: usize,
    }

    impl FakeWindow {
        fn new(w: u32, h: u32) -> Self {
            Self {
                sizes: VecDeque::new(),
                size: RenderSize::new(w, h),
                close_after_polls: None,
                polls: 0,
                waits: 0,
            }
        }
    }

    impl WindowEvents for FakeWindow {
        fn framebuffer_size(&self) -> RenderSize {
            self.sizes.front().copied().unwrap_or(self.size)
        }
        fn poll_events(&mut self) -> SurfaceStatus {
            self.polls += 1;
            match self.close_after_polls {
                Some(n) if self.polls > n => SurfaceStatus::CloseRequested,
                _ => SurfaceStatus::Open,
            }
        }
        fn wait_events(&mut self) -> SurfaceStatus {
            self.waits += 1;
            self.sizes.pop_front();
            SurfaceStatus::Open
        }
        fn set_resize_signal(&mut self, _signal: ResizeSignal) {}
    }

    fn scheduler(frames: usize) -> FrameScheduler<Mock> {
        FrameScheduler::new(Mock::new(frames), ResizeSignal::new(), Duration::from_secs(1))
            .unwrap()
    }

    #[test]
    fn zero_frames_in_flight_is_rejected() {
        let r = FrameScheduler::new(Mock::new(0), ResizeSignal::new(), Duration::from_secs(1));
        assert!(matches!(
            r,
            Err(crate::error::VkError::InvalidFrameCount { count: 0, .. })
        ));
    }

    #[test]
    fn two_slots_alternate() {
        let mut s = scheduler(2);
        let mut w = FakeWindow::new(800, 600);
        let mut seen = Vec::new();
        for _ in 0..5 {
            seen.push(s.frame_in_flight());
            assert_eq!(s.tick(&mut w).unwrap(), TickOutcome::Presented);
        }
        assert_eq!(seen, vec![0, 1, 0, 1, 0]);
        assert_eq!(s.backend().submits(), vec![0, 1, 0, 1, 0]);
        assert_eq!(s.frame_in_flight(), 1);
    }

    #[test]
    fn fence_wait_precedes_every_reset() {
        let mut s = scheduler(3);
        let mut w = FakeWindow::new(640, 480);
        for _ in 0..7 {
            s.tick(&mut w).unwrap();
        }
        let log = &s.backend().log;
        let mut waited = [false; 3];
        for ev in log {
            match *ev {
                Ev::Wait(i) => waited[i] = true,
                Ev::Reset(i) => {
                    assert!(waited[i], "slot {i} reset without a fence wait: {log:?}");
                    waited[i] = false;
                }
                _ => {}
            }
        }
    }

    #[test]
    fn tick_order_is_acquire_record_submit_present() {
        let mut s = scheduler(2);
        let mut w = FakeWindow::new(640, 480);
        s.tick(&mut w).unwrap();
        assert_eq!(
            s.backend().log,
            vec![
                Ev::Wait(0),
                Ev::Acquire(0),
                Ev::Reset(0),
                Ev::Record(0, 0),
                Ev::Submit(0),
                Ev::Present(0, 0),
            ]
        );
    }

    #[test]
    fn pending_resize_skips_the_tick() {
        let mut s = scheduler(2);
        let mut w = FakeWindow::new(1024, 768);
        s.resize_signal().raise();

        assert_eq!(s.tick(&mut w).unwrap(), TickOutcome::Skipped);
        assert_eq!(
            s.backend().log,
            vec![Ev::Wait(0), Ev::WaitIdle, Ev::Rebuild(1024, 768)]
        );
        assert!(!s.resize_signal().is_raised());
        assert_eq!(s.frame_in_flight(), 0);
        assert_eq!(s.state(), LoopState::Running);

        assert_eq!(s.tick(&mut w).unwrap(), TickOutcome::Presented);
        assert_eq!(s.backend().submits(), vec![0]);
    }

    #[test]
    fn out_of_date_acquire_rebuilds_without_submitting() {
        let mut s = scheduler(2);
        s.backend_mut().acquire_script.push_back(Acquire::OutOfDate);
        let mut w = FakeWindow::new(800, 600);

        assert_eq!(s.tick(&mut w).unwrap(), TickOutcome::Skipped);
        let log = &s.backend().log;
        assert!(!log.iter().any(|e| matches!(e, Ev::Reset(_) | Ev::Submit(_))));
        assert_eq!(log.last(), Some(&Ev::Rebuild(800, 600)));
        assert_eq!(s.frame_in_flight(), 0);
    }

    #[test]
    fn stale_present_still_advances_then_rebuilds() {
        let mut s = scheduler(2);
        s.backend_mut().present_script.push_back(Present::Stale);
        let mut w = FakeWindow::new(800, 600);

        assert_eq!(s.tick(&mut w).unwrap(), TickOutcome::Presented);
        let log = &s.backend().log;
        let present = log.iter().position(|e| matches!(e, Ev::Present(..))).unwrap();
        let rebuild = log.iter().position(|e| matches!(e, Ev::Rebuild(..))).unwrap();
        assert!(present < rebuild);
        assert_eq!(s.frame_in_flight(), 1);
    }

    #[test]
    fn suboptimal_acquire_presents_then_rebuilds() {
        let mut s = scheduler(2);
        s.backend_mut().acquire_script.push_back(Acquire::Image {
            index: 2,
            suboptimal: true,
        });
        let mut w = FakeWindow::new(800, 600);

        assert_eq!(s.tick(&mut w).unwrap(), TickOutcome::Presented);
        let log = &s.backend().log;
        assert!(log.contains(&Ev::Present(0, 2)));
        assert_eq!(log.last(), Some(&Ev::Rebuild(800, 600)));
    }

    #[test]
    fn minimised_window_waits_for_nonzero_size() {
        let mut s = scheduler(2);
        let mut w = FakeWindow::new(300, 200);
        w.sizes.extend([RenderSize::new(0, 0), RenderSize::new(300, 0)]);
        s.resize_signal().raise();

        assert_eq!(s.tick(&mut w).unwrap(), TickOutcome::Skipped);
        assert_eq!(w.waits, 2);
        assert_eq!(s.backend().log.last(), Some(&Ev::Rebuild(300, 200)));
    }

    #[test]
    fn fence_timeout_is_fatal() {
        let mut s = scheduler(2);
        s.backend_mut().hang_on_wait = true;
        let mut w = FakeWindow::new(800, 600);
        let err = s.tick(&mut w).unwrap_err();
        assert!(matches!(err, VkError::DeviceHang { slot: 0, .. }));
    }

    #[test]
    fn close_drains_the_device() {
        let mut s = scheduler(2);
        let mut w = FakeWindow::new(800, 600);
        w.close_after_polls = Some(3);

        s.run_loop(&mut w).unwrap();
        assert_eq!(s.backend().submits().len(), 3);
        assert_eq!(s.backend().log.last(), Some(&Ev::WaitIdle));
        assert_eq!(s.state(), LoopState::ShuttingDown);
        assert_eq!(s.tick(&mut w).unwrap(), TickOutcome::Closed);
    }

    #[test]
    fn errors_still_drain_the_device() {
        let mut s = scheduler(2);
        s.backend_mut().hang_on_wait = true;
        let mut w = FakeWindow::new(800, 600);
        assert!(s.run_loop(&mut w).is_err());
        assert_eq!(s.backend().log, vec![Ev::WaitIdle]);
    }
}
