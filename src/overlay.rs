use crate::bus::{DanmakuEvent, EventBus, EventKind, Publisher, SubscriptionId};
use crate::model::DanmakuId;
use crate::settings::Settings;
use crate::surface::SurfaceController;
use anyhow::{bail, Result};
use std::cell::{Ref, RefCell};
use std::collections::HashSet;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub delivered: usize,
    pub completed: Vec<DanmakuId>,
    /// Ids whose recall was published this frame because the last surface
    /// showing them finished.
    pub announced: Vec<DanmakuId>,
    pub live: usize,
}

/// The loop-thread side of the overlay: owns the bus and one controller per
/// monitor, and steps them all against a single clock.
pub struct Overlay {
    bus: EventBus,
    controllers: Vec<Rc<RefCell<SurfaceController>>>,
    /// Finished somewhere, still moving on a wider surface.
    pending_completions: Rc<RefCell<HashSet<DanmakuId>>>,
    recall_watch: SubscriptionId,
    frame_interval: Duration,
    shut_down: bool,
}

impl Overlay {
    pub fn new(settings: &Settings, bus: EventBus) -> Result<Self> {
        if settings.surfaces.is_empty() {
            bail!("no surfaces configured");
        }
        let monitors = settings.monitors();
        let mut controllers = Vec::with_capacity(monitors.len());
        for (index, surface) in settings.surfaces.iter().enumerate() {
            let mut controller =
                SurfaceController::new(index as i32, &monitors, settings.lane_spacing_ratio)?;
            controller.set_visible(surface.visible);
            controllers.push(controller);
        }
        let mut overlay = Self::with_controllers(bus, controllers);
        overlay.frame_interval = settings.frame_interval();
        Ok(overlay)
    }

    pub fn with_controllers(mut bus: EventBus, controllers: Vec<SurfaceController>) -> Self {
        let controllers: Vec<_> = controllers
            .into_iter()
            .map(|controller| {
                let controller = Rc::new(RefCell::new(controller));
                SurfaceController::attach(&controller, &mut bus);
                controller
            })
            .collect();

        // An explicit recall settles any completion still waiting on others.
        let pending_completions = Rc::new(RefCell::new(HashSet::new()));
        let pending = Rc::clone(&pending_completions);
        let recall_watch = bus.subscribe(EventKind::Recall, move |event, _| {
            pending.borrow_mut().remove(&event.id());
        });

        tracing::info!(surfaces = controllers.len(), "overlay ready");
        Self {
            bus,
            controllers,
            pending_completions,
            recall_watch,
            frame_interval: Duration::from_millis(16),
            shut_down: false,
        }
    }

    pub fn publisher(&self) -> Publisher {
        self.bus.publisher()
    }

    pub fn surface_count(&self) -> usize {
        self.controllers.len()
    }

    pub fn controller(&self, index: usize) -> Option<Ref<'_, SurfaceController>> {
        self.controllers.get(index).map(|c| c.borrow())
    }

    pub fn set_visible(&self, index: usize, visible: bool) -> bool {
        let Some(controller) = self.controllers.get(index) else {
            return false;
        };
        controller.borrow_mut().set_visible(visible);
        true
    }

    pub fn resize(&self, index: usize, width: i32, height: i32) -> bool {
        let Some(controller) = self.controllers.get(index) else {
            return false;
        };
        controller.borrow_mut().resize(width, height);
        true
    }

    pub fn live_count(&self) -> usize {
        self.controllers.iter().map(|c| c.borrow().live_count()).sum()
    }

    /// Delivers queued events, advances every surface to `now`, then announces
    /// a recall for each danmaku that no surface is showing any more. Surfaces
    /// of different widths finish the same danmaku at different times; the
    /// recall waits for the last one.
    pub fn step(&mut self, now: Instant) -> FrameStats {
        if self.shut_down {
            return FrameStats::default();
        }
        let mut stats = FrameStats {
            delivered: self.bus.dispatch_pending(),
            ..FrameStats::default()
        };
        for controller in &self.controllers {
            stats.completed.extend(controller.borrow_mut().tick(now));
        }
        stats.announced = self.announce_completions(&stats.completed);
        stats.delivered += self.bus.dispatch_pending();
        stats.live = self.live_count();
        stats
    }

    fn announce_completions(&self, completed: &[DanmakuId]) -> Vec<DanmakuId> {
        let mut pending = self.pending_completions.borrow_mut();
        pending.extend(completed.iter().copied());
        let mut ready: Vec<DanmakuId> = pending
            .iter()
            .copied()
            .filter(|id| {
                self.controllers
                    .iter()
                    .all(|controller| controller.borrow().instance(*id).is_none())
            })
            .collect();
        ready.sort_unstable();
        for id in &ready {
            pending.remove(id);
            self.bus.publish(DanmakuEvent::Recall(*id));
        }
        ready
    }

    /// Steps at the configured frame interval until `stop` is raised.
    pub fn run(&mut self, stop: &AtomicBool) {
        tracing::info!(interval_ms = self.frame_interval.as_millis() as u64, "overlay loop running");
        while !stop.load(Ordering::SeqCst) {
            let frame_start = Instant::now();
            let stats = self.step(frame_start);
            for id in &stats.announced {
                tracing::trace!(%id, "retired");
            }
            let elapsed = frame_start.elapsed();
            if let Some(remaining) = self.frame_interval.checked_sub(elapsed) {
                std::thread::sleep(remaining);
            }
        }
        self.shutdown();
    }

    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;
        for controller in &self.controllers {
            let mut controller = controller.borrow_mut();
            controller.detach(&mut self.bus);
            controller.clear();
        }
        self.bus.unsubscribe(self.recall_watch);
        self.pending_completions.borrow_mut().clear();
        self.bus.shutdown();
        tracing::info!("overlay shut down");
    }
}

impl Drop for Overlay {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::DanmakuRecord;
    use crate::settings::SurfaceSettings;
    use crate::surface::SurfaceRect;

    fn two_surface_settings() -> Settings {
        Settings {
            surfaces: vec![
                SurfaceSettings::new(SurfaceRect::new(0, 0, 1000, 1000)),
                SurfaceSettings::new(SurfaceRect::new(1000, 0, 1000, 800)),
            ],
            ..Settings::default()
        }
    }

    #[test]
    fn empty_surface_list_fails_fast() {
        let settings = Settings {
            surfaces: Vec::new(),
            ..Settings::default()
        };
        assert!(Overlay::new(&settings, EventBus::new()).is_err());
    }

    #[test]
    fn spawn_fans_out_to_every_surface() {
        let mut overlay = Overlay::new(&two_surface_settings(), EventBus::new()).unwrap();
        let record = DanmakuRecord::new("hi").unwrap();
        let id = record.id();
        overlay.publisher().spawn(record);

        let stats = overlay.step(Instant::now());
        assert_eq!(stats.delivered, 1);
        assert_eq!(stats.live, 2);
        for index in 0..2 {
            assert!(overlay.controller(index).unwrap().instance(id).is_some());
        }
    }

    #[test]
    fn recall_removes_from_all_surfaces() {
        let mut overlay = Overlay::new(&two_surface_settings(), EventBus::new()).unwrap();
        let record = DanmakuRecord::new("bye").unwrap();
        let id = record.id();
        let publisher = overlay.publisher();
        publisher.spawn(record);
        let t0 = Instant::now();
        overlay.step(t0);

        publisher.recall(id);
        publisher.recall(id);
        let stats = overlay.step(t0 + Duration::from_millis(100));
        assert_eq!(stats.live, 0);
        assert!(stats.completed.is_empty());
    }

    #[test]
    fn completion_on_one_frame_retires_everywhere() {
        let mut overlay = Overlay::new(&two_surface_settings(), EventBus::new()).unwrap();
        let record = DanmakuRecord::new("run").unwrap();
        let id = record.id();
        overlay.publisher().spawn(record);
        let t0 = Instant::now();
        overlay.step(t0);
        let stats = overlay.step(t0 + Duration::from_secs(10));
        assert_eq!(stats.completed.len(), 2);
        assert_eq!(stats.announced, vec![id]);
        assert_eq!(stats.delivered, 1);
        assert_eq!(stats.live, 0);
    }

    fn mixed_width_settings() -> Settings {
        Settings {
            surfaces: vec![
                SurfaceSettings::new(SurfaceRect::new(0, 0, 1920, 1080)),
                SurfaceSettings::new(SurfaceRect::new(1920, 0, 800, 600)),
            ],
            ..Settings::default()
        }
    }

    #[test]
    fn narrow_surface_finishing_leaves_wide_one_moving() {
        let mut overlay = Overlay::new(&mixed_width_settings(), EventBus::new()).unwrap();
        let record = DanmakuRecord::new("wide").unwrap();
        let id = record.id();
        overlay.publisher().spawn(record);
        let t0 = Instant::now();
        overlay.step(t0);

        let narrow_done = overlay.step(t0 + Duration::from_millis(2700));
        assert_eq!(narrow_done.completed, vec![id]);
        assert!(narrow_done.announced.is_empty());
        assert_eq!(narrow_done.live, 1);
        let wide = overlay.controller(0).unwrap();
        let x = wide.instance(id).expect("still crossing the wide surface").position().0;
        assert!(x > 0 && x < 1920, "x {x}");
        drop(wide);

        let mid = overlay.step(t0 + Duration::from_millis(4000));
        assert!(mid.announced.is_empty());
        assert_eq!(mid.live, 1);

        let wide_done = overlay.step(t0 + Duration::from_millis(6400));
        assert_eq!(wide_done.completed, vec![id]);
        assert_eq!(wide_done.announced, vec![id]);
        assert_eq!(wide_done.live, 0);
        assert!(overlay.step(t0 + Duration::from_secs(7)).announced.is_empty());
    }

    #[test]
    fn explicit_recall_settles_a_waiting_completion() {
        let mut overlay = Overlay::new(&mixed_width_settings(), EventBus::new()).unwrap();
        let record = DanmakuRecord::new("cut").unwrap();
        let id = record.id();
        let publisher = overlay.publisher();
        publisher.spawn(record);
        let t0 = Instant::now();
        overlay.step(t0);
        overlay.step(t0 + Duration::from_millis(2700));

        publisher.recall(id);
        let recalled = overlay.step(t0 + Duration::from_millis(3000));
        assert_eq!(recalled.delivered, 1);
        assert!(recalled.announced.is_empty());
        assert_eq!(recalled.live, 0);

        let later = overlay.step(t0 + Duration::from_secs(7));
        assert!(later.announced.is_empty());
        assert_eq!(later.delivered, 0);
    }

    #[test]
    fn hidden_surface_opts_out_of_new_spawns() {
        let mut settings = two_surface_settings();
        settings.surfaces[1].visible = false;
        let mut overlay = Overlay::new(&settings, EventBus::new()).unwrap();
        overlay.publisher().spawn(DanmakuRecord::new("one").unwrap());
        let stats = overlay.step(Instant::now());
        assert_eq!(stats.live, 1);
        assert_eq!(overlay.controller(1).unwrap().live_count(), 0);

        assert!(overlay.set_visible(1, true));
        overlay.publisher().spawn(DanmakuRecord::new("two").unwrap());
        assert_eq!(overlay.step(Instant::now()).live, 3);
    }

    #[test]
    fn shutdown_stops_delivery() {
        let mut overlay = Overlay::new(&two_surface_settings(), EventBus::new()).unwrap();
        let publisher = overlay.publisher();
        overlay.shutdown();
        publisher.spawn(DanmakuRecord::new("late").unwrap());
        assert_eq!(overlay.step(Instant::now()), FrameStats::default());
        assert_eq!(overlay.live_count(), 0);
    }

    #[test]
    fn run_returns_when_stop_is_raised() {
        let mut overlay = Overlay::new(&two_surface_settings(), EventBus::new()).unwrap();
        let stop = AtomicBool::new(true);
        overlay.run(&stop);
        assert_eq!(overlay.live_count(), 0);
    }
}
