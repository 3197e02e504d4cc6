use crate::bus::{DanmakuEvent, EventBus, EventKind, SubscriptionId};
use crate::instance::{DanmakuInstance, Sprite, Step};
use crate::lanes::LaneAllocator;
use crate::model::{DanmakuId, DanmakuRecord, LabelSize};
use anyhow::{bail, Result};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SurfaceRect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl SurfaceRect {
    pub const fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }
}

/// Measures how large a record renders. Real renderers plug in their font
/// metrics here.
pub trait LabelMetrics {
    fn measure(&self, record: &DanmakuRecord) -> LabelSize;
}

/// Width is one em per character, height is the point size at 96 dpi.
#[derive(Debug, Clone, Copy, Default)]
pub struct EstimatedMetrics;

impl LabelMetrics for EstimatedMetrics {
    fn measure(&self, record: &DanmakuRecord) -> LabelSize {
        let size = i64::from(record.font_size);
        let chars = i64::try_from(record.text.chars().count()).unwrap_or(i64::MAX);
        let clamp = |px: i64| px.clamp(0, i64::from(i32::MAX)) as i32;
        LabelSize {
            width: clamp(size.saturating_mul(chars)),
            height: clamp((size.saturating_mul(96) + 71) / 72),
        }
    }
}

/// Owns every danmaku shown on one monitor.
pub struct SurfaceController {
    index: usize,
    rect: SurfaceRect,
    visible: bool,
    spacing_ratio: f64,
    lanes: LaneAllocator,
    instances: HashMap<DanmakuId, DanmakuInstance>,
    metrics: Box<dyn LabelMetrics>,
    subscriptions: Vec<SubscriptionId>,
}

impl SurfaceController {
    /// Builds the controller for monitor `index`. Fails if the index does not
    /// name one of `monitors` or its geometry is empty.
    pub fn new(index: i32, monitors: &[SurfaceRect], spacing_ratio: f64) -> Result<Self> {
        if index < 0 {
            bail!("surface index must be non-negative, got {index}");
        }
        let Some(rect) = monitors.get(index as usize).copied() else {
            bail!(
                "surface index {index} out of range ({} monitors available)",
                monitors.len()
            );
        };
        if rect.width <= 0 || rect.height <= 0 {
            bail!(
                "surface {index} has empty geometry {}x{}",
                rect.width,
                rect.height
            );
        }
        if !(spacing_ratio.is_finite() && spacing_ratio > 0.0) {
            bail!("lane spacing ratio must be positive, got {spacing_ratio}");
        }

        Ok(Self {
            index: index as usize,
            rect,
            visible: true,
            spacing_ratio,
            lanes: LaneAllocator::new(rect.height, spacing_ratio),
            instances: HashMap::new(),
            metrics: Box::new(EstimatedMetrics),
            subscriptions: Vec::new(),
        })
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.lanes = LaneAllocator::with_rng(
            self.rect.height,
            self.spacing_ratio,
            StdRng::seed_from_u64(seed),
        );
        self
    }

    pub fn with_metrics(mut self, metrics: impl LabelMetrics + 'static) -> Self {
        self.metrics = Box::new(metrics);
        self
    }

    /// Subscribes the controller to spawn and recall events. Handlers hold a
    /// weak reference and drop themselves once the controller is gone.
    pub fn attach(this: &Rc<RefCell<Self>>, bus: &mut EventBus) {
        let weak: Weak<RefCell<Self>> = Rc::downgrade(this);
        let spawn = bus.subscribe(EventKind::Spawn, move |event, delivery| {
            let Some(controller) = weak.upgrade() else {
                delivery.unsubscribe_self();
                return;
            };
            if let DanmakuEvent::Spawn(record) = event {
                controller.borrow_mut().handle_spawn(Arc::clone(record));
            }
        });

        let weak: Weak<RefCell<Self>> = Rc::downgrade(this);
        let recall = bus.subscribe(EventKind::Recall, move |event, delivery| {
            let Some(controller) = weak.upgrade() else {
                delivery.unsubscribe_self();
                return;
            };
            if let DanmakuEvent::Recall(id) = event {
                controller.borrow_mut().handle_recall(*id);
            }
        });

        this.borrow_mut().subscriptions.extend([spawn, recall]);
    }

    pub fn detach(&mut self, bus: &mut EventBus) {
        for id in self.subscriptions.drain(..) {
            bus.unsubscribe(id);
        }
    }

    /// Queues a new instance for `record`. It starts moving on the next tick.
    pub fn handle_spawn(&mut self, record: Arc<DanmakuRecord>) -> bool {
        let id = record.id();
        if !self.visible {
            tracing::debug!(surface = self.index, %id, "surface hidden, spawn ignored");
            return false;
        }
        if self.instances.contains_key(&id) {
            tracing::debug!(surface = self.index, %id, "duplicate spawn ignored");
            return false;
        }

        let label = self.metrics.measure(&record);
        let y = self.lanes.next(label.height);
        let start = (self.rect.width, y);
        let end = (-label.width, y);
        tracing::debug!(surface = self.index, %id, y, text = %record.text, "danmaku spawned");
        self.instances
            .insert(id, DanmakuInstance::new(record, start, end, label));
        true
    }

    /// Stops and removes the matching instance. Unknown ids are ignored.
    pub fn handle_recall(&mut self, id: DanmakuId) -> bool {
        let Some(instance) = self.instances.get_mut(&id) else {
            return false;
        };
        if !instance.is_listening() || !instance.recall() {
            return false;
        }
        self.instances.remove(&id);
        tracing::debug!(surface = self.index, %id, "danmaku recalled");
        true
    }

    /// Advances every instance to `now`. Instances that reached the far edge
    /// are removed and their ids returned; announcing them is up to the caller.
    pub fn tick(&mut self, now: Instant) -> Vec<DanmakuId> {
        let width = self.rect.width;
        let mut completed = Vec::new();
        for instance in self.instances.values_mut() {
            instance.present(now, width);
            if instance.advance(now) == Step::Completed {
                completed.push(instance.id());
            }
        }

        completed.sort_unstable();
        for id in &completed {
            self.instances.remove(id);
            tracing::debug!(surface = self.index, %id, "danmaku finished");
        }
        completed
    }

    /// Takes effect for future spawns only; live instances keep their lane.
    pub fn resize(&mut self, width: i32, height: i32) {
        if width <= 0 || height <= 0 {
            tracing::warn!(surface = self.index, width, height, "ignoring empty resize");
            return;
        }
        self.rect.width = width;
        self.rect.height = height;
        self.lanes.resize(height);
    }

    pub fn set_visible(&mut self, visible: bool) {
        if self.visible != visible {
            tracing::info!(surface = self.index, visible, "surface visibility changed");
        }
        self.visible = visible;
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn rect(&self) -> SurfaceRect {
        self.rect
    }

    pub fn lanes(&self) -> &LaneAllocator {
        &self.lanes
    }

    pub fn live_count(&self) -> usize {
        self.instances.len()
    }

    pub fn instance(&self, id: DanmakuId) -> Option<&DanmakuInstance> {
        self.instances.get(&id)
    }

    /// Current frame, ordered by spawn order.
    pub fn sprites(&self) -> Vec<Sprite<'_>> {
        let mut live: Vec<&DanmakuInstance> = self.instances.values().collect();
        live.sort_unstable_by_key(|instance| instance.id());
        live.into_iter().map(DanmakuInstance::sprite).collect()
    }

    /// Drops every live instance without announcing them.
    pub fn clear(&mut self) {
        self.instances.clear();
    }
}
