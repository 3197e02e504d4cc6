use crate::model::{DanmakuId, DanmakuRecord, LabelSize};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub const FALLBACK_TRAVERSAL: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceState {
    Created,
    Showing,
    Finished,
}

pub fn can_transition(from: InstanceState, to: InstanceState) -> bool {
    matches!(
        (from, to),
        (InstanceState::Created, InstanceState::Showing)
            | (InstanceState::Created, InstanceState::Finished)
            | (InstanceState::Showing, InstanceState::Finished)
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    /// Reached the far edge.
    Completed,
    /// Cancelled by a matching recall.
    Recalled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Moving { x: i32, y: i32 },
    Completed,
    Idle,
}

/// Time to cross a surface of `surface_width` pixels. Non-positive speeds get
/// [`FALLBACK_TRAVERSAL`].
pub fn traversal_duration(surface_width: i32, speed: i64) -> Duration {
    if speed <= 0 {
        return FALLBACK_TRAVERSAL;
    }
    let millis = 1000 * i64::from(surface_width.max(0)) / speed;
    Duration::from_millis(millis.max(0) as u64)
}

/// What a renderer needs to draw one label for the current frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sprite<'a> {
    pub record: &'a DanmakuRecord,
    pub x: i32,
    pub y: i32,
    pub size: LabelSize,
}

/// One danmaku on one surface.
#[derive(Debug)]
pub struct DanmakuInstance {
    record: Arc<DanmakuRecord>,
    start: (i32, i32),
    end: (i32, i32),
    label: LabelSize,
    state: InstanceState,
    started_at: Option<Instant>,
    duration: Duration,
    position: (i32, i32),
    finish_reason: Option<FinishReason>,
}

impl DanmakuInstance {
    pub fn new(
        record: Arc<DanmakuRecord>,
        start: (i32, i32),
        end: (i32, i32),
        label: LabelSize,
    ) -> Self {
        Self {
            record,
            start,
            end,
            label,
            state: InstanceState::Created,
            started_at: None,
            duration: Duration::ZERO,
            position: start,
            finish_reason: None,
        }
    }

    pub fn id(&self) -> DanmakuId {
        self.record.id()
    }

    pub fn record(&self) -> &Arc<DanmakuRecord> {
        &self.record
    }

    pub fn state(&self) -> InstanceState {
        self.state
    }

    pub fn finish_reason(&self) -> Option<FinishReason> {
        self.finish_reason
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn position(&self) -> (i32, i32) {
        self.position
    }

    pub fn y(&self) -> i32 {
        self.start.1
    }

    /// Whether a recall for this id should reach the instance.
    pub fn is_listening(&self) -> bool {
        self.state != InstanceState::Finished
    }

    /// First presentation: fixes the traversal duration and starts the clock.
    pub fn present(&mut self, now: Instant, surface_width: i32) -> bool {
        if !self.transition(InstanceState::Showing) {
            return false;
        }
        self.duration = traversal_duration(surface_width, self.record.speed);
        self.started_at = Some(now);
        self.position = self.start;
        if self.record.speed <= 0 {
            tracing::debug!(id = %self.id(), speed = self.record.speed, "non-positive speed, using fallback duration");
        }
        true
    }

    pub fn advance(&mut self, now: Instant) -> Step {
        if self.state != InstanceState::Showing {
            return Step::Idle;
        }
        let Some(started_at) = self.started_at else {
            return Step::Idle;
        };

        let elapsed = now.saturating_duration_since(started_at);
        if self.duration.is_zero() || elapsed >= self.duration {
            self.position = self.end;
            self.finish(FinishReason::Completed);
            return Step::Completed;
        }

        let t = elapsed.as_secs_f64() / self.duration.as_secs_f64();
        let lerp = |from: i32, to: i32| f64::from(from) + (f64::from(to) - f64::from(from)) * t;
        let x = lerp(self.start.0, self.end.0);
        let y = lerp(self.start.1, self.end.1);
        self.position = (x.round() as i32, y.round() as i32);
        Step::Moving {
            x: self.position.0,
            y: self.position.1,
        }
    }

    /// Halts the traversal. Returns `false` if the instance had already
    /// finished by either path.
    pub fn recall(&mut self) -> bool {
        self.finish(FinishReason::Recalled)
    }

    fn finish(&mut self, reason: FinishReason) -> bool {
        if !self.transition(InstanceState::Finished) {
            return false;
        }
        self.finish_reason = Some(reason);
        true
    }

    fn transition(&mut self, next: InstanceState) -> bool {
        if !can_transition(self.state, next) {
            return false;
        }
        self.state = next;
        true
    }

    pub fn sprite(&self) -> Sprite<'_> {
        Sprite {
            record: &self.record,
            x: self.position.0,
            y: self.position.1,
            size: self.label,
        }
    }
}
