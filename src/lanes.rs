use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::collections::VecDeque;

pub const LANE_JITTER_PX: i32 = 5;
pub const DEFAULT_SPACING_RATIO: f64 = 1.0;

/// Hands out vertical positions on one surface.
///
/// Lanes cover the top quarter of the surface and are reused round-robin, so
/// allocation never runs dry; a new danmaku may share a lane with an older
/// one that is still on screen. Not meant to be shared between threads.
#[derive(Debug)]
pub struct LaneAllocator<R: Rng = StdRng> {
    queue: VecDeque<i32>,
    height: i32,
    spacing_ratio: f64,
    rng: R,
}

impl LaneAllocator<StdRng> {
    pub fn new(height: i32, spacing_ratio: f64) -> Self {
        Self::with_rng(height, spacing_ratio, StdRng::from_entropy())
    }
}

impl<R: Rng> LaneAllocator<R> {
    pub fn with_rng(height: i32, spacing_ratio: f64, rng: R) -> Self {
        let mut allocator = Self {
            queue: VecDeque::new(),
            height,
            spacing_ratio,
            rng,
        };
        allocator.calculate_available_positions();
        allocator
    }

    /// Discards the current queue and builds a freshly shuffled one for the
    /// current height.
    fn calculate_available_positions(&mut self) {
        self.queue.clear();
        let band = self.height.max(0) / 4;
        let step = ((self.height.max(0) as f64 / 4.0 / 10.0 * self.spacing_ratio) as i32).max(1);

        let mut positions: Vec<i32> = (0..band).step_by(step as usize).collect();
        positions.shuffle(&mut self.rng);
        self.queue.extend(positions);
        tracing::debug!(
            height = self.height,
            step,
            lanes = self.queue.len(),
            "lane positions recalculated"
        );
    }

    pub fn height(&self) -> i32 {
        self.height
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Lanes in the order they will be handed out.
    pub fn lanes(&self) -> Vec<i32> {
        self.queue.iter().copied().collect()
    }

    /// Next unjittered lane, rotated to the back of the queue.
    pub fn next_lane(&mut self) -> Option<i32> {
        let y = self.queue.pop_front()?;
        self.queue.push_back(y);
        Some(y)
    }

    /// Next lane with jitter applied, kept fully on-surface for a label of
    /// `label_height` pixels.
    pub fn next(&mut self, label_height: i32) -> i32 {
        let Some(y) = self.next_lane() else {
            return 0;
        };
        let jitter = self.rng.gen_range(-LANE_JITTER_PX..=LANE_JITTER_PX);
        let upper = (self.height - label_height).max(0);
        (y + jitter).max(0).min(upper)
    }

    pub fn resize(&mut self, height: i32) {
        if height == self.height && !self.queue.is_empty() {
            return;
        }
        self.height = height;
        self.calculate_available_positions();
    }
}
