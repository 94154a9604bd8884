// ============================================================================
// REDRAW SCHEDULER: coalesce dirty rects into one unit of work per frame
// ============================================================================

use std::collections::VecDeque;

use crate::geometry::IntRect;

/// Pending-flag + queue redraw coalescer.
///
/// Any number of `request` calls between two `take_frame` calls produce
/// exactly one frame covering the union of the requested rects.
#[derive(Debug, Default)]
pub struct RedrawScheduler {
    pending: bool,
    queue: VecDeque<IntRect>,
    frames: u64,
}

impl RedrawScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a dirty rect. Empty rects are ignored.
    pub fn request(&mut self, rect: IntRect) {
        if rect.is_empty() {
            return;
        }
        self.queue.push_back(rect);
        self.pending = true;
    }

    pub fn is_pending(&self) -> bool {
        self.pending
    }

    /// Drain the queue into a single dirty rect, or `None` when idle.
    pub fn take_frame(&mut self) -> Option<IntRect> {
        if !self.pending {
            return None;
        }
        self.pending = false;
        let rect = self
            .queue
            .drain(..)
            .fold(IntRect::default(), |acc, r| acc.union(&r));
        self.frames += 1;
        log::trace!("redraw frame {} covers {:?}", self.frames, rect);
        Some(rect)
    }

    /// Number of frames handed out so far.
    pub fn frames(&self) -> u64 {
        self.frames
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requests_coalesce_into_one_frame() {
        let mut s = RedrawScheduler::new();
        s.request(IntRect::new(0, 0, 10, 10));
        s.request(IntRect::new(20, 5, 30, 8));
        s.request(IntRect::default());
        assert!(s.is_pending());
        assert_eq!(s.take_frame(), Some(IntRect::new(0, 0, 30, 10)));
        assert_eq!(s.take_frame(), None);
        assert_eq!(s.frames(), 1);
    }
}
