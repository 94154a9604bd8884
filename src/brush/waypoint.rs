use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::geometry::{Transform, Vec2};

/// Smallest distance between two dabs, in picture pixels.
pub const MIN_SPACING: f32 = 1.0;

/// Preallocation cap for one segment's dabs.
const MAX_RESERVED_DABS: usize = 4096;

/// Largest number of raw samples the stabilizer averages over.
pub const MAX_STABILIZING_LEVEL: u32 = 32;

/// One stroke sample in picture space.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Waypoint {
    pub pos: Vec2,
    /// Pen pressure in `[0, 1]`.
    pub pressure: f32,
    /// Timestamp in seconds.
    pub time: f64,
}

impl Waypoint {
    pub fn new(pos: Vec2, pressure: f32) -> Self {
        Self { pos, pressure: pressure.clamp(0.0, 1.0), time: 0.0 }
    }

    pub fn with_time(mut self, time: f64) -> Self {
        self.time = time;
        self
    }

    pub fn lerp(&self, other: &Waypoint, t: f32) -> Waypoint {
        Waypoint {
            pos: self.pos.lerp(other.pos, t),
            pressure: self.pressure + (other.pressure - self.pressure) * t,
            time: self.time + (other.time - self.time) * t as f64,
        }
    }
}

/// Raw pointer sample as delivered by the input device, in view space.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct InputSample {
    pub pos: Vec2,
    pub pressure: f32,
    pub time: f64,
}

impl InputSample {
    pub fn to_waypoint(&self, view_to_picture: &Transform) -> Waypoint {
        Waypoint::new(view_to_picture.apply(self.pos), self.pressure).with_time(self.time)
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Interpolated {
    pub waypoints: Vec<Waypoint>,
    /// Distance from the segment end to the next dab.
    pub next_offset: f32,
}

#[inline]
fn clamp_spacing(s: f32) -> f32 {
    if s.is_finite() { s.max(MIN_SPACING) } else { MIN_SPACING }
}

/// Evenly spaced dabs along `prev → next`.
///
/// `offset` is the distance from `prev` to the first dab. Dabs land at
/// `offset`, `offset + s₁`, … up to and including the segment end, where each
/// `sᵢ` is `spacing` evaluated at the dab just emitted (clamped to
/// `MIN_SPACING`). A zero-length segment emits nothing and keeps `offset`.
pub fn interpolate(
    prev: &Waypoint,
    next: &Waypoint,
    mut spacing: impl FnMut(&Waypoint) -> f32,
    offset: f32,
) -> Interpolated {
    // Distances run in f64: an f32 cursor stops advancing past 2^24 px.
    let len = (next.pos.x as f64 - prev.pos.x as f64).hypot(next.pos.y as f64 - prev.pos.y as f64);
    if !len.is_finite() || len <= 0.0 {
        return Interpolated { waypoints: Vec::new(), next_offset: offset };
    }

    let mut d = if offset.is_finite() { offset.max(0.0) as f64 } else { 0.0 };
    if d > len {
        return Interpolated { waypoints: Vec::new(), next_offset: (d - len) as f32 };
    }
    let mut w = prev.lerp(next, (d / len) as f32);
    let mut step = clamp_spacing(spacing(&w)) as f64;
    let estimate = ((len - d) / step) as usize + 1;
    let mut waypoints = Vec::with_capacity(estimate.min(MAX_RESERVED_DABS));
    loop {
        waypoints.push(w);
        let advanced = d + step;
        if advanced > len || advanced == d {
            d = advanced;
            break;
        }
        d = advanced;
        w = prev.lerp(next, (d / len) as f32);
        step = clamp_spacing(spacing(&w)) as f64;
    }
    Interpolated { waypoints, next_offset: (d - len) as f32 }
}

/// Carries the interpolation state across the segments of one stroke.
///
/// With a stabilizing level `n`, every incoming sample is replaced by the
/// mean of itself and up to `n` previous raw samples before dabs are laid
/// down. [`finish`](Self::finish) catches the stroke up to the last raw sample.
#[derive(Clone, Debug, Default)]
pub struct StrokeInterpolator {
    last: Option<Waypoint>,
    offset: f32,
    stabilizing_level: u32,
    recent: VecDeque<Waypoint>,
}

impl StrokeInterpolator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_stabilizing(level: u32) -> Self {
        Self { stabilizing_level: level.min(MAX_STABILIZING_LEVEL), ..Self::default() }
    }

    pub fn stabilizing_level(&self) -> u32 {
        self.stabilizing_level
    }

    /// Start a stroke: the first sample is always a dab.
    pub fn begin(&mut self, w: Waypoint, mut spacing: impl FnMut(&Waypoint) -> f32) -> Vec<Waypoint> {
        self.recent.clear();
        self.recent.push_back(w);
        self.offset = clamp_spacing(spacing(&w));
        self.last = Some(w);
        vec![w]
    }

    /// Dabs between the previous sample and `w`.
    pub fn add(&mut self, w: Waypoint, spacing: impl FnMut(&Waypoint) -> f32) -> Vec<Waypoint> {
        if self.last.is_none() {
            return self.begin(w, spacing);
        }
        let smoothed = self.stabilize(w);
        self.segment_to(smoothed, spacing)
    }

    /// Dabs from the stabilized position to the last raw sample, then end
    /// the stroke.
    pub fn finish(&mut self, spacing: impl FnMut(&Waypoint) -> f32) -> Vec<Waypoint> {
        let tail = match self.recent.back().copied() {
            Some(raw) if self.last.is_some() => self.segment_to(raw, spacing),
            _ => Vec::new(),
        };
        self.end();
        tail
    }

    pub fn is_active(&self) -> bool {
        self.last.is_some()
    }

    pub fn end(&mut self) {
        self.last = None;
        self.offset = 0.0;
        self.recent.clear();
    }

    fn segment_to(&mut self, w: Waypoint, spacing: impl FnMut(&Waypoint) -> f32) -> Vec<Waypoint> {
        let Some(last) = self.last else { return Vec::new() };
        let out = interpolate(&last, &w, spacing, self.offset);
        self.offset = out.next_offset;
        self.last = Some(w);
        out.waypoints
    }

    fn stabilize(&mut self, w: Waypoint) -> Waypoint {
        self.recent.push_back(w);
        while self.recent.len() > self.stabilizing_level as usize + 1 {
            self.recent.pop_front();
        }
        let n = self.recent.len() as f32;
        let (pos, pressure) = self
            .recent
            .iter()
            .fold((Vec2::ZERO, 0.0), |(p, q), s| (p + s.pos, q + s.pressure));
        Waypoint { pos: pos * (1.0 / n), pressure: pressure / n, time: w.time }
    }
}
