// ============================================================================
// GEOMETRY: vectors, rects and affine transforms (pure math, no GPU state)
// ============================================================================

use std::ops::{Add, Mul, Sub};

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec2 {
    pub x: f32,
    pub y: f32,
}

impl Vec2 {
    pub const ZERO: Vec2 = Vec2 { x: 0.0, y: 0.0 };

    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub const fn splat(v: f32) -> Self {
        Self { x: v, y: v }
    }

    pub fn length(self) -> f32 {
        (self.x * self.x + self.y * self.y).sqrt()
    }

    pub fn distance(self, other: Vec2) -> f32 {
        (other - self).length()
    }

    pub fn floor(self) -> Self {
        Self::new(self.x.floor(), self.y.floor())
    }

    /// Fractional part, always in `[0, 1)` (GLSL `fract`).
    pub fn fract(self) -> Self {
        self - self.floor()
    }

    pub fn lerp(self, other: Vec2, t: f32) -> Self {
        self + (other - self) * t
    }

    pub fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

impl Add for Vec2 {
    type Output = Vec2;
    fn add(self, rhs: Vec2) -> Vec2 {
        Vec2::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl Sub for Vec2 {
    type Output = Vec2;
    fn sub(self, rhs: Vec2) -> Vec2 {
        Vec2::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl Mul<f32> for Vec2 {
    type Output = Vec2;
    fn mul(self, rhs: f32) -> Vec2 {
        Vec2::new(self.x * rhs, self.y * rhs)
    }
}

// ============================================================================
// RECTS
// ============================================================================

/// Half-open float rectangle `[min, max)`.
#[derive(Clone, Copy, Debug, PartialEq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub min: Vec2,
    pub max: Vec2,
}

impl Rect {
    pub const fn from_min_max(min: Vec2, max: Vec2) -> Self {
        Self { min, max }
    }

    pub fn from_center_size(center: Vec2, size: f32) -> Self {
        let half = Vec2::splat(size * 0.5);
        Self { min: center - half, max: center + half }
    }

    pub fn width(&self) -> f32 {
        self.max.x - self.min.x
    }

    pub fn height(&self) -> f32 {
        self.max.y - self.min.y
    }

    /// True for zero-area, inverted or non-finite rects.
    pub fn is_empty(&self) -> bool {
        !(self.min.is_finite() && self.max.is_finite())
            || self.max.x <= self.min.x
            || self.max.y <= self.min.y
    }

    pub fn union(&self, other: &Rect) -> Rect {
        Rect {
            min: Vec2::new(self.min.x.min(other.min.x), self.min.y.min(other.min.y)),
            max: Vec2::new(self.max.x.max(other.max.x), self.max.y.max(other.max.y)),
        }
    }

    /// Smallest integer rect containing this one.
    pub fn int_bounding(&self) -> IntRect {
        IntRect::new(
            self.min.x.floor() as i32,
            self.min.y.floor() as i32,
            self.max.x.ceil() as i32,
            self.max.y.ceil() as i32,
        )
    }

    pub fn vertices(&self) -> [Vec2; 4] {
        [
            self.min,
            Vec2::new(self.max.x, self.min.y),
            self.max,
            Vec2::new(self.min.x, self.max.y),
        ]
    }
}

/// Half-open integer pixel rectangle `[x0, x1) × [y0, y1)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct IntRect {
    pub x0: i32,
    pub y0: i32,
    pub x1: i32,
    pub y1: i32,
}

impl IntRect {
    pub const fn new(x0: i32, y0: i32, x1: i32, y1: i32) -> Self {
        Self { x0, y0, x1, y1 }
    }

    pub const fn from_size(width: u32, height: u32) -> Self {
        Self { x0: 0, y0: 0, x1: width as i32, y1: height as i32 }
    }

    pub fn width(&self) -> u32 {
        (self.x1 - self.x0).max(0) as u32
    }

    pub fn height(&self) -> u32 {
        (self.y1 - self.y0).max(0) as u32
    }

    pub fn is_empty(&self) -> bool {
        self.x1 <= self.x0 || self.y1 <= self.y0
    }

    pub fn contains(&self, x: i32, y: i32) -> bool {
        x >= self.x0 && x < self.x1 && y >= self.y0 && y < self.y1
    }

    pub fn union(&self, other: &IntRect) -> IntRect {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        IntRect::new(
            self.x0.min(other.x0),
            self.y0.min(other.y0),
            self.x1.max(other.x1),
            self.y1.max(other.y1),
        )
    }

    /// Intersection, or `None` when the rects do not overlap.
    pub fn intersect(&self, other: &IntRect) -> Option<IntRect> {
        let r = IntRect::new(
            self.x0.max(other.x0),
            self.y0.max(other.y0),
            self.x1.min(other.x1),
            self.y1.min(other.y1),
        );
        if r.is_empty() { None } else { Some(r) }
    }

    pub fn translate(&self, dx: i32, dy: i32) -> IntRect {
        IntRect::new(self.x0 + dx, self.y0 + dy, self.x1 + dx, self.y1 + dy)
    }

    pub fn to_rect(&self) -> Rect {
        Rect::from_min_max(
            Vec2::new(self.x0 as f32, self.y0 as f32),
            Vec2::new(self.x1 as f32, self.y1 as f32),
        )
    }
}

// ============================================================================
// AFFINE TRANSFORM
// ============================================================================

/// 2×3 affine transform mapping `p` to `(a·x + c·y + tx, b·x + d·y + ty)`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    pub a: f32,
    pub b: f32,
    pub c: f32,
    pub d: f32,
    pub tx: f32,
    pub ty: f32,
}

impl Default for Transform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Transform {
    pub const IDENTITY: Transform = Transform { a: 1.0, b: 0.0, c: 0.0, d: 1.0, tx: 0.0, ty: 0.0 };

    pub fn translate(offset: Vec2) -> Self {
        Self { tx: offset.x, ty: offset.y, ..Self::IDENTITY }
    }

    pub fn scale(scale: Vec2) -> Self {
        Self { a: scale.x, d: scale.y, ..Self::IDENTITY }
    }

    pub fn rotate(radians: f32) -> Self {
        let (s, c) = radians.sin_cos();
        Self { a: c, b: s, c: -s, d: c, tx: 0.0, ty: 0.0 }
    }

    /// `self` followed by `next`.
    pub fn merge(&self, next: &Transform) -> Transform {
        Transform {
            a: next.a * self.a + next.c * self.b,
            b: next.b * self.a + next.d * self.b,
            c: next.a * self.c + next.c * self.d,
            d: next.b * self.c + next.d * self.d,
            tx: next.a * self.tx + next.c * self.ty + next.tx,
            ty: next.b * self.tx + next.d * self.ty + next.ty,
        }
    }

    pub fn determinant(&self) -> f32 {
        self.a * self.d - self.b * self.c
    }

    /// Inverse transform, or `None` for singular matrices.
    pub fn invert(&self) -> Option<Transform> {
        let det = self.determinant();
        if det.abs() < 1e-12 || !det.is_finite() {
            return None;
        }
        let inv = 1.0 / det;
        let a = self.d * inv;
        let b = -self.b * inv;
        let c = -self.c * inv;
        let d = self.a * inv;
        Some(Transform {
            a,
            b,
            c,
            d,
            tx: -(a * self.tx + c * self.ty),
            ty: -(b * self.tx + d * self.ty),
        })
    }

    pub fn apply(&self, p: Vec2) -> Vec2 {
        Vec2::new(
            self.a * p.x + self.c * p.y + self.tx,
            self.b * p.x + self.d * p.y + self.ty,
        )
    }

    /// Axis-aligned bounds of the transformed rect.
    pub fn transform_rect(&self, rect: &Rect) -> Rect {
        let pts = rect.vertices().map(|v| self.apply(v));
        let mut out = Rect::from_min_max(pts[0], pts[0]);
        for p in &pts[1..] {
            out = out.union(&Rect::from_min_max(*p, *p));
        }
        out
    }

    /// Pure translation by whole pixels (sampling can skip filtering).
    pub fn is_integer_translation(&self) -> bool {
        self.a == 1.0
            && self.b == 0.0
            && self.c == 0.0
            && self.d == 1.0
            && self.tx.fract() == 0.0
            && self.ty.fract() == 0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: Vec2, b: Vec2) -> bool {
        (a.x - b.x).abs() < 1e-4 && (a.y - b.y).abs() < 1e-4
    }

    #[test]
    fn merge_applies_left_then_right() {
        let t = Transform::translate(Vec2::new(10.0, 0.0)).merge(&Transform::scale(Vec2::splat(2.0)));
        assert!(close(t.apply(Vec2::new(1.0, 1.0)), Vec2::new(22.0, 2.0)));
    }

    #[test]
    fn invert_round_trips() {
        let t = Transform::rotate(0.7)
            .merge(&Transform::scale(Vec2::new(1.5, 0.5)))
            .merge(&Transform::translate(Vec2::new(-3.0, 8.0)));
        let inv = t.invert().unwrap();
        let p = Vec2::new(12.5, -4.25);
        assert!(close(inv.apply(t.apply(p)), p));
    }

    #[test]
    fn singular_transform_has_no_inverse() {
        assert!(Transform::scale(Vec2::new(0.0, 1.0)).invert().is_none());
    }

    #[test]
    fn int_rect_union_ignores_empty() {
        let a = IntRect::new(0, 0, 10, 10);
        assert_eq!(IntRect::default().union(&a), a);
        assert_eq!(a.intersect(&IntRect::new(10, 0, 20, 10)), None);
    }

    #[test]
    fn int_bounding_rounds_outwards() {
        let r = Rect::from_min_max(Vec2::new(-0.5, 1.2), Vec2::new(3.1, 4.0));
        assert_eq!(r.int_bounding(), IntRect::new(-1, 1, 4, 4));
    }
}
