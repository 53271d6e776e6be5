//! Rectangles.

use crate::layout::Edges;
use cgmath::{Point2, Vector2, Zero};
use serde::Serialize;
use std::ops;

/// A rectangle in pixels, y pointing down.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    /// Rectangle origin (top left corner).
    pub origin: Point2<f32>,

    /// Rectangle size.
    pub size: Vector2<f32>,
}

impl Rect {
    /// Creates a new rectangle.
    pub fn new(origin: Point2<f32>, size: Vector2<f32>) -> Rect {
        Rect { origin, size }
    }

    /// Creates a rectangle from its four edges.
    pub fn from_ltrb(left: f32, top: f32, right: f32, bottom: f32) -> Rect {
        Rect {
            origin: Point2::new(left, top),
            size: Vector2::new(right - left, bottom - top),
        }
    }

    /// Returns a zero-sized rectangle at the origin.
    pub fn zero() -> Rect {
        Rect {
            origin: Point2::new(0., 0.),
            size: Vector2::zero(),
        }
    }

    pub fn left(&self) -> f32 {
        self.origin.x
    }

    pub fn top(&self) -> f32 {
        self.origin.y
    }

    pub fn right(&self) -> f32 {
        self.origin.x + self.size.x
    }

    pub fn bottom(&self) -> f32 {
        self.origin.y + self.size.y
    }

    pub fn width(&self) -> f32 {
        self.size.x
    }

    pub fn height(&self) -> f32 {
        self.size.y
    }

    pub fn area(&self) -> f32 {
        self.size.x * self.size.y
    }

    /// Returns true if the rectangle has no area.
    pub fn is_empty(&self) -> bool {
        self.size.x <= 0. || self.size.y <= 0.
    }

    /// Returns true if the point is inside the rectangle.
    pub fn contains(&self, point: Point2<f32>) -> bool {
        point.x >= self.left()
            && point.y >= self.top()
            && point.x < self.right()
            && point.y < self.bottom()
    }

    /// Returns true if the two rectangles intersect.
    pub fn intersects(&self, rect: Rect) -> bool {
        self.left() < rect.right()
            && self.top() < rect.bottom()
            && rect.left() < self.right()
            && rect.top() < self.bottom()
    }

    /// Returns the intersection rectangle.
    pub fn intersect(&self, rect: Rect) -> Option<Rect> {
        if !self.intersects(rect) {
            return None;
        }

        Some(Rect::from_ltrb(
            self.left().max(rect.left()),
            self.top().max(rect.top()),
            self.right().min(rect.right()),
            self.bottom().min(rect.bottom()),
        ))
    }

    /// Returns a new rectangle grown outwards by the given edges.
    pub fn outset(&self, edges: Edges) -> Rect {
        Rect::from_ltrb(
            self.left() - edges.left,
            self.top() - edges.top,
            self.right() + edges.right,
            self.bottom() + edges.bottom,
        )
    }

    /// Returns a new rectangle moved by the given offset.
    pub fn offset(&self, delta: Vector2<f32>) -> Rect {
        Rect {
            origin: self.origin + delta,
            size: self.size,
        }
    }

    /// Returns the serializable edge dictionary of this rectangle.
    pub fn to_edges(&self) -> RectEdges {
        RectEdges {
            left: self.left(),
            right: self.right(),
            top: self.top(),
            bottom: self.bottom(),
        }
    }
}

impl ops::Add<Vector2<f32>> for Rect {
    type Output = Rect;
    fn add(self, delta: Vector2<f32>) -> Rect {
        self.offset(delta)
    }
}

/// `{left, right, top, bottom}` as sent to the script side.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct RectEdges {
    pub left: f32,
    pub right: f32,
    pub top: f32,
    pub bottom: f32,
}

impl From<Option<Rect>> for RectEdges {
    fn from(rect: Option<Rect>) -> Self {
        rect.map(|r| r.to_edges()).unwrap_or_default()
    }
}

#[test]
fn test_rect_intersection() {
    let a = Rect::from_ltrb(0., 0., 100., 100.);
    let b = Rect::from_ltrb(50., 80., 150., 120.);
    assert_eq!(a.intersect(b), Some(Rect::from_ltrb(50., 80., 100., 100.)));

    let touching = Rect::from_ltrb(100., 0., 200., 100.);
    assert_eq!(a.intersect(touching), None, "edge contact is not an intersection");

    let grown = a.outset(Edges {
        left: 10.,
        top: 0.,
        right: 5.,
        bottom: 20.,
    });
    assert_eq!(grown, Rect::from_ltrb(-10., 0., 105., 120.));
    assert_eq!(RectEdges::from(None), RectEdges::default());
}
