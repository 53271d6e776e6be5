//! Layout results.

use crate::rect::Rect;
use cgmath::{Point2, Vector2};
use std::ops;

/// Widths of the four edges of a box.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Edges {
    pub left: f32,
    pub top: f32,
    pub right: f32,
    pub bottom: f32,
}

impl Edges {
    pub fn new(left: f32, top: f32, right: f32, bottom: f32) -> Edges {
        Edges {
            left,
            top,
            right,
            bottom,
        }
    }

    /// Uniform edges.
    pub fn all(value: f32) -> Edges {
        Edges::new(value, value, value, value)
    }
}

/// The box a layout pass computed for one node.
///
/// `left` and `top` are relative to the logical parent.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LayoutBox {
    pub left: f32,
    pub top: f32,
    pub width: f32,
    pub height: f32,
    pub padding: Edges,
    pub margin: Edges,
    pub border: Edges,
    /// Clip bound, if the engine computed one.
    pub bound: Option<Rect>,
    /// Sticky offsets `[left, top, right, bottom]`.
    pub sticky: Option<[f32; 4]>,
    pub max_height: Option<f32>,
}

impl LayoutBox {
    /// A box with position and size only.
    pub fn with_frame(left: f32, top: f32, width: f32, height: f32) -> LayoutBox {
        LayoutBox {
            left,
            top,
            width,
            height,
            ..LayoutBox::default()
        }
    }

    /// The box's frame in its parent's coordinate space.
    pub fn frame(&self) -> Rect {
        Rect::new(
            Point2::new(self.left, self.top),
            Vector2::new(self.width, self.height),
        )
    }
}

/// Layout node type flags; occupies the low 16 bits of a tag info word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct LayoutNodeType(pub u32);

impl LayoutNodeType {
    pub const COMMON: LayoutNodeType = LayoutNodeType(1);
    /// No layout box of its own, e.g. raw text runs.
    pub const VIRTUAL: LayoutNodeType = LayoutNodeType(1 << 1);
    /// Measured by a platform-side shadow node.
    pub const CUSTOM: LayoutNodeType = LayoutNodeType(1 << 2);
    pub const INLINE: LayoutNodeType = LayoutNodeType(1 << 3);

    pub fn contains(self, other: LayoutNodeType) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_virtual(self) -> bool {
        self.contains(LayoutNodeType::VIRTUAL)
    }
}

impl ops::BitOr for LayoutNodeType {
    type Output = LayoutNodeType;
    fn bitor(self, rhs: LayoutNodeType) -> LayoutNodeType {
        LayoutNodeType(self.0 | rhs.0)
    }
}

impl ops::BitOrAssign for LayoutNodeType {
    fn bitor_assign(&mut self, rhs: LayoutNodeType) {
        self.0 |= rhs.0;
    }
}
