//! Traits for platform backends.

use crate::behavior::NodeKind;
use crate::layout::LayoutBox;
use crate::rect::Rect;
use crate::sign::Sign;
use cgmath::{Point2, Vector2};
use std::fmt;

/// A platform widget toolkit.
///
/// Views are addressed by the sign of the node that owns them. Only non-flatten nodes have views.
pub trait Backend {
    /// Error type.
    type Error: fmt::Display;

    /// Creates the platform view of a node.
    fn create_view(&mut self, sign: Sign, tag: &str, kind: NodeKind) -> Result<(), Self::Error>;

    /// Inserts a view into its draw parent's subviews at the given draw-list position.
    fn insert_view(&mut self, parent: Sign, child: Sign, index: usize) -> Result<(), Self::Error>;

    /// Removes a view from its draw parent.
    fn remove_view(&mut self, parent: Sign, child: Sign) -> Result<(), Self::Error>;

    /// Applies a layout box. `origin` is the position in the draw parent, which differs from the
    /// layout position when flatten ancestors sit in between.
    fn update_layout(
        &mut self,
        sign: Sign,
        layout: &LayoutBox,
        origin: Point2<f32>,
    ) -> Result<(), Self::Error>;

    /// Starts a layout animation towards `to`. Returns false if the backend does not animate,
    /// in which case the box is applied directly.
    fn animate_layout(
        &mut self,
        _sign: Sign,
        _to: &LayoutBox,
        _duration_ms: u64,
    ) -> Result<bool, Self::Error> {
        Ok(false)
    }

    /// Destroys a view.
    fn destroy_view(&mut self, sign: Sign);

    /// Requests a redraw of a view.
    fn invalidate(&mut self, _sign: Sign) {}

    /// Asks the platform parent hierarchy not to intercept the current touch stream.
    /// Returns whether the request was honored.
    fn request_disallow_intercept(&mut self, disallow: bool) -> bool {
        disallow
    }

    /// Origin of the root view on screen.
    fn root_origin_on_screen(&self) -> Vector2<f32> {
        Vector2::new(0., 0.)
    }

    /// The visible window in screen coordinates.
    fn window_rect(&self) -> Rect;

    /// Whether the root view is shown on screen at all.
    fn is_root_shown(&self) -> bool {
        true
    }
}
