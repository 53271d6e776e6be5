//! Native UI core of a declarative rendering engine.
//!
//! # Conceptual overview
//! A layout engine running elsewhere describes the page as a tree of nodes, each identified by a
//! [`Sign`]. This crate turns that description into platform views and turns platform input back
//! into semantic events for the script side.
//!
//! ## Nodes and Draw Lists
//! Every node lives in the [`UiOwner`]. Nodes may be *flatten*: such a node has no platform view of
//! its own and its children are spliced into the draw list of its nearest non-flatten ancestor, so
//! that each platform view only ever holds the children it actually draws. Flatten nodes never
//! appear in a draw list.
//!
//! ## Painting
//! The [`PaintingContext`] receives node creation requests and batched operations encoded in a
//! compact integer buffer (see [`operation`]). Creation may run on worker threads when both the
//! environment and the page allow it; a creation that has not finished by the time it is needed is
//! cancelled and redone synchronously, so the result is always the same as a synchronous run.
//!
//! ## Events
//! Touch input is fed to the [`TouchDispatcher`], which hit tests the tree, keeps one gesture
//! session per pointer sequence and emits touch, tap, click and long-press events through the
//! session's [`EventEmitter`]. Tap and click are suppressed once a session moved too far, was
//! claimed by a gesture, or saw the target's props change.
//!
//! ## Observers
//! [`IntersectionObserver`]s report visible-ratio threshold crossings of target nodes and the
//! [`ExposureObserver`] reports nodes entering or leaving the window. Both are driven by layout,
//! scroll and draw signals, throttled to the page's observer frame rate.
//!
//! ## Backends
//! Platform views are created and arranged through a [`Backend`]. The core only ever talks to the
//! backend in terms of signs; it never holds platform objects.

pub mod backend;
pub mod behavior;
pub mod config;
mod context;
pub mod draw_list;
pub mod error;
pub mod events;
pub mod exposure;
pub mod layout;
pub mod node;
pub mod observer;
pub mod operation;
pub mod owner;
pub mod painting;
pub mod props;
mod rect;
pub mod registry;
pub mod shadow;
mod sign;
pub mod touch;
pub mod worker;

#[cfg(test)]
mod testing;

pub use backend::Backend;
pub use behavior::{Behavior, BehaviorRegistry, NodeKind};
pub use config::{EnvConfig, PageConfig};
pub use context::UiContext;
pub use error::{ErrorCode, ErrorHandler, LynxError};
pub use events::{EventEmitter, EventHandler, SemanticEvent};
pub use exposure::ExposureObserver;
pub use node::{NodeInit, UiNode};
pub use observer::{IntersectionObserver, IntersectionObserverManager, ObserverOptions};
pub use operation::{OperationBatchBuilder, OperationReader};
pub use owner::UiOwner;
pub use painting::PaintingContext;
pub use props::Props;
pub use rect::{Rect, RectEdges};
pub use sign::{InstanceId, Sign, ROOT_TAG, UNSET_SIGN};
pub use touch::{MotionAction, MotionEvent, Pointer, TouchDispatcher};
