//! Semantic events sent to the script side.

use crate::node::PseudoStatus;
use crate::sign::Sign;
use cgmath::Point2;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::error;

pub const TOUCH_START: &str = "touchstart";
pub const TOUCH_MOVE: &str = "touchmove";
pub const TOUCH_END: &str = "touchend";
pub const TOUCH_CANCEL: &str = "touchcancel";
pub const TAP: &str = "tap";
pub const CLICK: &str = "click";
pub const LONG_PRESS: &str = "longpress";

/// A point in an event payload.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct EventPoint {
    pub x: f32,
    pub y: f32,
}

impl From<Point2<f32>> for EventPoint {
    fn from(point: Point2<f32>) -> Self {
        EventPoint {
            x: point.x,
            y: point.y,
        }
    }
}

/// A touch event delivered to a single target.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TouchEvent {
    pub name: String,
    pub target_sign: Sign,
    /// Position relative to the screen.
    pub client_point: EventPoint,
    /// Position relative to the root node.
    pub page_point: EventPoint,
    /// Position relative to the target.
    pub target_point: EventPoint,
    pub timestamp: u64,
}

/// One pointer of a multi-touch event.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TouchPoint {
    pub pointer_id: u32,
    pub client_x: f32,
    pub client_y: f32,
    pub page_x: f32,
    pub page_y: f32,
    pub target_x: f32,
    pub target_y: f32,
}

/// A touch event carrying every active pointer, grouped by target.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MultiTouchEvent {
    pub name: String,
    pub touches: BTreeMap<Sign, Vec<TouchPoint>>,
    pub timestamp: u64,
}

/// A named event with arbitrary parameters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CustomEvent {
    pub target: Sign,
    pub name: String,
    pub params: Value,
}

impl CustomEvent {
    pub fn new(target: Sign, name: &str, params: Value) -> CustomEvent {
        CustomEvent {
            target,
            name: name.to_string(),
            params,
        }
    }
}

/// Every event the core emits, as seen by native observers.
#[derive(Debug, Clone, PartialEq)]
pub enum SemanticEvent {
    Touch(TouchEvent),
    MultiTouch(MultiTouchEvent),
    Custom(CustomEvent),
}

impl SemanticEvent {
    pub fn name(&self) -> &str {
        match self {
            SemanticEvent::Touch(e) => &e.name,
            SemanticEvent::MultiTouch(e) => &e.name,
            SemanticEvent::Custom(e) => &e.name,
        }
    }
}

/// The script engine side of the bridge.
pub trait EventEmitter {
    fn send_touch_event(&mut self, event: &TouchEvent);

    fn send_multi_touch_event(&mut self, event: &MultiTouchEvent);

    fn send_custom_event(&mut self, event: &CustomEvent);

    /// Sends an event to every global listener.
    fn send_global_event(&mut self, name: &str, params: Value);

    /// Called after every layout pass.
    fn send_layout_event(&mut self) {}

    fn on_pseudo_status_changed(&mut self, _sign: Sign, _before: PseudoStatus, _after: PseudoStatus) {
    }

    /// Delivers an intersection entry to a script-side observer callback.
    fn call_intersection_observer(&mut self, observer_id: i32, callback_id: i32, entry: Value);

    /// A node's layout-finish callback for an operation, with the component that triggered it.
    fn on_node_layout_finish(&mut self, _sign: Sign, _operation_id: i64, _component: Option<Sign>) {
    }

    /// A patch-finish listener is notified that an operation finished.
    fn on_patch_finish(&mut self, _sign: Sign, _operation_id: i64) {}
}

/// A native observer of semantic events.
pub struct EventHandler(Arc<Mutex<dyn FnMut(&SemanticEvent) + Send>>);

impl Clone for EventHandler {
    fn clone(&self) -> Self {
        EventHandler(Arc::clone(&self.0))
    }
}

impl EventHandler {
    pub fn new<F: 'static + FnMut(&SemanticEvent) + Send>(handler: F) -> Self {
        EventHandler(Arc::new(Mutex::new(handler)))
    }

    /// Calls the handler. A panicking handler is logged and otherwise ignored.
    pub fn call(&self, event: &SemanticEvent) {
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            let mut handler = self.0.lock();
            (&mut *handler)(event)
        }));
        if result.is_err() {
            error!(event = event.name(), "event handler panicked");
        }
    }
}

impl fmt::Debug for EventHandler {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "EventHandler")
    }
}

/// Runs one emitter call, logging instead of unwinding if it panics.
pub(crate) fn guarded<F: FnOnce()>(what: &str, f: F) {
    if panic::catch_unwind(AssertUnwindSafe(f)).is_err() {
        error!(what, "event listener panicked");
    }
}

#[test]
fn test_panicking_handler_is_contained() {
    let calls = Arc::new(Mutex::new(0));
    let counter = Arc::clone(&calls);
    let handler = EventHandler::new(move |event| {
        *counter.lock() += 1;
        if event.name() == TAP {
            panic!("handler failure");
        }
    });

    let tap = SemanticEvent::Custom(CustomEvent::new(1, TAP, Value::Null));
    handler.call(&tap);
    handler.call(&tap);
    assert_eq!(*calls.lock(), 2, "handler keeps working after a panic");
}

#[test]
fn test_multi_touch_payload_shape() {
    let mut touches = BTreeMap::new();
    touches.insert(
        7,
        vec![TouchPoint {
            pointer_id: 0,
            client_x: 1.,
            client_y: 2.,
            page_x: 3.,
            page_y: 4.,
            target_x: 5.,
            target_y: 6.,
        }],
    );
    let event = MultiTouchEvent {
        name: TOUCH_START.to_string(),
        touches,
        timestamp: 9,
    };
    let json = serde_json::to_value(&event).expect("payload serializes");
    assert_eq!(json["touches"]["7"][0]["pointerId"], 0);
    assert_eq!(json["touches"]["7"][0]["targetY"], 6.0);
}
