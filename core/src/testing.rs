//! Test doubles shared by the unit tests.

use crate::backend::Backend;
use crate::behavior::{BehaviorRegistry, NodeKind};
use crate::config::{EnvConfig, PageConfig};
use crate::context::UiContext;
use crate::error::{ErrorHandler, LynxError};
use crate::events::{CustomEvent, EventEmitter, MultiTouchEvent, TouchEvent};
use crate::layout::LayoutBox;
use crate::node::{NodeInit, PseudoStatus};
use crate::owner::UiOwner;
use crate::props::Props;
use crate::rect::Rect;
use crate::sign::Sign;
use cgmath::{Point2, Vector2};
use serde_json::Value;
use std::cell::RefCell;
use std::collections::{BTreeMap, HashSet};
use std::rc::Rc;

#[derive(Debug, Clone, PartialEq)]
pub enum BackendCall {
    Create(Sign),
    Insert(Sign, Sign, usize),
    Remove(Sign, Sign),
    Layout(Sign, Point2<f32>),
    Animate(Sign, u64),
    Destroy(Sign),
    DisallowIntercept(bool),
}

/// Records every call and keeps a subview table that mirrors the draw lists.
#[derive(Debug)]
pub struct FakeBackend {
    pub calls: Vec<BackendCall>,
    pub subviews: BTreeMap<Sign, Vec<Sign>>,
    pub window: Rect,
    pub screen_origin: Vector2<f32>,
    pub failing_tags: HashSet<String>,
    pub animates: bool,
    pub root_shown: bool,
}

impl Default for FakeBackend {
    fn default() -> Self {
        FakeBackend {
            calls: Vec::new(),
            subviews: BTreeMap::new(),
            window: Rect::from_ltrb(0., 0., 400., 800.),
            screen_origin: Vector2::new(0., 0.),
            failing_tags: HashSet::new(),
            animates: false,
            root_shown: true,
        }
    }
}

impl FakeBackend {
    pub fn destroyed(&self) -> Vec<Sign> {
        self.calls
            .iter()
            .filter_map(|call| match call {
                BackendCall::Destroy(sign) => Some(*sign),
                _ => None,
            })
            .collect()
    }
}

impl Backend for FakeBackend {
    type Error = String;

    fn create_view(&mut self, sign: Sign, tag: &str, _kind: NodeKind) -> Result<(), String> {
        if self.failing_tags.contains(tag) {
            return Err(format!("no view class for {}", tag));
        }
        self.calls.push(BackendCall::Create(sign));
        self.subviews.insert(sign, Vec::new());
        Ok(())
    }

    fn insert_view(&mut self, parent: Sign, child: Sign, index: usize) -> Result<(), String> {
        self.calls.push(BackendCall::Insert(parent, child, index));
        let subviews = self
            .subviews
            .get_mut(&parent)
            .ok_or_else(|| format!("no view {}", parent))?;
        if index > subviews.len() {
            return Err(format!("index {} out of bounds", index));
        }
        subviews.insert(index, child);
        Ok(())
    }

    fn remove_view(&mut self, parent: Sign, child: Sign) -> Result<(), String> {
        self.calls.push(BackendCall::Remove(parent, child));
        let subviews = self
            .subviews
            .get_mut(&parent)
            .ok_or_else(|| format!("no view {}", parent))?;
        subviews.retain(|s| *s != child);
        Ok(())
    }

    fn update_layout(
        &mut self,
        sign: Sign,
        _layout: &LayoutBox,
        origin: Point2<f32>,
    ) -> Result<(), String> {
        self.calls.push(BackendCall::Layout(sign, origin));
        Ok(())
    }

    fn animate_layout(&mut self, sign: Sign, _to: &LayoutBox, ms: u64) -> Result<bool, String> {
        self.calls.push(BackendCall::Animate(sign, ms));
        Ok(self.animates)
    }

    fn destroy_view(&mut self, sign: Sign) {
        self.calls.push(BackendCall::Destroy(sign));
        self.subviews.remove(&sign);
    }

    fn request_disallow_intercept(&mut self, disallow: bool) -> bool {
        self.calls.push(BackendCall::DisallowIntercept(disallow));
        disallow
    }

    fn root_origin_on_screen(&self) -> Vector2<f32> {
        self.screen_origin
    }

    fn window_rect(&self) -> Rect {
        self.window
    }

    fn is_root_shown(&self) -> bool {
        self.root_shown
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Emitted {
    Touch(TouchEvent),
    MultiTouch(MultiTouchEvent),
    Custom(CustomEvent),
    Global(String, Value),
    Layout,
    Pseudo(Sign, PseudoStatus, PseudoStatus),
    Intersection(i32, i32, Value),
    NodeLayoutFinish(Sign, i64),
    PatchFinish(Sign, i64),
}

/// An emitter whose log stays readable after the emitter moved into a context.
#[derive(Debug, Clone, Default)]
pub struct RecordingEmitter(pub Rc<RefCell<Vec<Emitted>>>);

impl RecordingEmitter {
    pub fn events(&self) -> Vec<Emitted> {
        self.0.borrow().clone()
    }

    pub fn clear(&self) {
        self.0.borrow_mut().clear();
    }

    /// `(name, target)` of every touch and custom event, in order.
    pub fn named(&self) -> Vec<(String, Sign)> {
        self.0
            .borrow()
            .iter()
            .filter_map(|e| match e {
                Emitted::Touch(e) => Some((e.name.clone(), e.target_sign)),
                Emitted::Custom(e) => Some((e.name.clone(), e.target)),
                _ => None,
            })
            .collect()
    }

    pub fn globals(&self) -> Vec<(String, Value)> {
        self.0
            .borrow()
            .iter()
            .filter_map(|e| match e {
                Emitted::Global(name, params) => Some((name.clone(), params.clone())),
                _ => None,
            })
            .collect()
    }
}

impl EventEmitter for RecordingEmitter {
    fn send_touch_event(&mut self, event: &TouchEvent) {
        self.0.borrow_mut().push(Emitted::Touch(event.clone()));
    }

    fn send_multi_touch_event(&mut self, event: &MultiTouchEvent) {
        self.0.borrow_mut().push(Emitted::MultiTouch(event.clone()));
    }

    fn send_custom_event(&mut self, event: &CustomEvent) {
        self.0.borrow_mut().push(Emitted::Custom(event.clone()));
    }

    fn send_global_event(&mut self, name: &str, params: Value) {
        self.0
            .borrow_mut()
            .push(Emitted::Global(name.to_string(), params));
    }

    fn send_layout_event(&mut self) {
        self.0.borrow_mut().push(Emitted::Layout);
    }

    fn on_pseudo_status_changed(&mut self, sign: Sign, before: PseudoStatus, after: PseudoStatus) {
        self.0
            .borrow_mut()
            .push(Emitted::Pseudo(sign, before, after));
    }

    fn call_intersection_observer(&mut self, observer_id: i32, callback_id: i32, entry: Value) {
        self.0
            .borrow_mut()
            .push(Emitted::Intersection(observer_id, callback_id, entry));
    }

    fn on_node_layout_finish(&mut self, sign: Sign, operation_id: i64, _component: Option<Sign>) {
        self.0
            .borrow_mut()
            .push(Emitted::NodeLayoutFinish(sign, operation_id));
    }

    fn on_patch_finish(&mut self, sign: Sign, operation_id: i64) {
        self.0
            .borrow_mut()
            .push(Emitted::PatchFinish(sign, operation_id));
    }
}

#[derive(Debug, Clone, Default)]
pub struct RecordingErrorHandler(pub Rc<RefCell<Vec<LynxError>>>);

impl RecordingErrorHandler {
    pub fn errors(&self) -> Vec<LynxError> {
        self.0.borrow().clone()
    }
}

impl ErrorHandler for RecordingErrorHandler {
    fn handle_error(&mut self, error: LynxError) {
        self.0.borrow_mut().push(error);
    }
}

pub struct Harness {
    pub owner: UiOwner<FakeBackend>,
    pub events: RecordingEmitter,
    pub errors: RecordingErrorHandler,
}

pub fn harness(page_config: PageConfig) -> Harness {
    let events = RecordingEmitter::default();
    let errors = RecordingErrorHandler::default();
    let context = UiContext::new(page_config, EnvConfig::default(), Box::new(events.clone()))
        .with_error_handler(Box::new(errors.clone()));
    let owner = UiOwner::new(
        context,
        FakeBackend::default(),
        BehaviorRegistry::with_builtins(),
    );
    Harness {
        owner,
        events,
        errors,
    }
}

/// Creates and inserts nodes from `(sign, parent, tag, flatten)` and lays each one out with the
/// given frame.
pub fn build(owner: &mut UiOwner<FakeBackend>, specs: &[(Sign, Option<Sign>, &str, bool, Rect)]) {
    for (sign, parent, tag, flatten, frame) in specs {
        build_with(owner, *sign, *parent, tag, *flatten, *frame, Props::new());
    }
}

pub fn build_with(
    owner: &mut UiOwner<FakeBackend>,
    sign: Sign,
    parent: Option<Sign>,
    tag: &str,
    flatten: bool,
    frame: Rect,
    props: Props,
) {
    let init = NodeInit::new(sign, tag).flatten(flatten).props(props);
    if let Err(err) = owner.create_node(init) {
        panic!("test node {} failed: {}", sign, err);
    }
    if let Some(parent) = parent {
        owner.insert(parent, sign, -1);
    }
    owner.update_layout(
        sign,
        LayoutBox::with_frame(frame.left(), frame.top(), frame.width(), frame.height()),
    );
}
