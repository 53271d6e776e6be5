//! Touch input to semantic events.
//!
//! # Sessions
//! A session starts with a [`MotionAction::Down`] and ends with an up or cancel. On down, the
//! topmost node under the pointer becomes the active target; the nodes it propagates `:active` to
//! form the pseudo chain, and the ancestors up to the deepest `click` listener form the click
//! chain. Additional pointers get their own hit test.
//!
//! Tap fires on the active target and click on the deepest click listener, and only if none of
//! these happened during the session:
//!
//! - pointer 0 moved further than the tap slop
//! - a gesture was recognized (long press, or a scroll reported by a gesture detector)
//! - a node in the target's ancestor chain changed its props
//! - a second pointer went down

use crate::backend::Backend;
use crate::config::PageConfig;
use crate::events::{
    guarded, CustomEvent, EventHandler, MultiTouchEvent, SemanticEvent, TouchEvent, TouchPoint,
    CLICK, LONG_PRESS, TAP, TOUCH_CANCEL, TOUCH_END, TOUCH_MOVE, TOUCH_START,
};
use crate::node::{PseudoStatus, PSEUDO_ACTIVE, PSEUDO_ALL, PSEUDO_FOCUS};
use crate::owner::UiOwner;
use crate::sign::Sign;
use cgmath::{Point2, Vector2};
use serde_json::json;
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{debug, info, trace};

/// Finger travel in pixels before a slide angle is computed.
const SLIDE_ANGLE_THRESHOLD: f32 = 10.;

/// Pseudo states a session clears when it ends. Focus outlives the session.
const SESSION_PSEUDO: PseudoStatus = PSEUDO_ALL & !PSEUDO_FOCUS;

/// Motion event actions.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotionAction {
    /// The first pointer went down.
    Down = 0,
    /// Another pointer went down; `action_index` names it.
    PointerDown = 1,
    Move = 2,
    /// A pointer other than the last one went up; `action_index` names it.
    PointerUp = 3,
    /// The last pointer went up.
    Up = 4,
    Cancel = 5,
}

/// One pointer in a motion event.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pointer {
    pub id: u32,
    /// Position relative to the root view.
    pub position: Point2<f32>,
}

/// Raw platform input.
#[derive(Debug, Clone, PartialEq)]
pub struct MotionEvent {
    pub action: MotionAction,
    /// Index into `pointers` of the pointer that changed, for pointer down/up.
    pub action_index: usize,
    pub pointers: Vec<Pointer>,
    pub timestamp: u64,
}

impl MotionEvent {
    /// A single-pointer event for pointer 0.
    pub fn single(action: MotionAction, x: f32, y: f32, timestamp: u64) -> MotionEvent {
        MotionEvent {
            action,
            action_index: 0,
            pointers: vec![Pointer {
                id: 0,
                position: Point2::new(x, y),
            }],
            timestamp,
        }
    }

    fn position(&self, index: usize) -> Option<Point2<f32>> {
        self.pointers.get(index).map(|p| p.position)
    }
}

/// Whether the current slide is consumed by the page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlideVerdict {
    Undefined,
    Enable,
    Disable,
}

#[derive(Debug, Clone, Copy)]
struct PointerDetail {
    target: Sign,
    down: Point2<f32>,
    prev: Point2<f32>,
}

/// Turns motion events into touch, tap, click and long press events.
#[derive(Debug)]
pub struct TouchDispatcher {
    tap_slop: f32,
    move_slop: f32,
    long_press_ms: u64,
    enable_multi_touch: bool,
    has_touch_pseudo: bool,

    active: Option<Sign>,
    details: HashMap<u32, PointerDetail>,
    /// Outermost first.
    pseudo_chain: Vec<Sign>,
    /// Outermost first; the last entry is the click target.
    click_chain: Vec<Sign>,
    focused: Option<Sign>,
    down_point: Point2<f32>,
    moved: bool,
    moving: bool,
    should_check_move: bool,
    gesture_recognized: bool,
    touch_outside: bool,
    has_multi_touch: bool,
    recognized_by: HashSet<Sign>,
    props_changed: HashSet<Sign>,
    long_press_deadline: Option<u64>,
    last_event: Option<MotionEvent>,

    can_consume_slide: bool,
    slide: SlideVerdict,

    handlers: Vec<EventHandler>,
}

impl TouchDispatcher {
    pub fn new(config: &PageConfig) -> TouchDispatcher {
        TouchDispatcher {
            tap_slop: config.tap_slop,
            move_slop: config.move_slop,
            long_press_ms: config.long_press_duration_ms,
            enable_multi_touch: config.enable_multi_touch,
            has_touch_pseudo: config.has_touch_pseudo,
            active: None,
            details: HashMap::new(),
            pseudo_chain: Vec::new(),
            click_chain: Vec::new(),
            focused: None,
            down_point: Point2::new(0., 0.),
            moved: false,
            moving: false,
            should_check_move: true,
            gesture_recognized: false,
            touch_outside: false,
            has_multi_touch: false,
            recognized_by: HashSet::new(),
            props_changed: HashSet::new(),
            long_press_deadline: None,
            last_event: None,
            can_consume_slide: false,
            slide: SlideVerdict::Undefined,
            handlers: Vec::new(),
        }
    }

    /// Adds a native observer of every event this dispatcher emits.
    pub fn add_event_handler(&mut self, handler: EventHandler) {
        self.handlers.push(handler);
    }

    pub fn set_tap_slop(&mut self, slop: f32) {
        self.tap_slop = slop;
    }

    pub fn set_enable_multi_touch(&mut self, enable: bool) {
        self.enable_multi_touch = enable;
    }

    /// Turns on `:active` reporting. Once on, it stays on.
    pub fn update_event_info(&mut self, has_touch_pseudo: bool) {
        self.has_touch_pseudo = self.has_touch_pseudo || has_touch_pseudo;
    }

    pub fn active_target(&self) -> Option<Sign> {
        self.active
    }

    pub fn focused(&self) -> Option<Sign> {
        self.focused
    }

    pub fn is_touch_moving(&self) -> bool {
        self.moving
    }

    /// Whether pointer 0 moved beyond the tap slop in this session.
    pub fn has_moved(&self) -> bool {
        self.moved
    }

    pub fn has_multi_touch(&self) -> bool {
        self.has_multi_touch
    }

    /// A gesture detector took over the session; tap, click and long press are off.
    pub fn on_gesture_recognized<B: Backend>(&mut self, owner: &mut UiOwner<B>) {
        self.gesture_recognized = true;
        self.long_press_deadline = None;
        self.deactivate_pseudo(owner, PSEUDO_ACTIVE);
    }

    /// A node's gesture detector recognized a gesture.
    pub fn on_gesture_recognized_by(&mut self, sign: Sign) {
        self.recognized_by.insert(sign);
    }

    /// A node's props changed while the session is running.
    pub fn on_props_changed(&mut self, sign: Sign) {
        if self.active.is_some() {
            self.props_changed.insert(sign);
        }
    }

    /// Forgets the targets, for example after the tree was reset.
    pub fn reset(&mut self) {
        self.active = None;
        self.focused = None;
        self.click_chain.clear();
        self.pseudo_chain.clear();
        self.details.clear();
        self.long_press_deadline = None;
    }

    /// The first node in the target's ancestor chain found in `set`.
    fn suppressed_by(owner: &UiOwner<impl Backend>, target: Option<Sign>, set: &HashSet<Sign>) -> Option<Sign> {
        let target = target?;
        if set.is_empty() {
            return None;
        }
        owner.ancestors(target).into_iter().find(|s| set.contains(s))
    }

    fn is_suppressed<B: Backend>(&self, owner: &UiOwner<B>, target: Option<Sign>) -> bool {
        Self::suppressed_by(owner, target, &self.recognized_by).is_some()
            || Self::suppressed_by(owner, target, &self.props_changed).is_some()
    }

    /// Handles one motion event. Returns false if the page does not handle the stream and the
    /// platform should process it.
    pub fn on_touch_event<B: Backend>(&mut self, owner: &mut UiOwner<B>, ev: &MotionEvent) -> bool {
        match ev.action {
            MotionAction::Down => {
                let point = match ev.position(0) {
                    Some(point) => point,
                    None => return false,
                };
                self.active = owner.hit_test(point);
                let target = match self.active {
                    Some(target) => target,
                    None => {
                        debug!(x = point.x, y = point.y, "touch hit nothing");
                        return false;
                    }
                };
                if owner.event_through(target) {
                    trace!(target, "event through");
                    return false;
                }
                self.init_session(point, ev.timestamp);
                self.init_click_chain(owner, target);
                let id = ev.pointers[0].id;
                self.details.insert(
                    id,
                    PointerDetail {
                        target,
                        down: point,
                        prev: point,
                    },
                );
                if self.enable_multi_touch {
                    let touches = self.touch_map(owner, ev, &[0]);
                    self.emit_multi(owner, TOUCH_START, touches, ev.timestamp);
                } else {
                    self.emit_touch(owner, target, TOUCH_START, ev);
                }
                self.activate_pseudo(owner, target);
            }
            MotionAction::PointerDown => {
                let active = match self.active {
                    Some(active) => active,
                    None => return false,
                };
                if owner.event_through(active) {
                    return false;
                }
                self.has_multi_touch = true;
                self.long_press_deadline = None;
                let index = ev.action_index;
                if let Some(pointer) = ev.pointers.get(index) {
                    if let Some(target) = owner.hit_test(pointer.position) {
                        self.details.insert(
                            pointer.id,
                            PointerDetail {
                                target,
                                down: pointer.position,
                                prev: pointer.position,
                            },
                        );
                        if self.enable_multi_touch {
                            let touches = self.touch_map(owner, ev, &[index]);
                            self.emit_multi(owner, TOUCH_START, touches, ev.timestamp);
                        }
                    }
                }
            }
            _ => {
                let active = match self.active {
                    Some(active) if !self.details.is_empty() => active,
                    _ => return false,
                };
                if owner.event_through(active) {
                    return false;
                }
                match ev.action {
                    MotionAction::Move => self.on_move(owner, active, ev),
                    MotionAction::PointerUp => {
                        let index = ev.action_index;
                        let id = ev.pointers.get(index).map(|p| p.id);
                        if self.enable_multi_touch {
                            if id == Some(0) {
                                self.deactivate_pseudo(owner, SESSION_PSEUDO);
                            }
                            let touches = self.touch_map(owner, ev, &[index]);
                            self.emit_multi(owner, TOUCH_END, touches, ev.timestamp);
                        }
                        if let Some(id) = id {
                            self.details.remove(&id);
                        }
                    }
                    MotionAction::Up => {
                        self.update_focus(owner, active);
                        if self.enable_multi_touch {
                            let touches = self.touch_map(owner, ev, &[0]);
                            self.emit_multi(owner, TOUCH_END, touches, ev.timestamp);
                        } else {
                            self.emit_touch(owner, active, TOUCH_END, ev);
                        }
                        self.deactivate_pseudo(owner, SESSION_PSEUDO);
                        self.fire_click(owner, ev);
                        self.fire_tap(owner, active, ev);
                        self.reset_session();
                    }
                    MotionAction::Cancel => {
                        if self.enable_multi_touch {
                            let indices: Vec<usize> = (0..ev.pointers.len()).collect();
                            let touches = self.touch_map(owner, ev, &indices);
                            self.emit_multi(owner, TOUCH_CANCEL, touches, ev.timestamp);
                        } else {
                            self.emit_touch(owner, active, TOUCH_CANCEL, ev);
                        }
                        self.deactivate_pseudo(owner, SESSION_PSEUDO);
                        self.reset_session();
                    }
                    MotionAction::Down | MotionAction::PointerDown => (),
                }
            }
        }
        self.last_event = Some(ev.clone());
        true
    }

    fn init_session(&mut self, point: Point2<f32>, timestamp: u64) {
        self.moved = false;
        self.moving = false;
        self.should_check_move = true;
        self.down_point = point;
        self.gesture_recognized = false;
        self.recognized_by.clear();
        self.props_changed.clear();
        self.has_multi_touch = false;
        self.details.clear();
        self.long_press_deadline = Some(timestamp + self.long_press_ms);
    }

    fn init_click_chain<B: Backend>(&mut self, owner: &UiOwner<B>, target: Sign) {
        let mut chain = owner.ancestors(target);
        chain.reverse();
        while let Some(last) = chain.last() {
            if owner.node(*last).map_or(false, |n| n.has_listener(CLICK)) {
                break;
            }
            chain.pop();
        }
        self.touch_outside = chain.is_empty();
        self.click_chain = chain;
    }

    fn reset_session(&mut self) {
        self.pseudo_chain.clear();
        self.click_chain.clear();
        self.recognized_by.clear();
        self.props_changed.clear();
        self.moved = false;
        self.moving = false;
        self.should_check_move = true;
        self.has_multi_touch = false;
        self.details.clear();
        self.long_press_deadline = None;
    }

    fn should_trigger_move(&mut self, ev: &MotionEvent) -> bool {
        if !self.should_check_move {
            return true;
        }
        let delta = self.primary_position(ev) - self.down_point;
        if delta.x.abs() > self.move_slop || delta.y.abs() > self.move_slop {
            self.should_check_move = false;
            return true;
        }
        false
    }

    fn on_move<B: Backend>(&mut self, owner: &mut UiOwner<B>, active: Sign, ev: &MotionEvent) {
        if !self.should_trigger_move(ev) {
            return;
        }
        self.moving = true;
        if self.enable_multi_touch {
            let mut changed = Vec::new();
            for index in 0..ev.pointers.len() {
                if self.on_pointer_move(owner, ev, index) {
                    changed.push(index);
                }
            }
            if !changed.is_empty() {
                let touches = self.touch_map(owner, ev, &changed);
                self.emit_multi(owner, TOUCH_MOVE, touches, ev.timestamp);
            }
        } else if self.on_pointer_move(owner, ev, 0) {
            self.emit_touch(owner, active, TOUCH_MOVE, ev);
        }
    }

    /// Tracks one pointer's movement. Returns whether it changed position.
    fn on_pointer_move<B: Backend>(&mut self, owner: &mut UiOwner<B>, ev: &MotionEvent, index: usize) -> bool {
        let pointer = match ev.pointers.get(index) {
            Some(pointer) => *pointer,
            None => return false,
        };
        let session_down = self.down_point;
        let multi = self.enable_multi_touch;
        let slop = self.tap_slop;
        let detail = match self.details.get_mut(&pointer.id) {
            Some(detail) => detail,
            None => return false,
        };
        if detail.prev == pointer.position {
            return false;
        }
        let down = if multi { detail.down } else { session_down };
        let beyond_slop = (down.x - pointer.position.x).abs() > slop
            || (down.y - pointer.position.y).abs() > slop;
        detail.prev = pointer.position;

        let primary_moved = beyond_slop && pointer.id == 0;
        if primary_moved && !self.moved {
            debug!(x = pointer.position.x, y = pointer.position.y, "touch moved beyond slop");
            self.moved = true;
            self.long_press_deadline = None;
        }

        let target = owner.hit_test(pointer.position);
        if pointer.id == 0 {
            self.diff_pseudo_chain(owner, target);
        }
        let click_target = self.click_chain.last().copied();
        self.touch_outside = self.touch_outside
            || self.gesture_recognized
            || Self::suppressed_by(owner, click_target, &self.recognized_by).is_some()
            || self.outside_click_chain(owner, target);
        if primary_moved || self.is_suppressed(owner, self.active) {
            self.deactivate_pseudo(owner, PSEUDO_ACTIVE);
            self.long_press_deadline = None;
        }
        true
    }

    fn outside_click_chain<B: Backend>(&self, owner: &UiOwner<B>, target: Option<Sign>) -> bool {
        let target = match target {
            Some(target) => target,
            None => return true,
        };
        let mut chain = owner.ancestors(target);
        chain.reverse();
        chain.len() < self.click_chain.len() || !chain.starts_with(&self.click_chain)
    }

    fn fire_click<B: Backend>(&mut self, owner: &mut UiOwner<B>, ev: &MotionEvent) {
        let target = match self.click_chain.last() {
            Some(target) => *target,
            None => return,
        };
        if self.has_multi_touch
            || self.touch_outside
            || self.gesture_recognized
            || self.moved
            || self.is_suppressed(owner, self.active)
        {
            return;
        }
        self.emit_touch(owner, target, CLICK, ev);
    }

    fn fire_tap<B: Backend>(&mut self, owner: &mut UiOwner<B>, active: Sign, ev: &MotionEvent) {
        if self.has_multi_touch
            || self.gesture_recognized
            || self.moved
            || self.is_suppressed(owner, Some(active))
        {
            info!(
                gesture = self.gesture_recognized,
                moved = self.moved,
                multi_touch = self.has_multi_touch,
                "tap suppressed"
            );
            return;
        }
        self.emit_touch(owner, active, TAP, ev);
    }

    fn update_focus<B: Backend>(&mut self, owner: &mut UiOwner<B>, active: Sign) {
        if self.gesture_recognized || self.is_suppressed(owner, Some(active)) {
            return;
        }
        let prev = self.focused.replace(active);
        if prev == Some(active) {
            return;
        }
        let focusable = |sign: Option<Sign>| {
            sign.and_then(|s| owner.node(s))
                .map_or(false, |n| n.state().focusable)
        };
        let active_focusable = focusable(Some(active));
        let prev_focusable = focusable(prev);
        if active_focusable {
            self.set_pseudo_bits(owner, active, PSEUDO_FOCUS, 0);
            let event = CustomEvent::new(active, "focus", json!({ "from": prev_focusable }));
            self.emit(owner, SemanticEvent::Custom(event));
        }
        if let (Some(prev), true) = (prev, prev_focusable) {
            self.set_pseudo_bits(owner, prev, 0, PSEUDO_FOCUS);
            let event = CustomEvent::new(prev, "blur", json!({ "to": active_focusable }));
            self.emit(owner, SemanticEvent::Custom(event));
        }
    }

    /// Fires a due long press. Call with the current time.
    pub fn poll_timers<B: Backend>(&mut self, owner: &mut UiOwner<B>, now_ms: u64) {
        let deadline = match self.long_press_deadline {
            Some(deadline) if now_ms >= deadline => deadline,
            _ => return,
        };
        self.long_press_deadline = None;
        let active = match self.active {
            Some(active) => active,
            None => return,
        };
        if self.has_multi_touch || self.is_suppressed(owner, Some(active)) {
            return;
        }
        debug!(target = active, deadline, "long press");
        let mut ev = match &self.last_event {
            Some(ev) => ev.clone(),
            None => return,
        };
        ev.timestamp = now_ms;
        self.emit_touch(owner, active, LONG_PRESS, &ev);
        self.on_gesture_recognized(owner);
    }

    // pseudo state

    fn set_pseudo_bits<B: Backend>(&self, owner: &mut UiOwner<B>, sign: Sign, set: PseudoStatus, clear: PseudoStatus) {
        let before = match owner.node(sign) {
            Some(node) => node.pseudo_status(),
            None => return,
        };
        let after = (before | set) & !clear;
        if before == after {
            return;
        }
        owner.set_pseudo_status(sign, after);
        if self.has_touch_pseudo {
            let emitter = owner.context_mut().emitter();
            guarded("pseudo status", || {
                emitter.on_pseudo_status_changed(sign, before, after)
            });
        }
    }

    fn pseudo_chain_of<B: Backend>(owner: &UiOwner<B>, target: Sign) -> Vec<Sign> {
        let mut chain = Vec::new();
        let mut cur = Some(target);
        while let Some(sign) = cur {
            let node = match owner.node(sign) {
                Some(node) => node,
                None => break,
            };
            chain.push(sign);
            if !node.state().enable_touch_pseudo_propagation {
                break;
            }
            cur = node.parent();
        }
        chain.reverse();
        chain
    }

    fn activate_pseudo<B: Backend>(&mut self, owner: &mut UiOwner<B>, target: Sign) {
        self.pseudo_chain = Self::pseudo_chain_of(owner, target);
        for sign in self.pseudo_chain.clone() {
            self.set_pseudo_bits(owner, sign, PSEUDO_ACTIVE, 0);
        }
    }

    /// Deactivates the chain entries past the prefix shared with the new target's chain.
    fn diff_pseudo_chain<B: Backend>(&mut self, owner: &mut UiOwner<B>, target: Option<Sign>) {
        if self.pseudo_chain.is_empty() {
            return;
        }
        let next = target.map_or_else(Vec::new, |t| Self::pseudo_chain_of(owner, t));
        let shared = self
            .pseudo_chain
            .iter()
            .zip(next.iter())
            .take_while(|(a, b)| a == b)
            .count();
        let dropped = self.pseudo_chain.split_off(shared);
        for sign in dropped.into_iter().rev() {
            self.set_pseudo_bits(owner, sign, 0, PSEUDO_ACTIVE);
        }
    }

    fn deactivate_pseudo<B: Backend>(&mut self, owner: &mut UiOwner<B>, state: PseudoStatus) {
        for sign in self.pseudo_chain.clone() {
            self.set_pseudo_bits(owner, sign, 0, state);
        }
    }

    // slide consumption

    fn request_disallow_intercept<B: Backend>(owner: &mut UiOwner<B>, disallow: bool) -> bool {
        if owner.root().is_none() {
            debug!("no root to disallow intercept on");
            return false;
        }
        owner.backend_mut().request_disallow_intercept(disallow)
    }

    /// Decides whether the page consumes the current slide and tells the platform parent.
    ///
    /// Call before [`TouchDispatcher::on_touch_event`] for down events and after it otherwise.
    pub fn consume_slide_event<B: Backend>(&mut self, owner: &mut UiOwner<B>, ev: &MotionEvent) -> bool {
        match ev.action {
            MotionAction::Down => {
                self.slide = SlideVerdict::Undefined;
                let target = ev.position(0).and_then(|p| owner.hit_test(p));
                self.can_consume_slide = target.map_or(false, |t| {
                    owner.ancestors(t).iter().any(|s| {
                        owner
                            .node(*s)
                            .map_or(false, |n| !n.state().consume_slide.is_empty())
                    })
                });
                if self.can_consume_slide {
                    Self::request_disallow_intercept(owner, true);
                }
                return false;
            }
            MotionAction::Move => {
                if !self.can_consume_slide {
                    return false;
                }
                let delta: Vector2<f32> = self.primary_position(ev) - self.down_point;
                if delta.x.abs() <= SLIDE_ANGLE_THRESHOLD && delta.y.abs() <= SLIDE_ANGLE_THRESHOLD {
                    Self::request_disallow_intercept(owner, true);
                    return false;
                }
                if self.slide == SlideVerdict::Undefined {
                    self.slide = SlideVerdict::Disable;
                    let angle = delta.y.atan2(delta.x).to_degrees();
                    if let Some(active) = self.active {
                        let claimed = owner.ancestors(active).into_iter().find(|s| {
                            owner.node(*s).map_or(false, |n| {
                                n.state()
                                    .consume_slide
                                    .iter()
                                    .any(|(min, max)| angle >= *min && angle <= *max)
                            })
                        });
                        if let Some(sign) = claimed {
                            trace!(sign, angle, "slide claimed");
                            self.slide = SlideVerdict::Enable;
                        }
                    }
                }
            }
            _ => (),
        }
        let consume = self.slide == SlideVerdict::Enable;
        Self::request_disallow_intercept(owner, consume)
    }

    // emission

    fn emit<B: Backend>(&self, owner: &mut UiOwner<B>, event: SemanticEvent) {
        trace!(name = event.name(), "emitting");
        {
            let emitter = owner.context_mut().emitter();
            guarded("touch event", || match &event {
                SemanticEvent::Touch(e) => emitter.send_touch_event(e),
                SemanticEvent::MultiTouch(e) => emitter.send_multi_touch_event(e),
                SemanticEvent::Custom(e) => emitter.send_custom_event(e),
            });
        }
        for handler in &self.handlers {
            handler.call(&event);
        }
    }

    /// Position of pointer id 0, or the session's down point once it lifted.
    fn primary_position(&self, ev: &MotionEvent) -> Point2<f32> {
        ev.pointers
            .iter()
            .find(|p| p.id == 0)
            .map_or(self.down_point, |p| p.position)
    }

    fn target_point<B: Backend>(owner: &UiOwner<B>, target: Sign, page: Point2<f32>) -> Point2<f32> {
        match owner.bounding_client_rect(target) {
            Some(rect) => Point2::new(page.x - rect.left(), page.y - rect.top()),
            None => page,
        }
    }

    fn emit_touch<B: Backend>(&self, owner: &mut UiOwner<B>, target: Sign, name: &str, ev: &MotionEvent) {
        let page = self.primary_position(ev);
        let client = page + owner.backend().root_origin_on_screen();
        let target_point = match self.active {
            Some(active) => Self::target_point(owner, active, page),
            None => page,
        };
        let event = TouchEvent {
            name: name.to_string(),
            target_sign: target,
            client_point: client.into(),
            page_point: page.into(),
            target_point: target_point.into(),
            timestamp: ev.timestamp,
        };
        self.emit(owner, SemanticEvent::Touch(event));
    }

    /// Payload entries for the given pointer indices, grouped by each pointer's target.
    fn touch_map<B: Backend>(&self, owner: &UiOwner<B>, ev: &MotionEvent, indices: &[usize]) -> BTreeMap<Sign, Vec<TouchPoint>> {
        let origin = owner.backend().root_origin_on_screen();
        let mut touches: BTreeMap<Sign, Vec<TouchPoint>> = BTreeMap::new();
        for index in indices {
            let pointer = match ev.pointers.get(*index) {
                Some(pointer) => pointer,
                None => continue,
            };
            let detail = match self.details.get(&pointer.id) {
                Some(detail) => detail,
                None => continue,
            };
            let page = pointer.position;
            let target = Self::target_point(owner, detail.target, page);
            touches.entry(detail.target).or_default().push(TouchPoint {
                pointer_id: pointer.id,
                client_x: page.x + origin.x,
                client_y: page.y + origin.y,
                page_x: page.x,
                page_y: page.y,
                target_x: target.x,
                target_y: target.y,
            });
        }
        touches
    }

    fn emit_multi<B: Backend>(&self, owner: &mut UiOwner<B>, name: &str, touches: BTreeMap<Sign, Vec<TouchPoint>>, timestamp: u64) {
        let event = MultiTouchEvent {
            name: name.to_string(),
            touches,
            timestamp,
        };
        self.emit(owner, SemanticEvent::MultiTouch(event));
    }
}

#[cfg(test)]
use crate::node::{EventListener, ListenerKind};
#[cfg(test)]
use crate::props::Props;
#[cfg(test)]
use crate::rect::Rect;
#[cfg(test)]
use crate::testing::{build, build_with, harness, BackendCall, Emitted, FakeBackend, Harness};

#[cfg(test)]
fn frame(left: f32, top: f32, width: f32, height: f32) -> Rect {
    Rect::from_ltrb(left, top, left + width, top + height)
}

/// `page#1 > A#2(click) > B#3 > C#4`, with C at (20, 20)-(120, 120) on the page.
#[cfg(test)]
fn click_tree(config: PageConfig) -> (Harness, TouchDispatcher) {
    let mut h = harness(config.clone());
    build(
        &mut h.owner,
        &[
            (1, None, "page", false, frame(0., 0., 400., 800.)),
            (2, Some(1), "view", false, frame(0., 0., 400., 400.)),
            (3, Some(2), "view", false, frame(10., 10., 300., 300.)),
            (4, Some(3), "view", false, frame(10., 10., 100., 100.)),
        ],
    );
    h.owner
        .set_event_listeners(2, &[EventListener::new(CLICK, ListenerKind::Bind)]);
    h.owner.perform_layout();
    (h, TouchDispatcher::new(&config))
}

#[cfg(test)]
fn touch(owner: &mut UiOwner<FakeBackend>, d: &mut TouchDispatcher, action: MotionAction, x: f32, y: f32, t: u64) -> bool {
    d.on_touch_event(owner, &MotionEvent::single(action, x, y, t))
}

#[cfg(test)]
fn taps_and_clicks(h: &Harness) -> Vec<(String, Sign)> {
    h.events
        .named()
        .into_iter()
        .filter(|(name, _)| name == TAP || name == CLICK)
        .collect()
}

#[test]
fn test_tap_and_click_scoping() {
    let (mut h, mut d) = click_tree(PageConfig::default());
    assert!(touch(&mut h.owner, &mut d, MotionAction::Down, 50., 50., 0));
    assert_eq!(d.active_target(), Some(4));
    assert!(touch(&mut h.owner, &mut d, MotionAction::Up, 50., 50., 10));
    assert_eq!(
        h.events.named(),
        vec![
            (TOUCH_START.to_string(), 4),
            (TOUCH_END.to_string(), 4),
            (CLICK.to_string(), 2),
            (TAP.to_string(), 4),
        ]
    );
}

#[test]
fn test_move_beyond_slop_suppresses_tap_and_click() {
    let (mut h, mut d) = click_tree(PageConfig::default());
    touch(&mut h.owner, &mut d, MotionAction::Down, 50., 50., 0);
    touch(&mut h.owner, &mut d, MotionAction::Move, 50., 150., 5);
    assert!(d.has_moved());
    touch(&mut h.owner, &mut d, MotionAction::Up, 50., 150., 10);
    assert!(taps_and_clicks(&h).is_empty());
    assert!(h
        .events
        .named()
        .contains(&(TOUCH_MOVE.to_string(), 4)));
}

#[test]
fn test_small_move_still_taps() {
    let (mut h, mut d) = click_tree(PageConfig::default());
    touch(&mut h.owner, &mut d, MotionAction::Down, 50., 50., 0);
    touch(&mut h.owner, &mut d, MotionAction::Move, 60., 55., 5);
    touch(&mut h.owner, &mut d, MotionAction::Up, 60., 55., 10);
    assert_eq!(
        taps_and_clicks(&h),
        vec![(CLICK.to_string(), 2), (TAP.to_string(), 4)]
    );
}

#[test]
fn test_props_change_and_gesture_suppress_tap() {
    let (mut h, mut d) = click_tree(PageConfig::default());
    touch(&mut h.owner, &mut d, MotionAction::Down, 50., 50., 0);
    d.on_props_changed(3);
    touch(&mut h.owner, &mut d, MotionAction::Up, 50., 50., 10);
    assert!(taps_and_clicks(&h).is_empty());

    h.events.clear();
    touch(&mut h.owner, &mut d, MotionAction::Down, 50., 50., 20);
    d.on_gesture_recognized(&mut h.owner);
    touch(&mut h.owner, &mut d, MotionAction::Up, 50., 50., 30);
    assert!(taps_and_clicks(&h).is_empty());

    h.events.clear();
    touch(&mut h.owner, &mut d, MotionAction::Down, 50., 50., 40);
    touch(&mut h.owner, &mut d, MotionAction::Up, 50., 50., 50);
    assert_eq!(taps_and_clicks(&h).len(), 2, "suppression is per session");
}

#[test]
fn test_multi_touch_suppresses_tap() {
    let mut config = PageConfig::default();
    config.enable_multi_touch = true;
    let (mut h, mut d) = click_tree(config);
    let p0 = Pointer {
        id: 0,
        position: Point2::new(50., 50.),
    };
    let p1 = |x, y| Pointer {
        id: 1,
        position: Point2::new(x, y),
    };
    let event = |action, action_index, pointers: Vec<Pointer>, timestamp| MotionEvent {
        action,
        action_index,
        pointers,
        timestamp,
    };

    d.on_touch_event(&mut h.owner, &event(MotionAction::Down, 0, vec![p0], 0));
    d.on_touch_event(
        &mut h.owner,
        &event(MotionAction::PointerDown, 1, vec![p0, p1(200., 200.)], 1),
    );
    d.on_touch_event(
        &mut h.owner,
        &event(MotionAction::Move, 0, vec![p0, p1(200., 300.)], 2),
    );
    assert!(!d.has_moved(), "only pointer 0 moves the session");
    assert!(d.has_multi_touch());
    d.on_touch_event(
        &mut h.owner,
        &event(MotionAction::PointerUp, 1, vec![p0, p1(200., 300.)], 3),
    );
    d.on_touch_event(&mut h.owner, &event(MotionAction::Up, 0, vec![p0], 4));

    assert!(taps_and_clicks(&h).is_empty());
    let starts: Vec<Vec<Sign>> = h
        .events
        .events()
        .into_iter()
        .filter_map(|e| match e {
            Emitted::MultiTouch(e) if e.name == TOUCH_START => {
                Some(e.touches.keys().copied().collect())
            }
            _ => None,
        })
        .collect();
    assert_eq!(starts, vec![vec![4], vec![3]]);
}

#[test]
fn test_event_through_is_not_handled() {
    let mut h = harness(PageConfig::default());
    build(&mut h.owner, &[(1, None, "page", false, frame(0., 0., 400., 800.))]);
    build_with(
        &mut h.owner,
        2,
        Some(1),
        "view",
        false,
        frame(0., 0., 100., 100.),
        Props::new().with("event-through", true),
    );
    let mut d = TouchDispatcher::new(&PageConfig::default());
    assert!(!touch(&mut h.owner, &mut d, MotionAction::Down, 10., 10., 0));
    assert!(!touch(&mut h.owner, &mut d, MotionAction::Up, 10., 10., 1));
    assert!(h.events.named().is_empty());
}

#[test]
fn test_long_press_fires_once() {
    let (mut h, mut d) = click_tree(PageConfig::default());
    touch(&mut h.owner, &mut d, MotionAction::Down, 50., 50., 1000);
    d.poll_timers(&mut h.owner, 1200);
    assert!(h.events.named().iter().all(|(n, _)| n != LONG_PRESS));
    d.poll_timers(&mut h.owner, 1500);
    d.poll_timers(&mut h.owner, 1600);
    touch(&mut h.owner, &mut d, MotionAction::Up, 50., 50., 1700);
    let names: Vec<String> = h.events.named().into_iter().map(|(n, _)| n).collect();
    assert_eq!(names, vec![TOUCH_START, LONG_PRESS, TOUCH_END]);
}

#[cfg(test)]
fn two_pointers(action: MotionAction, action_index: usize, p0: (f32, f32), p1: (f32, f32), t: u64) -> MotionEvent {
    MotionEvent {
        action,
        action_index,
        pointers: vec![
            Pointer {
                id: 0,
                position: Point2::new(p0.0, p0.1),
            },
            Pointer {
                id: 1,
                position: Point2::new(p1.0, p1.1),
            },
        ],
        timestamp: t,
    }
}

/// Presses at t = 1000, runs `interrupt` before the deadline, then polls past it.
#[cfg(test)]
fn long_press_after(interrupt: impl FnOnce(&mut Harness, &mut TouchDispatcher)) -> bool {
    let (mut h, mut d) = click_tree(PageConfig::default());
    touch(&mut h.owner, &mut d, MotionAction::Down, 50., 50., 1000);
    interrupt(&mut h, &mut d);
    d.poll_timers(&mut h.owner, 1600);
    d.poll_timers(&mut h.owner, 2000);
    h.events.named().iter().any(|(n, _)| n == LONG_PRESS)
}

#[test]
fn test_long_press_cancelled_before_deadline() {
    assert!(long_press_after(|_, _| ()));
    assert!(!long_press_after(|h, d| {
        touch(&mut h.owner, d, MotionAction::Up, 50., 50., 1200);
    }));
    assert!(!long_press_after(|h, d| {
        touch(&mut h.owner, d, MotionAction::Move, 50., 150., 1200);
    }));
    assert!(!long_press_after(|h, d| {
        let ev = two_pointers(MotionAction::PointerDown, 1, (50., 50.), (200., 200.), 1200);
        d.on_touch_event(&mut h.owner, &ev);
    }));
    assert!(!long_press_after(|_, d| d.on_props_changed(3)));
    assert!(!long_press_after(|_, d| d.on_gesture_recognized_by(2)));
    assert!(!long_press_after(|h, d| d.on_gesture_recognized(&mut h.owner)));
}

#[test]
fn test_pointer_zero_lifting_first() {
    let (mut h, mut d) = click_tree(PageConfig::default());
    touch(&mut h.owner, &mut d, MotionAction::Down, 50., 50., 0);
    d.on_touch_event(
        &mut h.owner,
        &two_pointers(MotionAction::PointerDown, 1, (50., 50.), (60., 60.), 1),
    );
    d.on_touch_event(
        &mut h.owner,
        &two_pointers(MotionAction::PointerUp, 0, (50., 50.), (60., 60.), 2),
    );
    let only_second = |action, x, y, t| MotionEvent {
        action,
        action_index: 0,
        pointers: vec![Pointer {
            id: 1,
            position: Point2::new(x, y),
        }],
        timestamp: t,
    };
    d.on_touch_event(&mut h.owner, &only_second(MotionAction::Move, 300., 300., 3));
    assert!(!d.has_moved());
    assert!(!d.is_touch_moving());

    d.on_touch_event(&mut h.owner, &only_second(MotionAction::Up, 300., 300., 4));
    let end = h.events.events().into_iter().find_map(|e| match e {
        Emitted::Touch(e) if e.name == TOUCH_END => Some(e),
        _ => None,
    });
    assert_eq!(end.map(|e| (e.page_point.x, e.page_point.y)), Some((50., 50.)));
}

#[test]
fn test_pseudo_chain_deactivates_on_move_out() {
    let mut config = PageConfig::default();
    config.has_touch_pseudo = true;
    let (mut h, mut d) = click_tree(config);
    touch(&mut h.owner, &mut d, MotionAction::Down, 50., 50., 0);
    for sign in 1..=4 {
        assert_eq!(h.owner.node(sign).map(|n| n.pseudo_status()), Some(PSEUDO_ACTIVE));
    }
    // Into B but outside C, within the tap slop.
    touch(&mut h.owner, &mut d, MotionAction::Move, 15., 50., 5);
    assert_eq!(h.owner.node(4).map(|n| n.pseudo_status()), Some(0));
    assert_eq!(h.owner.node(3).map(|n| n.pseudo_status()), Some(PSEUDO_ACTIVE));
    touch(&mut h.owner, &mut d, MotionAction::Up, 15., 50., 10);
    for sign in 1..=4 {
        assert_eq!(h.owner.node(sign).map(|n| n.pseudo_status()), Some(0));
    }
    let changes = h
        .events
        .events()
        .into_iter()
        .filter(|e| matches!(e, Emitted::Pseudo(..)))
        .count();
    assert_eq!(changes, 8);
}

#[test]
fn test_focus_moves_between_focusable_nodes() {
    let mut h = harness(PageConfig::default());
    build(&mut h.owner, &[(1, None, "page", false, frame(0., 0., 400., 800.))]);
    for (sign, top) in &[(2, 0.), (3, 200.)] {
        build_with(
            &mut h.owner,
            *sign,
            Some(1),
            "view",
            false,
            frame(0., *top, 100., 100.),
            Props::new().with("focusable", true),
        );
    }
    let mut d = TouchDispatcher::new(&PageConfig::default());
    touch(&mut h.owner, &mut d, MotionAction::Down, 10., 10., 0);
    touch(&mut h.owner, &mut d, MotionAction::Up, 10., 10., 1);
    touch(&mut h.owner, &mut d, MotionAction::Down, 10., 210., 2);
    touch(&mut h.owner, &mut d, MotionAction::Up, 10., 210., 3);

    let custom: Vec<(String, Sign)> = h
        .events
        .named()
        .into_iter()
        .filter(|(n, _)| n == "focus" || n == "blur")
        .collect();
    assert_eq!(
        custom,
        vec![
            ("focus".to_string(), 2),
            ("focus".to_string(), 3),
            ("blur".to_string(), 2)
        ]
    );
    assert_eq!(d.focused(), Some(3));
    assert_eq!(h.owner.node(2).map(|n| n.pseudo_status() & PSEUDO_FOCUS), Some(0));
}

#[test]
fn test_consume_slide_by_angle() {
    let mut h = harness(PageConfig::default());
    build(&mut h.owner, &[(1, None, "page", false, frame(0., 0., 400., 800.))]);
    build_with(
        &mut h.owner,
        2,
        Some(1),
        "view",
        false,
        frame(0., 0., 400., 400.),
        Props::new().with("consume-slide-event", serde_json::json!([[-45, 45]])),
    );
    let mut d = TouchDispatcher::new(&PageConfig::default());
    let down = MotionEvent::single(MotionAction::Down, 100., 100., 0);
    assert!(!d.consume_slide_event(&mut h.owner, &down));
    d.on_touch_event(&mut h.owner, &down);

    let horizontal = MotionEvent::single(MotionAction::Move, 150., 105., 1);
    d.on_touch_event(&mut h.owner, &horizontal);
    assert!(d.consume_slide_event(&mut h.owner, &horizontal));
    let vertical = MotionEvent::single(MotionAction::Move, 150., 300., 2);
    d.on_touch_event(&mut h.owner, &vertical);
    assert!(
        d.consume_slide_event(&mut h.owner, &vertical),
        "the verdict holds for the session"
    );
    assert_eq!(
        h.owner.backend().calls.last(),
        Some(&BackendCall::DisallowIntercept(true))
    );
}

#[test]
fn test_handler_sees_every_event() {
    use parking_lot::Mutex;
    use std::sync::Arc;

    let (mut h, mut d) = click_tree(PageConfig::default());
    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&seen);
    d.add_event_handler(EventHandler::new(move |e| {
        log.lock().push(e.name().to_string());
        if e.name() == TOUCH_START {
            panic!("handler failure");
        }
    }));
    touch(&mut h.owner, &mut d, MotionAction::Down, 50., 50., 0);
    touch(&mut h.owner, &mut d, MotionAction::Up, 50., 50., 1);
    assert_eq!(*seen.lock(), vec![TOUCH_START, TOUCH_END, CLICK, TAP]);
}
