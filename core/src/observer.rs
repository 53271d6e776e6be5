//! Intersection observers.
//!
//! An observer watches a set of target nodes against a root rectangle (an ancestor node, the page
//! viewport, or the screen) and notifies the script side whenever a target's visible ratio crosses
//! one of its thresholds. Checks are driven by [`IntersectionObserverManager`], which reacts to
//! layout, scroll and draw signals and to a throttled frame tick.

use crate::backend::Backend;
use crate::events::{guarded, CustomEvent};
use crate::layout::Edges;
use crate::owner::UiOwner;
use crate::rect::{Rect, RectEdges};
use crate::sign::Sign;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, trace, warn};

/// Component id meaning "the page itself".
pub const DEFAULT_COMPONENT_ID: &str = "-1";

/// Event name of observers attached to a node through its props.
pub const INTERSECTION_EVENT: &str = "intersection";

/// Custom events that move content and so trigger a check.
const SCROLL_EVENTS: [&str; 3] = ["scroll", "scrolltoupper", "scrolltolower"];

const DEFAULT_INTERVAL_MS: u64 = 50;
const MIN_INTERVAL_MS: u64 = 16;

/// Throttling and readiness shared by the observer managers.
#[derive(Debug, Clone)]
pub struct ObserverSchedule {
    interval_ms: u64,
    last_check_ms: Option<u64>,
    root_painted: bool,
    attached: bool,
}

impl ObserverSchedule {
    /// A schedule checking at most `frame_rate` times per second, and never more often than
    /// every 16ms.
    pub fn new(frame_rate: u32) -> ObserverSchedule {
        let interval_ms = if frame_rate > 0 {
            (1000 / u64::from(frame_rate)).max(MIN_INTERVAL_MS)
        } else {
            DEFAULT_INTERVAL_MS
        };
        ObserverSchedule {
            interval_ms,
            last_check_ms: None,
            root_painted: false,
            attached: false,
        }
    }

    pub fn interval_ms(&self) -> u64 {
        self.interval_ms
    }

    pub fn is_attached(&self) -> bool {
        self.attached
    }

    pub fn attach(&mut self) {
        self.attached = true;
    }

    /// Stops reacting to signals until attached again.
    pub fn detach(&mut self) {
        self.attached = false;
        self.last_check_ms = None;
    }

    pub fn is_root_painted(&self) -> bool {
        self.root_painted
    }

    /// Records that the root view drew. Returns true the first time.
    pub fn on_root_view_draw(&mut self) -> bool {
        !std::mem::replace(&mut self.root_painted, true)
    }

    /// Whether a signal at `now_ms` should run a check. Consumes the interval if so.
    pub fn request_check(&mut self, now_ms: u64) -> bool {
        if !self.attached || !self.root_painted {
            return false;
        }
        match self.last_check_ms {
            Some(last) if now_ms.saturating_sub(last) <= self.interval_ms => false,
            _ => {
                self.last_check_ms = Some(now_ms);
                true
            }
        }
    }
}

/// Parses a length such as `12`, `"12"` or `"12px"`. Anything else is zero.
pub(crate) fn parse_length(value: Option<&Value>) -> f32 {
    let value = match value {
        Some(value) => value,
        None => return 0.,
    };
    if let Some(n) = value.as_f64() {
        return n as f32;
    }
    let text = value.as_str().unwrap_or("").trim();
    let number = text.strip_suffix("px").unwrap_or(text);
    match number.trim().parse::<f32>() {
        Ok(n) => n,
        Err(_) => {
            if !text.is_empty() {
                warn!(%text, "unsupported observer margin");
            }
            0.
        }
    }
}

/// Margins from `{left, right, top, bottom}`.
fn parse_margins(margins: &Value) -> Edges {
    Edges::new(
        parse_length(margins.get("left")),
        parse_length(margins.get("top")),
        parse_length(margins.get("right")),
        parse_length(margins.get("bottom")),
    )
}

/// Options of a script-created observer.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ObserverOptions {
    pub thresholds: Vec<f32>,
    pub initial_ratio: f32,
    /// Accepted but not acted upon; every observer watches one node per selector.
    pub observe_all: bool,
    pub relative_to_id_selector: Option<String>,
    pub relative_to_screen: bool,
    pub margin_left: Option<Value>,
    pub margin_right: Option<Value>,
    pub margin_top: Option<Value>,
    pub margin_bottom: Option<Value>,
}

impl Default for ObserverOptions {
    fn default() -> Self {
        ObserverOptions {
            thresholds: vec![0.],
            initial_ratio: 0.,
            observe_all: false,
            relative_to_id_selector: None,
            relative_to_screen: false,
            margin_left: None,
            margin_right: None,
            margin_top: None,
            margin_bottom: None,
        }
    }
}

impl ObserverOptions {
    pub fn from_value(value: &Value) -> ObserverOptions {
        match ObserverOptions::deserialize(value) {
            Ok(options) => options,
            Err(err) => {
                warn!(%err, "malformed observer options; using defaults");
                ObserverOptions::default()
            }
        }
    }
}

/// What the root rectangle is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObserverRoot {
    /// The page's root view.
    Viewport,
    /// The window the page is shown in.
    Screen,
    Node(Sign),
}

/// One computed observation.
#[derive(Debug, Clone, PartialEq)]
pub struct IntersectionEntry {
    pub relative_rect: Rect,
    pub bounding_client_rect: Rect,
    pub intersection_rect: Option<Rect>,
    pub intersection_ratio: f32,
    pub is_intersecting: bool,
    pub time: f64,
    /// Id selector of the target.
    pub observer_id: String,
}

impl IntersectionEntry {
    /// Ratio used for threshold crossing; `-1` without any intersection.
    fn crossing_ratio(&self) -> f32 {
        match self.intersection_rect {
            Some(_) => self.intersection_ratio,
            None => -1.,
        }
    }

    pub fn to_json(&self) -> Value {
        json!({
            "relativeRect": self.relative_rect.to_edges(),
            "boundingClientRect": self.bounding_client_rect.to_edges(),
            "intersectionRect": RectEdges::from(self.intersection_rect),
            "intersectionRatio": self.intersection_ratio,
            "isIntersecting": self.is_intersecting,
            "time": self.time,
            "observerId": self.observer_id,
        })
    }
}

#[derive(Debug, Clone)]
struct ObservationTarget {
    sign: Sign,
    callback_id: i32,
    entry: Option<IntersectionEntry>,
}

/// Wall-clock milliseconds.
fn now_ms() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0., |d| d.as_secs_f64() * 1000.)
}

/// Whether a ratio change crosses or touches one of the thresholds.
pub fn has_crossed_threshold(thresholds: &[f32], old_ratio: f32, new_ratio: f32) -> bool {
    if old_ratio == new_ratio {
        return false;
    }
    thresholds.iter().any(|t| {
        *t == old_ratio || *t == new_ratio || ((*t < old_ratio) != (*t < new_ratio))
    })
}

/// Watches target nodes against a root rectangle.
#[derive(Debug, Clone)]
pub struct IntersectionObserver {
    id: i32,
    container: Option<Sign>,
    root: ObserverRoot,
    margins: Edges,
    thresholds: Vec<f32>,
    initial_ratio: f32,
    targets: Vec<ObservationTarget>,
    /// Set for observers declared through a node's props; they notify that node with a custom
    /// event instead of calling a script callback.
    attached: Option<Sign>,
}

impl IntersectionObserver {
    /// A script-created observer scoped to a component.
    pub fn new<B: Backend>(
        owner: &UiOwner<B>,
        id: i32,
        component_id: &str,
        options: &ObserverOptions,
    ) -> IntersectionObserver {
        let container = if component_id == DEFAULT_COMPONENT_ID {
            owner.root()
        } else {
            owner.find_by_component_id(component_id)
        };
        let mut thresholds = options.thresholds.clone();
        thresholds.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        IntersectionObserver {
            id,
            container,
            root: ObserverRoot::Viewport,
            margins: Edges::default(),
            thresholds,
            initial_ratio: options.initial_ratio,
            targets: Vec::new(),
            attached: None,
        }
    }

    /// An observer declared on a node, observing that node right away.
    pub fn for_node<B: Backend>(
        owner: &mut UiOwner<B>,
        sign: Sign,
        options: &ObserverOptions,
    ) -> IntersectionObserver {
        let mut observer = IntersectionObserver::new(owner, -1, DEFAULT_COMPONENT_ID, options);
        observer.attached = Some(sign);
        if options.relative_to_screen {
            observer.root = ObserverRoot::Screen;
        }
        if let Some(selector) = &options.relative_to_id_selector {
            if let Some(id) = selector.strip_prefix('#') {
                if let Some(root) = owner.find_by_id_selector_search_up(id, sign) {
                    observer.root = ObserverRoot::Node(root);
                }
            }
        }
        observer.margins = Edges::new(
            parse_length(options.margin_left.as_ref()),
            parse_length(options.margin_top.as_ref()),
            parse_length(options.margin_right.as_ref()),
            parse_length(options.margin_bottom.as_ref()),
        );
        observer.add_target(owner, sign, 0);
        observer
    }

    pub fn id(&self) -> i32 {
        self.id
    }

    pub fn attached_node(&self) -> Option<Sign> {
        self.attached
    }

    pub fn root(&self) -> ObserverRoot {
        self.root
    }

    pub fn targets(&self) -> impl Iterator<Item = Sign> + '_ {
        self.targets.iter().map(|t| t.sign)
    }

    /// Last computed entry of a target.
    pub fn entry(&self, sign: Sign) -> Option<&IntersectionEntry> {
        self.targets
            .iter()
            .find(|t| t.sign == sign)
            .and_then(|t| t.entry.as_ref())
    }

    /// Looks up `#id` in the container first, then in the whole page.
    fn find<B: Backend>(&self, owner: &UiOwner<B>, selector: &str) -> Option<Sign> {
        let id = selector.strip_prefix('#')?;
        let found = self
            .container
            .and_then(|container| owner.find_by_id_selector_in(id, container));
        found.or_else(|| {
            debug!(selector, "not found in container; searching the page");
            owner.find_by_id_selector(id)
        })
    }

    /// Uses the node matching `selector` as root. Selectors must be `#id`.
    pub fn relative_to<B: Backend>(&mut self, owner: &UiOwner<B>, selector: &str, margins: &Value) {
        if !selector.starts_with('#') {
            return;
        }
        self.root = match self.find(owner, selector) {
            Some(sign) => ObserverRoot::Node(sign),
            None => {
                warn!(selector, "observer root not found; using the viewport");
                ObserverRoot::Viewport
            }
        };
        self.margins = parse_margins(margins);
    }

    pub fn relative_to_viewport(&mut self, margins: &Value) {
        self.root = ObserverRoot::Viewport;
        self.margins = parse_margins(margins);
    }

    pub fn relative_to_screen(&mut self, margins: &Value) {
        self.root = ObserverRoot::Screen;
        self.margins = parse_margins(margins);
    }

    /// Starts observing the node matching `selector` and checks it immediately.
    pub fn observe<B: Backend>(&mut self, owner: &mut UiOwner<B>, selector: &str, callback_id: i32) {
        if !selector.starts_with('#') {
            return;
        }
        match self.find(owner, selector) {
            Some(sign) => self.add_target(owner, sign, callback_id),
            None => debug!(selector, "observe target not found"),
        }
    }

    fn add_target<B: Backend>(&mut self, owner: &mut UiOwner<B>, sign: Sign, callback_id: i32) {
        if self.targets.iter().any(|t| t.sign == sign) {
            return;
        }
        let root_rect = self.root_rect(owner);
        self.targets.push(ObservationTarget {
            sign,
            callback_id,
            entry: None,
        });
        let index = self.targets.len() - 1;
        self.check_target(owner, index, root_rect, true);
    }

    /// Drops every target. The manager removes the observer itself.
    pub fn disconnect(&mut self) {
        self.targets.clear();
    }

    /// Recomputes every target and notifies threshold crossings.
    pub fn check_for_intersections<B: Backend>(&mut self, owner: &mut UiOwner<B>) {
        if self.targets.is_empty() {
            return;
        }
        let root_rect = self.root_rect(owner);
        for index in 0..self.targets.len() {
            self.check_target(owner, index, root_rect, false);
        }
    }

    fn root_rect<B: Backend>(&self, owner: &UiOwner<B>) -> Rect {
        let rect = match self.root {
            ObserverRoot::Node(sign) => owner.bounds_on_screen(sign),
            ObserverRoot::Screen => Some(owner.backend().window_rect()),
            ObserverRoot::Viewport => owner.root().and_then(|root| owner.bounds_on_screen(root)),
        };
        rect.unwrap_or_else(Rect::zero).outset(self.margins)
    }

    /// Clips the target against every clipping ancestor up to the root.
    fn intersect<B: Backend>(&self, owner: &UiOwner<B>, target: Sign, target_rect: Rect, root_rect: Rect) -> Option<Rect> {
        let visible = |sign: Sign| owner.node(sign).map_or(false, |n| n.state().visible);
        if !visible(target) {
            return None;
        }
        let root = match self.root {
            ObserverRoot::Node(sign) => Some(sign),
            _ => owner.root(),
        };
        let mut rect = target_rect;
        let mut parent = owner.node(target).and_then(|n| n.parent());
        while let Some(sign) = parent {
            if !visible(sign) {
                return None;
            }
            let clip = if Some(sign) == root {
                if self.root == ObserverRoot::Screen {
                    owner.bounds_on_screen(sign)
                } else {
                    Some(root_rect)
                }
            } else if owner.node(sign).map_or(false, |n| n.state().overflow.clips()) {
                owner.bounds_on_screen(sign)
            } else {
                None
            };
            if let Some(clip) = clip {
                rect = clip.intersect(rect)?;
            }
            if Some(sign) == root {
                break;
            }
            parent = owner.node(sign).and_then(|n| n.parent());
        }
        if self.root == ObserverRoot::Screen {
            return rect.intersect(root_rect);
        }
        Some(rect)
    }

    fn check_target<B: Backend>(&mut self, owner: &mut UiOwner<B>, index: usize, root_rect: Rect, initial: bool) {
        let sign = self.targets[index].sign;
        let bounds = owner.bounds_on_screen(sign).unwrap_or_else(Rect::zero);
        let intersection = self.intersect(owner, sign, bounds, root_rect);
        let target_area = bounds.area();
        let intersection_ratio = match intersection {
            Some(rect) if target_area > 0. => rect.area() / target_area,
            _ => 0.,
        };
        let entry = IntersectionEntry {
            relative_rect: root_rect,
            bounding_client_rect: bounds,
            intersection_rect: intersection,
            intersection_ratio,
            is_intersecting: intersection.map_or(false, |r| !r.is_empty()),
            time: now_ms(),
            observer_id: owner
                .node(sign)
                .and_then(|n| n.state().id_selector.clone())
                .unwrap_or_default(),
        };
        let old = self.targets[index].entry.replace(entry.clone());
        let notify = if initial {
            self.initial_ratio < entry.intersection_ratio
        } else {
            let old_ratio = old.map_or(-1., |e| e.crossing_ratio());
            has_crossed_threshold(&self.thresholds, old_ratio, entry.crossing_ratio())
        };
        if !notify {
            return;
        }
        trace!(observer = self.id, target = sign, ratio = entry.intersection_ratio, "intersection changed");
        let payload = entry.to_json();
        let callback_id = self.targets[index].callback_id;
        let emitter = owner.context_mut().emitter();
        match self.attached {
            Some(node) => guarded("intersection event", || {
                emitter.send_custom_event(&CustomEvent::new(node, INTERSECTION_EVENT, payload))
            }),
            None => guarded("intersection callback", || {
                emitter.call_intersection_observer(self.id, callback_id, payload)
            }),
        }
    }
}

/// Owns the page's intersection observers and decides when they check.
#[derive(Debug)]
pub struct IntersectionObserverManager {
    observers: Vec<IntersectionObserver>,
    schedule: ObserverSchedule,
    /// Whether observers are driven by signals and frame ticks at all.
    enable_signals: bool,
}

impl IntersectionObserverManager {
    pub fn new(frame_rate: u32, enable_signals: bool) -> IntersectionObserverManager {
        IntersectionObserverManager {
            observers: Vec::new(),
            schedule: ObserverSchedule::new(frame_rate),
            enable_signals,
        }
    }

    pub fn schedule(&self) -> &ObserverSchedule {
        &self.schedule
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }

    /// Adds an observer; the first one attaches the signal listeners.
    pub fn add_observer(&mut self, observer: IntersectionObserver) {
        let duplicate = observer.id != -1 && self.observers.iter().any(|o| o.id == observer.id);
        if duplicate {
            return;
        }
        self.observers.push(observer);
        if self.observers.len() == 1 && self.enable_signals {
            debug!("attaching intersection observer signals");
            self.schedule.attach();
        }
    }

    fn removed(&mut self) {
        if self.observers.is_empty() && self.enable_signals {
            debug!("no intersection observers left; detaching");
            self.schedule.detach();
        }
    }

    pub fn remove_observer(&mut self, id: i32) {
        if let Some(index) = self.observers.iter().position(|o| o.id == id) {
            self.observers.remove(index);
            self.removed();
        }
    }

    /// Removes the observer declared on a node.
    pub fn remove_attached_observer(&mut self, sign: Sign) {
        if let Some(index) = self.observers.iter().position(|o| o.attached == Some(sign)) {
            self.observers.remove(index);
            self.removed();
        }
    }

    /// Disconnects an observer and removes it.
    pub fn disconnect(&mut self, id: i32) {
        if let Some(observer) = self.observer_mut(id) {
            observer.disconnect();
        }
        self.remove_observer(id);
    }

    pub fn observer_mut(&mut self, id: i32) -> Option<&mut IntersectionObserver> {
        self.observers.iter_mut().find(|o| o.id == id)
    }

    pub fn notify_observers<B: Backend>(&mut self, owner: &mut UiOwner<B>) {
        for observer in &mut self.observers {
            observer.check_for_intersections(owner);
        }
    }

    /// A layout pass finished.
    pub fn on_layout_event<B: Backend>(&mut self, owner: &mut UiOwner<B>) {
        if !self.observers.is_empty() {
            self.notify_observers(owner);
        }
    }

    /// A custom event was sent; scroll events trigger a check.
    pub fn on_custom_event<B: Backend>(&mut self, owner: &mut UiOwner<B>, name: &str) {
        if !self.observers.is_empty() && SCROLL_EVENTS.contains(&name) {
            self.notify_observers(owner);
        }
    }

    /// Scroll, global layout and draw signals of the root view.
    pub fn request_check<B: Backend>(&mut self, owner: &mut UiOwner<B>, now_ms: u64) {
        if self.schedule.request_check(now_ms) {
            self.check(owner);
        }
    }

    /// The root view drew. The first draw enables checks and runs one.
    pub fn on_root_view_draw<B: Backend>(&mut self, owner: &mut UiOwner<B>) {
        if self.schedule.on_root_view_draw() {
            self.check(owner);
        }
    }

    fn check<B: Backend>(&mut self, owner: &mut UiOwner<B>) {
        if !self.schedule.is_root_painted() {
            debug!("root view not drawn yet; skipping intersection check");
            return;
        }
        if owner.root().is_none() {
            debug!("no root view; skipping intersection check");
            return;
        }
        self.notify_observers(owner);
    }

    /// Drops every observer and detaches.
    pub fn clear(&mut self) {
        self.observers.clear();
        self.schedule.detach();
    }
}

#[cfg(test)]
use crate::config::PageConfig;
#[cfg(test)]
use crate::layout::LayoutBox;
#[cfg(test)]
use crate::props::Props;
#[cfg(test)]
use crate::testing::{build, build_with, harness, Emitted, FakeBackend, Harness};

#[cfg(test)]
fn frame(left: f32, top: f32, width: f32, height: f32) -> Rect {
    Rect::from_ltrb(left, top, left + width, top + height)
}

/// `page#1` (400x800) with `#target` (#2, 100x200) at the given top.
#[cfg(test)]
fn page_with_target(top: f32) -> Harness {
    let mut h = harness(PageConfig::default());
    build(&mut h.owner, &[(1, None, "page", false, frame(0., 0., 400., 800.))]);
    build_with(
        &mut h.owner,
        2,
        Some(1),
        "view",
        false,
        frame(0., top, 100., 200.),
        Props::new().with("idSelector", "target"),
    );
    h
}

#[cfg(test)]
fn move_target(owner: &mut UiOwner<FakeBackend>, top: f32) {
    owner.update_layout(2, LayoutBox::with_frame(0., top, 100., 200.));
    owner.perform_layout();
}

#[cfg(test)]
fn ratios(h: &Harness) -> Vec<f64> {
    h.events
        .events()
        .into_iter()
        .filter_map(|e| match e {
            Emitted::Intersection(_, _, entry) => entry["intersectionRatio"].as_f64(),
            _ => None,
        })
        .collect()
}

#[test]
fn test_schedule_interval_and_throttle() {
    assert_eq!(ObserverSchedule::new(20).interval_ms(), 50);
    assert_eq!(ObserverSchedule::new(120).interval_ms(), 16);
    assert_eq!(ObserverSchedule::new(0).interval_ms(), 50);

    let mut schedule = ObserverSchedule::new(20);
    schedule.attach();
    assert!(!schedule.request_check(0), "nothing runs before the first draw");
    assert!(schedule.on_root_view_draw());
    assert!(!schedule.on_root_view_draw());
    assert!(schedule.request_check(100));
    assert!(!schedule.request_check(150));
    assert!(schedule.request_check(151));
}

#[test]
fn test_threshold_crossing() {
    assert!(!has_crossed_threshold(&[0., 0.5], 0.3, 0.3));
    assert!(has_crossed_threshold(&[0.5], 0.3, 0.6));
    assert!(has_crossed_threshold(&[0.5], 0.5, 0.6));
    assert!(!has_crossed_threshold(&[0.5], 0.6, 0.7));
    assert!(has_crossed_threshold(&[0.], -1., 0.2));
}

#[test]
fn test_unchanged_geometry_notifies_once() {
    let mut h = page_with_target(700.);
    let options = ObserverOptions {
        thresholds: vec![0., 0.5, 1.],
        ..ObserverOptions::default()
    };
    let mut observer = IntersectionObserver::new(&h.owner, 7, DEFAULT_COMPONENT_ID, &options);
    observer.observe(&mut h.owner, "#target", 3);
    assert_eq!(ratios(&h), vec![0.5]);
    for _ in 0..3 {
        observer.check_for_intersections(&mut h.owner);
    }
    assert_eq!(ratios(&h), vec![0.5]);

    move_target(&mut h.owner, 500.);
    observer.check_for_intersections(&mut h.owner);
    move_target(&mut h.owner, 900.);
    observer.check_for_intersections(&mut h.owner);
    assert_eq!(ratios(&h), vec![0.5, 1., 0.]);
    let entry = observer.entry(2).expect("entry is kept");
    assert!(!entry.is_intersecting);
    assert_eq!(entry.observer_id, "target");

    match h.events.events().first() {
        Some(Emitted::Intersection(observer_id, callback_id, entry)) => {
            assert_eq!((*observer_id, *callback_id), (7, 3));
            assert_eq!(entry["intersectionRect"]["top"], 700.);
            assert_eq!(entry["relativeRect"]["bottom"], 800.);
        }
        other => panic!("expected an intersection callback, got {:?}", other),
    }
}

#[test]
fn test_margins_and_clipping_ancestors() {
    let mut h = harness(PageConfig::default());
    build(
        &mut h.owner,
        &[
            (1, None, "page", false, frame(0., 0., 400., 800.)),
            (2, Some(1), "view", false, frame(0., 0., 400., 100.)),
        ],
    );
    build_with(
        &mut h.owner,
        3,
        Some(2),
        "view",
        false,
        frame(0., 50., 100., 100.),
        Props::new().with("idSelector", "clipped"),
    );
    let mut observer = IntersectionObserver::new(&h.owner, 1, DEFAULT_COMPONENT_ID, &ObserverOptions::default());
    observer.observe(&mut h.owner, "#clipped", 0);
    assert_eq!(observer.entry(3).map(|e| e.intersection_ratio), Some(0.5));

    h.owner
        .update_props(2, &Props::new().with("overflow", "visible"), false);
    observer.relative_to_viewport(&json!({ "bottom": "-100px" }));
    observer.check_for_intersections(&mut h.owner);
    let entry = observer.entry(3).expect("checked");
    assert_eq!(entry.intersection_ratio, 1.);
    assert_eq!(entry.relative_rect.bottom(), 700.);
}

#[test]
fn test_relative_to_node_and_disconnect() {
    let mut h = harness(PageConfig::default());
    build(&mut h.owner, &[(1, None, "page", false, frame(0., 0., 400., 800.))]);
    build_with(
        &mut h.owner,
        2,
        Some(1),
        "view",
        false,
        frame(0., 150., 400., 400.),
        Props::new().with("idSelector", "box").with("overflow", "visible"),
    );
    build_with(
        &mut h.owner,
        3,
        Some(2),
        "view",
        false,
        frame(0., -100., 100., 200.),
        Props::new().with("idSelector", "target"),
    );
    let mut manager = IntersectionObserverManager::new(20, true);
    let mut observer = IntersectionObserver::new(&h.owner, 4, DEFAULT_COMPONENT_ID, &ObserverOptions::default());
    observer.relative_to(&h.owner, "#box", &json!({}));
    assert_eq!(observer.root(), ObserverRoot::Node(2));
    observer.observe(&mut h.owner, "#target", 1);
    observer.observe(&mut h.owner, "#target", 1);
    assert_eq!(observer.targets().count(), 1);
    assert_eq!(observer.entry(3).map(|e| e.intersection_ratio), Some(0.5));
    manager.add_observer(observer);
    assert!(manager.schedule().is_attached());

    manager.on_root_view_draw(&mut h.owner);
    h.owner.update_layout(3, LayoutBox::with_frame(0., 450., 100., 200.));
    h.owner.perform_layout();
    manager.on_custom_event(&mut h.owner, "tap");
    assert_eq!(ratios(&h), vec![0.5]);
    manager.on_custom_event(&mut h.owner, "scroll");
    assert_eq!(ratios(&h), vec![0.5, 0.]);

    manager.disconnect(4);
    assert!(manager.is_empty());
    assert!(!manager.schedule().is_attached(), "last observer detaches");
}

#[test]
fn test_node_observer_sends_custom_event() {
    let mut h = page_with_target(700.);
    let options = ObserverOptions::from_value(&json!({ "relativeToScreen": true }));
    let observer = IntersectionObserver::for_node(&mut h.owner, 2, &options);
    assert_eq!(observer.attached_node(), Some(2));
    let custom: Vec<(String, Sign)> = h.events.named();
    assert_eq!(custom, vec![(INTERSECTION_EVENT.to_string(), 2)]);
}
