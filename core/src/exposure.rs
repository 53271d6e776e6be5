//! Exposure tracking.
//!
//! Nodes carrying an `exposure-id` are reported with a global `exposure` event when they enter the
//! window and a `disexposure` event when they leave it. A node is in the window when it has a size,
//! every ancestor up to the root is visible, and it intersects each scrolling ancestor, the root
//! view and the window, where `exposure-area` (if set) is the minimum visible fraction.

use crate::backend::Backend;
use crate::behavior::NodeKind;
use crate::config::PageConfig;
use crate::events::guarded;
use crate::layout::Edges;
use crate::observer::{parse_length, ObserverSchedule};
use crate::owner::UiOwner;
use crate::rect::Rect;
use crate::sign::Sign;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use tracing::{debug, trace};

pub const EXPOSURE_EVENT: &str = "exposure";
pub const DISEXPOSURE_EVENT: &str = "disexposure";

/// Reported data of one exposed node.
#[derive(Debug, Clone, PartialEq)]
struct ExposureDetail {
    sign: Sign,
    id: String,
    scene: String,
    dataset: Map<String, Value>,
}

impl ExposureDetail {
    fn to_json(&self) -> Value {
        json!({
            "exposure-id": self.id,
            "exposureID": self.id,
            "exposure-scene": self.scene,
            "exposureScene": self.scene,
            "sign": self.sign.to_string(),
            "dataset": self.dataset,
            "dataSet": self.dataset,
            "unique-id": "",
            "extra-data": {},
        })
    }
}

/// `data-*` props, without the prefix.
fn dataset<B: Backend>(owner: &UiOwner<B>, sign: Sign) -> Map<String, Value> {
    let mut map = Map::new();
    if let Some(node) = owner.node(sign) {
        for (key, value) in node.props().iter() {
            if let Some(name) = key.strip_prefix("data-") {
                map.insert(name.to_string(), value.clone());
            }
        }
    }
    map
}

fn edges_from_props<B: Backend>(owner: &UiOwner<B>, sign: Sign, prefix: &str) -> Edges {
    let props = match owner.node(sign) {
        Some(node) => node.props(),
        None => return Edges::default(),
    };
    let side = |name: &str| parse_length(props.get(&format!("{}{}", prefix, name)));
    Edges::new(side("left"), side("top"), side("right"), side("bottom"))
}

/// Whether `target` covers enough of `other`. A zero ratio asks for any overlap.
fn check_intersect(target: Rect, other: Rect, ratio: f32) -> bool {
    if ratio == 0. {
        return target.intersects(other);
    }
    let area = target.area();
    match target.intersect(other) {
        Some(rect) if area > 0. => rect.area() / area >= ratio,
        _ => false,
    }
}

/// Tracks which exposure nodes are in the window.
#[derive(Debug)]
pub struct ExposureObserver {
    schedule: ObserverSchedule,
    stopped: bool,
    in_window: BTreeMap<Sign, ExposureDetail>,
    ui_margin: bool,
    disexposure_when_hidden: bool,
}

impl ExposureObserver {
    pub fn new(page_config: &PageConfig) -> ExposureObserver {
        let mut schedule = ObserverSchedule::new(page_config.observer_frame_rate);
        schedule.attach();
        ExposureObserver {
            schedule,
            stopped: false,
            in_window: BTreeMap::new(),
            ui_margin: page_config.enable_exposure_ui_margin,
            disexposure_when_hidden: page_config.enable_disexposure_when_hidden,
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Signs currently reported as exposed.
    pub fn exposed(&self) -> impl Iterator<Item = Sign> + '_ {
        self.in_window.keys().copied()
    }

    /// Stops checking. With `send_event`, everything exposed is reported as gone.
    pub fn stop_exposure<B: Backend>(&mut self, owner: &mut UiOwner<B>, send_event: bool) {
        debug!(send_event, "stopping exposure");
        self.stopped = true;
        self.schedule.detach();
        if send_event {
            let gone: Vec<_> = std::mem::take(&mut self.in_window).into_iter().map(|(_, d)| d).collect();
            send(owner, DISEXPOSURE_EVENT, &gone);
        }
    }

    pub fn resume_exposure(&mut self) {
        debug!("resuming exposure");
        self.stopped = false;
        self.schedule.attach();
    }

    /// The root view drew. The first draw enables checks and runs one.
    pub fn on_root_view_draw<B: Backend>(&mut self, owner: &mut UiOwner<B>) {
        if self.schedule.on_root_view_draw() {
            self.check(owner);
        }
    }

    /// A scroll, layout or frame signal. Checks at most once per interval.
    pub fn request_check<B: Backend>(&mut self, owner: &mut UiOwner<B>, now_ms: u64) {
        if self.schedule.request_check(now_ms) {
            self.check(owner);
        }
    }

    /// Diffs the exposed set against the current geometry and reports the changes.
    pub fn check<B: Backend>(&mut self, owner: &mut UiOwner<B>) {
        if self.stopped {
            debug!("exposure stopped; skipping check");
            return;
        }
        if !self.schedule.is_root_painted() {
            debug!("root view not drawn yet; skipping exposure check");
            return;
        }
        let root = match owner.root() {
            Some(root) => root,
            None => return,
        };
        if !owner.backend().is_root_shown() {
            if self.disexposure_when_hidden {
                let gone: Vec<_> = std::mem::take(&mut self.in_window).into_iter().map(|(_, d)| d).collect();
                send(owner, DISEXPOSURE_EVENT, &gone);
            }
            return;
        }

        let window = owner.backend().window_rect();
        let mut now = BTreeMap::new();
        for sign in owner.exposure_nodes().collect::<Vec<_>>() {
            if !self.in_window(owner, root, window, sign) {
                continue;
            }
            let state = owner.node(sign).map(|n| n.state().clone()).unwrap_or_default();
            now.insert(
                sign,
                ExposureDetail {
                    sign,
                    id: state.exposure_id.unwrap_or_default(),
                    scene: state.exposure_scene,
                    dataset: dataset(owner, sign),
                },
            );
        }

        let disappeared: Vec<_> = self
            .in_window
            .iter()
            .filter(|(sign, detail)| now.get(*sign) != Some(*detail))
            .map(|(_, detail)| detail.clone())
            .collect();
        let appeared: Vec<_> = now
            .iter()
            .filter(|(sign, detail)| self.in_window.get(*sign) != Some(*detail))
            .map(|(_, detail)| detail.clone())
            .collect();
        self.in_window = now;

        send(owner, DISEXPOSURE_EVENT, &disappeared);
        send(owner, EXPOSURE_EVENT, &appeared);
    }

    fn in_window<B: Backend>(&self, owner: &UiOwner<B>, root: Sign, window: Rect, sign: Sign) -> bool {
        let node = match owner.node(sign) {
            Some(node) => node,
            None => return false,
        };
        let bounds = match owner.bounds_on_screen(sign) {
            Some(bounds) if bounds.width() > 0. && bounds.height() > 0. => bounds,
            _ => return false,
        };
        let area = node.state().exposure_area;

        let mut scroll_containers = Vec::new();
        for ancestor in owner.ancestors(sign) {
            if ancestor == root {
                break;
            }
            let node = match owner.node(ancestor) {
                Some(node) => node,
                None => return false,
            };
            if !node.state().visible {
                return false;
            }
            if ancestor != sign && matches!(node.kind(), NodeKind::ScrollView | NodeKind::List) {
                scroll_containers.push(ancestor);
            }
        }

        let rect = if self.ui_margin {
            let margins = edges_from_props(owner, sign, "exposure-ui-margin-");
            if bounds.width() + margins.left + margins.right <= 0.
                || bounds.height() + margins.top + margins.bottom <= 0.
            {
                return false;
            }
            bounds.outset(margins)
        } else {
            bounds
        };

        for container in scroll_containers {
            match owner.bounds_on_screen(container) {
                Some(clip) if check_intersect(rect, clip, area) => {}
                _ => return false,
            }
        }
        let root_rect = owner.bounds_on_screen(root).unwrap_or_else(Rect::zero);
        if !check_intersect(rect, root_rect, area) {
            return false;
        }
        let window = window.outset(edges_from_props(owner, sign, "exposure-screen-margin-"));
        check_intersect(rect, window, area)
    }
}

fn send<B: Backend>(owner: &mut UiOwner<B>, name: &str, details: &[ExposureDetail]) {
    if details.is_empty() {
        return;
    }
    trace!(name, count = details.len(), "sending exposure event");
    let params: Vec<Value> = details.iter().map(ExposureDetail::to_json).collect();
    let emitter = owner.context_mut().emitter();
    guarded("exposure event", || {
        emitter.send_global_event(name, json!([params]))
    });
}

#[cfg(test)]
use crate::layout::LayoutBox;
#[cfg(test)]
use crate::props::Props;
#[cfg(test)]
use crate::testing::{build, build_with, harness, Harness};

#[cfg(test)]
fn frame(left: f32, top: f32, width: f32, height: f32) -> Rect {
    Rect::from_ltrb(left, top, left + width, top + height)
}

/// `page#1` (400x800) holding exposure nodes `#2` at the top and `#3` below the window.
#[cfg(test)]
fn exposure_page() -> (Harness, ExposureObserver) {
    let mut h = harness(PageConfig::default());
    build(&mut h.owner, &[(1, None, "page", false, frame(0., 0., 400., 800.))]);
    build_with(
        &mut h.owner,
        2,
        Some(1),
        "view",
        false,
        frame(0., 0., 100., 100.),
        Props::new().with("exposure-id", "top").with("data-item", 7),
    );
    build_with(
        &mut h.owner,
        3,
        Some(1),
        "view",
        false,
        frame(0., 900., 100., 100.),
        Props::new()
            .with("exposure-id", "bottom")
            .with("exposure-scene", "feed"),
    );
    let observer = ExposureObserver::new(&PageConfig::default());
    (h, observer)
}

#[cfg(test)]
fn exposure_ids(h: &Harness, name: &str) -> Vec<Vec<String>> {
    h.events
        .globals()
        .into_iter()
        .filter(|(n, _)| n == name)
        .map(|(_, params)| {
            params[0]
                .as_array()
                .map(|items| {
                    items
                        .iter()
                        .map(|i| i["exposure-id"].as_str().unwrap_or("").to_string())
                        .collect()
                })
                .unwrap_or_default()
        })
        .collect()
}

#[test]
fn test_exposure_and_disexposure() {
    let (mut h, mut observer) = exposure_page();
    observer.check(&mut h.owner);
    assert!(h.events.globals().is_empty(), "nothing before the first draw");

    observer.on_root_view_draw(&mut h.owner);
    assert_eq!(exposure_ids(&h, EXPOSURE_EVENT), vec![vec!["top".to_string()]]);
    let (_, params) = h.events.globals().remove(0);
    assert_eq!(params[0][0]["sign"], "2");
    assert_eq!(params[0][0]["dataset"]["item"], 7);

    observer.check(&mut h.owner);
    assert_eq!(h.events.globals().len(), 1, "no repeats while nothing moves");

    h.owner.update_layout(2, LayoutBox::with_frame(0., 850., 100., 100.));
    h.owner.update_layout(3, LayoutBox::with_frame(0., 300., 100., 100.));
    h.owner.perform_layout();
    observer.check(&mut h.owner);
    assert_eq!(exposure_ids(&h, DISEXPOSURE_EVENT), vec![vec!["top".to_string()]]);
    assert_eq!(
        exposure_ids(&h, EXPOSURE_EVENT),
        vec![vec!["top".to_string()], vec!["bottom".to_string()]]
    );
    assert_eq!(observer.exposed().collect::<Vec<_>>(), vec![3]);
}

#[test]
fn test_exposure_area_and_hidden_ancestors() {
    let (mut h, mut observer) = exposure_page();
    h.owner
        .update_props(3, &Props::new().with("exposure-area", "50%"), false);
    h.owner.update_layout(3, LayoutBox::with_frame(0., 760., 100., 100.));
    h.owner.perform_layout();
    observer.on_root_view_draw(&mut h.owner);
    assert_eq!(observer.exposed().collect::<Vec<_>>(), vec![2]);

    h.owner.update_layout(3, LayoutBox::with_frame(0., 740., 100., 100.));
    h.owner
        .update_props(2, &Props::new().with("visibility", "hidden"), false);
    h.owner.perform_layout();
    observer.check(&mut h.owner);
    assert_eq!(observer.exposed().collect::<Vec<_>>(), vec![3]);
}

#[test]
fn test_stop_resume_and_hidden_root() {
    let (mut h, mut observer) = exposure_page();
    observer.on_root_view_draw(&mut h.owner);
    observer.stop_exposure(&mut h.owner, true);
    assert_eq!(exposure_ids(&h, DISEXPOSURE_EVENT), vec![vec!["top".to_string()]]);
    observer.check(&mut h.owner);
    assert_eq!(h.events.globals().len(), 2);

    observer.resume_exposure();
    observer.request_check(&mut h.owner, 1000);
    assert_eq!(exposure_ids(&h, EXPOSURE_EVENT).len(), 2);

    h.owner.backend_mut().root_shown = false;
    observer.check(&mut h.owner);
    assert_eq!(exposure_ids(&h, DISEXPOSURE_EVENT).len(), 2);
    assert_eq!(observer.exposed().count(), 0);
}
