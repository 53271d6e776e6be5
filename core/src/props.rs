//! Node properties and the property-id dispatch table.

use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use tracing::warn;

/// A property diff as sent by the engine: property name to new value.
///
/// `Value::Null` resets a property to its default.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Props(BTreeMap<String, Value>);

impl Props {
    pub fn new() -> Props {
        Props(BTreeMap::new())
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Props {
        self.0.insert(key.to_string(), value.into());
        self
    }

    pub fn insert(&mut self, key: &str, value: impl Into<Value>) {
        self.0.insert(key.to_string(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// Folds a diff into this accumulated property set.
    pub fn merge(&mut self, diff: &Props) {
        for (key, value) in &diff.0 {
            if value.is_null() {
                self.0.remove(key);
            } else {
                self.0.insert(key.clone(), value.clone());
            }
        }
    }

    /// Returns true if any shadow or outline styling is set.
    pub fn has_decoration(&self) -> bool {
        self.0.iter().any(|(key, value)| {
            !value.is_null() && (key == "box-shadow" || key.starts_with("outline-"))
        })
    }
}

impl From<serde_json::Map<String, Value>> for Props {
    fn from(map: serde_json::Map<String, Value>) -> Self {
        Props(map.into_iter().collect())
    }
}

/// Properties the core understands; everything else is platform styling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PropId {
    IdSelector,
    ComponentId,
    UserInteractionEnabled,
    EventThrough,
    EnableTouchPseudoPropagation,
    ConsumeSlideEvent,
    Overflow,
    OverflowX,
    OverflowY,
    Visibility,
    TranslateZ,
    Focusable,
    ExposureId,
    ExposureScene,
    ExposureArea,
    LayoutAnimationDuration,
    TransitionDuration,
}

const OVERFLOW_X: u8 = 1;
const OVERFLOW_Y: u8 = 1 << 1;

/// Overflow flags; `0` clips on both axes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Overflow(pub u8);

impl Overflow {
    pub const VISIBLE: Overflow = Overflow(OVERFLOW_X | OVERFLOW_Y);

    pub fn clips(self) -> bool {
        self.0 == 0
    }

    pub fn visible_x(self) -> bool {
        self.0 & OVERFLOW_X != 0
    }

    pub fn visible_y(self) -> bool {
        self.0 & OVERFLOW_Y != 0
    }

    fn set(&mut self, bit: u8, visible: bool) {
        if visible {
            self.0 |= bit;
        } else {
            self.0 &= !bit;
        }
    }
}

/// Exposure tracking properties of a node.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ExposureProps {
    pub id: String,
    pub scene: String,
    /// Fraction of the node that must be visible; `0` means any overlap.
    pub area: f32,
}

/// Typed state derived from the accumulated properties.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeState {
    pub id_selector: Option<String>,
    pub component_id: Option<String>,
    pub user_interaction_enabled: bool,
    /// `None` inherits from the parent.
    pub event_through: Option<bool>,
    pub enable_touch_pseudo_propagation: bool,
    /// Angle ranges in degrees, `[min, max]`.
    pub consume_slide: Vec<(f32, f32)>,
    pub overflow: Overflow,
    pub visible: bool,
    pub translate_z: f32,
    pub focusable: bool,
    pub exposure_id: Option<String>,
    pub exposure_scene: String,
    pub exposure_area: f32,
    pub layout_animation_ms: Option<u64>,
    pub transition_ms: Option<u64>,
}

impl NodeState {
    /// Exposure tracking properties, if the node has an exposure id.
    pub fn exposure(&self) -> Option<ExposureProps> {
        self.exposure_id.as_ref().map(|id| ExposureProps {
            id: id.clone(),
            scene: self.exposure_scene.clone(),
            area: self.exposure_area,
        })
    }
}

impl Default for NodeState {
    fn default() -> Self {
        NodeState {
            id_selector: None,
            component_id: None,
            user_interaction_enabled: true,
            event_through: None,
            enable_touch_pseudo_propagation: true,
            consume_slide: Vec::new(),
            overflow: Overflow::default(),
            visible: true,
            translate_z: 0.,
            focusable: false,
            exposure_id: None,
            exposure_scene: String::new(),
            exposure_area: 0.,
            layout_animation_ms: None,
            transition_ms: None,
        }
    }
}

type Setter = fn(&mut NodeState, &Value);

/// Maps property names to ids and ids to typed setters. Built once per owner.
pub struct PropTable {
    ids: HashMap<&'static str, PropId>,
    setters: HashMap<PropId, Setter>,
}

impl PropTable {
    pub fn new() -> PropTable {
        let entries: [(&'static str, PropId, Setter); 17] = [
            ("idSelector", PropId::IdSelector, set_id_selector),
            ("ComponentID", PropId::ComponentId, set_component_id),
            (
                "user-interaction-enabled",
                PropId::UserInteractionEnabled,
                set_user_interaction_enabled,
            ),
            ("event-through", PropId::EventThrough, set_event_through),
            (
                "enable-touch-pseudo-propagation",
                PropId::EnableTouchPseudoPropagation,
                set_touch_pseudo_propagation,
            ),
            ("consume-slide-event", PropId::ConsumeSlideEvent, set_consume_slide),
            ("overflow", PropId::Overflow, set_overflow),
            ("overflow-x", PropId::OverflowX, set_overflow_x),
            ("overflow-y", PropId::OverflowY, set_overflow_y),
            ("visibility", PropId::Visibility, set_visibility),
            ("translate-z", PropId::TranslateZ, set_translate_z),
            ("focusable", PropId::Focusable, set_focusable),
            ("exposure-id", PropId::ExposureId, set_exposure_id),
            ("exposure-scene", PropId::ExposureScene, set_exposure_scene),
            ("exposure-area", PropId::ExposureArea, set_exposure_area),
            (
                "layout-animation-duration",
                PropId::LayoutAnimationDuration,
                set_layout_animation,
            ),
            ("transition-duration", PropId::TransitionDuration, set_transition),
        ];

        let mut ids = HashMap::with_capacity(entries.len());
        let mut setters = HashMap::with_capacity(entries.len());
        for (name, id, setter) in entries.iter() {
            ids.insert(*name, *id);
            setters.insert(*id, *setter);
        }
        PropTable { ids, setters }
    }

    pub fn id_of(&self, name: &str) -> Option<PropId> {
        self.ids.get(name).copied()
    }

    /// Applies every known property of the diff to the typed state.
    pub fn apply(&self, state: &mut NodeState, diff: &Props) {
        for (name, value) in diff.iter() {
            let id = match self.id_of(name) {
                Some(id) => id,
                None => continue,
            };
            if let Some(setter) = self.setters.get(&id) {
                setter(state, value);
            }
        }
    }

    /// Rebuilds typed state from scratch.
    pub fn derive(&self, props: &Props) -> NodeState {
        let mut state = NodeState::default();
        self.apply(&mut state, props);
        state
    }
}

impl Default for PropTable {
    fn default() -> Self {
        PropTable::new()
    }
}

fn as_bool(value: &Value, default: bool) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map_or(default, |n| n != 0.),
        Value::String(s) => match s.as_str() {
            "true" => true,
            "false" => false,
            _ => default,
        },
        _ => default,
    }
}

fn as_f32(value: &Value) -> Option<f32> {
    match value {
        Value::Number(n) => n.as_f64().map(|n| n as f32),
        Value::String(s) => s.trim().trim_end_matches("px").parse().ok(),
        _ => None,
    }
}

fn as_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn set_id_selector(state: &mut NodeState, value: &Value) {
    state.id_selector = as_string(value);
}

fn set_component_id(state: &mut NodeState, value: &Value) {
    state.component_id = as_string(value);
}

fn set_user_interaction_enabled(state: &mut NodeState, value: &Value) {
    state.user_interaction_enabled = as_bool(value, true);
}

fn set_event_through(state: &mut NodeState, value: &Value) {
    state.event_through = match value {
        Value::Null => None,
        other => Some(as_bool(other, false)),
    };
}

fn set_touch_pseudo_propagation(state: &mut NodeState, value: &Value) {
    state.enable_touch_pseudo_propagation = as_bool(value, true);
}

fn set_consume_slide(state: &mut NodeState, value: &Value) {
    state.consume_slide.clear();
    let ranges = match value.as_array() {
        Some(ranges) => ranges,
        None => return,
    };
    for range in ranges {
        let pair = range
            .as_array()
            .and_then(|r| Some((as_f32(r.get(0)?)?, as_f32(r.get(1)?)?)));
        match pair {
            Some(pair) => state.consume_slide.push(pair),
            None => warn!(?range, "ignoring malformed consume-slide-event range"),
        }
    }
}

fn overflow_visible(value: &Value) -> bool {
    value.as_str() == Some("visible")
}

fn set_overflow(state: &mut NodeState, value: &Value) {
    state.overflow = if overflow_visible(value) {
        Overflow::VISIBLE
    } else {
        Overflow::default()
    };
}

fn set_overflow_x(state: &mut NodeState, value: &Value) {
    state.overflow.set(OVERFLOW_X, overflow_visible(value));
}

fn set_overflow_y(state: &mut NodeState, value: &Value) {
    state.overflow.set(OVERFLOW_Y, overflow_visible(value));
}

fn set_visibility(state: &mut NodeState, value: &Value) {
    state.visible = value.as_str() != Some("hidden");
}

fn set_translate_z(state: &mut NodeState, value: &Value) {
    state.translate_z = as_f32(value).unwrap_or(0.);
}

fn set_focusable(state: &mut NodeState, value: &Value) {
    state.focusable = as_bool(value, false);
}

fn set_exposure_id(state: &mut NodeState, value: &Value) {
    state.exposure_id = as_string(value);
}

fn set_exposure_scene(state: &mut NodeState, value: &Value) {
    state.exposure_scene = as_string(value).unwrap_or_default();
}

fn set_exposure_area(state: &mut NodeState, value: &Value) {
    let area = match value {
        Value::String(s) if s.ends_with('%') => s
            .trim_end_matches('%')
            .trim()
            .parse::<f32>()
            .map(|p| p / 100.)
            .ok(),
        other => as_f32(other),
    };
    state.exposure_area = area.unwrap_or(0.).max(0.).min(1.);
}

fn as_duration(value: &Value) -> Option<u64> {
    match value {
        Value::String(s) if s.ends_with("ms") => s.trim_end_matches("ms").trim().parse().ok(),
        Value::String(s) if s.ends_with('s') => s
            .trim_end_matches('s')
            .trim()
            .parse::<f64>()
            .ok()
            .map(|s| (s * 1000.) as u64),
        other => as_f32(other).map(|ms| ms.max(0.) as u64),
    }
    .filter(|ms| *ms > 0)
}

fn set_layout_animation(state: &mut NodeState, value: &Value) {
    state.layout_animation_ms = as_duration(value);
}

fn set_transition(state: &mut NodeState, value: &Value) {
    state.transition_ms = as_duration(value);
}

#[test]
fn test_prop_table_dispatch() {
    let table = PropTable::new();
    let props = Props::new()
        .with("idSelector", "card")
        .with("user-interaction-enabled", false)
        .with("consume-slide-event", serde_json::json!([[-45, 45], [135, "180"]]))
        .with("overflow-x", "visible")
        .with("exposure-id", 42)
        .with("exposure-area", "50%")
        .with("transition-duration", "0.3s")
        .with("background-color", "red");

    let state = table.derive(&props);
    assert_eq!(state.id_selector.as_deref(), Some("card"));
    assert!(!state.user_interaction_enabled);
    assert_eq!(state.consume_slide, vec![(-45., 45.), (135., 180.)]);
    assert!(state.overflow.visible_x() && !state.overflow.visible_y());
    assert!(!state.overflow.clips());
    let exposure = state.exposure().expect("exposure-id should enable exposure");
    assert_eq!(exposure.id, "42");
    assert_eq!(exposure.area, 0.5);
    assert_eq!(state.transition_ms, Some(300));
    assert_eq!(table.id_of("background-color"), None);
}

#[test]
fn test_props_merge_resets_null() {
    let mut props = Props::new().with("box-shadow", "1px 1px red").with("opacity", 0.5);
    assert!(props.has_decoration());
    props.merge(&Props::new().with("box-shadow", Value::Null));
    assert!(!props.has_decoration());
    assert_eq!(props.get("opacity"), Some(&serde_json::json!(0.5)));
}
