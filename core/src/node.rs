//! UI nodes.

use crate::behavior::NodeKind;
use crate::layout::LayoutBox;
use crate::props::{NodeState, Props};
use crate::sign::Sign;
use cgmath::Point2;
use serde::Deserialize;
use std::collections::BTreeMap;

/// How a script-side listener was bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ListenerKind {
    #[serde(alias = "bindEvent")]
    Bind,
    #[serde(alias = "catchEvent")]
    Catch,
    CaptureBind,
    CaptureCatch,
    #[serde(other)]
    Other,
}

/// A script-side event listener registered on a node.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EventListener {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ListenerKind,
}

impl EventListener {
    pub fn new(name: &str, kind: ListenerKind) -> EventListener {
        EventListener {
            name: name.to_string(),
            kind,
        }
    }
}

/// Gesture kinds a detector can recognize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(from = "u8")]
pub enum GestureKind {
    Pan,
    Fling,
    Default,
    Tap,
    LongPress,
    Rotation,
    Pinch,
    Native,
}

impl From<u8> for GestureKind {
    fn from(ty: u8) -> Self {
        match ty {
            0 => GestureKind::Pan,
            1 => GestureKind::Fling,
            3 => GestureKind::Tap,
            4 => GestureKind::LongPress,
            5 => GestureKind::Rotation,
            6 => GestureKind::Pinch,
            7 => GestureKind::Native,
            _ => GestureKind::Default,
        }
    }
}

/// A gesture detector declared on a node.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct GestureDetector {
    pub id: u32,
    #[serde(rename = "type")]
    pub kind: GestureKind,
    #[serde(default)]
    pub callbacks: Vec<String>,
    /// `waitFor` / `simultaneous` / `continueWith` to other detector ids.
    #[serde(default)]
    pub relations: BTreeMap<String, Vec<u32>>,
}

/// Everything needed to construct a node.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NodeInit {
    pub sign: Sign,
    pub tag: String,
    pub props: Props,
    pub flatten: bool,
    pub node_index: i32,
    pub listeners: Vec<EventListener>,
    pub gesture_detectors: Vec<GestureDetector>,
}

impl NodeInit {
    pub fn new(sign: Sign, tag: &str) -> NodeInit {
        NodeInit {
            sign,
            tag: tag.to_string(),
            ..NodeInit::default()
        }
    }

    pub fn flatten(mut self, flatten: bool) -> Self {
        self.flatten = flatten;
        self
    }

    pub fn props(mut self, props: Props) -> Self {
        self.props = props;
        self
    }

    pub fn listener(mut self, name: &str) -> Self {
        self.listeners.push(EventListener::new(name, ListenerKind::Bind));
        self
    }
}

/// Pseudo-class state bits.
pub type PseudoStatus = u32;
pub const PSEUDO_NONE: PseudoStatus = 0;
pub const PSEUDO_HOVER: PseudoStatus = 1;
pub const PSEUDO_HOVER_TRANSITION: PseudoStatus = 1 << 1;
pub const PSEUDO_ACTIVE: PseudoStatus = 1 << 3;
pub const PSEUDO_FOCUS: PseudoStatus = 1 << 4;
pub const PSEUDO_ALL: PseudoStatus = !0;

/// Links of a node in its draw parent's draw list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DrawLinks {
    pub prev: Option<Sign>,
    pub next: Option<Sign>,
    /// The non-flatten ancestor whose list holds this node.
    pub parent: Option<Sign>,
}

/// Shadow or outline styling drawn around a node's own view.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Decorator {
    pub box_shadow: Option<String>,
    pub outline: Option<String>,
}

impl Decorator {
    pub fn from_props(props: &Props) -> Decorator {
        let text = |key: &str| props.get(key).and_then(|v| v.as_str()).map(str::to_string);
        Decorator {
            box_shadow: text("box-shadow"),
            outline: text("outline-style").or_else(|| text("outline-color")),
        }
    }
}

/// One element of the UI tree.
#[derive(Debug, Clone)]
pub struct UiNode {
    pub(crate) sign: Sign,
    pub(crate) tag: String,
    pub(crate) kind: NodeKind,
    pub(crate) flatten: bool,
    pub(crate) node_index: i32,
    pub(crate) layout: LayoutBox,
    /// Accumulated properties.
    pub(crate) props: Props,
    pub(crate) state: NodeState,
    pub(crate) listeners: BTreeMap<String, EventListener>,
    pub(crate) gesture_detectors: Vec<GestureDetector>,
    pub(crate) parent: Option<Sign>,
    pub(crate) children: Vec<Sign>,
    pub(crate) draw: DrawLinks,
    /// First node of this node's own draw list; always `None` for flatten nodes.
    pub(crate) draw_head: Option<Sign>,
    /// Cached origin in the draw parent's coordinate space.
    pub(crate) draw_origin: Option<Point2<f32>>,
    pub(crate) last_translate_z: f32,
    pub(crate) needs_sort_children: bool,
    pub(crate) flatten_children_count: usize,
    pub(crate) decorator: Option<Decorator>,
    pub(crate) pseudo_status: PseudoStatus,
    pub(crate) layout_dirty: bool,
    pub(crate) first_animated_ready: bool,
}

impl UiNode {
    pub fn new(init: &NodeInit, kind: NodeKind) -> UiNode {
        UiNode {
            sign: init.sign,
            tag: init.tag.clone(),
            kind,
            flatten: init.flatten,
            node_index: init.node_index,
            layout: LayoutBox::default(),
            props: Props::new(),
            state: NodeState::default(),
            listeners: init
                .listeners
                .iter()
                .map(|l| (l.name.clone(), l.clone()))
                .collect(),
            gesture_detectors: init.gesture_detectors.clone(),
            parent: None,
            children: Vec::new(),
            draw: DrawLinks::default(),
            draw_head: None,
            draw_origin: None,
            last_translate_z: 0.,
            needs_sort_children: false,
            flatten_children_count: 0,
            decorator: None,
            pseudo_status: PSEUDO_NONE,
            layout_dirty: false,
            first_animated_ready: true,
        }
    }

    pub fn sign(&self) -> Sign {
        self.sign
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn is_flatten(&self) -> bool {
        self.flatten
    }

    pub fn node_index(&self) -> i32 {
        self.node_index
    }

    pub fn layout(&self) -> &LayoutBox {
        &self.layout
    }

    pub fn props(&self) -> &Props {
        &self.props
    }

    pub fn state(&self) -> &NodeState {
        &self.state
    }

    pub fn parent(&self) -> Option<Sign> {
        self.parent
    }

    pub fn children(&self) -> &[Sign] {
        &self.children
    }

    pub fn draw_links(&self) -> DrawLinks {
        self.draw
    }

    pub fn decorator(&self) -> Option<&Decorator> {
        self.decorator.as_ref()
    }

    pub fn pseudo_status(&self) -> PseudoStatus {
        self.pseudo_status
    }

    pub fn translate_z(&self) -> f32 {
        self.state.translate_z
    }

    pub fn has_listener(&self, name: &str) -> bool {
        self.listeners.contains_key(name)
    }

    pub fn listeners(&self) -> impl Iterator<Item = &EventListener> {
        self.listeners.values()
    }

    pub fn gesture_detectors(&self) -> &[GestureDetector] {
        &self.gesture_detectors
    }

    pub fn set_listeners(&mut self, listeners: &[EventListener]) {
        self.listeners = listeners
            .iter()
            .map(|l| (l.name.clone(), l.clone()))
            .collect();
    }

    /// Whether a layout update may be animated.
    pub(crate) fn animates_layout(&self) -> bool {
        self.state.layout_animation_ms.is_some() || self.state.transition_ms.is_some()
    }
}

#[test]
fn test_listener_decoding() {
    let listeners: Vec<EventListener> = serde_json::from_str(
        r#"[{"name": "tap", "type": "bindEvent"}, {"name": "touchstart", "type": "capture-catch"}]"#,
    )
    .expect("listener array should decode");
    assert_eq!(listeners[0], EventListener::new("tap", ListenerKind::Bind));
    assert_eq!(listeners[1].kind, ListenerKind::CaptureCatch);

    let detector: GestureDetector =
        serde_json::from_str(r#"{"id": 3, "type": 4, "relations": {"waitFor": [1]}}"#)
            .expect("detector should decode");
    assert_eq!(detector.kind, GestureKind::LongPress);
    assert_eq!(detector.relations["waitFor"], vec![1]);
}
