//! Node kinds and their capabilities.

use crate::error::CreateError;
use crate::layout::LayoutNodeType;
use crate::node::{NodeInit, UiNode};
use crate::shadow::ShadowNode;
use crate::sign::Sign;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Every kind of node the core knows how to own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    /// The tree root.
    Page,
    View,
    Component,
    Text,
    RawText,
    InlineText,
    Image,
    ScrollView,
    List,
    /// A platform-registered custom element.
    Custom,
}

/// Capabilities of one tag, resolved once per tag through the [`BehaviorRegistry`].
///
/// Implementations must be shareable with the async-creation workers.
pub trait Behavior: fmt::Debug + Send + Sync {
    fn kind(&self) -> NodeKind;

    /// Creates the platform-side layout node, if this tag measures itself.
    fn create_layout_node(&self, _sign: Sign) -> Option<ShadowNode> {
        None
    }

    /// Virtual nodes have no layout box of their own.
    fn is_virtual(&self) -> bool {
        false
    }

    fn supports_inline(&self) -> bool {
        false
    }

    fn supports_flatten(&self) -> bool {
        false
    }

    fn supports_async_create(&self) -> bool {
        false
    }

    fn can_have_flatten_child(&self) -> bool {
        true
    }

    /// Constructs the node object. Called off the UI thread for async-capable tags.
    fn create_node(&self, init: &NodeInit) -> Result<UiNode, CreateError> {
        Ok(UiNode::new(init, self.kind()))
    }

    /// Layout flags for this tag, used in tag info words.
    fn layout_node_type(&self, allow_inline: bool) -> LayoutNodeType {
        let mut ty = if self.create_layout_node(0).is_some() {
            LayoutNodeType::CUSTOM
        } else {
            LayoutNodeType::COMMON
        };
        if self.is_virtual() {
            ty |= LayoutNodeType::VIRTUAL;
        }
        if allow_inline && self.supports_inline() {
            ty |= LayoutNodeType::INLINE;
        }
        ty
    }
}

/// A behavior described entirely by flags.
#[derive(Debug, Clone)]
pub struct StandardBehavior {
    pub kind: NodeKind,
    pub flatten: bool,
    pub async_create: bool,
    pub flatten_children: bool,
    pub custom_layout: bool,
    pub virtual_node: bool,
    pub inline: bool,
}

impl StandardBehavior {
    pub fn new(kind: NodeKind) -> StandardBehavior {
        StandardBehavior {
            kind,
            flatten: false,
            async_create: false,
            flatten_children: true,
            custom_layout: false,
            virtual_node: false,
            inline: false,
        }
    }

    pub fn flatten(mut self) -> Self {
        self.flatten = true;
        self
    }

    pub fn async_create(mut self) -> Self {
        self.async_create = true;
        self
    }

    pub fn no_flatten_children(mut self) -> Self {
        self.flatten_children = false;
        self
    }

    pub fn custom_layout(mut self) -> Self {
        self.custom_layout = true;
        self
    }

    pub fn virtual_node(mut self) -> Self {
        self.virtual_node = true;
        self
    }

    pub fn inline(mut self) -> Self {
        self.inline = true;
        self
    }
}

impl Behavior for StandardBehavior {
    fn kind(&self) -> NodeKind {
        self.kind
    }

    fn create_layout_node(&self, sign: Sign) -> Option<ShadowNode> {
        if self.custom_layout {
            Some(ShadowNode::new(sign, self.virtual_node))
        } else {
            None
        }
    }

    fn is_virtual(&self) -> bool {
        self.virtual_node
    }

    fn supports_inline(&self) -> bool {
        self.inline
    }

    fn supports_flatten(&self) -> bool {
        self.flatten
    }

    fn supports_async_create(&self) -> bool {
        self.async_create
    }

    fn can_have_flatten_child(&self) -> bool {
        self.flatten_children
    }
}

/// Tag name to behavior lookup.
#[derive(Debug, Clone, Default)]
pub struct BehaviorRegistry {
    behaviors: HashMap<String, Arc<dyn Behavior>>,
}

impl BehaviorRegistry {
    pub fn new() -> BehaviorRegistry {
        BehaviorRegistry::default()
    }

    /// A registry with the built-in element tags.
    pub fn with_builtins() -> BehaviorRegistry {
        use NodeKind::*;
        let mut registry = BehaviorRegistry::new();
        registry.register("page", StandardBehavior::new(Page));
        registry.register("view", StandardBehavior::new(View).flatten().async_create());
        registry.register("component", StandardBehavior::new(Component).flatten());
        registry.register(
            "text",
            StandardBehavior::new(Text)
                .flatten()
                .async_create()
                .custom_layout(),
        );
        registry.register(
            "raw-text",
            StandardBehavior::new(RawText).custom_layout().virtual_node(),
        );
        registry.register(
            "inline-text",
            StandardBehavior::new(InlineText)
                .custom_layout()
                .virtual_node()
                .inline(),
        );
        registry.register(
            "image",
            StandardBehavior::new(Image).flatten().async_create(),
        );
        registry.register("scroll-view", StandardBehavior::new(ScrollView));
        registry.register("list", StandardBehavior::new(List).no_flatten_children());
        registry
    }

    pub fn register<B: Behavior + 'static>(&mut self, tag: &str, behavior: B) {
        self.behaviors.insert(tag.to_string(), Arc::new(behavior));
    }

    pub fn get(&self, tag: &str) -> Option<Arc<dyn Behavior>> {
        self.behaviors.get(tag).cloned()
    }

    /// Looks up a behavior, failing with [`CreateError::UnknownTag`].
    pub fn resolve(&self, tag: &str) -> Result<Arc<dyn Behavior>, CreateError> {
        self.get(tag)
            .ok_or_else(|| CreateError::UnknownTag(tag.to_string()))
    }
}

#[test]
fn test_builtin_layout_types() {
    let registry = BehaviorRegistry::with_builtins();
    let text = registry.get("text").expect("text is built in");
    assert_eq!(text.layout_node_type(false), LayoutNodeType::CUSTOM);

    let raw = registry.get("raw-text").expect("raw-text is built in");
    assert!(raw.layout_node_type(false).is_virtual());

    let inline = registry.get("inline-text").expect("inline-text is built in");
    assert!(inline
        .layout_node_type(true)
        .contains(LayoutNodeType::INLINE));
    assert!(!inline
        .layout_node_type(false)
        .contains(LayoutNodeType::INLINE));

    let list = registry.get("list").expect("list is built in");
    assert!(!list.can_have_flatten_child());
    assert!(registry.resolve("x-unknown").is_err());
}
