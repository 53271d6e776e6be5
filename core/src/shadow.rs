//! Layout-side nodes.
//!
//! The layout tree mirrors the paint tree by sign but is flattened independently; only tags
//! that measure themselves on the platform side get a shadow node.

use crate::behavior::BehaviorRegistry;
use crate::layout::LayoutNodeType;
use crate::props::Props;
use crate::registry::NodeRegistry;
use crate::sign::Sign;
use tracing::warn;

/// A platform-measured layout node.
#[derive(Debug, Clone, PartialEq)]
pub struct ShadowNode {
    pub(crate) sign: Sign,
    pub(crate) tag: String,
    pub(crate) is_virtual: bool,
    pub(crate) props: Props,
    pub(crate) parent: Option<Sign>,
    pub(crate) children: Vec<Sign>,
    pub(crate) dirty: bool,
}

impl ShadowNode {
    pub fn new(sign: Sign, is_virtual: bool) -> ShadowNode {
        ShadowNode {
            sign,
            tag: String::new(),
            is_virtual,
            props: Props::new(),
            parent: None,
            children: Vec::new(),
            dirty: true,
        }
    }

    pub fn sign(&self) -> Sign {
        self.sign
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn is_virtual(&self) -> bool {
        self.is_virtual
    }

    pub fn children(&self) -> &[Sign] {
        &self.children
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }
}

/// Owns the layout-side registry.
#[derive(Debug, Default)]
pub struct ShadowNodeOwner {
    nodes: NodeRegistry<ShadowNode>,
}

impl ShadowNodeOwner {
    pub fn new() -> ShadowNodeOwner {
        ShadowNodeOwner::default()
    }

    /// Creates the layout node for a tag, if it has one, and returns its layout flags.
    pub fn create_node(
        &mut self,
        behaviors: &BehaviorRegistry,
        sign: Sign,
        tag: &str,
        props: &Props,
        allow_inline: bool,
    ) -> LayoutNodeType {
        let behavior = match behaviors.get(tag) {
            Some(behavior) => behavior,
            None => {
                warn!(sign, tag, "no behavior for layout node");
                return LayoutNodeType::COMMON;
            }
        };
        let ty = behavior.layout_node_type(allow_inline);
        if let Some(mut node) = behavior.create_layout_node(sign) {
            node.tag = tag.to_string();
            node.props.merge(props);
            self.nodes.insert(sign, node);
        }
        ty
    }

    pub fn update_props(&mut self, sign: Sign, props: &Props) {
        if let Some(node) = self.nodes.get_mut(sign) {
            node.props.merge(props);
            node.dirty = true;
        }
    }

    pub fn insert(&mut self, parent: Sign, child: Sign, index: i32) {
        if !self.nodes.contains(parent) || !self.nodes.contains(child) {
            return;
        }
        self.nodes.node_mut(child).parent = Some(parent);
        let parent_node = self.nodes.node_mut(parent);
        let index = if index < 0 {
            parent_node.children.len()
        } else {
            (index as usize).min(parent_node.children.len())
        };
        parent_node.children.insert(index, child);
        parent_node.dirty = true;
    }

    pub fn remove(&mut self, parent: Sign, child: Sign) {
        if let Some(parent_node) = self.nodes.get_mut(parent) {
            parent_node.children.retain(|c| *c != child);
            parent_node.dirty = true;
        }
        if let Some(child_node) = self.nodes.get_mut(child) {
            child_node.parent = None;
        }
    }

    pub fn destroy(&mut self, sign: Sign) {
        if let Some(node) = self.nodes.remove(sign) {
            if let Some(parent) = node.parent.and_then(|p| self.nodes.get_mut(p)) {
                parent.children.retain(|c| *c != sign);
            }
        }
    }

    pub fn get(&self, sign: Sign) -> Option<&ShadowNode> {
        self.nodes.get(sign)
    }

    pub fn clear(&mut self) {
        self.nodes.drain();
    }
}

#[test]
fn test_shadow_nodes_only_for_custom_layout() {
    let behaviors = BehaviorRegistry::with_builtins();
    let mut owner = ShadowNodeOwner::new();

    let ty = owner.create_node(&behaviors, 1, "view", &Props::new(), false);
    assert_eq!(ty, LayoutNodeType::COMMON);
    assert!(owner.get(1).is_none(), "common nodes are laid out natively");

    let ty = owner.create_node(&behaviors, 2, "text", &Props::new(), false);
    assert_eq!(ty, LayoutNodeType::CUSTOM);
    let ty = owner.create_node(&behaviors, 3, "raw-text", &Props::new(), false);
    assert!(ty.is_virtual());

    owner.insert(2, 3, -1);
    assert_eq!(owner.get(2).map(|n| n.children().to_vec()), Some(vec![3]));
    owner.destroy(3);
    assert_eq!(owner.get(2).map(|n| n.children().len()), Some(0));
}
