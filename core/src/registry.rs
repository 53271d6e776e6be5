//! Sign-keyed node tables.

use crate::sign::Sign;
use std::collections::hash_map::{self, HashMap};

/// A table of live nodes keyed by sign.
///
/// Used for both the paint tree and the layout tree.
#[derive(Debug)]
pub struct NodeRegistry<T> {
    nodes: HashMap<Sign, T>,
}

impl<T> NodeRegistry<T> {
    pub fn new() -> NodeRegistry<T> {
        NodeRegistry {
            nodes: HashMap::new(),
        }
    }

    /// Registers a node, returning the node previously registered under the sign.
    pub fn insert(&mut self, sign: Sign, node: T) -> Option<T> {
        self.nodes.insert(sign, node)
    }

    pub fn remove(&mut self, sign: Sign) -> Option<T> {
        self.nodes.remove(&sign)
    }

    pub fn get(&self, sign: Sign) -> Option<&T> {
        self.nodes.get(&sign)
    }

    pub fn get_mut(&mut self, sign: Sign) -> Option<&mut T> {
        self.nodes.get_mut(&sign)
    }

    pub fn contains(&self, sign: Sign) -> bool {
        self.nodes.contains_key(&sign)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn signs(&self) -> hash_map::Keys<'_, Sign, T> {
        self.nodes.keys()
    }

    pub fn iter(&self) -> hash_map::Iter<'_, Sign, T> {
        self.nodes.iter()
    }

    /// Removes and returns all nodes.
    pub fn drain(&mut self) -> hash_map::Drain<'_, Sign, T> {
        self.nodes.drain()
    }

    /// Returns the node.
    ///
    /// # Panics
    /// - if no node is registered under the sign
    pub(crate) fn node(&self, sign: Sign) -> &T {
        match self.nodes.get(&sign) {
            Some(node) => node,
            None => panic!("no node registered for sign {}", sign),
        }
    }

    /// Returns the node mutably.
    ///
    /// # Panics
    /// - if no node is registered under the sign
    pub(crate) fn node_mut(&mut self, sign: Sign) -> &mut T {
        match self.nodes.get_mut(&sign) {
            Some(node) => node,
            None => panic!("no node registered for sign {}", sign),
        }
    }
}

impl<T> Default for NodeRegistry<T> {
    fn default() -> Self {
        NodeRegistry::new()
    }
}

#[test]
fn test_registry_replaces_by_sign() {
    let mut registry = NodeRegistry::new();
    assert_eq!(registry.insert(4, "old"), None);
    assert_eq!(registry.insert(4, "new"), Some("old"));
    assert_eq!(registry.len(), 1);
    assert_eq!(registry.remove(4), Some("new"));
    assert!(registry.is_empty());
}
