//! Draw-order lists.
//!
//! Every non-flatten node owns a doubly linked list of the non-flatten nodes drawn directly into
//! its view. Flatten nodes never appear in a list: the non-flatten nodes below them are spliced
//! into the list of the nearest non-flatten ancestor, in tree order. A flatten subtree therefore
//! contributes a contiguous run of the list.

use crate::node::{DrawLinks, UiNode};
use crate::registry::NodeRegistry;
use crate::sign::Sign;

/// A change to some draw list, to be mirrored by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DrawChange {
    Insert {
        parent: Sign,
        child: Sign,
        index: usize,
    },
    Remove {
        parent: Sign,
        child: Sign,
    },
}

impl NodeRegistry<UiNode> {
    /// Returns the nearest non-flatten proper ancestor.
    ///
    /// `None` if the node is detached from any non-flatten ancestor.
    pub fn draw_owner(&self, sign: Sign) -> Option<Sign> {
        let mut cur = self.get(sign)?.parent;
        while let Some(parent) = cur {
            let node = self.get(parent)?;
            if !node.flatten {
                return Some(parent);
            }
            cur = node.parent;
        }
        None
    }

    /// Collects the nodes a subtree contributes to its draw owner's list, in tree order.
    pub(crate) fn draw_members(&self, sign: Sign, out: &mut Vec<Sign>) {
        let node = match self.get(sign) {
            Some(node) => node,
            None => return,
        };
        if !node.flatten {
            out.push(sign);
            return;
        }
        for child in &node.children {
            self.draw_members(*child, out);
        }
    }

    fn first_linked(&self, sign: Sign) -> Option<Sign> {
        let node = self.get(sign)?;
        if !node.flatten {
            return node.draw.parent.map(|_| sign);
        }
        node.children.iter().find_map(|c| self.first_linked(*c))
    }

    fn last_linked(&self, sign: Sign) -> Option<Sign> {
        let node = self.get(sign)?;
        if !node.flatten {
            return node.draw.parent.map(|_| sign);
        }
        node.children.iter().rev().find_map(|c| self.last_linked(*c))
    }

    /// Finds the linked node drawn right before the position of `sign`.
    ///
    /// Scans earlier siblings from right to left, then climbs through flatten parents.
    fn draw_predecessor(&self, sign: Sign) -> Option<Sign> {
        let mut cur = sign;
        loop {
            let parent = self.get(cur)?.parent?;
            let parent_node = self.get(parent)?;
            let index = parent_node.children.iter().position(|c| *c == cur)?;
            let prev = parent_node.children[..index]
                .iter()
                .rev()
                .find_map(|s| self.last_linked(*s));
            if prev.is_some() {
                return prev;
            }
            if !parent_node.flatten {
                return None;
            }
            cur = parent;
        }
    }

    /// Splices the contribution of an attached node into its draw owner's list.
    ///
    /// For a flatten node this links every non-flatten node below it. Nodes that are already
    /// linked are left alone.
    pub(crate) fn link_draw(&mut self, sign: Sign, changes: &mut Vec<DrawChange>) {
        let owner = match self.draw_owner(sign) {
            Some(owner) => owner,
            None => return,
        };
        let mut members = Vec::new();
        self.draw_members(sign, &mut members);
        for member in members {
            if self.node(member).draw.parent.is_some() {
                continue;
            }
            let prev = self.draw_predecessor(member);
            self.link_after(owner, prev, member);
            let index = self.draw_index(owner, member);
            changes.push(DrawChange::Insert {
                parent: owner,
                child: member,
                index,
            });
        }
    }

    fn link_after(&mut self, owner: Sign, prev: Option<Sign>, sign: Sign) {
        let next = match prev {
            Some(prev) => self.node(prev).draw.next,
            None => self.node(owner).draw_head,
        };
        self.node_mut(sign).draw = DrawLinks {
            prev,
            next,
            parent: Some(owner),
        };
        match prev {
            Some(prev) => self.node_mut(prev).draw.next = Some(sign),
            None => self.node_mut(owner).draw_head = Some(sign),
        }
        if let Some(next) = next {
            self.node_mut(next).draw.prev = Some(sign);
        }
    }

    /// Unlinks a single node; returns its former draw parent.
    fn unlink(&mut self, sign: Sign) -> Option<Sign> {
        let links = self.node(sign).draw;
        let parent = links.parent?;
        match links.prev {
            Some(prev) => self.node_mut(prev).draw.next = links.next,
            None => self.node_mut(parent).draw_head = links.next,
        }
        if let Some(next) = links.next {
            self.node_mut(next).draw.prev = links.prev;
        }
        self.node_mut(sign).draw = DrawLinks::default();
        Some(parent)
    }

    /// Removes the contribution of a node from its draw owner's list.
    ///
    /// For a flatten node, the whole run from its first to its last linked descendant is removed.
    pub(crate) fn unlink_draw(&mut self, sign: Sign, changes: &mut Vec<DrawChange>) {
        let (first, last) = match (self.first_linked(sign), self.last_linked(sign)) {
            (Some(first), Some(last)) => (first, last),
            _ => return,
        };
        let mut cur = Some(first);
        while let Some(member) = cur {
            cur = self.node(member).draw.next;
            if let Some(parent) = self.unlink(member) {
                changes.push(DrawChange::Remove {
                    parent,
                    child: member,
                });
            }
            if member == last {
                break;
            }
        }
    }

    /// Drops a node's own list without touching the backend; used when the node goes away.
    pub(crate) fn clear_draw_list(&mut self, sign: Sign) {
        let mut cur = self.node_mut(sign).draw_head.take();
        while let Some(member) = cur {
            let node = self.node_mut(member);
            cur = node.draw.next;
            node.draw = DrawLinks::default();
        }
    }

    pub(crate) fn draw_index(&self, owner: Sign, sign: Sign) -> usize {
        let mut index = 0;
        let mut cur = self.node(owner).draw_head;
        while let Some(member) = cur {
            if member == sign {
                break;
            }
            index += 1;
            cur = self.node(member).draw.next;
        }
        index
    }

    /// The draw list of a non-flatten node, in draw order.
    pub fn draw_list(&self, sign: Sign) -> Vec<Sign> {
        let mut list = Vec::new();
        let mut cur = self.get(sign).and_then(|n| n.draw_head);
        while let Some(member) = cur {
            list.push(member);
            cur = self.get(member).and_then(|n| n.draw.next);
        }
        list
    }
}

#[cfg(test)]
fn tree(specs: &[(Sign, Option<Sign>, bool)]) -> NodeRegistry<UiNode> {
    use crate::behavior::NodeKind;
    use crate::node::NodeInit;

    let mut nodes = NodeRegistry::new();
    for (sign, parent, flatten) in specs {
        let node = UiNode::new(&NodeInit::new(*sign, "view").flatten(*flatten), NodeKind::View);
        nodes.insert(*sign, node);
        if let Some(parent) = parent {
            nodes.node_mut(*sign).parent = Some(*parent);
            nodes.node_mut(*parent).children.push(*sign);
            let mut changes = Vec::new();
            nodes.link_draw(*sign, &mut changes);
        }
    }
    nodes
}

#[test]
fn test_flatten_children_splice_through() {
    // 1 ─┬─ 2 (flatten) ─┬─ 3
    //    │               └─ 4 (flatten) ── 5
    //    └─ 6
    let nodes = tree(&[
        (1, None, false),
        (2, Some(1), true),
        (3, Some(2), false),
        (4, Some(2), true),
        (5, Some(4), false),
        (6, Some(1), false),
    ]);
    assert_eq!(nodes.draw_list(1), vec![3, 5, 6]);
    assert_eq!(nodes.node(5).draw.parent, Some(1));
    assert_eq!(nodes.draw_owner(5), Some(1));
}

#[test]
fn test_unlink_flatten_run() {
    let mut nodes = tree(&[
        (1, None, false),
        (7, Some(1), false),
        (2, Some(1), true),
        (3, Some(2), false),
        (4, Some(2), false),
        (6, Some(1), false),
    ]);
    assert_eq!(nodes.draw_list(1), vec![7, 3, 4, 6]);

    let mut changes = Vec::new();
    nodes.unlink_draw(2, &mut changes);
    assert_eq!(nodes.draw_list(1), vec![7, 6]);
    assert_eq!(
        changes,
        vec![
            DrawChange::Remove {
                parent: 1,
                child: 3
            },
            DrawChange::Remove {
                parent: 1,
                child: 4
            },
        ]
    );

    changes.clear();
    nodes.link_draw(2, &mut changes);
    assert_eq!(nodes.draw_list(1), vec![7, 3, 4, 6]);
    assert_eq!(
        changes[0],
        DrawChange::Insert {
            parent: 1,
            child: 3,
            index: 1
        }
    );
}

#[test]
fn test_non_flatten_child_keeps_own_list() {
    let nodes = tree(&[
        (1, None, false),
        (2, Some(1), false),
        (3, Some(2), true),
        (4, Some(3), false),
    ]);
    assert_eq!(nodes.draw_list(1), vec![2]);
    assert_eq!(nodes.draw_list(2), vec![4]);
}
