//! The UI ownership manager.
//!
//! Owns every live node of one session, the logical tree, the draw lists, and the transitions
//! between flatten and non-flatten nodes. All mutation happens on the UI thread; only node
//! preparation for async creation runs on the workers.

use crate::backend::Backend;
use crate::behavior::BehaviorRegistry;
use crate::context::UiContext;
use crate::draw_list::DrawChange;
use crate::error::{CreateError, ErrorCode, LynxError};
use crate::events::guarded;
use crate::layout::{LayoutBox, LayoutNodeType};
use crate::node::{Decorator, NodeInit, PseudoStatus, UiNode};
use crate::props::{PropTable, Props};
use crate::rect::Rect;
use crate::registry::NodeRegistry;
use crate::shadow::ShadowNodeOwner;
use crate::sign::{Sign, ROOT_TAG, UNSET_SIGN};
use crate::worker::{FreeContextGate, Task, WorkerPool};
use cgmath::{Point2, Vector2};
use std::collections::{BTreeSet, HashMap};
use std::fmt::Write;
use std::mem;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Called with a node's bounding client rect after the next layout pass.
pub type BoundingRectCallback<B> = Box<dyn FnOnce(&mut UiOwner<B>, Option<Rect>)>;

/// A node constructed off the UI thread, waiting to be registered.
#[derive(Debug)]
pub struct PreparedNode {
    node: UiNode,
}

impl PreparedNode {
    pub fn sign(&self) -> Sign {
        self.node.sign
    }

    pub fn tag(&self) -> &str {
        &self.node.tag
    }
}

/// The pending result of an async node creation.
pub type NodeTask = Task<Result<PreparedNode, CreateError>>;

/// Builds a node and folds its initial properties in. Safe to run on any thread.
fn prepare_node(
    behaviors: &BehaviorRegistry,
    prop_table: &PropTable,
    init: &NodeInit,
) -> Result<UiNode, CreateError> {
    let behavior = behaviors.resolve(&init.tag)?;
    let mut node = behavior.create_node(init)?;
    node.flatten = init.flatten && behavior.supports_flatten();
    node.props.merge(&init.props);
    node.state = prop_table.derive(&node.props);
    if node.props.has_decoration() {
        node.decorator = Some(Decorator::from_props(&node.props));
    }
    Ok(node)
}

/// Keeps the exposure set and component id map in step with a node's state.
fn sync_side_tables(
    exposure_nodes: &mut BTreeSet<Sign>,
    component_ids: &mut HashMap<String, Sign>,
    node: &UiNode,
) {
    if node.state.exposure_id.is_some() {
        exposure_nodes.insert(node.sign);
    } else {
        exposure_nodes.remove(&node.sign);
    }
    if let Some(id) = &node.state.component_id {
        component_ids.insert(id.clone(), node.sign);
    }
}

/// Owns the nodes of one rendering session.
pub struct UiOwner<B: Backend> {
    context: UiContext,
    backend: B,
    behaviors: Arc<BehaviorRegistry>,
    prop_table: Arc<PropTable>,
    nodes: NodeRegistry<UiNode>,
    layout_nodes: ShadowNodeOwner,
    root_sign: Sign,
    first_layout: bool,
    root_layout_animation_running: bool,
    /// Parents whose children must be re-sorted by translate-z after layout.
    translate_z_holders: BTreeSet<Sign>,
    component_ids: HashMap<String, Sign>,
    exposure_nodes: BTreeSet<Sign>,
    bounding_rect_callbacks: Vec<(Sign, BoundingRectCallback<B>)>,
    patch_finish_listeners: BTreeSet<Sign>,
    props_changed: Vec<Sign>,
    free_gate: Arc<FreeContextGate<PreparedNode>>,
    workers: Option<WorkerPool>,
}

impl<B: Backend> UiOwner<B> {
    pub fn new(context: UiContext, backend: B, behaviors: BehaviorRegistry) -> UiOwner<B> {
        UiOwner {
            context,
            backend,
            behaviors: Arc::new(behaviors),
            prop_table: Arc::new(PropTable::new()),
            nodes: NodeRegistry::new(),
            layout_nodes: ShadowNodeOwner::new(),
            root_sign: UNSET_SIGN,
            first_layout: true,
            root_layout_animation_running: false,
            translate_z_holders: BTreeSet::new(),
            component_ids: HashMap::new(),
            exposure_nodes: BTreeSet::new(),
            bounding_rect_callbacks: Vec::new(),
            patch_finish_listeners: BTreeSet::new(),
            props_changed: Vec::new(),
            free_gate: Arc::new(FreeContextGate::new()),
            workers: None,
        }
    }

    pub fn context(&self) -> &UiContext {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut UiContext {
        &mut self.context
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn behaviors(&self) -> &BehaviorRegistry {
        &self.behaviors
    }

    pub fn nodes(&self) -> &NodeRegistry<UiNode> {
        &self.nodes
    }

    pub fn node(&self, sign: Sign) -> Option<&UiNode> {
        self.nodes.get(sign)
    }

    pub fn contains(&self, sign: Sign) -> bool {
        self.nodes.contains(sign)
    }

    pub fn layout_nodes(&self) -> &ShadowNodeOwner {
        &self.layout_nodes
    }

    pub fn layout_nodes_mut(&mut self) -> &mut ShadowNodeOwner {
        &mut self.layout_nodes
    }

    /// Creates the layout node of a tag and returns its layout flags.
    pub fn create_layout_node(
        &mut self,
        sign: Sign,
        tag: &str,
        props: &Props,
        allow_inline: bool,
    ) -> LayoutNodeType {
        self.layout_nodes
            .create_node(&self.behaviors, sign, tag, props, allow_inline)
    }

    /// The root sign, or [`UNSET_SIGN`] before the root was created.
    pub fn root_sign(&self) -> Sign {
        self.root_sign
    }

    pub fn root(&self) -> Option<Sign> {
        if self.nodes.contains(self.root_sign) {
            Some(self.root_sign)
        } else {
            None
        }
    }

    pub fn is_first_layout(&self) -> bool {
        self.first_layout
    }

    pub fn set_root_layout_animation_running(&mut self, running: bool) {
        self.root_layout_animation_running = running;
    }

    fn report(&mut self, err: LynxError) {
        self.context.handle_error(err);
    }

    fn apply_draw_changes(&mut self, changes: Vec<DrawChange>) {
        for change in changes {
            let result = match change {
                DrawChange::Insert {
                    parent,
                    child,
                    index,
                } => self.backend.insert_view(parent, child, index),
                DrawChange::Remove { parent, child } => self.backend.remove_view(parent, child),
            };
            if let Err(err) = result {
                warn!(?change, %err, "backend rejected draw change");
            }
        }
    }

    fn link(&mut self, sign: Sign) {
        let mut changes = Vec::new();
        self.nodes.link_draw(sign, &mut changes);
        self.apply_draw_changes(changes);
    }

    fn unlink(&mut self, sign: Sign) {
        let mut changes = Vec::new();
        self.nodes.unlink_draw(sign, &mut changes);
        self.apply_draw_changes(changes);
    }

    // creation

    /// Creates a node on the UI thread.
    ///
    /// Construction failures are reported to the error handler and leave the sign absent.
    ///
    /// # Panics
    /// - if the sign is already registered (unless it is the page root being created)
    pub fn create_node(&mut self, init: NodeInit) -> Result<Sign, CreateError> {
        let behaviors = Arc::clone(&self.behaviors);
        let prop_table = Arc::clone(&self.prop_table);
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            prepare_node(&behaviors, &prop_table, &init)
        }))
        .unwrap_or_else(|_| Err(CreateError::Panicked(init.tag.clone())));

        match result {
            Ok(node) => self.register(node, ErrorCode::CreateNode),
            Err(err) => {
                self.report_create_error(&init.tag, init.sign, &err, ErrorCode::CreateNode);
                Err(err)
            }
        }
    }

    /// Starts constructing a node on the worker pool.
    ///
    /// The returned task must be finished with [`UiOwner::apply_prepared`] on the UI thread.
    pub fn create_node_async(&mut self, init: NodeInit) -> NodeTask {
        let behaviors = Arc::clone(&self.behaviors);
        let prop_table = Arc::clone(&self.prop_table);
        let (task, job) = Task::new(move || {
            prepare_node(&behaviors, &prop_table, &init).map(|node| PreparedNode { node })
        });
        let threads = self.context.env.worker_threads;
        self.workers
            .get_or_insert_with(|| WorkerPool::new(threads))
            .execute(job);
        task
    }

    /// Registers an async-created node, or queues it while the context is free.
    pub fn apply_prepared(&mut self, prepared: PreparedNode) -> Result<Sign, CreateError> {
        let sign = prepared.sign();
        match self.free_gate.offer(prepared) {
            Some(prepared) => self.register(prepared.node, ErrorCode::CreateNodeAsync),
            None => {
                debug!(sign, "context is free; queued node apply");
                Ok(sign)
            }
        }
    }

    pub fn report_create_error(&mut self, tag: &str, sign: Sign, err: &CreateError, code: ErrorCode) {
        warn!(sign, tag, %err, "node creation failed");
        self.report(
            LynxError::new(code, err.to_string())
                .with_info("tag", tag)
                .with_info("sign", sign),
        );
    }

    fn register(&mut self, node: UiNode, code: ErrorCode) -> Result<Sign, CreateError> {
        let sign = node.sign;
        let is_root = self.root_sign == UNSET_SIGN && node.tag == ROOT_TAG;
        if self.nodes.contains(sign) && !is_root {
            panic!("Creation failed due to duplicate signature: {}", sign);
        }
        if !node.flatten {
            if let Err(err) = self.backend.create_view(sign, &node.tag, node.kind) {
                let err = CreateError::Platform {
                    tag: node.tag.clone(),
                    reason: err.to_string(),
                };
                self.report_create_error(&node.tag, sign, &err, code);
                return Err(err);
            }
        }
        if is_root {
            debug!(sign, "registered root node");
            self.root_sign = sign;
        }
        trace!(sign, tag = %node.tag, flatten = node.flatten, "created node");
        sync_side_tables(&mut self.exposure_nodes, &mut self.component_ids, &node);
        self.nodes.insert(sign, node);
        Ok(sign)
    }

    pub fn set_context_free(&mut self, free: bool) {
        self.free_gate.set_free(free);
    }

    pub fn is_context_free(&self) -> bool {
        self.free_gate.is_free()
    }

    /// Attaches the context, registering every node queued while it was free.
    pub fn attach(&mut self) {
        for prepared in self.free_gate.attach() {
            let _ = self.register(prepared.node, ErrorCode::CreateNodeAsync);
        }
    }

    /// Stops the async-creation workers and drops anything still queued.
    pub fn shutdown_workers(&mut self) {
        self.free_gate.clear();
        if let Some(mut workers) = self.workers.take() {
            workers.shutdown();
        }
    }

    // tree mutation

    /// Inserts a child at `index` in the parent's children; `-1` appends.
    ///
    /// # Panics
    /// - if either sign is unknown
    pub fn insert(&mut self, parent: Sign, child: Sign, index: i32) {
        if !self.nodes.contains(parent) || !self.nodes.contains(child) {
            panic!(
                "Insertion failed due to unknown parent/child signature: {}/{}",
                parent, child
            );
        }
        self.check_translate_z(child, parent);

        let parent_accepts_flatten = self
            .behaviors
            .get(&self.nodes.node(parent).tag)
            .map_or(true, |b| b.can_have_flatten_child());
        if !parent_accepts_flatten && self.nodes.node(child).flatten {
            self.update_flatten(child, false);
        }

        let parent_node = self.nodes.node_mut(parent);
        let len = parent_node.children.len();
        let index = if index < 0 {
            len
        } else if index as usize > len {
            warn!(parent, child, index, len, "insert index out of range; appending");
            len
        } else {
            index as usize
        };
        parent_node.children.insert(index, child);

        let child_node = self.nodes.node_mut(child);
        child_node.parent = Some(parent);
        let child_flatten = child_node.flatten;
        self.reset_draw_origin(child);
        self.link(child);
        if child_flatten {
            self.nodes.node_mut(parent).flatten_children_count += 1;
        }
    }

    /// Removes a child from its parent; `parent == -1` means the child's current parent.
    ///
    /// # Panics
    /// - if either sign is unknown
    pub fn remove(&mut self, parent: Sign, child: Sign) {
        let child_parent = match self.nodes.get(child) {
            Some(node) => node.parent,
            None => panic!("Remove failed due to unknown child signature: {}", child),
        };
        let parent = if parent == UNSET_SIGN {
            match child_parent {
                Some(parent) => parent,
                None => return,
            }
        } else {
            parent
        };
        if !self.nodes.contains(parent) {
            panic!("Remove failed due to unknown parent signature: {}", parent);
        }
        self.detach(parent, child);
    }

    fn detach(&mut self, parent: Sign, child: Sign) {
        self.unlink(child);
        let child_node = self.nodes.node_mut(child);
        child_node.parent = None;
        child_node.draw_origin = None;
        let child_flatten = child_node.flatten;
        if let Some(parent_node) = self.nodes.get_mut(parent) {
            parent_node.children.retain(|c| *c != child);
            if child_flatten {
                parent_node.flatten_children_count =
                    parent_node.flatten_children_count.saturating_sub(1);
            }
        }
    }

    /// Destroys a node. Unknown signs are ignored.
    ///
    /// Children are destroyed too unless the page keeps node objects alive for script
    /// references, in which case they are only detached.
    pub fn destroy(&mut self, parent: Sign, child: Sign) {
        let child_parent = match self.nodes.get(child) {
            Some(node) => node.parent,
            None => {
                trace!(child, "destroy of absent node ignored");
                return;
            }
        };
        if let Some(actual) = child_parent {
            if actual != parent {
                warn!(parent, actual, child, "destroy names the wrong parent; detaching from the actual one");
            }
            self.detach(actual, child);
        }

        let children = mem::take(&mut self.nodes.node_mut(child).children);
        if self.context.page_config.enable_fiber_arc {
            if !self.nodes.node(child).flatten {
                self.nodes.clear_draw_list(child);
            }
            for c in children {
                if let Some(node) = self.nodes.get_mut(c) {
                    node.parent = None;
                    node.draw_origin = None;
                }
            }
        } else {
            for c in children {
                self.destroy_subtree(c);
            }
        }
        self.unregister(child);
    }

    fn destroy_subtree(&mut self, sign: Sign) {
        let children = match self.nodes.get_mut(sign) {
            Some(node) => mem::take(&mut node.children),
            None => return,
        };
        for child in children {
            self.destroy_subtree(child);
        }
        self.unregister(sign);
    }

    fn unregister(&mut self, sign: Sign) {
        let node = match self.nodes.remove(sign) {
            Some(node) => node,
            None => return,
        };
        self.translate_z_holders.remove(&sign);
        self.exposure_nodes.remove(&sign);
        self.patch_finish_listeners.remove(&sign);
        if let Some(id) = &node.state.component_id {
            if self.component_ids.get(id) == Some(&sign) {
                self.component_ids.remove(id);
            }
        }
        self.bounding_rect_callbacks.retain(|(s, _)| *s != sign);
        if !node.flatten {
            self.backend.destroy_view(sign);
        }
        if sign == self.root_sign {
            self.root_sign = UNSET_SIGN;
        }
        trace!(sign, "destroyed node");
    }

    /// Replaces a node by one of the opposite flatten-ness under the same sign.
    pub fn update_flatten(&mut self, sign: Sign, flatten: bool) {
        let old = match self.nodes.get(sign) {
            Some(node) if node.flatten != flatten => node,
            Some(_) => return,
            None => {
                warn!(sign, "flatten update for unknown node");
                return;
            }
        };
        let behavior = match self.behaviors.get(&old.tag) {
            Some(behavior) => behavior,
            None => return,
        };
        if flatten && !behavior.supports_flatten() {
            return;
        }
        debug!(sign, flatten, "updating flatten");

        let children = old.children.clone();
        let init = NodeInit {
            sign,
            tag: old.tag.clone(),
            props: Props::new(),
            flatten,
            node_index: old.node_index,
            listeners: old.listeners.values().cloned().collect(),
            gesture_detectors: old.gesture_detectors.clone(),
        };
        let mut replacement = match behavior.create_node(&init) {
            Ok(node) => node,
            Err(err) => {
                self.report_create_error(&init.tag, sign, &err, ErrorCode::CreateNode);
                return;
            }
        };

        // Detach the old node from the draw tree; the logical links are carried over.
        self.unlink(sign);
        for child in &children {
            self.unlink(*child);
        }
        let old = match self.nodes.remove(sign) {
            Some(old) => old,
            None => return,
        };
        if !old.flatten {
            self.backend.destroy_view(sign);
        }

        replacement.flatten = flatten;
        replacement.props = old.props;
        replacement.state = self.prop_table.derive(&replacement.props);
        if replacement.props.has_decoration() {
            replacement.decorator = Some(Decorator::from_props(&replacement.props));
        }
        replacement.layout = old.layout;
        replacement.parent = old.parent;
        replacement.children = old.children;
        replacement.last_translate_z = old.last_translate_z;
        replacement.needs_sort_children = old.needs_sort_children;
        replacement.flatten_children_count = old.flatten_children_count;
        replacement.pseudo_status = old.pseudo_status;
        replacement.first_animated_ready = old.first_animated_ready;

        if !flatten {
            if let Err(err) = self.backend.create_view(sign, &replacement.tag, replacement.kind) {
                let err = CreateError::Platform {
                    tag: replacement.tag.clone(),
                    reason: err.to_string(),
                };
                self.report_create_error(&init.tag, sign, &err, ErrorCode::Platform);
            }
        }
        let parent = replacement.parent;
        self.nodes.insert(sign, replacement);

        self.reset_draw_origin(sign);
        self.link(sign);
        for child in &children {
            self.reset_draw_origin(*child);
            self.link(*child);
        }

        if let Some(parent) = parent.and_then(|p| self.nodes.get_mut(p)) {
            if flatten {
                parent.flatten_children_count += 1;
            } else {
                parent.flatten_children_count = parent.flatten_children_count.saturating_sub(1);
            }
        }
        self.apply_dirty_layouts(sign);
    }

    /// Forgets cached draw origins below a node that moved to another draw parent.
    fn reset_draw_origin(&mut self, sign: Sign) {
        let node = match self.nodes.get_mut(sign) {
            Some(node) => node,
            None => return,
        };
        node.draw_origin = None;
        node.layout_dirty = true;
        if node.flatten {
            for child in node.children.clone() {
                self.reset_draw_origin(child);
            }
        }
    }

    // props

    /// Applies a property diff.
    ///
    /// # Panics
    /// - if the sign is unknown
    pub fn update_props(&mut self, sign: Sign, props: &Props, tend_to_flatten: bool) {
        let flatten = match self.nodes.get(sign) {
            Some(node) => node.flatten,
            None => panic!("Trying to update props of unknown ui signature: {}", sign),
        };
        if flatten && !tend_to_flatten {
            self.update_flatten(sign, false);
        }

        let prop_table = Arc::clone(&self.prop_table);
        let node = self.nodes.node_mut(sign);
        let old_component_id = node.state.component_id.clone();
        node.props.merge(props);
        prop_table.apply(&mut node.state, props);
        node.decorator = if node.props.has_decoration() {
            Some(Decorator::from_props(&node.props))
        } else {
            None
        };
        let parent = node.parent;
        if let Some(id) = old_component_id {
            if node.state.component_id.as_ref() != Some(&id) {
                self.component_ids.remove(&id);
            }
        }
        sync_side_tables(&mut self.exposure_nodes, &mut self.component_ids, node);
        self.props_changed.push(sign);

        if let Some(parent) = parent {
            self.check_translate_z(sign, parent);
        }
        self.invalidate(sign);
    }

    /// Replaces the script-side listeners of a node.
    pub fn set_event_listeners(&mut self, sign: Sign, listeners: &[crate::node::EventListener]) {
        if let Some(node) = self.nodes.get_mut(sign) {
            node.set_listeners(listeners);
        }
    }

    /// Signs whose props changed since the last call.
    pub fn take_props_changed(&mut self) -> Vec<Sign> {
        mem::take(&mut self.props_changed)
    }

    fn invalidate(&mut self, sign: Sign) {
        let target = match self.nodes.get(sign) {
            Some(node) if !node.flatten => Some(sign),
            Some(_) => self.nodes.draw_owner(sign),
            None => None,
        };
        if let Some(target) = target {
            self.backend.invalidate(target);
        }
    }

    // translate-z

    fn check_translate_z(&mut self, child: Sign, parent: Sign) {
        if !self.context.page_config.enable_flatten_translate_z {
            return;
        }
        let (z, last_z) = match self.nodes.get(child) {
            Some(node) => (node.state.translate_z, node.last_translate_z),
            None => return,
        };
        if z == last_z {
            return;
        }
        if self.nodes.get(parent).map_or(false, |p| p.flatten) {
            self.update_flatten(parent, false);
        }
        self.translate_z_holders.insert(parent);
        if let Some(parent) = self.nodes.get_mut(parent) {
            parent.needs_sort_children = true;
        }
        self.nodes.node_mut(child).last_translate_z = z;
    }

    fn handle_translate_z(&mut self) {
        if !self.context.page_config.enable_flatten_translate_z {
            return;
        }
        let holders: Vec<Sign> = self.translate_z_holders.iter().copied().collect();
        for parent in holders {
            let needs_sort = match self.nodes.get(parent) {
                Some(node) => node.flatten_children_count > 0 && node.needs_sort_children,
                None => false,
            };
            if needs_sort {
                self.sort_translate_z_children(parent);
                self.nodes.node_mut(parent).needs_sort_children = false;
            }
        }
    }

    /// Stable-sorts children by translate-z and re-splices them in the new order.
    fn sort_translate_z_children(&mut self, parent: Sign) {
        let children = self.nodes.node(parent).children.clone();
        for child in &children {
            self.unlink(*child);
        }
        let mut sorted = children;
        let nodes = &self.nodes;
        sorted.sort_by(|a, b| {
            let za = nodes.get(*a).map_or(0., |n| n.state.translate_z);
            let zb = nodes.get(*b).map_or(0., |n| n.state.translate_z);
            za.partial_cmp(&zb).unwrap_or(std::cmp::Ordering::Equal)
        });
        self.nodes.node_mut(parent).children = sorted.clone();
        for child in sorted {
            self.reset_draw_origin(child);
            self.link(child);
        }
    }

    // layout

    /// Records a layout result. Unknown signs are reported, not fatal.
    ///
    /// After the first layout pass, nodes with layout-animation or transition props ask the
    /// backend to animate; the box is applied directly when it declines.
    pub fn update_layout(&mut self, sign: Sign, layout: LayoutBox) {
        let node = match self.nodes.get(sign) {
            Some(node) => node,
            None => {
                self.report(
                    LynxError::new(ErrorCode::LayoutNodeNotFound, "layout update for unknown node")
                        .with_info("sign", sign),
                );
                return;
            }
        };

        let duration = if self.first_layout || node.flatten || !node.animates_layout() {
            None
        } else if node.state.transition_ms.is_some() && !node.first_animated_ready {
            node.state.transition_ms
        } else if sign != self.root_sign || self.root_layout_animation_running {
            node.state.layout_animation_ms
        } else {
            None
        };

        let animated = match duration {
            Some(ms) => match self.backend.animate_layout(sign, &layout, ms) {
                Ok(animated) => animated,
                Err(err) => {
                    warn!(sign, %err, "layout animation failed");
                    false
                }
            },
            None => false,
        };

        let offset = self.flatten_offset(sign);
        let node = self.nodes.node_mut(sign);
        if animated {
            // The backend owns the frame until the animation ends.
            node.draw_origin = Some(Point2::new(layout.left + offset.x, layout.top + offset.y));
        } else {
            node.layout_dirty = true;
        }
        node.layout = layout;
    }

    /// Asks for the bounding client rect of a node once the next layout pass is done.
    pub fn register_bounding_rect_callback(&mut self, sign: Sign, callback: BoundingRectCallback<B>) {
        self.bounding_rect_callbacks.push((sign, callback));
    }

    /// Applies dirty layouts, then runs bounding-rect callbacks until none are left.
    pub fn perform_layout(&mut self) {
        if let Some(root) = self.root() {
            self.apply_dirty_layouts(root);
        }
        guarded("layout event", || self.context.emitter().send_layout_event());

        loop {
            let callbacks = mem::take(&mut self.bounding_rect_callbacks);
            if callbacks.is_empty() {
                break;
            }
            for (sign, callback) in callbacks {
                let rect = self.bounding_client_rect(sign);
                callback(self, rect);
            }
        }
        self.first_layout = false;
    }

    fn apply_dirty_layouts(&mut self, sign: Sign) {
        let offset = self.flatten_offset(sign);
        self.apply_layout_at(sign, offset);
    }

    /// Sum of the positions of the flatten ancestors between a node and its draw owner.
    fn flatten_offset(&self, sign: Sign) -> Vector2<f32> {
        let mut offset = Vector2::new(0., 0.);
        let mut cur = self.nodes.get(sign).and_then(|n| n.parent);
        while let Some(parent) = cur {
            let node = match self.nodes.get(parent) {
                Some(node) if node.flatten => node,
                _ => break,
            };
            offset += Vector2::new(node.layout.left, node.layout.top);
            cur = node.parent;
        }
        offset
    }

    fn apply_layout_at(&mut self, sign: Sign, offset: Vector2<f32>) {
        let node = self.nodes.node_mut(sign);
        let origin = Point2::new(node.layout.left + offset.x, node.layout.top + offset.y);
        let dirty = node.layout_dirty || node.draw_origin != Some(origin);
        node.layout_dirty = false;
        node.draw_origin = Some(origin);
        let flatten = node.flatten;
        let children = node.children.clone();
        let child_offset = if flatten {
            offset + Vector2::new(node.layout.left, node.layout.top)
        } else {
            Vector2::new(0., 0.)
        };

        if dirty {
            if flatten {
                if let Some(owner) = self.nodes.draw_owner(sign) {
                    self.backend.invalidate(owner);
                }
            } else {
                let layout = self.nodes.node(sign).layout.clone();
                if let Err(err) = self.backend.update_layout(sign, &layout, origin) {
                    warn!(sign, %err, "backend rejected layout");
                }
            }
        }
        for child in children {
            self.apply_layout_at(child, child_offset);
        }
    }

    // lifecycle callbacks

    /// A batch marked the node ready; transitions may run from now on.
    pub fn on_node_ready(&mut self, sign: Sign) {
        if let Some(node) = self.nodes.get_mut(sign) {
            node.first_animated_ready = false;
        }
        self.invalidate(sign);
    }

    /// A batch removed the subtree from the page; it will not animate until ready again.
    pub fn on_node_removed(&mut self, sign: Sign) {
        let children = match self.nodes.get_mut(sign) {
            Some(node) => {
                node.first_animated_ready = true;
                node.children.clone()
            }
            None => return,
        };
        for child in children {
            self.on_node_removed(child);
        }
    }

    pub fn add_patch_finish_listener(&mut self, sign: Sign) {
        self.patch_finish_listeners.insert(sign);
    }

    pub fn remove_patch_finish_listener(&mut self, sign: Sign) {
        self.patch_finish_listeners.remove(&sign);
    }

    pub fn on_tasm_finish(&mut self, operation_id: i64) {
        let listeners: Vec<Sign> = self.patch_finish_listeners.iter().copied().collect();
        let emitter = self.context.emitter();
        for sign in listeners {
            guarded("patch finish", || emitter.on_patch_finish(sign, operation_id));
        }
    }

    /// Sorts translate-z children, then notifies the node encoded in the high half of
    /// `operation_id`.
    pub fn on_layout_finish(&mut self, component_id: i32, operation_id: i64) {
        self.handle_translate_z();
        if operation_id == 0 {
            return;
        }
        let sign = (operation_id >> 32) as Sign;
        if !self.nodes.contains(sign) {
            return;
        }
        let component = if self.nodes.contains(component_id) {
            Some(component_id)
        } else {
            None
        };
        let emitter = self.context.emitter();
        guarded("layout finish", || {
            emitter.on_node_layout_finish(sign, operation_id, component)
        });
    }

    /// Destroys every node and returns to the pre-root state.
    pub fn reset(&mut self) {
        debug!(nodes = self.nodes.len(), "resetting ui owner");
        let drained: Vec<UiNode> = self.nodes.drain().map(|(_, node)| node).collect();
        for node in drained {
            if !node.flatten {
                self.backend.destroy_view(node.sign);
            }
        }
        self.layout_nodes.clear();
        self.root_sign = UNSET_SIGN;
        self.first_layout = true;
        self.translate_z_holders.clear();
        self.component_ids.clear();
        self.exposure_nodes.clear();
        self.bounding_rect_callbacks.clear();
        self.patch_finish_listeners.clear();
        self.props_changed.clear();
    }

    // queries

    /// Pre-order signs of a subtree.
    pub fn descendants(&self, sign: Sign) -> Vec<Sign> {
        let mut out = Vec::new();
        let mut stack = vec![sign];
        while let Some(cur) = stack.pop() {
            let node = match self.nodes.get(cur) {
                Some(node) => node,
                None => continue,
            };
            out.push(cur);
            stack.extend(node.children.iter().rev());
        }
        out
    }

    /// Signs from the node up to the root, the node first.
    pub fn ancestors(&self, sign: Sign) -> Vec<Sign> {
        let mut out = Vec::new();
        let mut cur = if self.nodes.contains(sign) {
            Some(sign)
        } else {
            None
        };
        while let Some(s) = cur {
            out.push(s);
            cur = self.nodes.get(s).and_then(|n| n.parent);
        }
        out
    }

    pub fn find_by_id_selector(&self, id: &str) -> Option<Sign> {
        let root = self.root()?;
        self.find_by_id_selector_in(id, root)
    }

    pub fn find_by_id_selector_in(&self, id: &str, container: Sign) -> Option<Sign> {
        self.descendants(container)
            .into_iter()
            .find(|s| self.nodes.node(*s).state.id_selector.as_deref() == Some(id))
    }

    /// Searches the subtrees of the node's ancestors, nearest first.
    pub fn find_by_id_selector_search_up(&self, id: &str, from: Sign) -> Option<Sign> {
        self.ancestors(from)
            .into_iter()
            .find_map(|ancestor| self.find_by_id_selector_in(id, ancestor))
    }

    pub fn find_by_component_id(&self, id: &str) -> Option<Sign> {
        self.component_ids.get(id).copied()
    }

    /// Nodes carrying an exposure id.
    pub fn exposure_nodes(&self) -> impl Iterator<Item = Sign> + '_ {
        self.exposure_nodes.iter().copied()
    }

    /// Whether touches fall through the node; unset values inherit from the parent.
    pub fn event_through(&self, sign: Sign) -> bool {
        let mut cur = Some(sign);
        while let Some(s) = cur {
            let node = match self.nodes.get(s) {
                Some(node) => node,
                None => return false,
            };
            if let Some(through) = node.state.event_through {
                return through;
            }
            cur = node.parent;
        }
        false
    }

    /// Replaces a node's pseudo status and returns the previous one.
    pub fn set_pseudo_status(&mut self, sign: Sign, status: PseudoStatus) -> Option<PseudoStatus> {
        let node = self.nodes.get_mut(sign)?;
        Some(mem::replace(&mut node.pseudo_status, status))
    }

    /// Whether the node and all of its ancestors are visible.
    pub fn is_visible_in_tree(&self, sign: Sign) -> bool {
        self.ancestors(sign)
            .iter()
            .all(|s| self.nodes.node(*s).state.visible)
    }

    /// The node's frame relative to the root, or `None` if it is not attached to the root.
    pub fn bounding_client_rect(&self, sign: Sign) -> Option<Rect> {
        let node = self.nodes.get(sign)?;
        if sign == self.root_sign {
            return Some(Rect::new(Point2::new(0., 0.), node.layout.frame().size));
        }
        let mut rect = node.layout.frame();
        let mut cur = node.parent;
        while let Some(parent) = cur {
            if parent == self.root_sign {
                return Some(rect);
            }
            let node = self.nodes.get(parent)?;
            rect = rect + Vector2::new(node.layout.left, node.layout.top);
            cur = node.parent;
        }
        None
    }

    /// The node's frame in screen coordinates.
    pub fn bounds_on_screen(&self, sign: Sign) -> Option<Rect> {
        let rect = self.bounding_client_rect(sign)?;
        Some(rect + self.backend.root_origin_on_screen())
    }

    /// Finds the deepest node under a point given relative to the root.
    pub fn hit_test(&self, point: Point2<f32>) -> Option<Sign> {
        let root = self.root()?;
        Some(self.hit_test_in(root, point))
    }

    fn hit_test_in(&self, sign: Sign, point: Point2<f32>) -> Sign {
        let node = self.nodes.node(sign);
        let mut target: Option<&UiNode> = None;
        for child in node.children.iter().rev() {
            let child = match self.nodes.get(*child) {
                Some(child) => child,
                None => continue,
            };
            if !child.state.user_interaction_enabled || !child.state.visible {
                continue;
            }
            if !self.contains_point(child, point) {
                continue;
            }
            match target {
                Some(t) if t.state.translate_z >= child.state.translate_z => {}
                _ => target = Some(child),
            }
        }
        match target {
            Some(t) => {
                let local = Point2::new(point.x - t.layout.left, point.y - t.layout.top);
                self.hit_test_in(t.sign, local)
            }
            None => sign,
        }
    }

    /// Whether a point in the parent's space falls on the node or its overflowing children.
    fn contains_point(&self, node: &UiNode, point: Point2<f32>) -> bool {
        let frame = node.layout.frame();
        let in_x = frame.left() < point.x && frame.right() > point.x;
        let in_y = frame.top() < point.y && frame.bottom() > point.y;
        if in_x && in_y {
            return true;
        }
        let overflow = node.state.overflow;
        if overflow.clips() {
            return false;
        }
        if !overflow.visible_y() && !in_y {
            return false;
        }
        if !overflow.visible_x() && !in_x {
            return false;
        }
        let local = Point2::new(point.x - frame.left(), point.y - frame.top());
        node.children.iter().any(|c| match self.nodes.get(*c) {
            Some(child) => {
                child.state.user_interaction_enabled
                    && child.state.visible
                    && self.contains_point(child, local)
            }
            None => false,
        })
    }

    /// The logical tree and draw lists, for debugging.
    pub fn dump(&self) -> String {
        let mut out = String::new();
        if let Some(root) = self.root() {
            self.dump_node(root, 0, &mut out);
        }
        out
    }

    fn dump_node(&self, sign: Sign, depth: usize, out: &mut String) {
        let node = self.nodes.node(sign);
        let _ = write!(out, "{:indent$}{}#{}", "", node.tag, sign, indent = depth * 2);
        if node.flatten {
            out.push_str(" (flatten)");
        } else {
            let _ = write!(out, " draws {:?}", self.nodes.draw_list(sign));
        }
        out.push('\n');
        for child in &node.children {
            self.dump_node(*child, depth + 1, out);
        }
    }
}

impl<B: Backend> Drop for UiOwner<B> {
    fn drop(&mut self) {
        self.shutdown_workers();
    }
}

#[cfg(test)]
use crate::config::PageConfig;
#[cfg(test)]
use crate::testing::{build, build_with, harness, BackendCall, FakeBackend};

#[cfg(test)]
fn frame(l: f32, t: f32, w: f32, h: f32) -> Rect {
    Rect::new(Point2::new(l, t), Vector2::new(w, h))
}

#[test]
fn test_draw_list_tracks_logical_tree() {
    let mut h = harness(PageConfig::default());
    let owner = &mut h.owner;
    build(
        owner,
        &[
            (1, None, "page", false, frame(0., 0., 400., 800.)),
            (2, Some(1), "view", true, frame(10., 10., 100., 100.)),
            (3, Some(2), "view", false, frame(5., 5., 10., 10.)),
            (4, Some(2), "view", true, frame(20., 20., 50., 50.)),
            (5, Some(4), "view", false, frame(1., 1., 10., 10.)),
            (6, Some(1), "view", false, frame(0., 200., 10., 10.)),
        ],
    );
    assert_eq!(owner.nodes().draw_list(1), vec![3, 5, 6]);
    assert_eq!(owner.backend().subviews[&1], vec![3, 5, 6]);

    owner.perform_layout();
    assert!(owner
        .backend()
        .calls
        .contains(&BackendCall::Layout(5, Point2::new(31., 31.))));

    owner.remove(1, 2);
    assert_eq!(owner.nodes().draw_list(1), vec![6]);
    assert_eq!(owner.backend().subviews[&1], vec![6]);

    owner.insert(1, 2, 1);
    assert_eq!(owner.nodes().draw_list(1), vec![6, 3, 5]);
    assert_eq!(owner.backend().subviews[&1], vec![6, 3, 5]);
}

#[test]
fn test_destroy_is_idempotent() {
    let mut h = harness(PageConfig::default());
    let owner = &mut h.owner;
    build(
        owner,
        &[
            (1, None, "page", false, frame(0., 0., 400., 800.)),
            (2, Some(1), "view", false, frame(0., 0., 100., 100.)),
            (3, Some(2), "view", false, frame(0., 0., 10., 10.)),
        ],
    );
    owner.destroy(1, 2);
    assert!(!owner.contains(2));
    assert!(!owner.contains(3), "children are destroyed recursively");
    let destroyed = owner.backend().destroyed();
    owner.destroy(1, 2);
    assert_eq!(owner.backend().destroyed(), destroyed);
    assert!(h.errors.errors().is_empty());
}

#[test]
fn test_destroy_detaches_from_actual_parent() {
    let mut h = harness(PageConfig::default());
    let owner = &mut h.owner;
    build(
        owner,
        &[
            (1, None, "page", false, frame(0., 0., 400., 800.)),
            (2, Some(1), "view", false, frame(0., 0., 100., 100.)),
            (3, Some(2), "view", false, frame(0., 0., 10., 10.)),
        ],
    );
    owner.destroy(1, 3);
    assert!(!owner.contains(3));
    assert_eq!(owner.node(2).map(|n| n.children().to_vec()), Some(vec![]));
    assert_eq!(owner.node(1).map(|n| n.children().to_vec()), Some(vec![2]));
}

#[test]
fn test_fiber_arc_destroy_keeps_children() {
    let mut config = PageConfig::default();
    config.enable_fiber_arc = true;
    let mut h = harness(config);
    let owner = &mut h.owner;
    build(
        owner,
        &[
            (1, None, "page", false, frame(0., 0., 400., 800.)),
            (2, Some(1), "view", false, frame(0., 0., 100., 100.)),
            (3, Some(2), "view", false, frame(0., 0., 10., 10.)),
        ],
    );
    owner.destroy(1, 2);
    assert!(!owner.contains(2));
    let child = owner.node(3).expect("child outlives its parent");
    assert_eq!(child.parent(), None);
    assert_eq!(child.draw_links().parent, None);

    owner.insert(1, 3, -1);
    assert_eq!(owner.nodes().draw_list(1), vec![3]);
}

#[test]
fn test_update_flatten_keeps_identity() {
    let mut h = harness(PageConfig::default());
    let owner = &mut h.owner;
    build(
        owner,
        &[
            (1, None, "page", false, frame(0., 0., 400., 800.)),
            (7, Some(1), "view", false, frame(0., 0., 10., 10.)),
            (2, Some(1), "view", true, frame(10., 10., 100., 100.)),
            (3, Some(2), "view", false, frame(5., 5., 10., 10.)),
            (4, Some(2), "view", false, frame(5., 50., 10., 10.)),
            (8, Some(1), "view", false, frame(0., 300., 10., 10.)),
        ],
    );
    owner.update_props(2, &Props::new().with("idSelector", "box"), true);
    owner.perform_layout();
    assert_eq!(owner.nodes().draw_list(1), vec![7, 3, 4, 8]);

    owner.update_flatten(2, false);
    let node = owner.node(2).expect("same sign after unflatten");
    assert!(!node.is_flatten());
    assert_eq!(node.children(), &[3, 4]);
    assert_eq!(node.state().id_selector.as_deref(), Some("box"));
    assert_eq!(owner.nodes().draw_list(1), vec![7, 2, 8]);
    assert_eq!(owner.nodes().draw_list(2), vec![3, 4]);
    assert_eq!(owner.backend().subviews[&2], vec![3, 4]);
    assert!(
        owner
            .backend()
            .calls
            .contains(&BackendCall::Layout(3, Point2::new(5., 5.))),
        "children are laid out relative to the new view"
    );

    owner.update_flatten(2, true);
    assert_eq!(owner.nodes().draw_list(1), vec![7, 3, 4, 8]);
    assert!(owner.node(2).map_or(false, |n| n.is_flatten()));
}

#[test]
fn test_create_failure_is_reported() {
    let mut h = harness(PageConfig::default());
    let owner = &mut h.owner;
    assert!(owner.create_node(NodeInit::new(1, "page")).is_ok());
    assert!(owner.create_node(NodeInit::new(2, "x-missing")).is_err());
    assert!(!owner.contains(2));

    owner.backend_mut().failing_tags.insert("image".to_string());
    assert!(owner.create_node(NodeInit::new(3, "image")).is_err());
    assert!(!owner.contains(3));

    let errors = h.errors.errors();
    assert_eq!(errors.len(), 2);
    assert_eq!(errors[0].code, ErrorCode::CreateNode);
    assert_eq!(errors[0].custom_info["tag"], "x-missing");
    assert_eq!(errors[1].custom_info["sign"], "3");
}

#[test]
fn test_layout_for_unknown_node_is_reported() {
    let mut h = harness(PageConfig::default());
    h.owner.update_layout(42, LayoutBox::with_frame(0., 0., 1., 1.));
    let errors = h.errors.errors();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].code, ErrorCode::LayoutNodeNotFound);
}

#[test]
fn test_layout_animation_after_first_layout() {
    let mut h = harness(PageConfig::default());
    let owner = &mut h.owner;
    build(
        owner,
        &[(1, None, "page", false, frame(0., 0., 400., 800.))],
    );
    build_with(
        owner,
        2,
        Some(1),
        "view",
        false,
        frame(0., 0., 10., 10.),
        Props::new().with("layout-animation-duration", "200ms"),
    );
    owner.perform_layout();
    assert!(!owner
        .backend()
        .calls
        .iter()
        .any(|c| matches!(c, BackendCall::Animate(..))));

    owner.backend_mut().animates = true;
    owner.update_layout(2, LayoutBox::with_frame(0., 50., 10., 10.));
    assert!(owner.backend().calls.contains(&BackendCall::Animate(2, 200)));
    owner.backend_mut().calls.clear();
    owner.perform_layout();
    assert!(
        !owner
            .backend()
            .calls
            .iter()
            .any(|c| matches!(c, BackendCall::Layout(2, _))),
        "animated boxes are not applied directly"
    );
}

#[test]
fn test_bounding_rect_callbacks_loop() {
    let mut h = harness(PageConfig::default());
    let owner = &mut h.owner;
    build(
        owner,
        &[
            (1, None, "page", false, frame(0., 0., 400., 800.)),
            (2, Some(1), "view", false, frame(10., 20., 100., 100.)),
            (3, Some(2), "view", true, frame(5., 5., 10., 10.)),
        ],
    );
    let seen = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));
    let outer = std::rc::Rc::clone(&seen);
    owner.register_bounding_rect_callback(
        2,
        Box::new(move |owner: &mut UiOwner<FakeBackend>, rect: Option<Rect>| {
            outer.borrow_mut().push(rect);
            let inner = std::rc::Rc::clone(&outer);
            owner.register_bounding_rect_callback(
                3,
                Box::new(move |_: &mut UiOwner<FakeBackend>, rect: Option<Rect>| {
                    inner.borrow_mut().push(rect)
                }),
            );
        }),
    );
    owner.perform_layout();
    assert_eq!(
        *seen.borrow(),
        vec![Some(frame(10., 20., 100., 100.)), Some(frame(15., 25., 10., 10.))]
    );
    assert!(!owner.is_first_layout());
}

#[test]
fn test_translate_z_sorts_children() {
    let mut config = PageConfig::default();
    config.enable_flatten_translate_z = true;
    let mut h = harness(config);
    let owner = &mut h.owner;
    build(
        owner,
        &[
            (1, None, "page", false, frame(0., 0., 400., 800.)),
            (2, Some(1), "view", false, frame(0., 0., 100., 100.)),
            (3, Some(2), "view", true, frame(0., 0., 10., 10.)),
            (4, Some(3), "view", false, frame(0., 0., 10., 10.)),
            (5, Some(2), "view", false, frame(0., 0., 10., 10.)),
        ],
    );
    owner.update_props(3, &Props::new().with("translate-z", 10), true);
    assert_eq!(owner.nodes().draw_list(2), vec![4, 5]);

    owner.update_props(5, &Props::new().with("translate-z", 1), true);
    owner.on_layout_finish(0, 0);
    assert_eq!(owner.node(2).map(|n| n.children().to_vec()), Some(vec![5, 3]));
    assert_eq!(owner.nodes().draw_list(2), vec![5, 4]);
    assert_eq!(owner.backend().subviews[&2], vec![5, 4]);
}

#[test]
fn test_hit_test_prefers_topmost() {
    let mut h = harness(PageConfig::default());
    let owner = &mut h.owner;
    build(
        owner,
        &[
            (1, None, "page", false, frame(0., 0., 400., 800.)),
            (2, Some(1), "view", false, frame(0., 0., 200., 200.)),
            (3, Some(2), "view", false, frame(10., 10., 50., 50.)),
            (4, Some(2), "view", false, frame(10., 10., 50., 50.)),
        ],
    );
    assert_eq!(owner.hit_test(Point2::new(20., 20.)), Some(4));
    owner.update_props(4, &Props::new().with("user-interaction-enabled", false), true);
    assert_eq!(owner.hit_test(Point2::new(20., 20.)), Some(3));
    assert_eq!(owner.hit_test(Point2::new(300., 300.)), Some(1));

    owner.update_props(3, &Props::new().with("overflow", "visible"), true);
    build(owner, &[(5, Some(3), "view", false, frame(60., 0., 20., 20.))]);
    assert_eq!(owner.hit_test(Point2::new(75., 15.)), Some(5));
}

#[test]
fn test_event_through_inherits() {
    let mut h = harness(PageConfig::default());
    let owner = &mut h.owner;
    build(
        owner,
        &[
            (1, None, "page", false, frame(0., 0., 400., 800.)),
            (2, Some(1), "view", false, frame(0., 0., 200., 200.)),
            (3, Some(2), "view", false, frame(0., 0., 50., 50.)),
        ],
    );
    assert!(!owner.event_through(3));
    owner.update_props(2, &Props::new().with("event-through", true), true);
    assert!(owner.event_through(3));
    owner.update_props(3, &Props::new().with("event-through", false), true);
    assert!(!owner.event_through(3));
}

#[test]
fn test_lookup_tables() {
    let mut h = harness(PageConfig::default());
    let owner = &mut h.owner;
    build(owner, &[(1, None, "page", false, frame(0., 0., 400., 800.))]);
    build_with(
        owner,
        2,
        Some(1),
        "component",
        false,
        frame(0., 0., 10., 10.),
        Props::new().with("ComponentID", "21").with("exposure-id", "e"),
    );
    build_with(
        owner,
        3,
        Some(2),
        "view",
        false,
        frame(0., 0., 10., 10.),
        Props::new().with("idSelector", "inner"),
    );
    assert_eq!(owner.find_by_component_id("21"), Some(2));
    assert_eq!(owner.find_by_id_selector("inner"), Some(3));
    assert_eq!(owner.exposure_nodes().collect::<Vec<_>>(), vec![2]);
    assert!(owner.dump().contains("component#2"));

    owner.destroy(1, 2);
    assert_eq!(owner.find_by_component_id("21"), None);
    assert_eq!(owner.exposure_nodes().count(), 0);

    owner.reset();
    assert_eq!(owner.root_sign(), UNSET_SIGN);
    assert!(owner.nodes().is_empty());
}

#[test]
fn test_context_free_queues_async_applies() {
    use std::time::Duration;

    let mut h = harness(PageConfig::default());
    let owner = &mut h.owner;
    owner.set_context_free(true);
    let task = owner.create_node_async(NodeInit::new(9, "view"));
    assert!(task.wait_timeout(Duration::from_secs(5)));
    let prepared = match task.try_take() {
        Some(Ok(Ok(prepared))) => prepared,
        _ => panic!("view should be constructed off-thread"),
    };
    assert_eq!(owner.apply_prepared(prepared), Ok(9));
    assert!(!owner.contains(9), "apply waits for attach");
    owner.attach();
    assert!(owner.contains(9));
}
