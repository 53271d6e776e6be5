//! The painting bridge: replays the native engine's operation batches on the UI owner.

use crate::backend::Backend;
use crate::error::{ErrorCode, LynxError};
use crate::layout::{LayoutBox, LayoutNodeType};
use crate::node::{EventListener, NodeInit};
use crate::operation::{Operation, OperationReader};
use crate::owner::{NodeTask, UiOwner};
use crate::props::Props;
use crate::sign::{Sign, ROOT_TAG};
use crate::worker::TaskError;
use std::collections::{HashMap, VecDeque};
use std::mem;
use tracing::{debug, error, info, trace};

/// A tag info word: layout node type in the low 16 bits, the async-creation bit above.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TagInfo(pub u32);

impl TagInfo {
    const ASYNC_BIT: u32 = 1 << 16;

    pub fn layout_type(self) -> LayoutNodeType {
        LayoutNodeType(self.0 & 0xFFFF)
    }

    pub fn create_async(self) -> bool {
        self.0 & Self::ASYNC_BIT != 0
    }
}

/// How an async creation was finished; kept for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum AsyncCreateStatus {
    /// The job had not started and was cancelled; the node was created on the UI thread.
    CancelSuccess = 0,
    /// The job was still running; the node was created on the UI thread anyway.
    CancelFail = 1,
    FutureDone = 2,
    /// The job failed; the node was created on the UI thread.
    FutureDoneException = 3,
}

enum PendingCreate {
    Sync(NodeInit),
    Async { init: NodeInit, task: NodeTask },
}

/// Tree work received while the context is free, replayed on attach.
enum Deferred {
    Batch(Vec<u8>),
    Props {
        sign: Sign,
        props: Props,
        tend_to_flatten: bool,
        listeners: Option<Vec<EventListener>>,
    },
    Layout(Sign, LayoutBox),
    Flatten(Sign, bool),
}

/// Decodes operation batches and applies them, together with queued node creations.
pub struct PaintingContext<B: Backend> {
    owner: UiOwner<B>,
    /// First decision per tag wins for the lifetime of the bridge.
    async_decisions: HashMap<String, bool>,
    pending: VecDeque<PendingCreate>,
    async_statuses: HashMap<Sign, AsyncCreateStatus>,
    deferred: Vec<Deferred>,
    destroyed: bool,
}

impl<B: Backend> PaintingContext<B> {
    pub fn new(owner: UiOwner<B>) -> PaintingContext<B> {
        PaintingContext {
            owner,
            async_decisions: HashMap::new(),
            pending: VecDeque::new(),
            async_statuses: HashMap::new(),
            deferred: Vec::new(),
            destroyed: false,
        }
    }

    pub fn owner(&self) -> &UiOwner<B> {
        &self.owner
    }

    pub fn owner_mut(&mut self) -> &mut UiOwner<B> {
        &mut self.owner
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    fn needs_async_create(&mut self, tag: &str) -> bool {
        if let Some(decision) = self.async_decisions.get(tag) {
            return *decision;
        }
        let context = self.owner.context();
        let decision = context.env.create_view_async
            && context.page_config.enable_create_view_async
            && tag != ROOT_TAG
            && self
                .owner
                .behaviors()
                .get(tag)
                .map_or(false, |b| b.supports_async_create());
        debug!(tag, decision, "decided async creation");
        self.async_decisions.insert(tag.to_string(), decision);
        decision
    }

    /// Layout type and async-creation bit of a tag. Virtual tags never report async creation.
    pub fn tag_info(&mut self, tag: &str) -> TagInfo {
        let ty = self
            .owner
            .behaviors()
            .get(tag)
            .map_or(LayoutNodeType::COMMON, |b| b.layout_node_type(false));
        let bits = ty.0 & 0xFFFF;
        if ty.is_virtual() {
            return TagInfo(bits);
        }
        let async_bit = if self.needs_async_create(tag) {
            TagInfo::ASYNC_BIT
        } else {
            0
        };
        TagInfo(bits | async_bit)
    }

    /// Queues a node creation to run before the next batch. Returns whether it runs async.
    pub fn enqueue_create_node(&mut self, init: NodeInit) -> bool {
        if self.destroyed {
            return false;
        }
        if self.needs_async_create(&init.tag) {
            let task = self.owner.create_node_async(init.clone());
            self.pending.push_back(PendingCreate::Async { init, task });
            true
        } else {
            self.pending.push_back(PendingCreate::Sync(init));
            false
        }
    }

    /// Applies every queued creation, in order.
    pub fn flush_pending_creates(&mut self) {
        while let Some(pending) = self.pending.pop_front() {
            match pending {
                PendingCreate::Sync(init) => {
                    let _ = self.owner.create_node(init);
                }
                PendingCreate::Async { init, task } => self.finish_async_create(init, task),
            }
        }
    }

    fn finish_async_create(&mut self, init: NodeInit, task: NodeTask) {
        let sign = init.sign;
        let (status, prepared) = if !task.is_done() {
            let status = if task.cancel() {
                AsyncCreateStatus::CancelSuccess
            } else {
                AsyncCreateStatus::CancelFail
            };
            info!(sign, tag = %init.tag, ?status, "async creation not done; creating on ui thread");
            (status, None)
        } else {
            match task.try_take() {
                Some(Ok(Ok(prepared))) => (AsyncCreateStatus::FutureDone, Some(prepared)),
                Some(Ok(Err(err))) => {
                    self.owner
                        .report_create_error(&init.tag, sign, &err, ErrorCode::CreateNodeAsync);
                    (AsyncCreateStatus::FutureDoneException, None)
                }
                Some(Err(TaskError::Panicked)) | Some(Err(TaskError::Taken)) | None => {
                    let err = crate::error::CreateError::Panicked(init.tag.clone());
                    self.owner
                        .report_create_error(&init.tag, sign, &err, ErrorCode::CreateNodeAsync);
                    (AsyncCreateStatus::FutureDoneException, None)
                }
            }
        };
        self.async_statuses.insert(sign, status);
        let _ = match prepared {
            Some(prepared) => self.owner.apply_prepared(prepared),
            None => self.owner.create_node(init),
        };
    }

    /// How the async creation of a node was finished, if it was created async.
    pub fn async_status(&self, sign: Sign) -> Option<AsyncCreateStatus> {
        self.async_statuses.get(&sign).copied()
    }

    /// Applies queued creations, then every operation of the batch in order.
    ///
    /// While the context is free, async-created nodes wait for [`PaintingContext::attach`], so
    /// the batch waits too. A malformed buffer or unknown operation aborts the rest of the batch.
    pub fn flush_operation_batch(&mut self, buf: &[u8]) {
        if self.destroyed {
            debug!("painting context destroyed; ignoring batch");
            return;
        }
        self.flush_pending_creates();
        if self.owner.is_context_free() {
            trace!(len = buf.len(), "context is free; deferring batch");
            self.deferred.push(Deferred::Batch(buf.to_vec()));
            return;
        }
        for operation in OperationReader::new(buf) {
            match operation {
                Ok(operation) => self.apply(operation),
                Err(err) => {
                    error!(%err, "aborting operation batch");
                    self.owner.context_mut().handle_error(LynxError::new(
                        ErrorCode::OperationBatch,
                        format!("operation batch aborted: {}", err),
                    ));
                    return;
                }
            }
        }
    }

    fn apply(&mut self, operation: Operation) {
        trace!(?operation, "applying");
        match operation {
            Operation::Insert {
                parent,
                child,
                index,
            } => self.owner.insert(parent, child, index),
            Operation::Remove { parent, child } => self.owner.remove(parent, child),
            Operation::Destroy { parent, child } => self.owner.destroy(parent, child),
            Operation::ReadyBatch(signs) => {
                for sign in signs {
                    self.owner.on_node_ready(sign);
                }
            }
            Operation::RemoveBatch(signs) => {
                for sign in signs {
                    self.owner.on_node_removed(sign);
                }
            }
            Operation::UpdateLayoutBatch(patches) => {
                for patch in patches {
                    if !self.owner.contains(patch.sign) {
                        self.owner.context_mut().handle_error(
                            LynxError::new(
                                ErrorCode::LayoutNodeNotFound,
                                "layout update for unknown node",
                            )
                            .with_info("sign", patch.sign)
                            .with_info("node_index", patch.node_index),
                        );
                        continue;
                    }
                    self.owner.update_layout(patch.sign, patch.layout);
                }
            }
            Operation::TasmFinish { operation_id } => self.owner.on_tasm_finish(operation_id),
            Operation::LayoutFinish {
                component_id,
                operation_id,
            } => {
                self.owner.on_layout_finish(component_id, operation_id);
                self.owner.perform_layout();
            }
        }
    }

    pub fn insert_node(&mut self, parent: Sign, child: Sign, index: i32) {
        self.owner.insert(parent, child, index);
    }

    pub fn remove_node(&mut self, parent: Sign, child: Sign) {
        self.owner.remove(parent, child);
    }

    pub fn destroy_node(&mut self, parent: Sign, child: Sign) {
        self.owner.destroy(parent, child);
    }

    pub fn update_props(
        &mut self,
        sign: Sign,
        props: &Props,
        tend_to_flatten: bool,
        listeners: Option<&[EventListener]>,
    ) {
        if self.owner.is_context_free() {
            self.deferred.push(Deferred::Props {
                sign,
                props: props.clone(),
                tend_to_flatten,
                listeners: listeners.map(|l| l.to_vec()),
            });
            return;
        }
        self.owner.update_props(sign, props, tend_to_flatten);
        if let Some(listeners) = listeners {
            self.owner.set_event_listeners(sign, listeners);
        }
    }

    pub fn update_layout(&mut self, sign: Sign, layout: LayoutBox) {
        if self.owner.is_context_free() {
            self.deferred.push(Deferred::Layout(sign, layout));
            return;
        }
        self.owner.update_layout(sign, layout);
    }

    pub fn update_flatten(&mut self, sign: Sign, flatten: bool) {
        if self.owner.is_context_free() {
            self.deferred.push(Deferred::Flatten(sign, flatten));
            return;
        }
        self.owner.update_flatten(sign, flatten);
    }

    pub fn set_context_free(&mut self, free: bool) {
        self.owner.set_context_free(free);
    }

    /// Attaches the context: nodes queued while free are registered, then deferred work is
    /// replayed in arrival order.
    pub fn attach(&mut self) {
        self.owner.attach();
        if self.destroyed {
            self.deferred.clear();
            return;
        }
        let deferred = mem::take(&mut self.deferred);
        if !deferred.is_empty() {
            debug!(count = deferred.len(), "replaying deferred work");
        }
        for work in deferred {
            match work {
                Deferred::Batch(buf) => self.flush_operation_batch(&buf),
                Deferred::Props {
                    sign,
                    props,
                    tend_to_flatten,
                    listeners,
                } => self.update_props(sign, &props, tend_to_flatten, listeners.as_deref()),
                Deferred::Layout(sign, layout) => self.update_layout(sign, layout),
                Deferred::Flatten(sign, flatten) => self.update_flatten(sign, flatten),
            }
        }
    }

    // layout tree

    /// Creates the layout node of a tag and returns its layout flags.
    pub fn create_layout_node(
        &mut self,
        sign: Sign,
        tag: &str,
        props: &Props,
        allow_inline: bool,
    ) -> LayoutNodeType {
        self.owner.create_layout_node(sign, tag, props, allow_inline)
    }

    pub fn update_layout_node_props(&mut self, sign: Sign, props: &Props) {
        self.owner.layout_nodes_mut().update_props(sign, props);
    }

    pub fn insert_layout_node(&mut self, parent: Sign, child: Sign, index: i32) {
        self.owner.layout_nodes_mut().insert(parent, child, index);
    }

    pub fn remove_layout_node(&mut self, parent: Sign, child: Sign) {
        self.owner.layout_nodes_mut().remove(parent, child);
    }

    pub fn destroy_layout_node(&mut self, sign: Sign) {
        self.owner.layout_nodes_mut().destroy(sign);
    }

    /// Stops the bridge: queued creations are dropped and later batches ignored.
    pub fn destroy(&mut self) {
        debug!(pending = self.pending.len(), "destroying painting context");
        self.destroyed = true;
        self.deferred.clear();
        for pending in self.pending.drain(..) {
            if let PendingCreate::Async { task, .. } = pending {
                task.cancel();
            }
        }
        self.owner.shutdown_workers();
    }
}

#[cfg(test)]
use crate::behavior::{Behavior, NodeKind, StandardBehavior};
#[cfg(test)]
use crate::config::PageConfig;
#[cfg(test)]
use crate::operation::{LayoutPatch, OperationBatchBuilder};
#[cfg(test)]
use crate::testing::{harness, FakeBackend, Harness, RecordingErrorHandler};

#[cfg(test)]
fn painting(config: PageConfig) -> (PaintingContext<FakeBackend>, RecordingErrorHandler) {
    let Harness { owner, errors, .. } = harness(config);
    (PaintingContext::new(owner), errors)
}

#[cfg(test)]
fn sync_config() -> PageConfig {
    let mut config = PageConfig::default();
    config.enable_create_view_async = false;
    config
}

#[test]
fn test_flatten_child_splices_into_root() {
    let (mut painting, _) = painting(sync_config());
    painting.enqueue_create_node(NodeInit::new(1, "page"));
    painting.enqueue_create_node(NodeInit::new(2, "view").flatten(true));
    painting.enqueue_create_node(NodeInit::new(3, "text"));
    let batch = OperationBatchBuilder::new()
        .insert(1, 2, 0)
        .insert(2, 3, 0)
        .build();
    painting.flush_operation_batch(&batch);

    let owner = painting.owner();
    assert_eq!(owner.root_sign(), 1);
    assert_eq!(owner.nodes().draw_list(1), vec![3]);
    assert_eq!(owner.backend().subviews[&1], vec![3]);
}

#[test]
fn test_insert_then_remove_leaves_no_trace() {
    let (mut painting, _) = painting(sync_config());
    for init in vec![
        NodeInit::new(1, "page"),
        NodeInit::new(2, "view"),
        NodeInit::new(3, "view").flatten(true),
        NodeInit::new(4, "view"),
    ] {
        painting.enqueue_create_node(init);
    }
    painting.flush_operation_batch(
        &OperationBatchBuilder::new()
            .insert(1, 2, 0)
            .insert(3, 4, 0)
            .build(),
    );
    let before = painting.owner().dump();

    painting.flush_operation_batch(
        &OperationBatchBuilder::new()
            .insert(1, 3, 0)
            .remove(1, 3)
            .build(),
    );
    let owner = painting.owner();
    assert_eq!(owner.dump(), before);
    assert_eq!(owner.nodes().draw_list(1), vec![2]);
    assert_eq!(owner.backend().subviews[&1], vec![2]);
    assert_eq!(owner.node(4).and_then(|n| n.draw_links().parent), None);
    assert_eq!(owner.node(1).map(|n| n.children().to_vec()), Some(vec![2]));
}

#[test]
fn test_unknown_operation_aborts_batch() {
    let (mut painting, errors) = painting(sync_config());
    painting.enqueue_create_node(NodeInit::new(1, "page"));
    painting.enqueue_create_node(NodeInit::new(2, "view"));
    let batch = OperationBatchBuilder::new()
        .int(99)
        .insert(1, 2, 0)
        .build();
    painting.flush_operation_batch(&batch);
    assert!(painting.owner().contains(2), "creations run before the batch");
    assert_eq!(painting.owner().node(1).map(|n| n.children().len()), Some(0));
    let errors = errors.errors();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].code, ErrorCode::OperationBatch);
}

#[test]
fn test_layout_batch_and_lifecycle_ops() {
    let (mut painting, errors) = painting(sync_config());
    painting.enqueue_create_node(NodeInit::new(1, "page"));
    painting.enqueue_create_node(NodeInit::new(2, "view"));
    painting.owner_mut().add_patch_finish_listener(2);
    let patches = vec![
        LayoutPatch {
            sign: 1,
            layout: LayoutBox::with_frame(0., 0., 400., 800.),
            node_index: 0,
        },
        LayoutPatch {
            sign: 2,
            layout: LayoutBox::with_frame(10., 20., 30., 40.),
            node_index: 1,
        },
        LayoutPatch {
            sign: 77,
            layout: LayoutBox::default(),
            node_index: 5,
        },
    ];
    let batch = OperationBatchBuilder::new()
        .insert(1, 2, -1)
        .update_layout_batch(&patches)
        .ready_batch(&[2])
        .tasm_finish(9)
        .layout_finish(0, (2i64 << 32) | 1)
        .build();
    painting.flush_operation_batch(&batch);

    let owner = painting.owner();
    assert_eq!(
        owner.bounding_client_rect(2).map(|r| (r.left(), r.top())),
        Some((10., 20.))
    );
    assert!(!owner.is_first_layout());
    let errors = errors.errors();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].custom_info["node_index"], "5");
}

#[test]
fn test_tag_info_and_memoized_decision() {
    let (mut painting, _) = painting(PageConfig::default());
    let view = painting.tag_info("view");
    assert!(view.create_async());
    assert_eq!(view.layout_type(), LayoutNodeType::COMMON);
    assert!(!painting.tag_info("page").create_async());
    let raw = painting.tag_info("raw-text");
    assert!(!raw.create_async());
    assert!(raw.layout_type().is_virtual());

    painting
        .owner_mut()
        .context_mut()
        .page_config
        .enable_create_view_async = false;
    assert!(painting.tag_info("view").create_async(), "first decision wins");
    assert!(!painting.tag_info("image").create_async());
}

#[test]
fn test_batch_waits_for_attach_while_context_free() {
    use std::time::Duration;

    let (mut painting, errors) = painting(PageConfig::default());
    painting.enqueue_create_node(NodeInit::new(1, "page"));
    painting.flush_pending_creates();
    painting.set_context_free(true);
    assert!(painting.enqueue_create_node(NodeInit::new(2, "view")));
    // Let the worker finish so the node goes through the free-context queue.
    std::thread::sleep(Duration::from_millis(50));
    painting.flush_operation_batch(
        &OperationBatchBuilder::new()
            .insert(1, 2, 0)
            .update_layout_batch(&[LayoutPatch {
                sign: 2,
                layout: LayoutBox::with_frame(5., 5., 10., 10.),
                node_index: 1,
            }])
            .build(),
    );
    painting.update_flatten(2, true);
    assert_eq!(painting.owner().node(1).map(|n| n.children().len()), Some(0));

    painting.attach();
    let owner = painting.owner();
    assert!(!owner.is_context_free());
    assert_eq!(owner.node(1).map(|n| n.children().to_vec()), Some(vec![2]));
    assert_eq!(owner.node(2).map(|n| n.is_flatten()), Some(true));
    assert!(errors.errors().is_empty());
}

/// Blocks on worker threads until released.
#[cfg(test)]
#[derive(Debug)]
struct GatedBehavior {
    started: crossbeam::channel::Sender<()>,
    gate: crossbeam::channel::Receiver<()>,
}

#[cfg(test)]
impl Behavior for GatedBehavior {
    fn kind(&self) -> NodeKind {
        NodeKind::Custom
    }

    fn supports_async_create(&self) -> bool {
        true
    }

    fn create_node(&self, init: &NodeInit) -> Result<crate::node::UiNode, crate::error::CreateError> {
        let on_worker = std::thread::current()
            .name()
            .map_or(false, |n| n.starts_with("lynx-ui-worker"));
        if on_worker {
            let _ = self.started.send(());
            let _ = self.gate.recv_timeout(std::time::Duration::from_secs(5));
        }
        StandardBehavior::new(NodeKind::Custom).create_node(init)
    }
}

#[test]
fn test_async_fallback_matches_sync() {
    use crate::behavior::BehaviorRegistry;
    use crate::config::EnvConfig;
    use crate::context::UiContext;
    use crate::testing::RecordingEmitter;
    use std::time::Duration;

    let (release, gate) = crossbeam::channel::unbounded();
    let (started, worker_started) = crossbeam::channel::unbounded();
    let mut behaviors = BehaviorRegistry::with_builtins();
    behaviors.register("x-gated", GatedBehavior { started, gate });
    let env = EnvConfig {
        create_view_async: true,
        worker_threads: 1,
    };
    let context = UiContext::new(
        PageConfig::default(),
        env,
        Box::new(RecordingEmitter::default()),
    );
    let mut painting = PaintingContext::new(UiOwner::new(context, FakeBackend::default(), behaviors));

    let props = Props::new().with("idSelector", "a");
    painting.enqueue_create_node(NodeInit::new(1, "page"));
    assert!(painting.enqueue_create_node(NodeInit::new(2, "x-gated").props(props.clone())));
    assert!(painting.enqueue_create_node(NodeInit::new(3, "view").props(props.clone())));
    // The single worker is now stuck in the gated job.
    assert!(worker_started.recv_timeout(Duration::from_secs(5)).is_ok());
    painting.flush_operation_batch(
        &OperationBatchBuilder::new()
            .insert(1, 2, 0)
            .insert(1, 3, 1)
            .build(),
    );
    for _ in 0..2 {
        let _ = release.send(());
    }

    assert_eq!(painting.async_status(2), Some(AsyncCreateStatus::CancelFail));
    assert_eq!(painting.async_status(3), Some(AsyncCreateStatus::CancelSuccess));

    let (mut sync, _) = painting_with_sync_reference();
    sync.owner_mut().insert(1, 3, 0);
    let owner = painting.owner();
    let fallback = owner.node(3).expect("fallback creates the node");
    let reference = sync.owner().node(3).expect("sync creation");
    assert_eq!(fallback.tag(), reference.tag());
    assert_eq!(fallback.is_flatten(), reference.is_flatten());
    assert_eq!(fallback.state(), reference.state());
    assert_eq!(owner.node(2).map(|n| n.kind()), Some(NodeKind::Custom));
    assert_eq!(owner.node(1).map(|n| n.children().to_vec()), Some(vec![2, 3]));
}

#[cfg(test)]
fn painting_with_sync_reference() -> (PaintingContext<FakeBackend>, RecordingErrorHandler) {
    let (mut painting, errors) = painting(sync_config());
    painting.enqueue_create_node(NodeInit::new(1, "page"));
    painting.enqueue_create_node(NodeInit::new(3, "view").props(Props::new().with("idSelector", "a")));
    painting.flush_pending_creates();
    (painting, errors)
}

#[test]
fn test_async_done_applies_prepared_node() {
    use std::time::Duration;

    let (mut painting, _) = painting(PageConfig::default());
    painting.enqueue_create_node(NodeInit::new(1, "page"));
    painting.enqueue_create_node(NodeInit::new(2, "image").flatten(true));
    // Wait for the worker without touching the queue.
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while std::time::Instant::now() < deadline {
        let done = painting.pending.iter().all(|p| match p {
            PendingCreate::Async { task, .. } => task.is_done(),
            PendingCreate::Sync(_) => true,
        });
        if done {
            break;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    painting.flush_operation_batch(&OperationBatchBuilder::new().insert(1, 2, 0).build());
    assert_eq!(painting.async_status(2), Some(AsyncCreateStatus::FutureDone));
    assert!(painting.owner().node(2).map_or(false, |n| n.is_flatten()));

    painting.destroy();
    painting.enqueue_create_node(NodeInit::new(3, "view"));
    painting.flush_operation_batch(&OperationBatchBuilder::new().insert(1, 3, 0).build());
    assert!(!painting.owner().contains(3));
}
