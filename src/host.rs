use crossbeam::channel::{self, Receiver, Sender, TryRecvError};
use lynx_ui_core::events::CustomEvent;
use lynx_ui_core::layout::LayoutBox;
use lynx_ui_core::node::EventListener;
use lynx_ui_core::observer::{IntersectionObserver, ObserverOptions};
use lynx_ui_core::{
    Backend, BehaviorRegistry, EnvConfig, EventEmitter, EventHandler, ExposureObserver,
    IntersectionObserverManager, MotionEvent, NodeInit, PageConfig, PaintingContext, Props, Sign,
    TouchDispatcher, UiContext, UiOwner,
};
use serde_json::Value;
use tracing::{debug, trace, warn};

/// Script-side observer calls.
#[derive(Debug, Clone, PartialEq)]
pub enum ObserverCommand {
    Create {
        id: i32,
        component_id: String,
        options: Value,
    },
    RelativeTo {
        id: i32,
        selector: String,
        margins: Value,
    },
    RelativeToViewport {
        id: i32,
        margins: Value,
    },
    RelativeToScreen {
        id: i32,
        margins: Value,
    },
    Observe {
        id: i32,
        selector: String,
        callback_id: i32,
    },
    Disconnect {
        id: i32,
    },
    /// An observer declared through a node's props.
    AttachToNode {
        sign: Sign,
        options: Value,
    },
    DetachFromNode {
        sign: Sign,
    },
}

/// Input to a [`Host`], sent from the engine, script and platform threads.
#[derive(Debug, Clone, PartialEq)]
pub enum HostMessage {
    CreateNode(NodeInit),
    /// An encoded operation batch.
    OperationBatch(Vec<u8>),
    UpdateProps {
        sign: Sign,
        props: Props,
        tend_to_flatten: bool,
        listeners: Option<Vec<EventListener>>,
    },
    UpdateLayout {
        sign: Sign,
        layout: LayoutBox,
    },
    UpdateFlatten {
        sign: Sign,
        flatten: bool,
    },
    Touch(MotionEvent),
    GestureRecognized,
    GestureRecognizedBy(Sign),
    SetContextFree(bool),
    /// Applies nodes and tree work queued while the context was free.
    Attach,
    /// A custom event raised by a platform view; forwarded to the script side.
    CustomEvent(CustomEvent),
    Scroll,
    GlobalLayout,
    /// The root view drew a frame.
    Draw,
    Observer(ObserverCommand),
    StopExposure {
        send_event: bool,
    },
    ResumeExposure,
    /// Tears the painting context down; later batches are ignored.
    Destroy,
}

/// Owns one rendering session and feeds it from a message queue.
pub struct Host<B: Backend> {
    painting: PaintingContext<B>,
    touch: TouchDispatcher,
    observers: IntersectionObserverManager,
    exposure: ExposureObserver,
    sender: Sender<HostMessage>,
    receiver: Receiver<HostMessage>,
}

impl<B: Backend> Host<B> {
    /// Creates a session with the built-in tags.
    ///
    /// Environment switches are read from the process environment; invalid values fall back to
    /// the defaults.
    pub fn new(backend: B, emitter: Box<dyn EventEmitter>, page_config: PageConfig) -> Host<B> {
        let env = EnvConfig::from_env().unwrap_or_else(|err| {
            warn!(%err, "ignoring environment configuration");
            EnvConfig::default()
        });
        let context = UiContext::new(page_config, env, emitter);
        Host::with_context(context, backend, BehaviorRegistry::with_builtins())
    }

    pub fn with_context(context: UiContext, backend: B, behaviors: BehaviorRegistry) -> Host<B> {
        let page_config = context.page_config.clone();
        let touch = TouchDispatcher::new(&page_config);
        let observers = IntersectionObserverManager::new(
            page_config.observer_frame_rate,
            page_config.enable_new_intersection_observer,
        );
        let exposure = ExposureObserver::new(&page_config);
        let owner = UiOwner::new(context, backend, behaviors);
        let (sender, receiver) = channel::unbounded();
        debug!(instance_id = %owner.context().instance_id, "host created");

        Host {
            painting: PaintingContext::new(owner),
            touch,
            observers,
            exposure,
            sender,
            receiver,
        }
    }

    /// A sender for other threads.
    pub fn sender(&self) -> Sender<HostMessage> {
        self.sender.clone()
    }

    pub fn painting(&self) -> &PaintingContext<B> {
        &self.painting
    }

    pub fn painting_mut(&mut self) -> &mut PaintingContext<B> {
        &mut self.painting
    }

    pub fn owner(&self) -> &UiOwner<B> {
        self.painting.owner()
    }

    pub fn touch(&self) -> &TouchDispatcher {
        &self.touch
    }

    pub fn observers(&self) -> &IntersectionObserverManager {
        &self.observers
    }

    pub fn exposure(&self) -> &ExposureObserver {
        &self.exposure
    }

    pub fn add_event_handler(&mut self, handler: EventHandler) {
        self.touch.add_event_handler(handler);
    }

    /// Handles every queued message, then runs timers and observer checks.
    ///
    /// Returns the number of messages handled.
    pub fn poll(&mut self, now_ms: u64) -> usize {
        let mut handled = 0;
        loop {
            match self.receiver.try_recv() {
                Ok(message) => {
                    self.handle_message(message, now_ms);
                    handled += 1;
                }
                Err(TryRecvError::Empty) => break,
                // the host holds a sender itself
                Err(TryRecvError::Disconnected) => unreachable!("host channel disconnected"),
            }
        }

        self.forward_props_changed();
        let owner = self.painting.owner_mut();
        self.touch.poll_timers(owner, now_ms);
        self.observers.request_check(owner, now_ms);
        self.exposure.request_check(owner, now_ms);
        handled
    }

    /// Tells the touch session which nodes changed props since the last touch event.
    fn forward_props_changed(&mut self) {
        for sign in self.painting.owner_mut().take_props_changed() {
            self.touch.on_props_changed(sign);
        }
    }

    fn handle_message(&mut self, message: HostMessage, now_ms: u64) {
        trace!(?message, "host message");
        match message {
            HostMessage::CreateNode(init) => {
                self.painting.enqueue_create_node(init);
            }
            HostMessage::OperationBatch(buf) => {
                self.painting.flush_operation_batch(&buf);
                let owner = self.painting.owner_mut();
                self.observers.on_layout_event(owner);
            }
            HostMessage::UpdateProps {
                sign,
                props,
                tend_to_flatten,
                listeners,
            } => {
                self.painting
                    .update_props(sign, &props, tend_to_flatten, listeners.as_deref());
            }
            HostMessage::UpdateLayout { sign, layout } => {
                self.painting.update_layout(sign, layout);
                let owner = self.painting.owner_mut();
                self.observers.on_layout_event(owner);
            }
            HostMessage::UpdateFlatten { sign, flatten } => {
                self.painting.update_flatten(sign, flatten);
            }
            HostMessage::Touch(event) => {
                self.forward_props_changed();
                let owner = self.painting.owner_mut();
                let consumed = self.touch.consume_slide_event(owner, &event);
                let handled = self.touch.on_touch_event(owner, &event);
                trace!(handled, consumed, "touch dispatched");
            }
            HostMessage::GestureRecognized => {
                self.touch.on_gesture_recognized(self.painting.owner_mut());
            }
            HostMessage::GestureRecognizedBy(sign) => self.touch.on_gesture_recognized_by(sign),
            HostMessage::SetContextFree(free) => self.painting.set_context_free(free),
            HostMessage::Attach => self.painting.attach(),
            HostMessage::CustomEvent(event) => {
                let owner = self.painting.owner_mut();
                owner.context_mut().emitter().send_custom_event(&event);
                self.observers.on_custom_event(owner, &event.name);
            }
            HostMessage::Scroll | HostMessage::GlobalLayout => {
                let owner = self.painting.owner_mut();
                self.observers.request_check(owner, now_ms);
                self.exposure.request_check(owner, now_ms);
            }
            HostMessage::Draw => {
                let owner = self.painting.owner_mut();
                self.observers.on_root_view_draw(owner);
                self.exposure.on_root_view_draw(owner);
            }
            HostMessage::Observer(command) => self.handle_observer_command(command),
            HostMessage::StopExposure { send_event } => {
                self.exposure
                    .stop_exposure(self.painting.owner_mut(), send_event);
            }
            HostMessage::ResumeExposure => self.exposure.resume_exposure(),
            HostMessage::Destroy => {
                self.observers.clear();
                self.painting.destroy();
            }
        }
    }

    fn handle_observer_command(&mut self, command: ObserverCommand) {
        let owner = self.painting.owner_mut();
        match command {
            ObserverCommand::Create {
                id,
                component_id,
                options,
            } => {
                let options = ObserverOptions::from_value(&options);
                let observer = IntersectionObserver::new(owner, id, &component_id, &options);
                self.observers.add_observer(observer);
            }
            ObserverCommand::RelativeTo {
                id,
                selector,
                margins,
            } => match self.observers.observer_mut(id) {
                Some(observer) => observer.relative_to(owner, &selector, &margins),
                None => debug!(id, "relativeTo on unknown observer"),
            },
            ObserverCommand::RelativeToViewport { id, margins } => {
                if let Some(observer) = self.observers.observer_mut(id) {
                    observer.relative_to_viewport(&margins);
                }
            }
            ObserverCommand::RelativeToScreen { id, margins } => {
                if let Some(observer) = self.observers.observer_mut(id) {
                    observer.relative_to_screen(&margins);
                }
            }
            ObserverCommand::Observe {
                id,
                selector,
                callback_id,
            } => match self.observers.observer_mut(id) {
                Some(observer) => observer.observe(owner, &selector, callback_id),
                None => debug!(id, "observe on unknown observer"),
            },
            ObserverCommand::Disconnect { id } => self.observers.disconnect(id),
            ObserverCommand::AttachToNode { sign, options } => {
                self.observers.remove_attached_observer(sign);
                let options = ObserverOptions::from_value(&options);
                let observer = IntersectionObserver::for_node(owner, sign, &options);
                self.observers.add_observer(observer);
            }
            ObserverCommand::DetachFromNode { sign } => {
                self.observers.remove_attached_observer(sign)
            }
        }
    }
}

impl<B: Backend> Drop for Host<B> {
    fn drop(&mut self) {
        if !self.painting.is_destroyed() {
            self.painting.destroy();
        }
    }
}
