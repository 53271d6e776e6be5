//! Host glue for the native UI core.
//!
//! A [`Host`] owns one rendering session: the node tree with its painting context, the touch
//! dispatcher and the observers. The layout engine, the script runtime and the platform input
//! thread talk to it through [`HostMessage`]s sent over a channel; the UI thread drains the
//! channel by calling [`Host::poll`] once per frame.
//!
//! ```no_run
//! # use lynx_ui::{Host, HostMessage, PageConfig};
//! # fn run<B: lynx_ui::Backend>(backend: B, emitter: Box<dyn lynx_ui::EventEmitter>) {
//! lynx_ui::logging::init();
//! let mut host = Host::new(backend, emitter, PageConfig::default());
//! let sender = host.sender();
//! std::thread::spawn(move || {
//!     let _ = sender.send(HostMessage::GlobalLayout);
//! });
//! host.poll(16);
//! # }
//! ```

mod host;
pub mod logging;

pub use host::{Host, HostMessage, ObserverCommand};
pub use lynx_ui_core::{
    Backend, BehaviorRegistry, EnvConfig, EventEmitter, EventHandler, MotionAction, MotionEvent,
    NodeInit, OperationBatchBuilder, PageConfig, Props, Rect, Sign, UiContext,
};
