//! The per-session context.

use crate::config::{EnvConfig, PageConfig};
use crate::error::{ErrorHandler, LogErrorHandler, LynxError};
use crate::events::EventEmitter;
use crate::sign::InstanceId;
use tracing::debug;

/// State shared by every component of one rendering session.
///
/// Created together with the UI owner and dropped with it.
pub struct UiContext {
    pub instance_id: InstanceId,
    pub page_config: PageConfig,
    pub env: EnvConfig,
    pub(crate) emitter: Box<dyn EventEmitter>,
    error_handler: Box<dyn ErrorHandler>,
}

impl UiContext {
    pub fn new(page_config: PageConfig, env: EnvConfig, emitter: Box<dyn EventEmitter>) -> UiContext {
        let instance_id = InstanceId::new();
        debug!(%instance_id, "creating ui context");
        UiContext {
            instance_id,
            page_config,
            env,
            emitter,
            error_handler: Box::new(LogErrorHandler),
        }
    }

    pub fn with_error_handler(mut self, handler: Box<dyn ErrorHandler>) -> UiContext {
        self.error_handler = handler;
        self
    }

    /// Reports a non-fatal error.
    pub fn handle_error(&mut self, err: LynxError) {
        let err = err.with_info("instance_id", self.instance_id);
        self.error_handler.handle_error(err);
    }

    pub fn emitter(&mut self) -> &mut dyn EventEmitter {
        &mut *self.emitter
    }
}
