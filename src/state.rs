use std::sync::Arc;

use crate::config::Config;
use crate::ws::dispatcher::SessionDispatcher;

/// Shared handles given to every route.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub dispatcher: Arc<SessionDispatcher>,
}
