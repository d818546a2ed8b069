use std::sync::Arc;

use application::PushHub;

#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<PushHub>,
}

impl AppState {
    pub fn new(hub: Arc<PushHub>) -> Self {
        Self { hub }
    }
}
