use std::sync::Arc;

use services::Services;

use crate::realtime::RoomHub;

/// Shared by every handler and socket task.
#[derive(Clone)]
pub struct AppState {
    pub services: Services,
    pub hub: Arc<RoomHub>,
}

impl AppState {
    pub fn new(services: Services, hub: Arc<RoomHub>) -> Self {
        Self { services, hub }
    }
}
