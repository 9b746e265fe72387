use courier_worker::NotificationQueue;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub queue: Arc<NotificationQueue>,
    pub courier_env: String,
}

#[derive(Debug, Clone)]
pub struct RequestId(pub String);
