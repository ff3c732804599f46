use std::sync::Arc;
use std::time::Instant;

use crate::config::Settings;
use crate::notification::NotificationDispatcher;

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub dispatcher: Arc<NotificationDispatcher>,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(settings: Settings, dispatcher: NotificationDispatcher) -> Self {
        Self {
            settings: Arc::new(settings),
            dispatcher: Arc::new(dispatcher),
            start_time: Instant::now(),
        }
    }
}
