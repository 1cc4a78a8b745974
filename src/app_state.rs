use std::sync::Arc;

use crate::services::queue::ReceiptQueue;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub queue: Arc<ReceiptQueue>,
}

impl AppState {
    pub fn new(queue: ReceiptQueue) -> Self {
        Self {
            queue: Arc::new(queue),
        }
    }
}
