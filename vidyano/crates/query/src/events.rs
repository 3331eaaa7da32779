use std::ops::Range;

use protocol::Notification;
use tokio::sync::broadcast;

const EVENT_CAPACITY: usize = 256;

/// Change notifications for views bound to a query. Receivers that fall
/// behind lose the oldest events.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryEvent {
    SearchStarted { generation: u64 },
    SearchCompleted { generation: u64, total_items: u64 },
    SearchFailed { generation: u64, message: String },
    ItemsLoaded { generation: u64, range: Range<usize> },
    DistinctsRefreshed { column: String },
    SelectionChanged { selected_count: u64 },
    GroupCollapsed { name: String, collapsed: bool },
    ItemMoved { from: usize, to: usize },
    Notification(Notification),
}

pub(crate) struct EventBus {
    tx: broadcast::Sender<QueryEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<QueryEvent> {
        self.tx.subscribe()
    }

    /// Sending without subscribers is not an error.
    pub fn emit(&self, event: QueryEvent) {
        let _ = self.tx.send(event);
    }
}
