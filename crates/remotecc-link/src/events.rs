use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use remotecc_protocol::{ServerMessage, StateUpdate};

/// Everything a link reports to its listeners.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    Connected { message: String },
    State(StateUpdate),
    Output { data: String },
    Exit {
        exit_code: Option<u32>,
        signal: Option<String>,
    },
    Error { message: String },
    Disconnected { code: Option<u16>, reason: String },
    Reconnecting { attempt: u32, delay: Duration },
    GaveUp { attempts: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Connected,
    State,
    Output,
    Exit,
    Error,
    Disconnected,
    Reconnecting,
    GaveUp,
}

impl LinkEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            LinkEvent::Connected { .. } => EventKind::Connected,
            LinkEvent::State(_) => EventKind::State,
            LinkEvent::Output { .. } => EventKind::Output,
            LinkEvent::Exit { .. } => EventKind::Exit,
            LinkEvent::Error { .. } => EventKind::Error,
            LinkEvent::Disconnected { .. } => EventKind::Disconnected,
            LinkEvent::Reconnecting { .. } => EventKind::Reconnecting,
            LinkEvent::GaveUp { .. } => EventKind::GaveUp,
        }
    }
}

impl From<ServerMessage> for LinkEvent {
    fn from(msg: ServerMessage) -> Self {
        match msg {
            ServerMessage::Connected { message } => LinkEvent::Connected { message },
            ServerMessage::State(update) => LinkEvent::State(update),
            ServerMessage::Output { data } => LinkEvent::Output { data },
            ServerMessage::Exit { exit_code, signal } => LinkEvent::Exit { exit_code, signal },
            ServerMessage::Error { message } => LinkEvent::Error { message },
        }
    }
}

pub type ListenerId = u64;

type Callback = Arc<dyn Fn(&LinkEvent) + Send + Sync>;

#[derive(Default)]
struct Table {
    next_id: ListenerId,
    by_kind: HashMap<EventKind, Vec<(ListenerId, Callback)>>,
}

/// Subscribers keyed by event kind.
///
/// Dispatch works on a snapshot taken before the first callback runs, so a
/// callback may add or remove listeners freely; changes apply from the next
/// event on.
#[derive(Default)]
pub struct Listeners {
    table: Mutex<Table>,
}

impl Listeners {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on<F>(&self, kind: EventKind, callback: F) -> ListenerId
    where
        F: Fn(&LinkEvent) + Send + Sync + 'static,
    {
        let mut table = self.lock();
        table.next_id += 1;
        let id = table.next_id;
        table
            .by_kind
            .entry(kind)
            .or_default()
            .push((id, Arc::new(callback)));
        id
    }

    pub fn off(&self, id: ListenerId) -> bool {
        let mut table = self.lock();
        let mut removed = false;
        for entries in table.by_kind.values_mut() {
            let before = entries.len();
            entries.retain(|(entry, _)| *entry != id);
            removed |= entries.len() != before;
        }
        removed
    }

    pub fn emit(&self, event: &LinkEvent) {
        let snapshot: Vec<Callback> = self
            .lock()
            .by_kind
            .get(&event.kind())
            .map(|entries| entries.iter().map(|(_, cb)| Arc::clone(cb)).collect())
            .unwrap_or_default();
        for callback in snapshot {
            callback(event);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Table> {
        self.table.lock().unwrap_or_else(|e| e.into_inner())
    }
}
