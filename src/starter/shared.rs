use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::config::StarterConfig;
use crate::fragment::FragmentTable;
use crate::frame::Frame;
use crate::session::SessionTable;

/// State shared between the control-reader/writer tasks and every backend
/// connection task spawned for the current control session. Scoped to one
/// `Established` session the same way [`crate::redirector::shared::Shared`]
/// is; a fresh id namespace starts with a fresh `Shared` on every
/// reconnect (§4.4, §8 "fresh id namespace").
pub struct Shared {
    pub table: Mutex<SessionTable>,
    pub fragments: Mutex<FragmentTable>,
    pub to_control: mpsc::Sender<Frame>,
    pub max_packet_size: usize,
    pub connection_tasks: Mutex<Vec<JoinHandle<()>>>,
    pub config: StarterConfig,
}

impl Shared {
    pub fn new(to_control: mpsc::Sender<Frame>, max_packet_size: usize, config: StarterConfig) -> Self {
        Self {
            table: Mutex::new(SessionTable::new()),
            fragments: Mutex::new(FragmentTable::new()),
            to_control,
            max_packet_size,
            connection_tasks: Mutex::new(Vec::new()),
            config,
        }
    }

    /// Registers a spawned connection task, pruning already-finished ones
    /// first so a session handling many short-lived backend connections
    /// doesn't grow this vec for the life of the control session.
    pub async fn push_task(&self, handle: JoinHandle<()>) {
        let mut tasks = self.connection_tasks.lock().await;
        tasks.retain(|t| !t.is_finished());
        tasks.push(handle);
    }

    /// "While disconnected, all existing backend sockets are destroyed"
    /// (§4.4): abort every backend task and clear both tables.
    pub async fn teardown(&self) {
        let mut tasks = self.connection_tasks.lock().await;
        for task in tasks.drain(..) {
            task.abort();
        }
        self.table.lock().await.clear();
        *self.fragments.lock().await = FragmentTable::new();
    }
}
