use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::fragment::FragmentTable;
use crate::frame::Frame;
use crate::session::SessionTable;

/// State shared between the control-reader/writer tasks and every public
/// listener/connection task spawned for the current control session.
/// Confined to the `Established` lifetime of one control session: a fresh
/// `Shared` is built on every successful AUTH and dropped at teardown.
pub struct Shared {
    pub table: Mutex<SessionTable>,
    pub fragments: Mutex<FragmentTable>,
    pub to_control: mpsc::Sender<Frame>,
    pub max_packet_size: usize,
    pub connection_tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Shared {
    pub fn new(to_control: mpsc::Sender<Frame>, max_packet_size: usize) -> Self {
        Self {
            table: Mutex::new(SessionTable::new()),
            fragments: Mutex::new(FragmentTable::new()),
            to_control,
            max_packet_size,
            connection_tasks: Mutex::new(Vec::new()),
        }
    }

    /// Registers a spawned connection task, pruning already-finished ones
    /// first so a session handling many short-lived public connections
    /// doesn't grow this vec for the life of the control session.
    pub async fn push_task(&self, handle: JoinHandle<()>) {
        let mut tasks = self.connection_tasks.lock().await;
        tasks.retain(|t| !t.is_finished());
        tasks.push(handle);
    }

    /// Aborts every public-connection task spawned under this control
    /// session and clears the session/fragment tables (§4.3 TearingDown).
    pub async fn teardown(&self) {
        let mut tasks = self.connection_tasks.lock().await;
        for task in tasks.drain(..) {
            task.abort();
        }
        self.table.lock().await.clear();
        *self.fragments.lock().await = FragmentTable::new();
    }
}
