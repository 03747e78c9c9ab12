//! Timeline store: a durable, per-key node mapping.
//!
//! Each timeline key is owned by one actor task that applies `add` commands
//! one at a time, so concurrent writers to the same key are serialized and
//! the parent checks in [`TimelineHandle::add`] see a stable view. Reads go
//! straight to storage through [`TimelineRegistry::list`], never start an
//! actor, and may race with writers.
//!
//! ```text
//! pipeline run ──add──▶ TimelineHandle ──mpsc──▶ TimelineActor ──▶ SQLite
//! poller ───────list──▶ TimelineRegistry ───────────────────────▶ SQLite
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use crate::error::{StorageError, StorageResult};
use crate::storage::{HistoryNode, SqliteStorage, Storage};

/// Pending `add` commands buffered per timeline before senders wait.
const MAILBOX_CAPACITY: usize = 64;

/// What an acknowledged `add` did to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    /// The id was new.
    Inserted,
    /// An identical node was already stored.
    Unchanged,
    /// The id existed with different content and was overwritten.
    Replaced,
}

enum Command {
    Add {
        node: HistoryNode,
        reply: oneshot::Sender<StorageResult<AddOutcome>>,
    },
}

/// Lazily spawns and tracks one actor per timeline key.
///
/// Timelines are created implicitly on first use and live for the life of
/// the registry.
#[derive(Clone)]
pub struct TimelineRegistry {
    storage: SqliteStorage,
    actors: Arc<Mutex<HashMap<String, mpsc::Sender<Command>>>>,
}

impl TimelineRegistry {
    /// Create an empty registry over the given storage
    pub fn new(storage: SqliteStorage) -> Self {
        Self {
            storage,
            actors: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Get the handle for a timeline, spawning its actor if needed.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn handle(&self, timeline_id: &str) -> TimelineHandle {
        let mut actors = self.actors.lock().unwrap_or_else(PoisonError::into_inner);

        let sender = match actors.get(timeline_id) {
            Some(sender) if !sender.is_closed() => sender.clone(),
            _ => {
                let (sender, receiver) = mpsc::channel(MAILBOX_CAPACITY);
                let actor = TimelineActor {
                    timeline_id: timeline_id.to_string(),
                    storage: self.storage.clone(),
                    receiver,
                };
                tokio::spawn(actor.run());
                info!(timeline_id = %timeline_id, "Timeline actor started");
                actors.insert(timeline_id.to_string(), sender.clone());
                sender
            }
        };

        TimelineHandle {
            timeline_id: timeline_id.to_string(),
            sender,
        }
    }

    /// Snapshot of every node in a timeline, ordered by creation time.
    ///
    /// Unknown keys read as empty.
    pub async fn list(&self, timeline_id: &str) -> StorageResult<Vec<HistoryNode>> {
        self.storage.list_nodes(timeline_id).await
    }

    /// Number of timelines with a live actor
    pub fn active_timelines(&self) -> usize {
        self.actors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|s| !s.is_closed())
            .count()
    }
}

/// Client side of one timeline.
#[derive(Clone)]
pub struct TimelineHandle {
    timeline_id: String,
    sender: mpsc::Sender<Command>,
}

impl TimelineHandle {
    /// The timeline key this handle addresses
    pub fn timeline_id(&self) -> &str {
        &self.timeline_id
    }

    /// Upsert `node` under its id.
    ///
    /// Returns once the write is durable. Re-adding identical content is a
    /// no-op. Fails with [`StorageError::InvalidNode`] or
    /// [`StorageError::DanglingParent`] when the node would break the
    /// timeline invariants.
    pub async fn add(&self, node: HistoryNode) -> StorageResult<AddOutcome> {
        node.validate()?;

        let (reply, response) = oneshot::channel();
        self.sender
            .send(Command::Add { node, reply })
            .await
            .map_err(|_| self.unavailable())?;

        response.await.map_err(|_| self.unavailable())?
    }

    fn unavailable(&self) -> StorageError {
        StorageError::ActorUnavailable {
            timeline_id: self.timeline_id.clone(),
        }
    }
}

/// Owner of all writes to one timeline key.
struct TimelineActor {
    timeline_id: String,
    storage: SqliteStorage,
    receiver: mpsc::Receiver<Command>,
}

impl TimelineActor {
    async fn run(mut self) {
        while let Some(command) = self.receiver.recv().await {
            match command {
                Command::Add { node, reply } => {
                    let result = self.add(node).await;
                    // Caller may have given up waiting.
                    let _ = reply.send(result);
                }
            }
        }
        debug!(timeline_id = %self.timeline_id, "Timeline actor stopped");
    }

    async fn add(&self, node: HistoryNode) -> StorageResult<AddOutcome> {
        if let Some(parent_id) = &node.parent_id {
            match self.storage.get_node(&self.timeline_id, parent_id).await? {
                None => {
                    return Err(StorageError::DanglingParent {
                        node_id: node.id.clone(),
                        parent_id: parent_id.clone(),
                    });
                }
                Some(parent) if parent.offset >= node.offset => {
                    return Err(StorageError::InvalidNode {
                        message: format!(
                            "node {} has year {} which does not follow parent {} (year {})",
                            node.id, node.offset, parent.id, parent.offset
                        ),
                    });
                }
                Some(_) => {}
            }
        }

        let outcome = match self.storage.get_node(&self.timeline_id, &node.id).await? {
            None => AddOutcome::Inserted,
            Some(existing) if existing == node => return Ok(AddOutcome::Unchanged),
            Some(_) => AddOutcome::Replaced,
        };

        self.storage.upsert_node(&self.timeline_id, &node).await?;

        debug!(
            timeline_id = %self.timeline_id,
            node_id = %node.id,
            year = node.offset,
            outcome = ?outcome,
            "Node stored"
        );

        Ok(outcome)
    }
}
