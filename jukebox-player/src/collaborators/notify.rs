//! Start prompts
//!
//! When an entry is staged the orchestrator opens a prompt so that its owner
//! (or a privileged user) can start playback early. Requests arriving on the
//! prompt are filtered by identity before they can win the start gate.

use async_trait::async_trait;
use jukebox_common::db::QueueEntry;
use jukebox_common::events::StartTrigger;
use jukebox_common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info};

const REQUEST_CAPACITY: usize = 16;

/// Someone asking for the staged entry to start
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartRequest {
    /// Entry the requester saw; `None` means whatever is staged
    pub entry_id: Option<i64>,
    pub requested_by: String,
    pub privileged: bool,
}

impl StartRequest {
    /// Owner or privileged, and aimed at `entry`
    pub fn authorizes(&self, entry: &QueueEntry) -> bool {
        let targets_entry = self.entry_id.map_or(true, |id| id == entry.id);
        targets_entry && (self.privileged || self.requested_by == entry.user_id)
    }
}

/// Open prompt for one staged entry
pub struct StartPrompt {
    entry: QueueEntry,
    requests: broadcast::Receiver<StartRequest>,
}

impl StartPrompt {
    pub fn new(entry: QueueEntry, requests: broadcast::Receiver<StartRequest>) -> Self {
        Self { entry, requests }
    }

    /// Next request authorized to start this entry
    ///
    /// Unauthorized requests are skipped. Fails once the channel closes.
    pub async fn authorized(&mut self) -> Result<StartRequest> {
        loop {
            match self.requests.recv().await {
                Ok(request) if request.authorizes(&self.entry) => return Ok(request),
                Ok(request) => {
                    debug!(
                        "Ignoring start request from {} for {}",
                        request.requested_by, self.entry.slug
                    );
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    debug!("Start prompt lagged by {} requests", n);
                }
                Err(broadcast::error::RecvError::Closed) => {
                    return Err(Error::Transport("Start request channel closed".to_string()));
                }
            }
        }
    }
}

/// Where start prompts are posted
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    /// Announce `entry` and start listening for start requests
    async fn open_prompt(&self, entry: &QueueEntry, timeout: Duration) -> Result<StartPrompt>;

    /// Retire the prompt once the gate has resolved
    async fn close_prompt(&self, entry: &QueueEntry, trigger: &StartTrigger) -> Result<()>;
}

/// In-process channel fed by the HTTP surface
pub struct LocalStartChannel {
    requests: broadcast::Sender<StartRequest>,
    awaiting: RwLock<Option<QueueEntry>>,
}

impl LocalStartChannel {
    pub fn new() -> Self {
        let (requests, _) = broadcast::channel(REQUEST_CAPACITY);
        Self {
            requests,
            awaiting: RwLock::new(None),
        }
    }

    /// Entry currently waiting at the start gate
    pub async fn awaiting(&self) -> Option<QueueEntry> {
        self.awaiting.read().await.clone()
    }

    /// Deliver a start request to the open prompt
    pub async fn request_start(&self, request: StartRequest) -> Result<()> {
        let awaiting = self
            .awaiting()
            .await
            .ok_or_else(|| Error::InvalidState("No entry is waiting to start".to_string()))?;
        if let Some(id) = request.entry_id.filter(|id| *id != awaiting.id) {
            return Err(Error::InvalidState(format!(
                "Entry {} is not waiting to start",
                id
            )));
        }

        self.requests
            .send(request)
            .map_err(|_| Error::InvalidState("Start prompt is no longer listening".to_string()))?;
        Ok(())
    }
}

impl Default for LocalStartChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NotificationChannel for LocalStartChannel {
    async fn open_prompt(&self, entry: &QueueEntry, timeout: Duration) -> Result<StartPrompt> {
        *self.awaiting.write().await = Some(entry.clone());
        info!(
            "{}: '{}' ({}) is ready, starting within {}s",
            entry.user_id,
            entry.title,
            entry.slug,
            timeout.as_secs()
        );
        Ok(StartPrompt::new(entry.clone(), self.requests.subscribe()))
    }

    async fn close_prompt(&self, entry: &QueueEntry, trigger: &StartTrigger) -> Result<()> {
        let mut awaiting = self.awaiting.write().await;
        if awaiting.as_ref().map(|e| e.id) == Some(entry.id) {
            *awaiting = None;
        }
        debug!("Closed start prompt for {} ({:?})", entry.slug, trigger);
        Ok(())
    }
}
