//! Request/response correlation over the player socket
//!
//! Requests carry a monotonically increasing `request_id`. A background reader
//! splits inbound bytes on newlines, routes replies to the waiting caller by
//! id (arrival order does not matter) and rebroadcasts unsolicited events.
//! When the stream closes, every pending caller fails with a transport error.

use super::protocol::{self, Inbound, PlayerEvent, Reply, Request};
use jukebox_common::{Error, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, ReadHalf};
use tokio::sync::{broadcast, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

const EVENT_CAPACITY: usize = 64;

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

#[derive(Default)]
struct Pending {
    closed: bool,
    waiters: HashMap<u64, oneshot::Sender<Reply>>,
}

/// Correlated command channel to one player instance
pub struct IpcChannel {
    writer: Mutex<BoxedWriter>,
    pending: Arc<StdMutex<Pending>>,
    next_id: AtomicU64,
    events: broadcast::Sender<PlayerEvent>,
    reader: JoinHandle<()>,
}

impl IpcChannel {
    /// Take ownership of a connected stream and start the reader task
    pub fn new<S>(stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let pending = Arc::new(StdMutex::new(Pending::default()));
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        let reader = tokio::spawn(read_loop(read_half, Arc::clone(&pending), events.clone()));

        Self {
            writer: Mutex::new(Box::new(write_half)),
            pending,
            next_id: AtomicU64::new(1),
            events,
            reader,
        }
    }

    /// Send `name args...` and wait for the matching reply's data
    pub async fn request(&self, name: &str, args: Vec<Value>) -> Result<Value> {
        let request_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = Request::new(name, args, request_id);
        let frame = request.to_frame()?;

        let (tx, rx) = oneshot::channel();
        {
            let mut pending = lock(&self.pending)?;
            if pending.closed {
                return Err(Error::Transport("Player connection closed".to_string()));
            }
            pending.waiters.insert(request_id, tx);
        }

        debug!("-> {}", frame.trim_end());
        if let Err(e) = self.write_frame(&frame).await {
            lock(&self.pending)?.waiters.remove(&request_id);
            return Err(Error::Transport(format!("Failed to send '{}': {}", name, e)));
        }

        let reply = rx.await.map_err(|_| {
            Error::Transport(format!("Player connection closed while awaiting '{}'", name))
        })?;

        if reply.is_success() {
            Ok(reply.data.unwrap_or(Value::Null))
        } else {
            Err(Error::RemoteCommand {
                command: name.to_string(),
                message: reply.error,
            })
        }
    }

    async fn write_frame(&self, frame: &str) -> std::io::Result<()> {
        let mut writer = self.writer.lock().await;
        writer.write_all(frame.as_bytes()).await?;
        writer.flush().await
    }

    /// Unsolicited player events
    pub fn subscribe_events(&self) -> broadcast::Receiver<PlayerEvent> {
        self.events.subscribe()
    }

    /// Whether the reader has seen the stream close
    pub fn is_closed(&self) -> bool {
        self.pending.lock().map(|p| p.closed).unwrap_or(true)
    }

    /// Requests still waiting for a reply
    pub fn in_flight(&self) -> usize {
        self.pending.lock().map(|p| p.waiters.len()).unwrap_or(0)
    }
}

impl Drop for IpcChannel {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

fn lock(pending: &StdMutex<Pending>) -> Result<std::sync::MutexGuard<'_, Pending>> {
    pending
        .lock()
        .map_err(|_| Error::Internal("IPC pending table poisoned".to_string()))
}

async fn read_loop<S>(
    read_half: ReadHalf<S>,
    pending: Arc<StdMutex<Pending>>,
    events: broadcast::Sender<PlayerEvent>,
) where
    S: AsyncRead + Send,
{
    let mut reader = BufReader::new(read_half);
    let mut frame = Vec::new();

    loop {
        frame.clear();
        match reader.read_until(b'\n', &mut frame).await {
            Ok(0) => {
                debug!("Player socket closed");
                break;
            }
            Ok(_) => {
                // Media metadata may carry invalid UTF-8; only this frame is affected
                let line = String::from_utf8_lossy(&frame);
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                trace!("<- {}", line);
                dispatch(line, &pending, &events);
            }
            Err(e) => {
                warn!("Player socket read failed: {}", e);
                break;
            }
        }
    }

    // Dropping the senders fails every waiting caller
    if let Ok(mut pending) = pending.lock() {
        pending.closed = true;
        pending.waiters.clear();
    }
}

fn dispatch(line: &str, pending: &StdMutex<Pending>, events: &broadcast::Sender<PlayerEvent>) {
    match protocol::decode(line) {
        Ok(Inbound::Reply(reply)) => {
            let waiter = pending
                .lock()
                .ok()
                .and_then(|mut p| p.waiters.remove(&reply.request_id));
            match waiter {
                Some(tx) => {
                    let _ = tx.send(reply);
                }
                None => debug!("Reply for unknown request {}", reply.request_id),
            }
        }
        Ok(Inbound::Event(event)) => {
            // No subscribers is fine
            let _ = events.send(event);
        }
        Ok(Inbound::Other(value)) => debug!("Ignoring player message: {}", value),
        Err(e) => warn!("Undecodable player line {:?}: {}", line, e),
    }
}
