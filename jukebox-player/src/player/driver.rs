//! Player process lifecycle
//!
//! Spawns the player in idle fullscreen mode listening on an IPC socket,
//! connects with bounded retry, and watches the process. When the process
//! exits the connection is discarded and the exit signal fires.

use super::ipc::IpcChannel;
use super::PlayerControl;
use async_trait::async_trait;
use jukebox_common::{time, AppConfig, Error, Result};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::sync::{watch, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Launch and connection settings
#[derive(Debug, Clone)]
pub struct DriverConfig {
    pub executable: String,
    pub ipc_path: PathBuf,
    pub screen_number: u32,
    pub connect_retries: u32,
    pub retry_delay: Duration,
}

impl From<&AppConfig> for DriverConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            executable: config.mpv_path.clone(),
            ipc_path: config.ipc_path(),
            screen_number: config.screen_number,
            connect_retries: config.socket_connect_retries,
            retry_delay: time::millis_to_duration(config.socket_retry_delay_ms),
        }
    }
}

impl DriverConfig {
    fn args(&self) -> Vec<String> {
        vec![
            "--idle".to_string(),
            "--force-window".to_string(),
            "--fs".to_string(),
            format!("--fs-screen={}", self.screen_number),
            format!("--input-ipc-server={}", self.ipc_path.display()),
        ]
    }
}

/// Owner of one player process and its command channel
pub struct MpvDriver {
    config: DriverConfig,
    channel: Arc<RwLock<Option<Arc<IpcChannel>>>>,
    exited_tx: watch::Sender<bool>,
    exited_rx: watch::Receiver<bool>,
    cancel: CancellationToken,
}

impl MpvDriver {
    pub fn new(config: DriverConfig) -> Self {
        let (exited_tx, exited_rx) = watch::channel(false);
        Self {
            config,
            channel: Arc::new(RwLock::new(None)),
            exited_tx,
            exited_rx,
            cancel: CancellationToken::new(),
        }
    }

    /// Driver over an already connected channel, with no process to manage
    pub fn attached(channel: IpcChannel) -> Self {
        let driver = Self::new(DriverConfig {
            executable: String::new(),
            ipc_path: PathBuf::new(),
            screen_number: 0,
            connect_retries: 1,
            retry_delay: Duration::ZERO,
        });
        if let Ok(mut slot) = driver.channel.try_write() {
            *slot = Some(Arc::new(channel));
        }
        driver
    }

    /// Spawn the player (if not already running) and connect to it
    pub async fn start(&self) -> Result<()> {
        if self.is_connected().await {
            debug!("Player already running");
            return Ok(());
        }

        info!(
            "Launching player: {} {}",
            self.config.executable,
            self.config.args().join(" ")
        );
        let child = Command::new(&self.config.executable)
            .args(self.config.args())
            .stdin(std::process::Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                Error::Transport(format!(
                    "Failed to launch '{}': {}",
                    self.config.executable, e
                ))
            })?;

        self.exited_tx.send_replace(false);
        tokio::spawn(watch_process(
            child,
            Arc::clone(&self.channel),
            self.exited_tx.clone(),
            self.cancel.clone(),
        ));

        let channel = connect_with_retry(
            &self.config.ipc_path,
            self.config.connect_retries,
            self.config.retry_delay,
        )
        .await?;
        *self.channel.write().await = Some(Arc::new(channel));

        info!("Connected to player at {}", self.config.ipc_path.display());
        Ok(())
    }

    /// Fires `true` when the player process exits
    pub fn exit_signal(&self) -> watch::Receiver<bool> {
        self.exited_rx.clone()
    }

    pub async fn is_connected(&self) -> bool {
        self.channel
            .read()
            .await
            .as_ref()
            .map_or(false, |c| !c.is_closed())
    }

    /// Current channel, for event subscriptions
    pub async fn channel(&self) -> Option<Arc<IpcChannel>> {
        self.channel.read().await.clone()
    }

    /// Kill the player process if this driver spawned one
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

#[async_trait]
impl PlayerControl for MpvDriver {
    async fn send_command(&self, name: &str, args: Vec<Value>) -> Result<Value> {
        let channel = self
            .channel()
            .await
            .ok_or_else(|| Error::Transport("Player is not connected".to_string()))?;
        channel.request(name, args).await
    }
}

impl Drop for MpvDriver {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn watch_process(
    mut child: Child,
    channel: Arc<RwLock<Option<Arc<IpcChannel>>>>,
    exited: watch::Sender<bool>,
    cancel: CancellationToken,
) {
    tokio::select! {
        status = child.wait() => match status {
            Ok(status) => warn!("Player exited with {}", status),
            Err(e) => error!("Failed waiting on player process: {}", e),
        },
        _ = cancel.cancelled() => {
            info!("Stopping player");
            if let Err(e) = child.kill().await {
                warn!("Failed to kill player: {}", e);
            }
        }
    }

    channel.write().await.take();
    exited.send_replace(true);
}

async fn connect_with_retry(path: &Path, retries: u32, delay: Duration) -> Result<IpcChannel> {
    let mut last_error = None;

    for attempt in 1..=retries {
        match connect(path).await {
            Ok(channel) => return Ok(channel),
            Err(e) => {
                debug!(
                    "Connect attempt {}/{} to {} failed: {}",
                    attempt,
                    retries,
                    path.display(),
                    e
                );
                last_error = Some(e);
                if attempt < retries {
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    Err(Error::Transport(format!(
        "Could not connect to {} after {} attempts: {}",
        path.display(),
        retries,
        last_error.map_or_else(|| "no attempts made".to_string(), |e| e.to_string())
    )))
}

#[cfg(unix)]
async fn connect(path: &Path) -> std::io::Result<IpcChannel> {
    let stream = tokio::net::UnixStream::connect(path).await?;
    Ok(IpcChannel::new(stream))
}

#[cfg(windows)]
async fn connect(path: &Path) -> std::io::Result<IpcChannel> {
    let pipe = tokio::net::windows::named_pipe::ClientOptions::new().open(path)?;
    Ok(IpcChannel::new(pipe))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

    fn config(path: PathBuf) -> DriverConfig {
        DriverConfig {
            executable: "mpv".to_string(),
            ipc_path: path,
            screen_number: 1,
            connect_retries: 3,
            retry_delay: Duration::from_millis(10),
        }
    }

    #[test]
    fn test_launch_args() {
        let args = config(PathBuf::from("/tmp/sock")).args();
        assert!(args.contains(&"--idle".to_string()));
        assert!(args.contains(&"--fs-screen=1".to_string()));
        assert!(args.contains(&"--input-ipc-server=/tmp/sock".to_string()));
    }

    #[test]
    fn test_config_from_app_config() {
        let app = AppConfig::default();
        let driver = DriverConfig::from(&app);
        assert_eq!(driver.executable, "mpv");
        assert_eq!(driver.connect_retries, 5);
        assert_eq!(driver.retry_delay, Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_connect_retries_exhausted() {
        let dir = tempfile::tempdir().unwrap();
        let result = connect_with_retry(&dir.path().join("missing.sock"), 2, Duration::from_millis(1)).await;
        assert!(matches!(result, Err(Error::Transport(_))));
    }

    #[tokio::test]
    async fn test_unconnected_driver_rejects_commands() {
        let driver = MpvDriver::new(config(PathBuf::from("/nonexistent")));
        assert!(!driver.is_connected().await);
        assert!(matches!(driver.pause().await, Err(Error::Transport(_))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_connect_over_unix_socket() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("player.sock");
        let listener = tokio::net::UnixListener::bind(&path).unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (read, mut write) = tokio::io::split(stream);
            let mut lines = BufReader::new(read).lines();
            let line = lines.next_line().await.unwrap().unwrap();
            let request: Value = serde_json::from_str(&line).unwrap();
            assert_eq!(request["command"], json!(["get_property", "idle-active"]));
            write
                .write_all(b"{\"request_id\":1,\"error\":\"success\",\"data\":true}\n")
                .await
                .unwrap();
            // Keep the socket open until the client is done
            let _ = lines.next_line().await;
        });

        let channel = connect_with_retry(&path, 3, Duration::from_millis(10)).await.unwrap();
        let driver = MpvDriver::attached(channel);
        assert!(driver.is_connected().await);
        assert!(driver.is_idle().await.unwrap());

        drop(driver);
        server.await.unwrap();
    }
}
