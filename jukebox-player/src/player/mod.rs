//! External player control
//!
//! [`PlayerControl`] is the seam the orchestrator drives. Implementations only
//! provide [`send_command`](PlayerControl::send_command); every other
//! operation is a thin wrapper over it.

pub mod driver;
pub mod ipc;
pub mod protocol;

use async_trait::async_trait;
use jukebox_common::{Error, Result};
use serde_json::{json, Value};
use std::fmt;
use std::time::Duration;

pub use driver::MpvDriver;
pub use ipc::IpcChannel;

/// How `loadfile` places a file in the player's playlist
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadMode {
    /// Stop the current file and play this one
    Replace,
    /// Append to the playlist
    Append,
    /// Append, starting playback if idle
    AppendPlay,
}

impl LoadMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoadMode::Replace => "replace",
            LoadMode::Append => "append",
            LoadMode::AppendPlay => "append-play",
        }
    }
}

impl fmt::Display for LoadMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[async_trait]
pub trait PlayerControl: Send + Sync {
    /// Issue one command and return the reply's data
    async fn send_command(&self, name: &str, args: Vec<Value>) -> Result<Value>;

    async fn load(&self, target: &str, mode: LoadMode) -> Result<()> {
        self.send_command("loadfile", vec![json!(target), json!(mode.as_str())])
            .await
            .map(|_| ())
    }

    async fn get_property(&self, name: &str) -> Result<Value> {
        self.send_command("get_property", vec![json!(name)]).await
    }

    async fn set_property(&self, name: &str, value: Value) -> Result<()> {
        self.send_command("set_property", vec![json!(name), value])
            .await
            .map(|_| ())
    }

    async fn play(&self) -> Result<()> {
        self.set_property("pause", json!(false)).await
    }

    async fn pause(&self) -> Result<()> {
        self.set_property("pause", json!(true)).await
    }

    async fn fullscreen(&self) -> Result<()> {
        self.set_property("fullscreen", json!(true)).await
    }

    /// Show `text` on the player's OSD for `duration`
    async fn osd_message(&self, text: &str, duration: Duration) -> Result<()> {
        self.send_command(
            "show-text",
            vec![json!(text), json!(duration.as_millis() as u64)],
        )
        .await
        .map(|_| ())
    }

    async fn script_message(&self, args: &[&str]) -> Result<()> {
        let args = args.iter().map(|a| json!(a)).collect();
        self.send_command("script-message", args).await.map(|_| ())
    }

    async fn is_paused(&self) -> Result<bool> {
        let value = self.get_property("pause").await?;
        as_bool("pause", value)
    }

    /// True once the playlist has run out
    async fn is_idle(&self) -> Result<bool> {
        let value = self.get_property("idle-active").await?;
        as_bool("idle-active", value)
    }
}

fn as_bool(property: &str, value: Value) -> Result<bool> {
    value.as_bool().ok_or_else(|| Error::RemoteCommand {
        command: "get_property".to_string(),
        message: format!("'{}' is not a boolean: {}", property, value),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Records commands and answers with a canned value
    struct Recorder {
        sent: Mutex<Vec<(String, Vec<Value>)>>,
        answer: Value,
    }

    #[async_trait]
    impl PlayerControl for Recorder {
        async fn send_command(&self, name: &str, args: Vec<Value>) -> Result<Value> {
            self.sent.lock().unwrap().push((name.to_string(), args));
            Ok(self.answer.clone())
        }
    }

    fn recorder(answer: Value) -> Recorder {
        Recorder {
            sent: Mutex::new(Vec::new()),
            answer,
        }
    }

    #[tokio::test]
    async fn test_derived_commands() {
        let player = recorder(Value::Null);
        player.load("/tmp/preview.jpg", LoadMode::Replace).await.unwrap();
        player.pause().await.unwrap();
        player.osd_message("Starting in 3", Duration::from_millis(250)).await.unwrap();
        player.script_message(&["osc-idlescreen", "no"]).await.unwrap();

        let sent = player.sent.lock().unwrap();
        assert_eq!(sent[0], ("loadfile".to_string(), vec![json!("/tmp/preview.jpg"), json!("replace")]));
        assert_eq!(sent[1], ("set_property".to_string(), vec![json!("pause"), json!(true)]));
        assert_eq!(sent[2], ("show-text".to_string(), vec![json!("Starting in 3"), json!(250)]));
        assert_eq!(sent[3], ("script-message".to_string(), vec![json!("osc-idlescreen"), json!("no")]));
    }

    #[tokio::test]
    async fn test_boolean_properties() {
        assert!(recorder(json!(true)).is_idle().await.unwrap());
        assert!(!recorder(json!(false)).is_paused().await.unwrap());
        assert!(matches!(
            recorder(json!("yes")).is_paused().await,
            Err(Error::RemoteCommand { .. })
        ));
    }

    #[test]
    fn test_load_mode_strings() {
        assert_eq!(LoadMode::AppendPlay.to_string(), "append-play");
        assert_eq!(LoadMode::Append.as_str(), "append");
    }
}
