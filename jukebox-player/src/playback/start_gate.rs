//! Start gate race
//!
//! Three branches compete to start a staged entry:
//! an authorized start request, the timeout, and the player being unpaused
//! directly. A countdown runs beside them on the player OSD. All four live in
//! one `select!`; whichever branch completes first wins and the rest are
//! dropped, which cancels their timers and pending reads.

use crate::collaborators::StartPrompt;
use crate::player::PlayerControl;
use jukebox_common::events::StartTrigger;
use jukebox_common::{time, AppConfig, Result};
use std::convert::Infallible;
use std::time::Duration;
use tokio::time::{interval, sleep_until, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Gate timing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateConfig {
    pub timeout: Duration,
    pub unpause_poll: Duration,
    pub countdown_interval: Duration,
}

impl From<&AppConfig> for GateConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            timeout: config.playback_timeout(),
            unpause_poll: time::millis_to_duration(config.unpause_poll_ms),
            countdown_interval: time::millis_to_duration(config.countdown_ms),
        }
    }
}

/// Wait for the first start trigger
///
/// `prompt` is `None` when the notification channel could not be opened; the
/// gate then resolves on timeout or unpause only. A failed poll of the player
/// is returned as an error.
pub async fn race<P>(player: &P, prompt: Option<StartPrompt>, config: GateConfig) -> Result<StartTrigger>
where
    P: PlayerControl + ?Sized,
{
    let deadline = Instant::now() + config.timeout;

    let trigger = tokio::select! {
        request = requested(prompt) => StartTrigger::Requested { user_id: request },
        _ = sleep_until(deadline) => StartTrigger::Timeout,
        unpaused = unpaused(player, config.unpause_poll) => {
            unpaused?;
            StartTrigger::Unpaused
        }
        never = countdown(player, deadline, config.countdown_interval) => match never {},
    };

    info!("Start gate resolved: {:?}", trigger);
    Ok(trigger)
}

/// Resolves with the requester's id; never resolves if the channel fails
async fn requested(prompt: Option<StartPrompt>) -> String {
    let Some(mut prompt) = prompt else {
        return std::future::pending().await;
    };
    match prompt.authorized().await {
        Ok(request) => request.requested_by,
        Err(e) => {
            warn!("Start requests unavailable, waiting for timeout: {}", e);
            std::future::pending().await
        }
    }
}

async fn unpaused<P>(player: &P, every: Duration) -> Result<()>
where
    P: PlayerControl + ?Sized,
{
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        if !player.is_paused().await? {
            return Ok(());
        }
    }
}

async fn countdown<P>(player: &P, deadline: Instant, every: Duration) -> Infallible
where
    P: PlayerControl + ?Sized,
{
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return std::future::pending().await;
        }
        let text = countdown_text(remaining);
        if let Err(e) = player.osd_message(&text, every).await {
            debug!("Countdown update failed: {}", e);
        }
    }
}

fn countdown_text(remaining: Duration) -> String {
    format!("Starting in {} seconds", remaining.as_secs_f64().round() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{LocalStartChannel, NotificationChannel, StartRequest};
    use async_trait::async_trait;
    use chrono::Utc;
    use jukebox_common::db::QueueEntry;
    use jukebox_common::Error;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Player that stays paused until told otherwise
    #[derive(Default)]
    struct GatePlayer {
        unpaused: AtomicBool,
        broken: AtomicBool,
        osd_messages: AtomicUsize,
    }

    #[async_trait]
    impl PlayerControl for GatePlayer {
        async fn send_command(&self, name: &str, args: Vec<Value>) -> Result<Value> {
            match name {
                "get_property" if self.broken.load(Ordering::SeqCst) => Err(Error::RemoteCommand {
                    command: name.to_string(),
                    message: "property unavailable".to_string(),
                }),
                "get_property" => Ok(json!(!self.unpaused.load(Ordering::SeqCst))),
                "show-text" => {
                    self.osd_messages.fetch_add(1, Ordering::SeqCst);
                    Ok(Value::Null)
                }
                _ => panic!("unexpected command {} {:?}", name, args),
            }
        }
    }

    fn config() -> GateConfig {
        GateConfig {
            timeout: Duration::from_secs(60),
            unpause_poll: Duration::from_millis(200),
            countdown_interval: Duration::from_millis(250),
        }
    }

    fn entry() -> QueueEntry {
        QueueEntry {
            id: 1,
            user_id: "alice".to_string(),
            position: -1,
            slug: "owl".to_string(),
            queued_at: Utc::now(),
            dequeued_at: Some(Utc::now()),
            started_at: None,
            url: "https://example.com/a".to_string(),
            title: "A".to_string(),
            duration: 10,
            thumbnail: String::new(),
        }
    }

    fn start(by: &str) -> StartRequest {
        StartRequest {
            entry_id: None,
            requested_by: by.to_string(),
            privileged: false,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_fires_exactly_at_boundary() {
        let player = GatePlayer::default();
        let begin = Instant::now();

        let trigger = race(&player, None, config()).await.unwrap();

        assert_eq!(trigger, StartTrigger::Timeout);
        assert_eq!(begin.elapsed(), Duration::from_secs(60));
        assert!(player.osd_messages.load(Ordering::SeqCst) > 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_authorized_request_wins_at_its_time() {
        let player = Arc::new(GatePlayer::default());
        let channel = Arc::new(LocalStartChannel::new());
        let prompt = channel.open_prompt(&entry(), Duration::from_secs(60)).await.unwrap();
        let begin = Instant::now();

        tokio::spawn({
            let channel = Arc::clone(&channel);
            async move {
                tokio::time::sleep(Duration::from_secs(2)).await;
                channel.request_start(start("bob")).await.unwrap();
                tokio::time::sleep(Duration::from_secs(3)).await;
                channel.request_start(start("alice")).await.unwrap();
            }
        });

        let trigger = race(player.as_ref(), Some(prompt), config()).await.unwrap();
        assert_eq!(
            trigger,
            StartTrigger::Requested {
                user_id: "alice".to_string()
            }
        );
        assert_eq!(begin.elapsed(), Duration::from_secs(5));

        // Losing branches are gone: no countdown after resolution
        let shown = player.osd_messages.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(player.osd_messages.load(Ordering::SeqCst), shown);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unpause_wins() {
        let player = Arc::new(GatePlayer::default());
        let begin = Instant::now();

        tokio::spawn({
            let player = Arc::clone(&player);
            async move {
                tokio::time::sleep(Duration::from_millis(1_100)).await;
                player.unpaused.store(true, Ordering::SeqCst);
            }
        });

        let trigger = race(player.as_ref(), None, config()).await.unwrap();
        assert_eq!(trigger, StartTrigger::Unpaused);
        // Detected on the next poll tick
        assert_eq!(begin.elapsed(), Duration::from_millis(1_200));
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_channel_degrades_to_timeout() {
        let player = GatePlayer::default();
        let channel = LocalStartChannel::new();
        let prompt = channel.open_prompt(&entry(), Duration::from_secs(60)).await.unwrap();
        drop(channel);

        let begin = Instant::now();
        let trigger = race(&player, Some(prompt), config()).await.unwrap();
        assert_eq!(trigger, StartTrigger::Timeout);
        assert_eq!(begin.elapsed(), Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_player_failure_is_an_error() {
        let player = GatePlayer::default();
        player.broken.store(true, Ordering::SeqCst);
        assert!(matches!(
            race(&player, None, config()).await,
            Err(Error::RemoteCommand { .. })
        ));
    }

    #[test]
    fn test_countdown_text_rounds() {
        assert_eq!(countdown_text(Duration::from_millis(59_600)), "Starting in 60 seconds");
        assert_eq!(countdown_text(Duration::from_millis(1_400)), "Starting in 1 seconds");
    }
}
