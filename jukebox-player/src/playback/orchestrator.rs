//! Playback orchestrator
//!
//! Drives the cycle `Idle -> Dequeued -> Staging -> AwaitingStart -> Playing`
//! one entry at a time. The next idle poll only starts after the previous
//! cycle has finished. A failed cycle is returned to the caller; a player
//! exit ends the whole run.

use super::start_gate::{self, GateConfig};
use crate::collaborators::{AssetPaths, AssetRenderer, NotificationChannel};
use crate::player::{LoadMode, PlayerControl};
use crate::queue::{DequeuedBatch, QueueStore};
use jukebox_common::db::QueueEntry;
use jukebox_common::events::{EventBus, JukeboxEvent, PlaybackPhase, StartTrigger};
use jukebox_common::{time, AppConfig, Error, Result};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Cycle timing and staging settings
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub idle_poll: Duration,
    pub finish_poll: Duration,
    pub upcoming_count: i64,
    pub osd_font_size: i64,
    pub gate: GateConfig,
    pub assets: AssetPaths,
}

impl From<&AppConfig> for OrchestratorConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            idle_poll: time::millis_to_duration(config.idle_poll_ms),
            finish_poll: time::millis_to_duration(config.finish_poll_ms),
            upcoming_count: config.upcoming_count,
            osd_font_size: config.osd_font_size,
            gate: GateConfig::from(config),
            assets: AssetPaths {
                preview: config.preview_path(),
                loading: config.loading_path(),
            },
        }
    }
}

pub struct Orchestrator {
    store: QueueStore,
    player: Arc<dyn PlayerControl>,
    renderer: Arc<dyn AssetRenderer>,
    notifier: Arc<dyn NotificationChannel>,
    events: EventBus,
    phase: watch::Sender<PlaybackPhase>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(
        store: QueueStore,
        player: Arc<dyn PlayerControl>,
        renderer: Arc<dyn AssetRenderer>,
        notifier: Arc<dyn NotificationChannel>,
        events: EventBus,
        config: OrchestratorConfig,
    ) -> Self {
        let (phase, _) = watch::channel(PlaybackPhase::Idle);
        Self {
            store,
            player,
            renderer,
            notifier,
            events,
            phase,
            config,
        }
    }

    /// Current phase, updated on every transition
    pub fn phase(&self) -> watch::Receiver<PlaybackPhase> {
        self.phase.subscribe()
    }

    /// Run cycles until `shutdown` fires
    ///
    /// Returns an error when a cycle fails or the player process exits.
    pub async fn run(
        &self,
        shutdown: CancellationToken,
        mut player_exit: watch::Receiver<bool>,
    ) -> Result<()> {
        info!("Playback orchestrator started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Playback orchestrator stopping");
                    return Ok(());
                }
                _ = exited(&mut player_exit) => {
                    self.events.emit_lossy(JukeboxEvent::PlayerExited {
                        timestamp: time::now(),
                    });
                    error!("Player exited, stopping playback");
                    return Err(Error::Transport("Player process exited".to_string()));
                }
                result = self.cycle() => {
                    if let Err(e) = result {
                        error!("Playback cycle failed: {}", e);
                        return Err(e);
                    }
                }
            }
        }
    }

    /// One idle poll, playing the dequeued entry through to completion
    ///
    /// Returns the entry played, or `None` after waiting out an empty poll.
    pub async fn cycle(&self) -> Result<Option<QueueEntry>> {
        self.set_phase(PlaybackPhase::Idle);

        let Some(batch) = self
            .store
            .dequeue_with_upcoming(self.config.upcoming_count)
            .await?
        else {
            tokio::time::sleep(self.config.idle_poll).await;
            return Ok(None);
        };

        self.play(batch).await.map(Some)
    }

    async fn play(&self, batch: DequeuedBatch) -> Result<QueueEntry> {
        let entry = batch.current.clone();
        self.set_phase(PlaybackPhase::Dequeued);
        self.events.emit_lossy(JukeboxEvent::EntryDequeued {
            entry_id: entry.id,
            slug: entry.slug.clone(),
            timestamp: time::now(),
        });
        info!("Playing '{}' ({}) for {}", entry.title, entry.slug, entry.user_id);

        self.set_phase(PlaybackPhase::Staging);
        self.stage(&batch).await?;

        self.set_phase(PlaybackPhase::AwaitingStart);
        let trigger = self.await_start(&entry).await?;

        let started = self.store.mark_started(entry.id).await?;
        if let Err(e) = self.notifier.close_prompt(&entry, &trigger).await {
            warn!("Failed to close start prompt for {}: {}", entry.slug, e);
        }
        self.player.play().await?;
        self.events.emit_lossy(JukeboxEvent::PlaybackStarted {
            entry_id: entry.id,
            trigger,
            timestamp: time::now(),
        });

        self.set_phase(PlaybackPhase::Playing);
        self.wait_until_finished().await?;
        self.events.emit_lossy(JukeboxEvent::PlaybackFinished {
            entry_id: entry.id,
            timestamp: time::now(),
        });
        info!("Finished '{}' ({})", entry.title, entry.slug);

        Ok(started)
    }

    /// Render assets, then queue preview, loading image and media in the player
    async fn stage(&self, batch: &DequeuedBatch) -> Result<()> {
        let assets = &self.config.assets;
        self.renderer
            .render(&batch.current, &batch.upcoming, assets)
            .await?;

        let preview = assets.preview.to_string_lossy();
        let loading = assets.loading.to_string_lossy();
        self.player.load(&preview, LoadMode::Replace).await?;
        self.player.fullscreen().await?;
        self.player.pause().await?;
        self.player.load(&loading, LoadMode::Append).await?;
        self.player.load(&batch.current.url, LoadMode::Append).await?;
        Ok(())
    }

    /// Race the start gate with the OSD font enlarged, restoring it afterwards
    async fn await_start(&self, entry: &QueueEntry) -> Result<StartTrigger> {
        let previous_font = self.player.get_property("osd-font-size").await?;
        self.player
            .set_property("osd-font-size", json!(self.config.osd_font_size))
            .await?;

        let prompt = match self.notifier.open_prompt(entry, self.config.gate.timeout).await {
            Ok(prompt) => Some(prompt),
            Err(e) => {
                warn!("Start prompt unavailable for {}: {}", entry.slug, e);
                None
            }
        };

        let outcome = start_gate::race(self.player.as_ref(), prompt, self.config.gate).await;
        let restored = self.player.set_property("osd-font-size", previous_font).await;

        let trigger = outcome?;
        restored?;
        Ok(trigger)
    }

    async fn wait_until_finished(&self) -> Result<()> {
        while !self.player.is_idle().await? {
            tokio::time::sleep(self.config.finish_poll).await;
        }
        Ok(())
    }

    fn set_phase(&self, phase: PlaybackPhase) {
        let previous = self.phase.send_replace(phase);
        if previous != phase {
            info!("Playback phase: {} -> {}", previous, phase);
            self.events.emit_lossy(JukeboxEvent::PhaseChanged {
                phase,
                timestamp: time::now(),
            });
        }
    }
}

/// Resolves once the exit flag is set; never if the sender is gone
async fn exited(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            return std::future::pending().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{LocalStartChannel, StartPrompt, StartRequest};
    use async_trait::async_trait;
    use jukebox_common::db::{init_memory_database, Song};
    use serde_json::Value;
    use std::path::PathBuf;
    use std::sync::Mutex;

    /// Player double: paused/idle state driven by the commands it receives
    #[derive(Default)]
    struct FakePlayer {
        commands: Mutex<Vec<String>>,
        state: Mutex<FakeState>,
    }

    struct FakeState {
        paused: bool,
        playing: bool,
        font: Value,
    }

    impl Default for FakeState {
        fn default() -> Self {
            Self {
                paused: false,
                playing: false,
                font: json!(55),
            }
        }
    }

    #[async_trait]
    impl PlayerControl for FakePlayer {
        async fn send_command(&self, name: &str, args: Vec<Value>) -> Result<Value> {
            let mut state = self.state.lock().unwrap();
            let first = args.first().and_then(|a| a.as_str()).unwrap_or_default().to_string();
            if name != "show-text" {
                self.commands.lock().unwrap().push(format!("{} {}", name, first));
            }
            match (name, first.as_str()) {
                ("get_property", "pause") => Ok(json!(state.paused)),
                ("get_property", "idle-active") => Ok(json!(state.playing)),
                ("get_property", "osd-font-size") => Ok(state.font.clone()),
                ("set_property", "pause") => {
                    let paused = args[1].as_bool().unwrap();
                    if !paused {
                        state.playing = true;
                    }
                    state.paused = paused;
                    Ok(Value::Null)
                }
                ("set_property", "osd-font-size") => {
                    state.font = args[1].clone();
                    Ok(Value::Null)
                }
                _ => Ok(Value::Null),
            }
        }
    }

    struct NoopRenderer;

    #[async_trait]
    impl AssetRenderer for NoopRenderer {
        async fn render(&self, _: &QueueEntry, _: &[QueueEntry], _: &AssetPaths) -> Result<()> {
            Ok(())
        }
    }

    struct FailingRenderer;

    #[async_trait]
    impl AssetRenderer for FailingRenderer {
        async fn render(&self, _: &QueueEntry, _: &[QueueEntry], _: &AssetPaths) -> Result<()> {
            Err(Error::Internal("renderer down".to_string()))
        }
    }

    struct BrokenChannel;

    #[async_trait]
    impl NotificationChannel for BrokenChannel {
        async fn open_prompt(&self, _: &QueueEntry, _: Duration) -> Result<StartPrompt> {
            Err(Error::Transport("notification service unreachable".to_string()))
        }

        async fn close_prompt(&self, _: &QueueEntry, _: &StartTrigger) -> Result<()> {
            Err(Error::Transport("notification service unreachable".to_string()))
        }
    }

    fn config() -> OrchestratorConfig {
        OrchestratorConfig {
            idle_poll: Duration::from_millis(10),
            finish_poll: Duration::from_millis(5),
            upcoming_count: 10,
            osd_font_size: 24,
            gate: GateConfig {
                timeout: Duration::from_millis(300),
                unpause_poll: Duration::from_millis(10),
                countdown_interval: Duration::from_millis(50),
            },
            assets: AssetPaths {
                preview: PathBuf::from("temp/preview.jpg"),
                loading: PathBuf::from("temp/loading.jpg"),
            },
        }
    }

    fn song(n: u32) -> Song {
        Song {
            url: format!("https://example.com/{}", n),
            title: format!("Song {}", n),
            duration: 100,
            thumbnail: String::new(),
        }
    }

    async fn setup(
        renderer: Arc<dyn AssetRenderer>,
        notifier: Arc<dyn NotificationChannel>,
    ) -> (Orchestrator, QueueStore, Arc<FakePlayer>, EventBus) {
        let store = QueueStore::new(init_memory_database().await.unwrap());
        let player = Arc::new(FakePlayer::default());
        let events = EventBus::new(64);
        let orchestrator = Orchestrator::new(
            store.clone(),
            player.clone(),
            renderer,
            notifier,
            events.clone(),
            config(),
        );
        (orchestrator, store, player, events)
    }

    #[tokio::test]
    async fn test_full_cycle_with_owner_start() {
        let channel = Arc::new(LocalStartChannel::new());
        let (orchestrator, store, player, events) =
            setup(Arc::new(NoopRenderer), channel.clone()).await;
        let mut rx = events.subscribe();
        let queued = store.enqueue(&song(1), "alice").await.unwrap();
        store.enqueue(&song(2), "bob").await.unwrap();

        tokio::spawn({
            let channel = channel.clone();
            async move {
                while channel.awaiting().await.is_none() {
                    tokio::time::sleep(Duration::from_millis(2)).await;
                }
                channel
                    .request_start(StartRequest {
                        entry_id: None,
                        requested_by: "alice".to_string(),
                        privileged: false,
                    })
                    .await
                    .unwrap();
            }
        });

        let played = orchestrator.cycle().await.unwrap().unwrap();
        assert_eq!(played.id, queued.id);
        assert!(played.started_at.is_some());

        // Start recorded once; a second write is refused
        assert!(matches!(
            store.mark_started(queued.id).await,
            Err(Error::InvalidState(_))
        ));

        let commands = player.commands.lock().unwrap().clone();
        let expected_prefix = [
            "loadfile temp/preview.jpg",
            "set_property fullscreen",
            "set_property pause",
            "loadfile temp/loading.jpg",
            "loadfile https://example.com/1",
            "get_property osd-font-size",
            "set_property osd-font-size",
        ];
        assert_eq!(&commands[..expected_prefix.len()], &expected_prefix);
        assert_eq!(player.state.lock().unwrap().font, json!(55));

        // Bob's entry moved up
        assert_eq!(store.find_active(10, 0).await.unwrap()[0].position, 0);
        assert!(channel.awaiting().await.is_none());

        let mut started_by = None;
        while let Ok(event) = rx.try_recv() {
            if let JukeboxEvent::PlaybackStarted { trigger, .. } = event {
                started_by = Some(trigger);
            }
        }
        assert_eq!(
            started_by,
            Some(StartTrigger::Requested {
                user_id: "alice".to_string()
            })
        );
        assert_eq!(*orchestrator.phase().borrow(), PlaybackPhase::Playing);
    }

    #[tokio::test]
    async fn test_broken_notifications_fall_back_to_timeout() {
        let (orchestrator, store, _player, events) =
            setup(Arc::new(NoopRenderer), Arc::new(BrokenChannel)).await;
        let mut rx = events.subscribe();
        store.enqueue(&song(1), "alice").await.unwrap();

        let played = orchestrator.cycle().await.unwrap().unwrap();
        assert!(played.started_at.is_some());

        let mut trigger = None;
        while let Ok(event) = rx.try_recv() {
            if let JukeboxEvent::PlaybackStarted { trigger: t, .. } = event {
                trigger = Some(t);
            }
        }
        assert_eq!(trigger, Some(StartTrigger::Timeout));
    }

    #[tokio::test]
    async fn test_empty_queue_polls() {
        let (orchestrator, _store, player, _events) =
            setup(Arc::new(NoopRenderer), Arc::new(LocalStartChannel::new())).await;
        assert!(orchestrator.cycle().await.unwrap().is_none());
        assert!(player.commands.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_staging_failure_is_returned() {
        let (orchestrator, store, player, _events) =
            setup(Arc::new(FailingRenderer), Arc::new(LocalStartChannel::new())).await;
        let entry = store.enqueue(&song(1), "alice").await.unwrap();

        assert!(matches!(orchestrator.cycle().await, Err(Error::Internal(_))));
        assert!(player.commands.lock().unwrap().is_empty());
        // Dequeued but never started
        let entry = store.find_by_id(entry.id).await.unwrap().unwrap();
        assert!(entry.dequeued_at.is_some());
        assert!(entry.started_at.is_none());
    }

    #[tokio::test]
    async fn test_player_exit_is_fatal() {
        let (orchestrator, _store, _player, _events) =
            setup(Arc::new(NoopRenderer), Arc::new(LocalStartChannel::new())).await;
        let (exit_tx, exit_rx) = watch::channel(false);

        let run = tokio::spawn(async move {
            orchestrator.run(CancellationToken::new(), exit_rx).await
        });
        tokio::time::sleep(Duration::from_millis(30)).await;
        exit_tx.send(true).unwrap();

        assert!(matches!(run.await.unwrap(), Err(Error::Transport(_))));
    }

    #[tokio::test]
    async fn test_shutdown_stops_cleanly() {
        let (orchestrator, _store, _player, _events) =
            setup(Arc::new(NoopRenderer), Arc::new(LocalStartChannel::new())).await;
        let (_exit_tx, exit_rx) = watch::channel(false);
        let shutdown = CancellationToken::new();

        let run = tokio::spawn({
            let shutdown = shutdown.clone();
            async move { orchestrator.run(shutdown, exit_rx).await }
        });
        tokio::time::sleep(Duration::from_millis(30)).await;
        shutdown.cancel();

        assert!(run.await.unwrap().is_ok());
    }
}
