//! vrmcast - chat-driven VRM avatar orchestration
//!
//! Attaches 3D humanoid avatars to chat participants and drives their
//! expressions and motions from chat events: classified messages, hit-volume
//! clicks, slash commands, and TTS lip sync. The rendering toolkit and the
//! chat host are external collaborators behind trait seams and an HTTP
//! control surface.

pub mod animation;
pub mod assets;
pub mod chat;
pub mod classify;
pub mod commands;
pub mod config;
pub mod error;
pub mod headless;
pub mod interaction;
pub mod lipsync;
pub mod rig;
pub mod stage;
pub mod web;

pub use config::{ServiceConfig, Settings};
pub use error::{Result, VrmCastError};

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, Mutex, Notify, RwLock};

use chat::ChatEvent;
use classify::{classify_or_neutral, Classifier};
use commands::Command;
use error::WebError;
use interaction::{InteractionController, PointerEvent, StagedMessage, WheelEvent};
use lipsync::AudioBuffer;
use stage::Stage;

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// Outbound notifications for the host UI
#[derive(Debug, Clone)]
pub enum Notice {
    /// A hit-volume message staged for the chat input
    StagedMessage(StagedMessage),
    /// A transient load-error notification
    LoadError { subject: String, message: String },
}

/// Application state shared across all components
pub struct AppState {
    /// Process configuration
    pub config: ServiceConfig,
    /// The scene orchestrator
    pub stage: RwLock<Stage>,
    /// Pointer interaction state
    pub interaction: Mutex<InteractionController>,
    classifier: Arc<dyn Classifier>,
    notice_tx: broadcast::Sender<Notice>,
    shutdown_tx: broadcast::Sender<()>,
    avatar_attached: Notify,
}

impl AppState {
    pub fn new(config: ServiceConfig, stage: Stage, classifier: Arc<dyn Classifier>) -> Arc<Self> {
        let (notice_tx, _) = broadcast::channel(64);
        let (shutdown_tx, _) = broadcast::channel(1);

        Arc::new(Self {
            config,
            stage: RwLock::new(stage),
            interaction: Mutex::new(InteractionController::new()),
            classifier,
            notice_tx,
            shutdown_tx,
            avatar_attached: Notify::new(),
        })
    }

    /// Subscribe to outbound notices
    pub fn subscribe_notices(&self) -> broadcast::Receiver<Notice> {
        self.notice_tx.subscribe()
    }

    /// Subscribe to shutdown signal
    pub fn subscribe_shutdown(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Signal shutdown
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    fn notify(&self, notice: Notice) {
        let _ = self.notice_tx.send(notice);
    }

    // ---- chat event intake ----

    /// Feed one chat-host event through the orchestrator
    pub async fn handle_chat_event(&self, event: ChatEvent) {
        match event {
            ChatEvent::ChatChanged { members } => {
                let roster = chat::roster(&members);
                let mut stage = self.stage.write().await;
                stage.load_scene();
                stage.load_all_models(&roster);
                drop(stage);
                self.avatar_attached.notify_waiters();
            }
            ChatEvent::GroupUpdated { members } => {
                let roster = chat::roster(&members);
                self.stage.write().await.load_all_models(&roster);
                self.avatar_attached.notify_waiters();
            }
            ChatEvent::MessageReceived(message) | ChatEvent::MessageEdited(message) => {
                self.interaction
                    .lock()
                    .await
                    .note_chat_turn(message.is_user);

                if message.is_user || message.is_system {
                    return;
                }

                let label = classify_or_neutral(self.classifier.as_ref(), &message.text).await;
                tracing::debug!("Message from {} classified as {}", message.name, label);

                let mut stage = self.stage.write().await;
                stage.apply_classified(&message.name, &label);
                stage.talk(&message.name, &message.text);
            }
        }
    }

    /// Wait until an avatar exists for the character, resolved by the load
    /// that attaches it and bounded by a hard timeout.
    pub async fn wait_for_avatar(&self, character: &str, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            // Register for the signal before checking, so an attach landing
            // in between is not missed
            let notified = self.avatar_attached.notified();
            if self.stage.read().await.has_avatar(character) {
                return true;
            }
            tokio::select! {
                _ = notified => {}
                _ = tokio::time::sleep_until(deadline) => return false,
            }
        }
    }

    async fn resolve_character(&self, character: Option<String>) -> Result<String> {
        if let Some(name) = character {
            return Ok(name);
        }
        self.stage
            .read()
            .await
            .default_character()
            .ok_or_else(|| WebError::BadRequest("no character in roster".to_string()).into())
    }

    // ---- imperative API ----

    /// Set a character's expression; the first roster member when omitted
    pub async fn set_expression(&self, character: Option<String>, expression: &str) -> Result<()> {
        let character = self.resolve_character(character).await?;
        self.stage
            .write()
            .await
            .set_expression(&character, expression);
        Ok(())
    }

    /// Play a motion for a character; the first roster member when omitted
    pub async fn set_motion(
        &self,
        character: Option<String>,
        motion: &str,
        looped: bool,
        random: bool,
    ) -> Result<()> {
        let character = self.resolve_character(character).await?;
        self.stage
            .write()
            .await
            .set_motion(&character, motion, looped, true, random)
    }

    /// Update the directional light
    pub async fn set_light(&self, color: &str, intensity: u32) -> Result<()> {
        self.stage.write().await.set_light(color, intensity)
    }

    /// Assign and attach a model for a character
    pub async fn set_model(&self, character: Option<String>, model_path: &str) -> Result<()> {
        let character = self.resolve_character(character).await?;
        let result = {
            let mut stage = self.stage.write().await;
            stage
                .settings_mut()
                .character_model_mapping
                .insert(character.clone(), model_path.to_string());
            stage.set_model(&character, model_path)
        };

        match result {
            Ok(()) => {
                self.avatar_attached.notify_waiters();
                Ok(())
            }
            Err(e) => {
                self.notify(Notice::LoadError {
                    subject: model_path.to_string(),
                    message: e.to_string(),
                });
                Err(e)
            }
        }
    }

    /// Drive a character's mouth from decoded TTS audio
    pub async fn lip_sync(&self, character: Option<String>, buffer: AudioBuffer) -> Result<()> {
        let character = self.resolve_character(character).await?;
        self.stage.write().await.start_lip_sync(&character, buffer);
        Ok(())
    }

    /// Parse and run one slash command, returning user-facing feedback
    pub async fn run_command(&self, input: &str) -> Result<String> {
        let command = commands::parse(input).map_err(WebError::BadRequest)?;

        match command {
            Command::Expression {
                character,
                expression,
            } => {
                self.set_expression(character, &expression).await?;
                Ok(format!("Expression set to {}", expression))
            }
            Command::Motion {
                character,
                motion,
                looped,
                random,
            } => {
                let character = self.resolve_character(character).await?;
                let mut stage = self.stage.write().await;

                let lowered = motion.to_lowercase();
                let known = stage.resolver().files().contains(&lowered)
                    || stage.resolver().groups().contains(&lowered);

                if known {
                    stage.set_motion(&character, &lowered, looped, true, random)?;
                    Ok(format!("Playing {}", lowered))
                } else if let Some(file) = stage.resolver().resolve_command(&motion) {
                    stage.set_motion(&character, &file, looped, true, false)?;
                    Ok(format!("Playing {}", file))
                } else {
                    tracing::debug!("No animation matches command text: {}", motion);
                    Err(error::AnimationError::NoMatch(motion).into())
                }
            }
            Command::Light { color, intensity } => {
                self.set_light(&color, intensity).await?;
                Ok(format!("Light set to {} at {}%", color, intensity))
            }
            Command::Model { character, model } => {
                self.set_model(character, &model).await?;
                Ok(format!("Model set to {}", model))
            }
        }
    }

    // ---- pointer passthrough ----

    pub async fn pointer_down(&self, event: PointerEvent) {
        let mut interaction = self.interaction.lock().await;
        let mut stage = self.stage.write().await;
        interaction.pointer_down(&mut stage, &event);
    }

    pub async fn pointer_move(&self, event: PointerEvent) {
        let mut interaction = self.interaction.lock().await;
        let mut stage = self.stage.write().await;
        interaction.pointer_move(&mut stage, &event);
    }

    pub async fn pointer_up(&self) {
        self.interaction.lock().await.pointer_up();
    }

    pub async fn wheel(&self, event: WheelEvent) {
        let mut interaction = self.interaction.lock().await;
        let mut stage = self.stage.write().await;
        interaction.wheel(&mut stage, &event);
    }

    // ---- frame tick ----

    /// Advance the scene one frame and flush interaction results
    pub async fn tick(&self, dt: f32) {
        let staged: Vec<StagedMessage> = {
            let mut interaction = self.interaction.lock().await;
            let mut stage = self.stage.write().await;
            stage.update(dt);
            interaction.update(&mut stage);
            interaction.take_staged()
        };

        for message in staged {
            tracing::debug!(
                "Staging chat message for {}: {}",
                message.character,
                message.message
            );
            self.notify(Notice::StagedMessage(message));
        }
    }

    /// Per-frame ticker task; runs until shutdown
    pub async fn run_ticker(self: Arc<Self>) {
        let mut shutdown = self.subscribe_shutdown();
        let mut interval =
            tokio::time::interval(Duration::from_millis(self.config.tick_interval_ms));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut last = tokio::time::Instant::now();

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let now = tokio::time::Instant::now();
                    let dt = (now - last).as_secs_f32();
                    last = now;
                    self.tick(dt).await;
                }
                _ = shutdown.recv() => break,
            }
        }
    }

    /// Debounced settings saver; persists whenever the stage marks its
    /// settings dirty.
    pub async fn run_settings_saver(self: Arc<Self>) {
        let mut shutdown = self.subscribe_shutdown();
        let mut interval = tokio::time::interval(Duration::from_secs(1));

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let snapshot = {
                        let mut stage = self.stage.write().await;
                        stage.take_settings_dirty().then(|| stage.settings().clone())
                    };
                    if let Some(settings) = snapshot {
                        if let Err(e) = settings.save(&self.config.settings_path) {
                            tracing::warn!("Failed to persist settings: {}", e);
                        }
                    }
                }
                _ = shutdown.recv() => break,
            }
        }
    }
}
