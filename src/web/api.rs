//! JSON API endpoints

use axum::{extract::State, response::IntoResponse, Json};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::chat::{ChatEvent, ChatMessage};
use crate::lipsync::AudioBuffer;
use crate::AppState;

/// API response wrapper
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

impl ApiResponse<()> {
    pub fn error(message: &str) -> Json<Self> {
        Json(Self {
            success: false,
            data: None,
            error: Some(message.to_string()),
        })
    }

    pub fn ok() -> Json<Self> {
        Json(Self {
            success: true,
            data: None,
            error: None,
        })
    }
}

fn from_result(result: crate::Result<()>) -> Json<ApiResponse<()>> {
    match result {
        Ok(()) => ApiResponse::ok(),
        Err(e) => ApiResponse::error(&e.to_string()),
    }
}

/// Per-avatar status summary
#[derive(Debug, Serialize)]
pub struct AvatarStatus {
    pub character: String,
    pub model: String,
    pub expression: String,
    pub motion: String,
}

/// Service status response
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub version: String,
    pub enabled: bool,
    pub active: bool,
    pub avatars: Vec<AvatarStatus>,
}

/// Get service and avatar status
pub async fn get_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let stage = state.stage.read().await;
    let avatars = stage
        .characters()
        .into_iter()
        .filter_map(|name| {
            stage.avatar(&name).map(|a| AvatarStatus {
                character: name.clone(),
                model: a.model_path.clone(),
                expression: a.expression.clone(),
                motion: a.motion.name.clone(),
            })
        })
        .collect();

    ApiResponse::success(StatusResponse {
        version: crate::VERSION.to_string(),
        enabled: stage.settings().enabled,
        active: stage.is_active(),
        avatars,
    })
}

/// Get the full persisted settings
pub async fn get_settings(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let stage = state.stage.read().await;
    Json(stage.settings().clone())
}

/// Partial settings update
#[derive(Debug, Deserialize)]
pub struct SettingsUpdate {
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub follow_camera: Option<bool>,
    #[serde(default)]
    pub show_grid: Option<bool>,
    #[serde(default)]
    pub blink: Option<bool>,
    #[serde(default)]
    pub tts_lip_sync: Option<bool>,
    #[serde(default)]
    pub lock_models: Option<bool>,
    #[serde(default)]
    pub hitboxes: Option<bool>,
    #[serde(default)]
    pub models_cache: Option<bool>,
    #[serde(default)]
    pub animations_cache: Option<bool>,
    #[serde(default)]
    pub auto_send_hitbox_message: Option<bool>,
    #[serde(default)]
    pub light_color: Option<String>,
    #[serde(default)]
    pub light_intensity: Option<u32>,
}

pub async fn update_settings(
    State(state): State<Arc<AppState>>,
    Json(update): Json<SettingsUpdate>,
) -> impl IntoResponse {
    let mut stage = state.stage.write().await;

    if let Some(follow) = update.follow_camera {
        stage.settings_mut().follow_camera = follow;
    }
    if let Some(grid) = update.show_grid {
        stage.settings_mut().show_grid = grid;
    }
    if let Some(blink) = update.blink {
        stage.settings_mut().blink = blink;
    }
    if let Some(lip_sync) = update.tts_lip_sync {
        stage.settings_mut().tts_lip_sync = lip_sync;
    }
    if let Some(lock) = update.lock_models {
        stage.settings_mut().lock_models = lock;
    }
    if let Some(auto_send) = update.auto_send_hitbox_message {
        stage.settings_mut().auto_send_hitbox_message = auto_send;
    }
    if let Some(hitboxes) = update.hitboxes {
        stage.set_hitboxes_enabled(hitboxes);
    }
    if let Some(models_cache) = update.models_cache {
        stage.set_models_cache_enabled(models_cache);
    }
    if let Some(animations_cache) = update.animations_cache {
        stage.set_animations_cache_enabled(animations_cache);
    }

    if update.light_color.is_some() || update.light_intensity.is_some() {
        let color = update
            .light_color
            .unwrap_or_else(|| stage.settings().light_color.clone());
        let intensity = update
            .light_intensity
            .unwrap_or(stage.settings().light_intensity);
        if let Err(e) = stage.set_light(&color, intensity) {
            return ApiResponse::error(&e.to_string());
        }
    }

    // Flipping the master switch rebuilds (or tears down) the scene
    if let Some(enabled) = update.enabled {
        stage.settings_mut().enabled = enabled;
        let roster = stage.roster().to_vec();
        stage.load_scene();
        stage.load_all_models(&roster);
    }

    ApiResponse::<()>::ok()
}

/// Asset listing response
#[derive(Debug, Serialize)]
pub struct AssetsResponse {
    pub models: Vec<String>,
    pub animations: Vec<String>,
    pub animation_groups: Vec<String>,
}

pub async fn get_assets(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let stage = state.stage.read().await;
    ApiResponse::success(AssetsResponse {
        models: stage.assets().models().to_vec(),
        animations: stage.assets().animations().to_vec(),
        animation_groups: stage.assets().animation_groups(),
    })
}

/// Tear down and rebuild the scene with the current roster
pub async fn reload_scene(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let mut stage = state.stage.write().await;
    let roster = stage.roster().to_vec();
    stage.load_scene();
    stage.load_all_models(&roster);
    ApiResponse::<()>::ok()
}

#[derive(Debug, Deserialize)]
pub struct RosterBody {
    pub members: Vec<String>,
}

/// Chat-changed event from the host
pub async fn chat_changed(
    State(state): State<Arc<AppState>>,
    Json(body): Json<RosterBody>,
) -> impl IntoResponse {
    state
        .handle_chat_event(ChatEvent::ChatChanged {
            members: body.members,
        })
        .await;
    ApiResponse::<()>::ok()
}

/// Group-updated event from the host
pub async fn group_updated(
    State(state): State<Arc<AppState>>,
    Json(body): Json<RosterBody>,
) -> impl IntoResponse {
    state
        .handle_chat_event(ChatEvent::GroupUpdated {
            members: body.members,
        })
        .await;
    ApiResponse::<()>::ok()
}

#[derive(Debug, Deserialize)]
pub struct ChatMessageBody {
    #[serde(flatten)]
    pub message: ChatMessage,
    #[serde(default)]
    pub edited: bool,
}

/// Message-received / message-edited event from the host
pub async fn chat_message(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ChatMessageBody>,
) -> impl IntoResponse {
    let event = if body.edited {
        ChatEvent::MessageEdited(body.message)
    } else {
        ChatEvent::MessageReceived(body.message)
    };
    state.handle_chat_event(event).await;
    ApiResponse::<()>::ok()
}

#[derive(Debug, Deserialize)]
pub struct SetExpressionRequest {
    #[serde(default)]
    pub character: Option<String>,
    pub expression: String,
}

pub async fn set_expression(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SetExpressionRequest>,
) -> impl IntoResponse {
    from_result(
        state
            .set_expression(request.character, &request.expression)
            .await,
    )
}

fn default_random() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct SetMotionRequest {
    #[serde(default)]
    pub character: Option<String>,
    pub motion: String,
    #[serde(default, rename = "loop")]
    pub looped: bool,
    #[serde(default = "default_random")]
    pub random: bool,
}

pub async fn set_motion(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SetMotionRequest>,
) -> impl IntoResponse {
    from_result(
        state
            .set_motion(
                request.character,
                &request.motion,
                request.looped,
                request.random,
            )
            .await,
    )
}

#[derive(Debug, Deserialize)]
pub struct SetModelRequest {
    #[serde(default)]
    pub character: Option<String>,
    pub model: String,
}

pub async fn set_model(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SetModelRequest>,
) -> impl IntoResponse {
    from_result(state.set_model(request.character, &request.model).await)
}

#[derive(Debug, Deserialize)]
pub struct SetLightRequest {
    pub color: String,
    pub intensity: u32,
}

pub async fn set_light(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SetLightRequest>,
) -> impl IntoResponse {
    from_result(state.set_light(&request.color, request.intensity).await)
}

#[derive(Debug, Deserialize)]
pub struct LipSyncRequest {
    #[serde(default)]
    pub character: Option<String>,
    pub sample_rate: u32,
    /// 16-bit little-endian PCM, base64-encoded
    pub pcm16: String,
}

pub async fn lip_sync(
    State(state): State<Arc<AppState>>,
    Json(request): Json<LipSyncRequest>,
) -> impl IntoResponse {
    let bytes = match BASE64.decode(&request.pcm16) {
        Ok(bytes) => bytes,
        Err(e) => return ApiResponse::error(&format!("invalid pcm16 payload: {}", e)),
    };
    let buffer = AudioBuffer::from_pcm16(&bytes, request.sample_rate);
    from_result(state.lip_sync(request.character, buffer).await)
}

#[derive(Debug, Deserialize)]
pub struct CommandRequest {
    pub command: String,
}

/// Run one slash command and return its feedback text
pub async fn run_command(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CommandRequest>,
) -> impl IntoResponse {
    match state.run_command(&request.command).await {
        Ok(feedback) => ApiResponse::success(feedback),
        Err(e) => Json(ApiResponse {
            success: false,
            data: None,
            error: Some(e.to_string()),
        }),
    }
}
