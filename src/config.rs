//! Configuration and persisted settings for vrmcast
//!
//! Two layers: `ServiceConfig` is the process configuration (HTTP bind,
//! asset folders, classifier endpoint), `Settings` is the persisted,
//! user-editable extension state (feature toggles, per-character model
//! assignments, per-model animation mappings). Settings self-heal on load:
//! unknown keys are pruned by the parse and missing keys are defaulted, and
//! every per-model mapping is filled out to its full fixed shape.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::{ConfigError, VrmCastError};
use crate::stage::hitbox::BodyPart;

/// Smallest interactive model scale
pub const MIN_SCALE: f32 = 0.2;
/// Largest interactive model scale
pub const MAX_SCALE: f32 = 30.0;
/// Scale applied to a model seen for the first time
pub const DEFAULT_MODEL_SCALE: f32 = 3.0;

/// Label returned when classification fails or is disabled
pub const FALLBACK_LABEL: &str = "neutral";

/// The fixed emotion label set produced by the classification endpoint.
/// Every model settings record carries a mapping entry for each of these.
pub const CLASSIFY_LABELS: [&str; 28] = [
    "admiration",
    "amusement",
    "anger",
    "annoyance",
    "approval",
    "caring",
    "confusion",
    "curiosity",
    "desire",
    "disappointment",
    "disapproval",
    "disgust",
    "embarrassment",
    "excitement",
    "fear",
    "gratitude",
    "grief",
    "joy",
    "love",
    "nervousness",
    "neutral",
    "optimism",
    "pride",
    "realization",
    "relief",
    "remorse",
    "sadness",
    "surprise",
];

/// Process configuration loaded from `config.toml`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub http: HttpConfig,
    pub classify: ClassifyConfig,
    /// Root of the asset folder convention (`<dir>/model`, `<dir>/animation`)
    pub assets_dir: PathBuf,
    /// Where the persisted extension settings live
    pub settings_path: PathBuf,
    /// Frame tick interval in milliseconds
    pub tick_interval_ms: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            http: HttpConfig::default(),
            classify: ClassifyConfig::default(),
            assets_dir: PathBuf::from("assets/vrm"),
            settings_path: PathBuf::from("settings.toml"),
            tick_interval_ms: 33,
        }
    }
}

impl ServiceConfig {
    /// Load service configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, VrmCastError> {
        let contents = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::ReadFile(format!("{}: {}", path.as_ref().display(), e)))?;
        Self::from_toml(&contents)
    }

    /// Parse service configuration from a TOML string
    pub fn from_toml(s: &str) -> Result<Self, VrmCastError> {
        toml::from_str(s).map_err(|e| ConfigError::Parse(e.to_string()).into())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), VrmCastError> {
        if self.http.port == 0 {
            return Err(ConfigError::InvalidValue {
                field: "http.port".to_string(),
                message: "Port must be greater than 0".to_string(),
            }
            .into());
        }

        if self.tick_interval_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "tick_interval_ms".to_string(),
                message: "Tick interval must be greater than 0".to_string(),
            }
            .into());
        }

        Ok(())
    }
}

/// HTTP control surface configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Enable the HTTP server
    pub enabled: bool,
    /// Bind host
    pub host: String,
    /// Bind port
    pub port: u16,
    /// Enable permissive CORS
    pub cors_enabled: bool,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "127.0.0.1".to_string(),
            port: 8193,
            cors_enabled: true,
        }
    }
}

/// Emotion classification endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifyConfig {
    /// Enable remote classification (falls back to keyword matching otherwise)
    pub enabled: bool,
    /// Endpoint URL, expects `{"text": ...}` and returns scored labels
    pub endpoint: String,
    /// Request timeout in milliseconds
    pub timeout_ms: u64,
}

impl Default for ClassifyConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: "http://127.0.0.1:5100/api/classify".to_string(),
            timeout_ms: 3000,
        }
    }
}

/// Persisted extension settings, scoped to this service
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    /// Master switch; disabled tears the scene down entirely
    pub enabled: bool,
    /// Avatars track the camera with their gaze
    pub follow_camera: bool,
    /// Show debug grid, axes and collision volumes
    pub show_grid: bool,
    /// Automatic blinking
    pub blink: bool,
    /// Mouth driven by TTS audio amplitude instead of message length
    pub tts_lip_sync: bool,
    /// Disable pointer drag/rotate/scale
    pub lock_models: bool,
    /// Build named hit volumes at model load time
    pub hitboxes: bool,
    /// Keep parsed models for instant re-attachment
    pub models_cache: bool,
    /// Keep parsed animation clips across plays
    pub animations_cache: bool,
    /// Submit staged hit-volume messages automatically
    pub auto_send_hitbox_message: bool,
    /// Directional light color, hex string
    pub light_color: String,
    /// Directional light intensity, percent 0-100
    pub light_intensity: u32,
    /// Character name -> assigned model file path
    pub character_model_mapping: HashMap<String, String>,
    /// Model file path -> per-model settings record
    pub model_settings: HashMap<String, ModelSettings>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            enabled: false,
            follow_camera: false,
            show_grid: false,
            blink: true,
            tts_lip_sync: false,
            lock_models: false,
            hitboxes: true,
            models_cache: true,
            animations_cache: true,
            auto_send_hitbox_message: false,
            light_color: "#ffffff".to_string(),
            light_intensity: 100,
            character_model_mapping: HashMap::new(),
            model_settings: HashMap::new(),
        }
    }
}

impl Settings {
    /// Load settings from a TOML file, healing them in the process.
    /// A missing file yields defaults rather than an error.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, VrmCastError> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::info!("No settings file at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFile(format!("{}: {}", path.display(), e)))?;
        let mut settings: Settings =
            toml::from_str(&contents).map_err(|e| ConfigError::Parse(e.to_string()))?;
        settings.migrate();
        Ok(settings)
    }

    /// Persist settings to a TOML file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), VrmCastError> {
        let serialized = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::WriteFile(e.to_string()))?;
        std::fs::write(path.as_ref(), serialized)
            .map_err(|e| ConfigError::WriteFile(format!("{}: {}", path.as_ref().display(), e)))?;
        Ok(())
    }

    /// One-shot heal executed at load: clamp numeric ranges and fill every
    /// per-model mapping out to its full fixed shape. Unknown keys were
    /// already pruned by the parse.
    pub fn migrate(&mut self) {
        self.light_intensity = self.light_intensity.min(100);
        for model in self.model_settings.values_mut() {
            model.heal();
        }
    }

    /// Settings record for a model path, creating and healing one on first use
    pub fn ensure_model(&mut self, model_path: &str) -> &mut ModelSettings {
        self.model_settings
            .entry(model_path.to_string())
            .or_insert_with(ModelSettings::default)
    }

    /// Settings record for a model path, if one exists
    pub fn model(&self, model_path: &str) -> Option<&ModelSettings> {
        self.model_settings.get(model_path)
    }
}

/// Expression + motion pair used by default and per-label mappings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AnimationMapping {
    pub expression: String,
    pub motion: String,
}

impl Default for AnimationMapping {
    fn default() -> Self {
        Self {
            expression: "none".to_string(),
            motion: "none".to_string(),
        }
    }
}

/// Expression + motion + staged message triple for hit-volume clicks
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HitboxMapping {
    pub expression: String,
    pub motion: String,
    pub message: String,
}

impl Default for HitboxMapping {
    fn default() -> Self {
        Self {
            expression: "none".to_string(),
            motion: "none".to_string(),
            message: String::new(),
        }
    }
}

/// Per-model-path settings record
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ModelSettings {
    pub scale: f32,
    pub x: f32,
    pub y: f32,
    pub rx: f32,
    pub ry: f32,
    /// Fallback mapping applied on load and whenever a more specific
    /// mapping resolves to "none"
    pub animation_default: AnimationMapping,
    /// One entry per classification label, always fully populated
    pub classify_mapping: HashMap<String, AnimationMapping>,
    /// One entry per body part, always fully populated
    pub hitboxes_mapping: HashMap<String, HitboxMapping>,
}

impl Default for ModelSettings {
    fn default() -> Self {
        let mut settings = Self {
            scale: DEFAULT_MODEL_SCALE,
            x: 0.0,
            y: 0.0,
            rx: 0.0,
            ry: 0.0,
            animation_default: AnimationMapping::default(),
            classify_mapping: HashMap::new(),
            hitboxes_mapping: HashMap::new(),
        };
        settings.heal();
        settings
    }
}

impl ModelSettings {
    /// Fill missing mapping entries and clamp the scale. Every label and
    /// body part must have an entry; absence is a bug, not a valid state.
    pub fn heal(&mut self) {
        self.scale = self.scale.clamp(MIN_SCALE, MAX_SCALE);

        for label in CLASSIFY_LABELS {
            self.classify_mapping
                .entry(label.to_string())
                .or_insert_with(AnimationMapping::default);
        }

        for part in BodyPart::all() {
            self.hitboxes_mapping
                .entry(part.key().to_string())
                .or_insert_with(HitboxMapping::default);
        }
    }

    /// Motion names reachable from this record's default, classify and
    /// hitbox mappings, "none" excluded. Used for eager clip caching.
    pub fn mapped_motions(&self) -> Vec<String> {
        let mut motions = Vec::new();
        let mut push = |m: &str| {
            if m != "none" && !m.is_empty() && !motions.iter().any(|k| k == m) {
                motions.push(m.to_string());
            }
        };

        push(&self.animation_default.motion);
        for mapping in self.classify_mapping.values() {
            push(&mapping.motion);
        }
        for mapping in self.hitboxes_mapping.values() {
            push(&mapping.motion);
        }

        motions
    }
}
