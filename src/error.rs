//! Error types for vrmcast

use thiserror::Error;

/// Main error type for vrmcast
#[derive(Error, Debug)]
pub enum VrmCastError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Stage error: {0}")]
    Stage(#[from] StageError),

    #[error("Animation error: {0}")]
    Animation(#[from] AnimationError),

    #[error("Classification error: {0}")]
    Classify(#[from] ClassifyError),

    #[error("Web server error: {0}")]
    Web(#[from] WebError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read settings file: {0}")]
    ReadFile(String),

    #[error("Failed to write settings file: {0}")]
    WriteFile(String),

    #[error("Failed to parse settings: {0}")]
    Parse(String),

    #[error("Invalid settings value: {field} - {message}")]
    InvalidValue { field: String, message: String },
}

/// Scene and avatar lifecycle errors
#[derive(Error, Debug)]
pub enum StageError {
    #[error("Failed to load model {path}: {message}")]
    ModelLoad { path: String, message: String },

    #[error("No avatar loaded for character: {0}")]
    NoAvatar(String),

    #[error("Scene is not active")]
    SceneInactive,

    #[error("Invalid light color: {0}")]
    LightColor(String),
}

/// Animation resolution and clip loading errors
#[derive(Error, Debug)]
pub enum AnimationError {
    #[error("Failed to load animation {file}: {message}")]
    ClipLoad { file: String, message: String },

    #[error("No animation matching: {0}")]
    NoMatch(String),

    #[error("Unsupported animation file format: {0}")]
    UnsupportedFormat(String),
}

/// Classification endpoint errors
#[derive(Error, Debug)]
pub enum ClassifyError {
    #[error("Classification request failed: {0}")]
    Request(String),

    #[error("Unknown classification label: {0}")]
    UnknownLabel(String),
}

/// Web server errors
#[derive(Error, Debug)]
pub enum WebError {
    #[error("Failed to bind to address: {0}")]
    Bind(String),

    #[error("Server startup failed: {0}")]
    Startup(String),

    #[error("Bad request: {0}")]
    BadRequest(String),
}

/// Result type alias for vrmcast operations
pub type Result<T> = std::result::Result<T, VrmCastError>;
