//! Avatar scene orchestration.
//!
//! The stage owns the avatar registry, the per-frame tick, the camera and
//! light, the crossfade mixer, and the parsed-asset caches.

pub mod avatar;
pub mod camera;
pub mod hitbox;
pub mod mixer;
pub mod orchestrator;

pub use avatar::AvatarInstance;
pub use camera::{Camera, Ray};
pub use hitbox::{BodyPart, HitVolume};
pub use mixer::{MotionMixer, ANIMATION_FADE_TIME};
pub use orchestrator::{Light, LoadTicket, Stage};
