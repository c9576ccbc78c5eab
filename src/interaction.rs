//! Pointer interaction: hit-testing, click-mapped actions, and
//! drag/rotate/scale manipulation.
//!
//! Clicks on named hit volumes are debounced by a short delay so they can
//! be told apart from the start of a drag; dispatching applies the
//! volume's mapped expression/motion and stages its mapped message into
//! the chat input, with an anti-duplicate rule against spamming the same
//! interaction twice in a row.

use glam::{Vec2, Vec3};

use crate::stage::hitbox::BodyPart;
use crate::stage::Stage;

/// Delay distinguishing a click from the start of a drag, seconds
pub const HITBOX_CLICK_DELAY: f64 = 0.3;

/// Gain applied to normalized pointer deltas while rotating
const ROTATE_GAIN: f32 = 10.0;
/// Per-move scale step while shift-dragging
const DRAG_SCALE_UP: f32 = 1.05;
const DRAG_SCALE_DOWN: f32 = 0.95;
/// Per-notch scale step for the wheel
const WHEEL_SCALE_UP: f32 = 1.1;
const WHEEL_SCALE_DOWN: f32 = 0.9;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerButton {
    Primary,
    Middle,
}

/// A pointer event in screen-normalized coordinates
#[derive(Debug, Clone, Copy)]
pub struct PointerEvent {
    /// Normalized device coordinates, -1..1 with +Y up
    pub ndc: Vec2,
    /// Window-normalized coordinates, 0..1 with +Y down
    pub norm: Vec2,
    pub button: Option<PointerButton>,
    pub ctrl: bool,
    pub shift: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct WheelEvent {
    pub ndc: Vec2,
    pub delta_y: f32,
}

/// A hit-volume message staged for the chat input
#[derive(Debug, Clone, PartialEq)]
pub struct StagedMessage {
    pub character: String,
    pub message: String,
    pub auto_send: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DragMode {
    Translate,
    Rotate,
    Scale,
}

#[derive(Debug, Clone)]
struct PendingClick {
    character: String,
    part: BodyPart,
    due: f64,
}

/// Pointer-interaction state machine operating on the stage
pub struct InteractionController {
    pointer_down: bool,
    mode: Option<DragMode>,
    drag_character: Option<String>,
    drag_offset: Vec2,
    previous_pointer: Vec2,
    pending_click: Option<PendingClick>,
    /// Last (character, message) staged from a hit volume
    previous_interaction: (String, String),
    /// Whether the most recent chat turn came from the user
    last_turn_was_user: bool,
    staged: Vec<StagedMessage>,
}

impl InteractionController {
    pub fn new() -> Self {
        Self {
            pointer_down: false,
            mode: None,
            drag_character: None,
            drag_offset: Vec2::ZERO,
            previous_pointer: Vec2::ZERO,
            pending_click: None,
            previous_interaction: (String::new(), String::new()),
            last_turn_was_user: false,
            staged: Vec::new(),
        }
    }

    /// Record whether the latest chat turn was a user turn; feeds the
    /// anti-duplicate rule.
    pub fn note_chat_turn(&mut self, is_user: bool) {
        self.last_turn_was_user = is_user;
    }

    /// Drain messages staged by click dispatch
    pub fn take_staged(&mut self) -> Vec<StagedMessage> {
        std::mem::take(&mut self.staged)
    }

    pub fn pointer_down(&mut self, stage: &mut Stage, event: &PointerEvent) {
        self.pointer_down = true;
        self.previous_pointer = event.norm;
        if !stage.is_active() {
            return;
        }

        let ray = stage.camera.screen_ray(event.ndc);

        // Named hit volumes first, nearest across every avatar
        let mut nearest: Option<(String, BodyPart, f32)> = None;
        for character in stage.characters() {
            let Some(avatar) = stage.avatar(&character) else {
                continue;
            };
            for (part, volume) in &avatar.hitboxes {
                if let Some(distance) = volume.intersect(&ray) {
                    if nearest.as_ref().map_or(true, |(_, _, d)| distance < *d) {
                        nearest = Some((character.clone(), *part, distance));
                    }
                }
            }
        }
        if let Some((character, part, _)) = nearest {
            self.pending_click = Some(PendingClick {
                character,
                part,
                due: stage.now() + HITBOX_CLICK_DELAY,
            });
        }

        // Then whole-body colliders for manipulation
        self.drag_character = None;
        for character in stage.characters() {
            let Some(avatar) = stage.avatar(&character) else {
                continue;
            };
            if avatar.collider.intersect(&ray).is_some() {
                self.drag_character = Some(character);
                break;
            }
        }

        if stage.settings().lock_models {
            return;
        }
        let Some(character) = self.drag_character.clone() else {
            return;
        };

        let primary = event.button == Some(PointerButton::Primary);
        let middle = event.button == Some(PointerButton::Middle);

        if primary && !event.ctrl && !event.shift {
            // Remember the grab offset so the model does not jump to the cursor
            if let Some(avatar) = stage.avatar(&character) {
                let point = stage.camera.drag_plane_point(event.ndc);
                self.drag_offset =
                    point - Vec2::new(avatar.container.position.x, avatar.container.position.y);
            }
            self.mode = Some(DragMode::Translate);
        } else if middle || (primary && event.ctrl && !event.shift) {
            self.mode = Some(DragMode::Rotate);
        } else if primary && event.shift && !event.ctrl {
            self.mode = Some(DragMode::Scale);
        }
    }

    pub fn pointer_move(&mut self, stage: &mut Stage, event: &PointerEvent) {
        if stage.settings().lock_models {
            return;
        }

        if let (Some(mode), Some(character)) = (self.mode, self.drag_character.clone()) {
            match mode {
                DragMode::Translate => {
                    let point = stage.camera.drag_plane_point(event.ndc) - self.drag_offset;
                    if let Some(avatar) = stage.avatar_mut(&character) {
                        avatar.container.position = Vec3::new(point.x, point.y, 0.0);
                        let model_path = avatar.model_path.clone();
                        let record = stage.settings_mut().ensure_model(&model_path);
                        record.x = round2(point.x);
                        record.y = round2(point.y);
                    }
                }
                DragMode::Rotate => {
                    let delta = (self.previous_pointer - event.norm) * ROTATE_GAIN;
                    if let Some(avatar) = stage.avatar_mut(&character) {
                        avatar.container.rotation.x -= delta.y;
                        avatar.container.rotation.y -= delta.x;
                        let rx = avatar.container.rotation.x;
                        let ry = avatar.container.rotation.y;
                        let model_path = avatar.model_path.clone();
                        let record = stage.settings_mut().ensure_model(&model_path);
                        record.rx = round2(rx);
                        record.ry = round2(ry);
                    }
                }
                DragMode::Scale => {
                    let delta_y = (self.previous_pointer.y - event.norm.y) * ROTATE_GAIN;
                    let factor = if delta_y > 0.0 {
                        DRAG_SCALE_UP
                    } else {
                        DRAG_SCALE_DOWN
                    };
                    if let Some(avatar) = stage.avatar_mut(&character) {
                        let scale = avatar.rescale(factor);
                        let model_path = avatar.model_path.clone();
                        stage.settings_mut().ensure_model(&model_path).scale = round2(scale);
                    }
                }
            }
        }

        self.previous_pointer = event.norm;
    }

    pub fn pointer_up(&mut self) {
        self.pointer_down = false;
        self.mode = None;
        self.drag_character = None;
    }

    /// Discrete scale step when the wheel turns over a body collider
    pub fn wheel(&mut self, stage: &mut Stage, event: &WheelEvent) {
        if stage.settings().lock_models || event.delta_y == 0.0 || !stage.is_active() {
            return;
        }

        let ray = stage.camera.screen_ray(event.ndc);
        let factor = if event.delta_y > 0.0 {
            WHEEL_SCALE_DOWN
        } else {
            WHEEL_SCALE_UP
        };

        for character in stage.characters() {
            let hit = stage
                .avatar(&character)
                .is_some_and(|a| a.collider.intersect(&ray).is_some());
            if !hit {
                continue;
            }
            if let Some(avatar) = stage.avatar_mut(&character) {
                let scale = avatar.rescale(factor);
                let model_path = avatar.model_path.clone();
                stage.settings_mut().ensure_model(&model_path).scale = round2(scale);
            }
            break;
        }
    }

    /// Resolve the pending click once its debounce delay has elapsed. A
    /// pointer still held down means the press became a drag and the click
    /// is discarded.
    pub fn update(&mut self, stage: &mut Stage) {
        let due = self
            .pending_click
            .as_ref()
            .is_some_and(|p| stage.now() >= p.due);
        if !due {
            return;
        }
        let Some(pending) = self.pending_click.take() else {
            return;
        };
        if self.pointer_down {
            return;
        }

        self.dispatch_click(stage, &pending.character, pending.part);
    }

    fn dispatch_click(&mut self, stage: &mut Stage, character: &str, part: BodyPart) {
        let Some(avatar) = stage.avatar(character) else {
            return;
        };
        let model_path = avatar.model_path.clone();
        let Some(mapping) = stage
            .settings()
            .model(&model_path)
            .and_then(|r| r.hitboxes_mapping.get(part.key()))
            .cloned()
        else {
            return;
        };

        tracing::debug!(
            "Hit volume click: {} / {} -> {:?}",
            character,
            part.key(),
            mapping
        );

        if mapping.expression != "none" {
            stage.set_expression(character, &mapping.expression);
        }
        if mapping.motion != "none" {
            if let Err(e) = stage.set_motion(character, &mapping.motion, false, true, true) {
                tracing::warn!("Hit volume motion failed: {}", e);
            }
        }

        if mapping.message.is_empty() {
            tracing::debug!("Mapped message empty, nothing to stage");
            return;
        }

        // Suppress a repeat of the exact same interaction right after the
        // matching user turn went out
        if self.last_turn_was_user
            && self.previous_interaction == (character.to_string(), mapping.message.clone())
        {
            tracing::debug!("Same as last interaction, nothing staged");
            return;
        }

        self.previous_interaction = (character.to_string(), mapping.message.clone());
        self.staged.push(StagedMessage {
            character: character.to_string(),
            message: mapping.message,
            auto_send: stage.settings().auto_send_hitbox_message,
        });
    }
}

impl Default for InteractionController {
    fn default() -> Self {
        Self::new()
    }
}

fn round2(value: f32) -> f32 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::AssetLibrary;
    use crate::config::{Settings, MAX_SCALE};
    use crate::rig::testing::MockSource;
    use std::sync::Arc;

    fn stage_with_bob() -> Stage {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("model")).unwrap();
        std::fs::create_dir_all(dir.path().join("animation")).unwrap();
        std::fs::write(dir.path().join("model/bob.vrm"), b"x").unwrap();
        std::fs::write(dir.path().join("animation/pat1.bvh"), b"x").unwrap();

        let mut settings = Settings::default();
        settings.enabled = true;
        settings
            .character_model_mapping
            .insert("Bob".to_string(), "bob.vrm".to_string());
        {
            let record = settings.ensure_model("bob.vrm");
            record.scale = 1.0;
            let head = record.hitboxes_mapping.get_mut("head").unwrap();
            head.expression = "surprised".to_string();
            head.motion = "none".to_string();
            head.message = "Ouch!".to_string();
        }

        let mut stage = Stage::new(settings, AssetLibrary::scan(dir.path()), Arc::new(MockSource::new()));
        stage.load_scene();
        stage.set_model("Bob", "bob.vrm").unwrap();

        // Keep only the head volume so the center ray has one unambiguous target
        stage
            .avatar_mut("Bob")
            .unwrap()
            .hitboxes
            .retain(|part, _| *part == BodyPart::Head);

        // One tick anchors the volumes to their bones
        stage.update(0.01);
        stage
    }

    fn click_event() -> PointerEvent {
        PointerEvent {
            ndc: Vec2::ZERO,
            norm: Vec2::new(0.5, 0.5),
            button: Some(PointerButton::Primary),
            ctrl: false,
            shift: false,
        }
    }

    fn click(stage: &mut Stage, controller: &mut InteractionController) {
        controller.pointer_down(stage, &click_event());
        controller.pointer_up();
        stage.update(HITBOX_CLICK_DELAY as f32 + 0.05);
        controller.update(stage);
    }

    #[test]
    fn test_scenario_b_click_stages_once() {
        let mut stage = stage_with_bob();
        let mut controller = InteractionController::new();

        click(&mut stage, &mut controller);

        let avatar = stage.avatar("Bob").unwrap();
        assert_eq!(avatar.expression, "surprised");
        // Mapped motion "none" leaves the motion untouched
        assert_eq!(avatar.motion.name, "none");

        let staged = controller.take_staged();
        assert_eq!(staged.len(), 1);
        assert_eq!(staged[0].message, "Ouch!");
        assert_eq!(staged[0].character, "Bob");

        // The staged message went out as a user turn; an identical click
        // right after stays suppressed
        controller.note_chat_turn(true);
        click(&mut stage, &mut controller);
        assert!(controller.take_staged().is_empty());

        // After a non-user turn the interaction may repeat
        controller.note_chat_turn(false);
        click(&mut stage, &mut controller);
        assert_eq!(controller.take_staged().len(), 1);
    }

    #[test]
    fn test_held_pointer_cancels_click() {
        let mut stage = stage_with_bob();
        let mut controller = InteractionController::new();

        controller.pointer_down(&mut stage, &click_event());
        // Pointer stays down past the debounce window
        stage.update(HITBOX_CLICK_DELAY as f32 + 0.05);
        controller.update(&mut stage);

        assert_eq!(stage.avatar("Bob").unwrap().expression, "neutral");
        assert!(controller.take_staged().is_empty());
    }

    #[test]
    fn test_translate_drag_persists_position() {
        let mut stage = stage_with_bob();
        let mut controller = InteractionController::new();

        controller.pointer_down(&mut stage, &click_event());
        let mut move_event = click_event();
        move_event.ndc = Vec2::new(0.2, 0.1);
        move_event.norm = Vec2::new(0.6, 0.45);
        controller.pointer_move(&mut stage, &move_event);
        controller.pointer_up();

        let avatar = stage.avatar("Bob").unwrap();
        assert!(avatar.container.position.x > 0.0);
        assert!(avatar.container.position.y > 0.0);

        let record = stage.settings().model("bob.vrm").unwrap();
        assert!(record.x > 0.0);
        assert!(record.y > 0.0);
    }

    #[test]
    fn test_rotate_drag_persists_rotation() {
        let mut stage = stage_with_bob();
        let mut controller = InteractionController::new();

        let mut down = click_event();
        down.button = Some(PointerButton::Middle);
        controller.pointer_down(&mut stage, &down);

        let mut move_event = down;
        move_event.norm = Vec2::new(0.4, 0.4);
        controller.pointer_move(&mut stage, &move_event);
        controller.pointer_up();

        let avatar = stage.avatar("Bob").unwrap();
        assert!(avatar.container.rotation.y != 0.0);
        let record = stage.settings().model("bob.vrm").unwrap();
        assert!(record.ry != 0.0);
    }

    #[test]
    fn test_wheel_scales_and_clamps() {
        let mut stage = stage_with_bob();
        let mut controller = InteractionController::new();

        let event = WheelEvent {
            ndc: Vec2::ZERO,
            delta_y: -1.0,
        };
        for _ in 0..100 {
            controller.wheel(&mut stage, &event);
        }

        let avatar = stage.avatar("Bob").unwrap();
        assert_eq!(avatar.container.scale.x, MAX_SCALE);
        assert_eq!(stage.settings().model("bob.vrm").unwrap().scale, MAX_SCALE);
    }

    #[test]
    fn test_lock_models_blocks_manipulation() {
        let mut stage = stage_with_bob();
        stage.settings_mut().lock_models = true;
        let mut controller = InteractionController::new();

        controller.pointer_down(&mut stage, &click_event());
        let mut move_event = click_event();
        move_event.ndc = Vec2::new(0.4, 0.2);
        move_event.norm = Vec2::new(0.7, 0.4);
        controller.pointer_move(&mut stage, &move_event);

        assert_eq!(stage.avatar("Bob").unwrap().container.position.x, 0.0);

        controller.wheel(
            &mut stage,
            &WheelEvent {
                ndc: Vec2::ZERO,
                delta_y: -1.0,
            },
        );
        assert_eq!(stage.avatar("Bob").unwrap().container.scale.x, 1.0);

        // Hit-volume clicks still work while locked
        controller.pointer_up();
        stage.update(HITBOX_CLICK_DELAY as f32 + 0.05);
        controller.update(&mut stage);
        assert_eq!(stage.avatar("Bob").unwrap().expression, "surprised");
    }

    #[test]
    fn test_click_on_empty_space_does_nothing() {
        let mut stage = stage_with_bob();
        let mut controller = InteractionController::new();

        let mut event = click_event();
        event.ndc = Vec2::new(0.95, 0.95);
        controller.pointer_down(&mut stage, &event);
        controller.pointer_up();
        stage.update(HITBOX_CLICK_DELAY as f32 + 0.05);
        controller.update(&mut stage);

        assert_eq!(stage.avatar("Bob").unwrap().expression, "neutral");
        assert!(controller.take_staged().is_empty());
    }
}
