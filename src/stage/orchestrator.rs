//! The scene orchestrator.
//!
//! `Stage` owns every piece of live scene state: the avatar registry, both
//! parsed-asset caches, the camera, the light, and the frame clock. The
//! host drives it through explicit operations (`load_scene`,
//! `load_all_models`, `set_model`, `set_expression`, `set_motion`, ...) and
//! a per-frame `update` tick. Nothing here is allowed to leave an avatar in
//! a state where the tick throws: failures are logged, reported to the
//! caller, and contained.

use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::HashMap;
use std::sync::Arc;

use crate::animation::{AnimationResolver, ClipCache, ModelCache};
use crate::assets::AssetLibrary;
use crate::config::Settings;
use crate::error::{Result, StageError};
use crate::lipsync::{AudioBuffer, LipSyncJob};
use crate::rig::{HumanoidRig, ModelSource};
use crate::stage::avatar::{AvatarInstance, ModelShell, MotionFallback, MotionState};
use crate::stage::camera::Camera;
use crate::stage::mixer::ANIMATION_FADE_TIME;

/// Directional light state derived from settings
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Light {
    /// Linear RGB, 0..1
    pub color: [f32; 3],
    /// 0..1 (settings store percent)
    pub intensity: f32,
}

impl Default for Light {
    fn default() -> Self {
        Self {
            color: [1.0, 1.0, 1.0],
            intensity: 1.0,
        }
    }
}

/// Parse `#rgb` / `#rrggbb` (leading `#` optional) into linear RGB
pub fn parse_hex_color(color: &str) -> Result<[f32; 3]> {
    let hex = color.trim().trim_start_matches('#');
    let expanded = match hex.len() {
        3 => hex
            .chars()
            .flat_map(|c| [c, c])
            .collect::<String>(),
        6 => hex.to_string(),
        _ => return Err(StageError::LightColor(color.to_string()).into()),
    };

    let mut rgb = [0.0f32; 3];
    for (i, channel) in rgb.iter_mut().enumerate() {
        let byte = u8::from_str_radix(&expanded[i * 2..i * 2 + 2], 16)
            .map_err(|_| StageError::LightColor(color.to_string()))?;
        *channel = byte as f32 / 255.0;
    }
    Ok(rgb)
}

/// Token for an in-flight model load. Completion is discarded when the
/// character was unloaded or the scene was rebuilt in the meantime.
#[derive(Debug, Clone)]
pub struct LoadTicket {
    character: String,
    generation: u64,
    epoch: u64,
}

/// Owner of all live scene state
pub struct Stage {
    settings: Settings,
    assets: AssetLibrary,
    resolver: AnimationResolver,
    source: Arc<dyn ModelSource>,
    avatars: HashMap<String, AvatarInstance>,
    model_cache: ModelCache,
    clip_cache: ClipCache,
    pub camera: Camera,
    light: Light,
    surface_active: bool,
    fallback_visible: bool,
    clock: f64,
    /// Bumped on every scene rebuild; stale tickets are discarded
    epoch: u64,
    avatar_seq: u64,
    load_gens: HashMap<String, u64>,
    lipsync: Option<LipSyncJob>,
    lipsync_seq: u64,
    roster: Vec<String>,
    rng: StdRng,
    settings_dirty: bool,
}

impl Stage {
    pub fn new(settings: Settings, assets: AssetLibrary, source: Arc<dyn ModelSource>) -> Self {
        let resolver = AnimationResolver::new(assets.animations().to_vec());
        Self {
            settings,
            assets,
            resolver,
            source,
            avatars: HashMap::new(),
            model_cache: ModelCache::new(),
            clip_cache: ClipCache::new(),
            camera: Camera::default(),
            light: Light::default(),
            surface_active: false,
            fallback_visible: true,
            clock: 0.0,
            epoch: 0,
            avatar_seq: 0,
            load_gens: HashMap::new(),
            lipsync: None,
            lipsync_seq: 0,
            roster: Vec::new(),
            rng: StdRng::from_entropy(),
            settings_dirty: false,
        }
    }

    // ---- accessors ----

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Mutable settings access; marks the settings dirty for the saver
    pub fn settings_mut(&mut self) -> &mut Settings {
        self.settings_dirty = true;
        &mut self.settings
    }

    /// Drain the dirty flag (the debounced saver calls this)
    pub fn take_settings_dirty(&mut self) -> bool {
        std::mem::take(&mut self.settings_dirty)
    }

    pub fn assets(&self) -> &AssetLibrary {
        &self.assets
    }

    pub fn resolver(&self) -> &AnimationResolver {
        &self.resolver
    }

    pub fn light(&self) -> Light {
        self.light
    }

    pub fn now(&self) -> f64 {
        self.clock
    }

    /// Whether a render surface is attached (the extension is enabled and
    /// the scene was loaded)
    pub fn is_active(&self) -> bool {
        self.surface_active
    }

    /// Whether the host's fallback 2D presentation should be visible
    pub fn fallback_visible(&self) -> bool {
        self.fallback_visible
    }

    pub fn has_avatar(&self, character: &str) -> bool {
        self.avatars.contains_key(character)
    }

    pub fn avatar(&self, character: &str) -> Option<&AvatarInstance> {
        self.avatars.get(character)
    }

    pub fn avatar_mut(&mut self, character: &str) -> Option<&mut AvatarInstance> {
        self.avatars.get_mut(character)
    }

    /// Loaded characters, sorted for deterministic iteration
    pub fn characters(&self) -> Vec<String> {
        let mut names: Vec<String> = self.avatars.keys().cloned().collect();
        names.sort();
        names
    }

    /// Live rig accessor for UI collaborators
    pub fn rig(&self, character: &str) -> Option<&dyn HumanoidRig> {
        self.avatars.get(character).map(|a| a.rig.as_ref())
    }

    /// Last roster passed to `load_all_models`
    pub fn roster(&self) -> &[String] {
        &self.roster
    }

    /// First roster member, the default target of imperative commands
    pub fn default_character(&self) -> Option<String> {
        self.roster.first().cloned().or_else(|| {
            let mut names = self.characters();
            names.sort();
            names.into_iter().next()
        })
    }

    /// Replace the asset listing (refresh button / folder rescan)
    pub fn rescan_assets(&mut self, assets: AssetLibrary) {
        self.resolver = AnimationResolver::new(assets.animations().to_vec());
        self.assets = assets;
    }

    // ---- scene lifecycle ----

    /// Tear down and rebuild the whole scene. With the extension disabled
    /// this leaves no surface attached and restores the host's fallback
    /// presentation; otherwise it resets camera, light and helpers and
    /// leaves an empty registry ready for `load_all_models`.
    pub fn load_scene(&mut self) {
        self.epoch += 1;
        self.teardown_avatars();
        self.model_cache.clear();
        self.clip_cache.clear();
        self.lipsync = None;
        self.clock = 0.0;

        if !self.settings.enabled {
            self.surface_active = false;
            self.fallback_visible = true;
            tracing::debug!("Scene disabled, surface torn down");
            return;
        }

        self.surface_active = true;
        self.fallback_visible = false;

        let aspect = self.camera.aspect;
        self.camera = Camera::default();
        self.camera.aspect = aspect;

        let color = self.settings.light_color.clone();
        let intensity = self.settings.light_intensity;
        if let Err(e) = self.set_light(&color, intensity) {
            tracing::warn!("Invalid persisted light color, using white: {}", e);
            self.light = Light {
                color: [1.0, 1.0, 1.0],
                intensity: intensity as f32 / 100.0,
            };
        }
    }

    /// Explicit teardown: everything released, surface detached
    pub fn teardown(&mut self) {
        self.epoch += 1;
        self.teardown_avatars();
        self.model_cache.clear();
        self.clip_cache.clear();
        self.lipsync = None;
        self.surface_active = false;
        self.fallback_visible = true;
    }

    fn teardown_avatars(&mut self) {
        for (_, avatar) in self.avatars.drain() {
            let mut shell = avatar.into_shell();
            shell.rig.dispose();
        }
    }

    /// Reconcile the avatar registry against a new roster: avatars whose
    /// character left are unloaded, characters with a configured model are
    /// attached. Idempotent; repeated calls with the same roster are no-ops.
    pub fn load_all_models(&mut self, characters: &[String]) {
        self.roster = characters.to_vec();

        let leaving: Vec<String> = self
            .avatars
            .keys()
            .filter(|name| !characters.contains(name))
            .cloned()
            .collect();
        for name in leaving {
            self.unload_model(&name);
        }

        if !self.settings.enabled || !self.surface_active {
            return;
        }

        for character in characters {
            let Some(model_path) = self.settings.character_model_mapping.get(character).cloned()
            else {
                continue;
            };

            if self
                .avatars
                .get(character)
                .is_some_and(|a| a.model_path == model_path)
            {
                continue;
            }

            tracing::debug!("Loading model of {}: {}", character, model_path);
            if let Err(e) = self.set_model(character, &model_path) {
                tracing::warn!("Failed to load model for {}: {}", character, e);
            }
        }
    }

    // ---- model load / unload ----

    /// Start an asynchronous model load. The returned ticket must be
    /// passed to `complete_model_load`; tickets are invalidated by
    /// `unload_model`, a newer load for the same character, and scene
    /// rebuilds.
    pub fn begin_model_load(&mut self, character: &str) -> LoadTicket {
        let generation = self.load_gens.entry(character.to_string()).or_insert(0);
        *generation += 1;
        LoadTicket {
            character: character.to_string(),
            generation: *generation,
            epoch: self.epoch,
        }
    }

    /// Parse a model (or check it out of the cache) for attachment
    pub fn obtain_shell(&mut self, model_path: &str) -> Result<ModelShell> {
        if let Some(shell) = self.model_cache.take(model_path) {
            tracing::debug!("Model loaded from cache: {}", model_path);
            return Ok(shell);
        }
        let rig = self.source.load_model(model_path)?;
        Ok(ModelShell::new(rig, self.settings.hitboxes))
    }

    /// Finish a model load. A stale ticket discards the result; a load
    /// failure clears the character's model assignment so the settings UI
    /// stops pointing at a broken file.
    pub fn complete_model_load(
        &mut self,
        ticket: LoadTicket,
        model_path: &str,
        result: Result<ModelShell>,
    ) -> Result<()> {
        let current = self.load_gens.get(&ticket.character).copied().unwrap_or(0);
        if ticket.epoch != self.epoch || ticket.generation != current {
            tracing::debug!(
                "Discarding stale model load for {} ({})",
                ticket.character,
                model_path
            );
            if let Ok(mut shell) = result {
                shell.rig.dispose();
            }
            return Ok(());
        }

        match result {
            Err(e) => {
                tracing::warn!(
                    "Model load failed for {}, clearing assignment: {}",
                    ticket.character,
                    e
                );
                self.settings
                    .character_model_mapping
                    .remove(&ticket.character);
                self.settings_dirty = true;
                Err(e)
            }
            Ok(shell) => {
                self.attach(&ticket.character, model_path, shell);
                Ok(())
            }
        }
    }

    /// Attach one avatar for a character, synchronously. On parse failure
    /// the character's configured model is cleared and the character left
    /// detached.
    pub fn set_model(&mut self, character: &str, model_path: &str) -> Result<()> {
        if !self.surface_active {
            return Err(StageError::SceneInactive.into());
        }
        let ticket = self.begin_model_load(character);
        let shell = self.obtain_shell(model_path);
        self.complete_model_load(ticket, model_path, shell)
    }

    fn attach(&mut self, character: &str, model_path: &str, shell: ModelShell) {
        // Replace any previous avatar for the character
        self.unload_avatar_only(character);

        if !self.settings.model_settings.contains_key(model_path) {
            self.settings.ensure_model(model_path);
            self.settings_dirty = true;
        }
        let record = self
            .settings
            .model(model_path)
            .cloned()
            .unwrap_or_default();

        self.avatar_seq += 1;
        let mut avatar = AvatarInstance::from_shell(character, model_path, self.avatar_seq, shell);
        avatar.apply_transform(&record);
        self.avatars.insert(character.to_string(), avatar);

        if record.animation_default.expression != "none" {
            tracing::debug!(
                "Set default expression to {}",
                record.animation_default.expression
            );
            self.set_expression(character, &record.animation_default.expression);
        }
        if record.animation_default.motion != "none" {
            tracing::debug!("Set default motion to {}", record.animation_default.motion);
            if let Err(e) = self.set_motion(character, &record.animation_default.motion, true, false, true)
            {
                tracing::warn!("Default motion failed for {}: {}", character, e);
            }
        }

        self.warm_clip_cache(character);
    }

    /// Parse every animation reachable from the model's mappings into the
    /// clip cache. Only runs with animation caching enabled; parse failures
    /// skip the file without poisoning anything.
    fn warm_clip_cache(&mut self, character: &str) {
        if !self.settings.animations_cache {
            return;
        }
        let Some(model_path) = self.avatars.get(character).map(|a| a.model_path.clone()) else {
            return;
        };
        let Some(record) = self.settings.model(&model_path) else {
            return;
        };

        let motions = record.mapped_motions();
        let files: Vec<String> = self
            .resolver
            .files()
            .iter()
            .filter(|file| motions.iter().any(|m| file.contains(m.as_str())))
            .cloned()
            .collect();

        let source = Arc::clone(&self.source);
        for file in files {
            if self.clip_cache.contains(&model_path, &file) {
                continue;
            }
            let loaded = {
                let Some(avatar) = self.avatars.get(character) else {
                    return;
                };
                source.load_clip(avatar.rig.as_ref(), &file)
            };
            match loaded {
                Ok(clip) => self.clip_cache.put(&model_path, &file, clip),
                Err(e) => tracing::warn!("Skipping uncacheable animation {}: {}", file, e),
            }
        }
    }

    fn unload_avatar_only(&mut self, character: &str) {
        if let Some(avatar) = self.avatars.remove(character) {
            tracing::debug!("Unloading avatar of {}", character);
            let model_path = avatar.model_path.clone();
            let mut shell = avatar.into_shell();
            if self.settings.models_cache {
                self.model_cache.put(&model_path, shell);
            } else {
                shell.rig.dispose();
            }
        }

        if self
            .lipsync
            .as_ref()
            .is_some_and(|job| job.character == character)
        {
            self.lipsync = None;
        }
    }

    /// Detach a character's avatar, stopping all clips. Cached models keep
    /// their rig; otherwise resources are released. Safe on an unloaded
    /// character.
    pub fn unload_model(&mut self, character: &str) {
        // Invalidate any in-flight load for the character
        *self.load_gens.entry(character.to_string()).or_insert(0) += 1;
        self.unload_avatar_only(character);
    }

    /// Re-apply persisted scale/position/rotation without reloading
    pub fn update_model(&mut self, character: &str) {
        let Some(avatar) = self.avatars.get(character) else {
            return;
        };
        let Some(record) = self.settings.model(&avatar.model_path).cloned() else {
            return;
        };
        if let Some(avatar) = self.avatars.get_mut(character) {
            avatar.apply_transform(&record);
            tracing::debug!("Updated model transform of {}", character);
        }
    }

    // ---- cache toggles ----

    pub fn set_models_cache_enabled(&mut self, enabled: bool) {
        self.settings.models_cache = enabled;
        self.settings_dirty = true;
        if !enabled {
            self.model_cache.clear();
            tracing::debug!("Cleared model cache");
        }
    }

    pub fn set_animations_cache_enabled(&mut self, enabled: bool) {
        self.settings.animations_cache = enabled;
        self.settings_dirty = true;
        if !enabled {
            self.clip_cache.clear();
            tracing::debug!("Cleared animation cache");
        }
    }

    /// Hit-volume construction is decided at load time, so flipping the
    /// feature invalidates every cached model
    pub fn set_hitboxes_enabled(&mut self, enabled: bool) {
        self.settings.hitboxes = enabled;
        self.settings_dirty = true;
        self.model_cache.clear();
    }

    // ---- expression / motion / light ----

    /// Switch a character's expression. Requests for characters without a
    /// loaded instance are logged no-ops.
    pub fn set_expression(&mut self, character: &str, value: &str) {
        let now = self.clock;
        let lipsync_active = self.settings.tts_lip_sync
            && self
                .lipsync
                .as_ref()
                .is_some_and(|job| job.character == character);

        let Some(avatar) = self.avatars.get_mut(character) else {
            tracing::debug!(
                "Requested expression for character without avatar: {}",
                character
            );
            return;
        };

        let talking = avatar.is_talking(now) || lipsync_active;
        tracing::debug!(
            "Switch expression of {} from {} to {}",
            character,
            avatar.expression,
            value
        );
        avatar.set_expression(value, talking);
    }

    /// Switch a character's motion, crossfading per the fixed fade time.
    ///
    /// "none" fades out the current clip. Otherwise the request resolves
    /// through the group resolver (`random`), identical re-requests are
    /// skipped unless `looped` or `force`, and non-looping clips schedule a
    /// fall-back to the model's default motion at `duration - fade`.
    pub fn set_motion(
        &mut self,
        character: &str,
        motion: &str,
        looped: bool,
        force: bool,
        random: bool,
    ) -> Result<()> {
        let now = self.clock;
        if !self.avatars.contains_key(character) {
            tracing::debug!(
                "Requested motion for character without avatar: {}",
                character
            );
            return Ok(());
        }

        if motion == "none" {
            if let Some(avatar) = self.avatars.get_mut(character) {
                if let Some(action) = avatar.motion.action.take() {
                    avatar.mixer.fade_out(action, ANIMATION_FADE_TIME);
                }
                avatar.motion.name = "none".to_string();
                avatar.fallback = None;
            }
            return Ok(());
        }

        let resolved = self.resolver.resolve(motion, random, &mut self.rng)?;

        let (model_path, current_name) = match self.avatars.get(character) {
            Some(avatar) => (avatar.model_path.clone(), avatar.motion.name.clone()),
            None => return Ok(()),
        };

        tracing::debug!(
            "Switch motion of {} from {} to {} (loop={} force={} random={})",
            character,
            current_name,
            resolved,
            looped,
            force,
            random
        );

        // Re-applying the same clip is a no-op unless forced or looping
        if current_name == resolved && !looped && !force {
            return Ok(());
        }

        let clip = match self.clip_cache.get(&model_path, &resolved) {
            Some(clip) => clip,
            None => {
                let loaded = {
                    let Some(avatar) = self.avatars.get(character) else {
                        return Ok(());
                    };
                    self.source.load_clip(avatar.rig.as_ref(), &resolved)?
                };
                if self.settings.animations_cache {
                    self.clip_cache
                        .put(&model_path, &resolved, Arc::clone(&loaded));
                }
                loaded
            }
        };

        let Some(avatar) = self.avatars.get_mut(character) else {
            return Ok(());
        };
        if let Some(previous) = avatar.motion.action.take() {
            avatar.mixer.fade_out(previous, ANIMATION_FADE_TIME);
        }

        let action = avatar.mixer.play(Arc::clone(&clip), ANIMATION_FADE_TIME);
        avatar.motion = MotionState {
            name: resolved,
            action: Some(action),
        };
        avatar.fallback = (!looped).then(|| MotionFallback {
            due: now + (clip.duration - ANIMATION_FADE_TIME).max(0.0) as f64,
            action,
        });

        Ok(())
    }

    /// Update the directional light and persist the values
    pub fn set_light(&mut self, color: &str, intensity: u32) -> Result<()> {
        let rgb = parse_hex_color(color)?;
        let intensity = intensity.min(100);
        self.light = Light {
            color: rgb,
            intensity: intensity as f32 / 100.0,
        };
        self.settings.light_color = color.to_string();
        self.settings.light_intensity = intensity;
        self.settings_dirty = true;
        Ok(())
    }

    // ---- chat-driven behavior ----

    /// Apply the mappings for a classified message label: the model's
    /// per-label expression/motion, falling back to its defaults when a
    /// side resolves to "none".
    pub fn apply_classified(&mut self, character: &str, label: &str) {
        let Some(model_path) = self.settings.character_model_mapping.get(character).cloned()
        else {
            tracing::debug!("No model assigned to {}", character);
            return;
        };
        let Some(record) = self.settings.model(&model_path) else {
            return;
        };

        let mapping = record
            .classify_mapping
            .get(label)
            .cloned()
            .unwrap_or_default();

        let mut expression = mapping.expression;
        if expression == "none" {
            expression = record.animation_default.expression.clone();
        }
        let mut motion = mapping.motion;
        if motion == "none" {
            motion = record.animation_default.motion.clone();
        }

        tracing::debug!(
            "Applying classified label {} for {}: {} / {}",
            label,
            character,
            expression,
            motion
        );

        self.set_expression(character, &expression);
        if let Err(e) = self.set_motion(character, &motion, false, false, true) {
            tracing::warn!("Classified motion failed for {}: {}", character, e);
        }
    }

    /// Extend the character's mouth animation from message text. Skipped
    /// when TTS lip sync owns the mouth.
    pub fn talk(&mut self, character: &str, text: &str) {
        if self.settings.tts_lip_sync {
            return;
        }
        let now = self.clock;
        let Some(avatar) = self.avatars.get_mut(character) else {
            tracing::debug!("No avatar loaded for {}, cannot animate talk", character);
            return;
        };
        avatar.talk_for_text(now, text.chars().count());
    }

    /// Override the mouth with amplitude-driven lip sync for the duration
    /// of the buffer. A newer job supersedes the current one.
    pub fn start_lip_sync(&mut self, character: &str, buffer: AudioBuffer) {
        if !self.settings.tts_lip_sync {
            return;
        }
        if !self.avatars.contains_key(character) {
            tracing::debug!("No avatar loaded for {}, ignoring lip sync", character);
            return;
        }
        self.lipsync_seq += 1;
        tracing::debug!("Starting lip sync job {} for {}", self.lipsync_seq, character);
        self.lipsync = Some(LipSyncJob::new(self.lipsync_seq, character, buffer));
    }

    /// Surface resized by the host
    pub fn resize(&mut self, width: u32, height: u32) {
        self.camera.resize(width, height);
    }

    // ---- per-frame tick ----

    /// Advance the scene by `dt` seconds: mixers, gaze, blink, mouth,
    /// hit-volume transforms and deferred motion fallbacks. Does nothing
    /// while no surface is attached.
    pub fn update(&mut self, dt: f32) {
        if !self.surface_active {
            return;
        }
        self.clock += dt as f64;
        let now = self.clock;

        // Lip-sync playback, ending with a mouth release
        let mut lipsync_level: Option<(String, f32)> = None;
        let mut lipsync_finished: Option<String> = None;
        if let Some(job) = &mut self.lipsync {
            match job.advance(dt as f64) {
                Some(level) => lipsync_level = Some((job.character.clone(), level)),
                None => {
                    tracing::debug!("Lip sync job {} finished", job.id);
                    lipsync_finished = Some(job.character.clone());
                }
            }
        }
        if let Some(character) = lipsync_finished {
            self.lipsync = None;
            if let Some(avatar) = self.avatars.get_mut(&character) {
                avatar.release_mouth();
            }
        }

        let follow = self.settings.follow_camera;
        let show_grid = self.settings.show_grid;
        let blink_on = self.settings.blink;
        let tts = self.settings.tts_lip_sync;
        let camera_pos = self.camera.position;

        for (name, avatar) in self.avatars.iter_mut() {
            avatar
                .rig
                .set_look_at(follow.then_some(camera_pos));
            avatar.rig.update(dt);

            {
                let AvatarInstance {
                    ref mut mixer,
                    ref mut rig,
                    ..
                } = *avatar;
                mixer.update(dt, rig.as_mut());
            }

            if blink_on {
                avatar.update_blink(now, &mut self.rng);
            }

            if tts {
                if let Some((character, level)) = &lipsync_level {
                    if character == name {
                        avatar.drive_mouth_level(*level);
                    }
                }
            } else {
                avatar.drive_mouth_text(now);
            }

            avatar.update_volumes(show_grid);
        }

        // Deferred fallbacks to the default motion. The action-id check is
        // the guard against a superseded clip re-triggering the default.
        let due: Vec<(String, String)> = self
            .avatars
            .iter()
            .filter_map(|(name, avatar)| {
                let fallback = avatar.fallback?;
                if now < fallback.due || avatar.motion.action != Some(fallback.action) {
                    return None;
                }
                let motion = self
                    .settings
                    .model(&avatar.model_path)
                    .map(|r| r.animation_default.motion.clone())
                    .unwrap_or_else(|| "none".to_string());
                Some((name.clone(), motion))
            })
            .collect();

        for (name, motion) in due {
            if let Some(avatar) = self.avatars.get_mut(&name) {
                avatar.fallback = None;
            }
            if let Err(e) = self.set_motion(&name, &motion, true, false, true) {
                tracing::warn!("Fallback motion failed for {}: {}", name, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rig::testing::MockSource;

    const FILES: [&str; 4] = ["idle1.bvh", "idle2.bvh", "idle3.bvh", "wave.bvh"];

    fn library() -> AssetLibrary {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("model")).unwrap();
        std::fs::create_dir_all(dir.path().join("animation")).unwrap();
        std::fs::write(dir.path().join("model/alice.vrm"), b"x").unwrap();
        std::fs::write(dir.path().join("model/bob.vrm"), b"x").unwrap();
        for file in FILES {
            std::fs::write(dir.path().join("animation").join(file), b"x").unwrap();
        }
        AssetLibrary::scan(dir.path())
    }

    fn enabled_settings() -> Settings {
        let mut settings = Settings::default();
        settings.enabled = true;
        settings
            .character_model_mapping
            .insert("Alice".to_string(), "alice.vrm".to_string());
        settings
    }

    fn stage_with(settings: Settings) -> (Stage, Arc<MockSource>) {
        let source = Arc::new(MockSource::new());
        let mut stage = Stage::new(settings, library(), Arc::clone(&source) as Arc<dyn ModelSource>);
        stage.load_scene();
        (stage, source)
    }

    #[test]
    fn test_disabled_scene_has_no_surface() {
        let (mut stage, _) = stage_with(Settings::default());
        assert!(!stage.is_active());
        assert!(stage.fallback_visible());

        // The tick is inert without a surface
        stage.update(1.0);
        assert_eq!(stage.now(), 0.0);
    }

    #[test]
    fn test_set_model_attaches_and_applies_settings() {
        let mut settings = enabled_settings();
        {
            let record = settings.ensure_model("alice.vrm");
            record.scale = 2.0;
            record.x = 1.5;
            record.animation_default.expression = "happy".to_string();
            record.animation_default.motion = "idle".to_string();
        }
        let (mut stage, source) = stage_with(settings);

        stage.set_model("Alice", "alice.vrm").unwrap();
        assert_eq!(source.model_loads.load(std::sync::atomic::Ordering::SeqCst), 1);

        let avatar = stage.avatar("Alice").unwrap();
        assert_eq!(avatar.container.scale.x, 2.0);
        assert_eq!(avatar.container.position.x, 1.5);
        assert_eq!(avatar.rig.expression_weight("happy"), 1.0);
        // Default motion resolved into the idle group and started
        assert!(avatar.motion.name.starts_with("idle"));
        assert_eq!(avatar.mixer.active_count(), 1);
        // Looping default never schedules a fallback
        assert!(avatar.fallback.is_none());
    }

    #[test]
    fn test_model_load_failure_clears_assignment() {
        let (mut stage, source) = stage_with(enabled_settings());
        source.fail_on("alice.vrm");

        let result = stage.set_model("Alice", "alice.vrm");
        assert!(result.is_err());
        assert!(!stage.has_avatar("Alice"));
        assert!(!stage.settings().character_model_mapping.contains_key("Alice"));
    }

    #[test]
    fn test_set_model_requires_active_scene() {
        let source = Arc::new(MockSource::new());
        let mut stage = Stage::new(Settings::default(), library(), Arc::clone(&source) as Arc<dyn ModelSource>);
        // No load_scene with enabled=false: inactive
        stage.load_scene();
        assert!(stage.set_model("Alice", "alice.vrm").is_err());
    }

    #[test]
    fn test_expression_without_avatar_is_noop() {
        let (mut stage, _) = stage_with(enabled_settings());
        stage.set_expression("Ghost", "happy");
        assert!(!stage.has_avatar("Ghost"));
    }

    #[test]
    fn test_idempotent_motion_rerequest() {
        let (mut stage, _) = stage_with(enabled_settings());
        stage.set_model("Alice", "alice.vrm").unwrap();

        stage.set_motion("Alice", "idle1.bvh", false, false, false).unwrap();
        stage.set_motion("Alice", "idle1.bvh", false, false, false).unwrap();

        let avatar = stage.avatar("Alice").unwrap();
        assert_eq!(avatar.mixer.active_count(), 1);
        assert_eq!(avatar.motion.name, "idle1.bvh");
    }

    #[test]
    fn test_forced_rerequest_restarts_clip() {
        let (mut stage, _) = stage_with(enabled_settings());
        stage.set_model("Alice", "alice.vrm").unwrap();

        stage.set_motion("Alice", "idle1.bvh", false, false, false).unwrap();
        stage.set_motion("Alice", "idle1.bvh", false, true, false).unwrap();

        // Old action fading out plus the restarted one
        assert_eq!(stage.avatar("Alice").unwrap().mixer.active_count(), 2);
    }

    #[test]
    fn test_motion_none_stops_playback() {
        let (mut stage, _) = stage_with(enabled_settings());
        stage.set_model("Alice", "alice.vrm").unwrap();
        stage.set_motion("Alice", "wave.bvh", false, false, false).unwrap();

        stage.set_motion("Alice", "none", false, false, true).unwrap();
        let avatar = stage.avatar("Alice").unwrap();
        assert_eq!(avatar.motion.name, "none");
        assert!(avatar.motion.action.is_none());
        assert!(avatar.fallback.is_none());

        // Calling again while already idle stays fine
        stage.set_motion("Alice", "none", false, false, true).unwrap();
    }

    #[test]
    fn test_group_resolution_stays_in_group() {
        let (mut stage, _) = stage_with(enabled_settings());
        stage.set_model("Alice", "alice.vrm").unwrap();

        for _ in 0..20 {
            stage.set_motion("Alice", "idle", false, true, true).unwrap();
            let name = stage.avatar("Alice").unwrap().motion.name.clone();
            assert!(name.starts_with("idle"), "picked {name}");
        }
    }

    #[test]
    fn test_clip_load_failure_leaves_state_untouched() {
        let (mut stage, source) = stage_with(enabled_settings());
        stage.set_model("Alice", "alice.vrm").unwrap();
        stage.set_motion("Alice", "idle1.bvh", false, false, false).unwrap();

        source.fail_on("wave.bvh");
        let result = stage.set_motion("Alice", "wave.bvh", false, false, false);
        assert!(result.is_err());

        let avatar = stage.avatar("Alice").unwrap();
        assert_eq!(avatar.motion.name, "idle1.bvh");
        assert_eq!(avatar.mixer.active_count(), 1);
    }

    #[test]
    fn test_fallback_fires_after_clip_runs_out() {
        let mut settings = enabled_settings();
        settings.ensure_model("alice.vrm").animation_default.motion = "idle1.bvh".to_string();
        let (mut stage, _) = stage_with(settings);
        stage.set_model("Alice", "alice.vrm").unwrap();

        stage.set_motion("Alice", "wave.bvh", false, false, false).unwrap();
        let fallback = stage.avatar("Alice").unwrap().fallback.unwrap();
        let clip_duration = 2.0; // MockSource default
        assert!(
            (fallback.due - stage.now() - (clip_duration - ANIMATION_FADE_TIME) as f64).abs()
                < 1e-6
        );

        // Just before the deadline nothing changes
        stage.update(1.0);
        assert_eq!(stage.avatar("Alice").unwrap().motion.name, "wave.bvh");

        // Past it the default idle loop takes over
        stage.update(1.0);
        let avatar = stage.avatar("Alice").unwrap();
        assert!(avatar.motion.name.starts_with("idle"));
        assert!(avatar.fallback.is_none());
    }

    #[test]
    fn test_superseded_fallback_never_fires() {
        let mut settings = enabled_settings();
        settings.ensure_model("alice.vrm").animation_default.motion = "wave.bvh".to_string();
        let (mut stage, _) = stage_with(settings);
        stage.set_model("Alice", "alice.vrm").unwrap();

        stage.set_motion("Alice", "idle1.bvh", false, false, false).unwrap();
        // Manual override before the scheduled fallback comes due
        stage.set_motion("Alice", "idle2.bvh", true, false, false).unwrap();

        stage.update(5.0);
        assert_eq!(stage.avatar("Alice").unwrap().motion.name, "idle2.bvh");
    }

    #[test]
    fn test_eager_cache_parses_each_mapped_file_once() {
        let mut settings = enabled_settings();
        {
            let record = settings.ensure_model("alice.vrm");
            record.animation_default.motion = "idle".to_string();
            record.classify_mapping.get_mut("joy").unwrap().motion = "wave".to_string();
        }
        let (mut stage, source) = stage_with(settings);

        stage.set_model("Alice", "alice.vrm").unwrap();
        // idle matches idle1/2/3, wave matches wave.bvh
        assert_eq!(source.clip_loads_of("idle1.bvh"), 1);
        assert_eq!(source.clip_loads_of("idle2.bvh"), 1);
        assert_eq!(source.clip_loads_of("idle3.bvh"), 1);
        assert_eq!(source.clip_loads_of("wave.bvh"), 1);

        // Second load of the same model parses nothing anew
        stage.set_model("Alice", "alice.vrm").unwrap();
        assert_eq!(source.clip_loads_of("idle1.bvh"), 1);
        assert_eq!(source.clip_loads_of("wave.bvh"), 1);

        // Playback comes from the cache
        stage.set_motion("Alice", "wave.bvh", false, true, false).unwrap();
        assert_eq!(source.clip_loads_of("wave.bvh"), 1);
    }

    #[test]
    fn test_cache_toggle_off_forces_reparse() {
        let mut settings = enabled_settings();
        settings.ensure_model("alice.vrm").animation_default.motion = "wave".to_string();
        let (mut stage, source) = stage_with(settings);

        stage.set_model("Alice", "alice.vrm").unwrap();
        assert_eq!(source.clip_loads_of("wave.bvh"), 1);

        stage.set_animations_cache_enabled(false);
        stage.set_motion("Alice", "wave.bvh", false, true, false).unwrap();
        assert_eq!(source.clip_loads_of("wave.bvh"), 2);

        // Still uncached: every play re-parses
        stage.set_motion("Alice", "wave.bvh", false, true, false).unwrap();
        assert_eq!(source.clip_loads_of("wave.bvh"), 3);
    }

    #[test]
    fn test_model_cache_skips_reparse() {
        let (mut stage, source) = stage_with(enabled_settings());
        stage.set_model("Alice", "alice.vrm").unwrap();
        stage.unload_model("Alice");
        stage.set_model("Alice", "alice.vrm").unwrap();

        assert_eq!(source.model_loads.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[test]
    fn test_model_cache_disabled_reparses() {
        let mut settings = enabled_settings();
        settings.models_cache = false;
        let (mut stage, source) = stage_with(settings);

        stage.set_model("Alice", "alice.vrm").unwrap();
        stage.unload_model("Alice");
        stage.set_model("Alice", "alice.vrm").unwrap();

        assert_eq!(source.model_loads.load(std::sync::atomic::Ordering::SeqCst), 2);
    }

    #[test]
    fn test_hitbox_toggle_clears_model_cache() {
        let (mut stage, source) = stage_with(enabled_settings());
        stage.set_model("Alice", "alice.vrm").unwrap();
        assert!(!stage.avatar("Alice").unwrap().hitboxes.is_empty());

        stage.unload_model("Alice");
        stage.set_hitboxes_enabled(false);
        stage.set_model("Alice", "alice.vrm").unwrap();

        // Cache was cleared, so the model re-parsed without hit volumes
        assert_eq!(source.model_loads.load(std::sync::atomic::Ordering::SeqCst), 2);
        assert!(stage.avatar("Alice").unwrap().hitboxes.is_empty());
    }

    #[test]
    fn test_stale_load_ticket_is_discarded() {
        let (mut stage, _) = stage_with(enabled_settings());

        let ticket = stage.begin_model_load("Alice");
        let shell = stage.obtain_shell("alice.vrm");
        // Character unloaded while the load was in flight
        stage.unload_model("Alice");

        stage.complete_model_load(ticket, "alice.vrm", shell).unwrap();
        assert!(!stage.has_avatar("Alice"));
    }

    #[test]
    fn test_scene_reload_discards_inflight_ticket() {
        let (mut stage, _) = stage_with(enabled_settings());

        let ticket = stage.begin_model_load("Alice");
        let shell = stage.obtain_shell("alice.vrm");
        stage.load_scene();

        stage.complete_model_load(ticket, "alice.vrm", shell).unwrap();
        assert!(!stage.has_avatar("Alice"));
    }

    #[test]
    fn test_load_all_models_reconciles_roster() {
        let mut settings = enabled_settings();
        settings
            .character_model_mapping
            .insert("Bob".to_string(), "bob.vrm".to_string());
        let (mut stage, source) = stage_with(settings);

        stage.load_all_models(&["Alice".to_string(), "Bob".to_string()]);
        assert!(stage.has_avatar("Alice"));
        assert!(stage.has_avatar("Bob"));
        let loads = source.model_loads.load(std::sync::atomic::Ordering::SeqCst);

        // Repeating the same roster is a no-op
        stage.load_all_models(&["Alice".to_string(), "Bob".to_string()]);
        assert_eq!(
            source.model_loads.load(std::sync::atomic::Ordering::SeqCst),
            loads
        );

        // Bob leaves the chat
        stage.load_all_models(&["Alice".to_string()]);
        assert!(stage.has_avatar("Alice"));
        assert!(!stage.has_avatar("Bob"));
    }

    #[test]
    fn test_characters_without_configured_model_stay_detached() {
        let (mut stage, _) = stage_with(enabled_settings());
        stage.load_all_models(&["Alice".to_string(), "Carol".to_string()]);
        assert!(stage.has_avatar("Alice"));
        assert!(!stage.has_avatar("Carol"));
    }

    #[test]
    fn test_scenario_a_classified_message() {
        let mut settings = enabled_settings();
        {
            let record = settings.ensure_model("alice.vrm");
            record.animation_default.motion = "idle".to_string();
            let joy = record.classify_mapping.get_mut("joy").unwrap();
            joy.expression = "happy".to_string();
            joy.motion = "wave".to_string();
        }
        let (mut stage, _) = stage_with(settings);
        stage.set_model("Alice", "alice.vrm").unwrap();

        stage.apply_classified("Alice", "joy");

        let avatar = stage.avatar("Alice").unwrap();
        assert_eq!(avatar.expression, "happy");
        assert_eq!(avatar.rig.expression_weight("happy"), 1.0);
        assert_eq!(avatar.motion.name, "wave.bvh");
        // Non-looping: fallback to the default scheduled at duration - fade
        let fallback = avatar.fallback.unwrap();
        assert!((fallback.due - stage.now() - (2.0 - ANIMATION_FADE_TIME) as f64).abs() < 1e-6);
    }

    #[test]
    fn test_classified_none_falls_back_to_default() {
        let mut settings = enabled_settings();
        {
            let record = settings.ensure_model("alice.vrm");
            record.animation_default.expression = "relaxed".to_string();
            record.animation_default.motion = "idle1.bvh".to_string();
        }
        let (mut stage, _) = stage_with(settings);
        stage.set_model("Alice", "alice.vrm").unwrap();

        // "sadness" mapping was never configured: both sides are "none"
        stage.apply_classified("Alice", "sadness");

        let avatar = stage.avatar("Alice").unwrap();
        assert_eq!(avatar.expression, "relaxed");
        // The default motion re-resolves within its group
        assert!(avatar.motion.name.starts_with("idle"));
    }

    #[test]
    fn test_talk_caps_expression_until_deadline() {
        let (mut stage, _) = stage_with(enabled_settings());
        stage.set_model("Alice", "alice.vrm").unwrap();
        stage.set_expression("Alice", "happy");

        stage.talk("Alice", &"x".repeat(40)); // 2 seconds
        stage.update(0.1);

        let avatar = stage.avatar("Alice").unwrap();
        assert!(avatar.rig.expression_weight("happy") <= 0.25);

        stage.update(3.0);
        let avatar = stage.avatar("Alice").unwrap();
        assert_eq!(avatar.rig.expression_weight("happy"), 1.0);
        assert_eq!(avatar.rig.expression_weight("aa"), 0.0);
    }

    #[test]
    fn test_lipsync_overrides_and_restores() {
        let mut settings = enabled_settings();
        settings.tts_lip_sync = true;
        let (mut stage, _) = stage_with(settings);
        stage.set_model("Alice", "alice.vrm").unwrap();
        stage.set_expression("Alice", "happy");

        let loud: Vec<f32> = (0..48000).map(|i| (i as f32 * 0.3).sin() * 0.9).collect();
        stage.start_lip_sync("Alice", AudioBuffer::new(loud, 48000));

        stage.update(0.2);
        let avatar = stage.avatar("Alice").unwrap();
        assert!(avatar.rig.expression_weight("aa") > 0.0);
        assert!(avatar.rig.expression_weight("happy") <= 0.25);

        // Buffer exhausted: mouth closes, expression restored
        stage.update(2.0);
        let avatar = stage.avatar("Alice").unwrap();
        assert_eq!(avatar.rig.expression_weight("aa"), 0.0);
        assert_eq!(avatar.rig.expression_weight("happy"), 1.0);
    }

    #[test]
    fn test_lipsync_ignored_when_mode_off() {
        let (mut stage, _) = stage_with(enabled_settings());
        stage.set_model("Alice", "alice.vrm").unwrap();
        stage.start_lip_sync("Alice", AudioBuffer::new(vec![0.9; 4800], 48000));
        stage.update(0.05);
        assert_eq!(stage.avatar("Alice").unwrap().rig.expression_weight("aa"), 0.0);
    }

    #[test]
    fn test_blink_disabled_keeps_eyes_open() {
        let mut settings = enabled_settings();
        settings.blink = false;
        let (mut stage, _) = stage_with(settings);
        stage.set_model("Alice", "alice.vrm").unwrap();

        stage.update(0.5);
        assert_eq!(
            stage.avatar("Alice").unwrap().rig.expression_weight("blink"),
            0.0
        );
    }

    #[test]
    fn test_set_light() {
        let (mut stage, _) = stage_with(enabled_settings());
        stage.set_light("#ff0000", 50).unwrap();
        assert_eq!(stage.light().color, [1.0, 0.0, 0.0]);
        assert_eq!(stage.light().intensity, 0.5);
        assert_eq!(stage.settings().light_color, "#ff0000");

        assert!(stage.set_light("not-a-color", 50).is_err());
    }

    #[test]
    fn test_parse_hex_color_forms() {
        assert_eq!(parse_hex_color("#fff").unwrap(), [1.0, 1.0, 1.0]);
        assert_eq!(parse_hex_color("000000").unwrap(), [0.0, 0.0, 0.0]);
        assert!(parse_hex_color("#12345").is_err());
    }

    #[test]
    fn test_unload_is_safe_when_not_loaded() {
        let (mut stage, _) = stage_with(enabled_settings());
        stage.unload_model("Alice");
        stage.unload_model("Alice");
    }

    #[test]
    fn test_update_model_reapplies_transform() {
        let (mut stage, _) = stage_with(enabled_settings());
        stage.set_model("Alice", "alice.vrm").unwrap();

        stage.settings_mut().ensure_model("alice.vrm").scale = 5.0;
        stage.update_model("Alice");
        assert_eq!(stage.avatar("Alice").unwrap().container.scale.x, 5.0);
    }

    #[test]
    fn test_settings_dirty_flag() {
        let (mut stage, _) = stage_with(enabled_settings());
        assert!(!stage.take_settings_dirty());
        stage.settings_mut().show_grid = true;
        assert!(stage.take_settings_dirty());
        assert!(!stage.take_settings_dirty());
    }
}
