//! Parsed-asset caches.
//!
//! Both caches are bounded only by the asset set and the session lifetime:
//! no eviction beyond a full clear. Staleness after a feature toggle is
//! handled by the explicit `clear` calls in the orchestrator, never by the
//! cache itself.

use std::collections::HashMap;
use std::sync::Arc;

use crate::rig::AnimationClip;
use crate::stage::avatar::ModelShell;

/// Parsed animation clips keyed by (model path, motion file path).
///
/// Clips are retargeted per model, so the same motion file parsed for two
/// different models is two distinct entries.
#[derive(Default)]
pub struct ClipCache {
    entries: HashMap<(String, String), Arc<AnimationClip>>,
}

impl ClipCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, model_path: &str, motion_file: &str) -> Option<Arc<AnimationClip>> {
        self.entries
            .get(&(model_path.to_string(), motion_file.to_string()))
            .cloned()
    }

    pub fn put(&mut self, model_path: &str, motion_file: &str, clip: Arc<AnimationClip>) {
        self.entries
            .insert((model_path.to_string(), motion_file.to_string()), clip);
    }

    pub fn contains(&self, model_path: &str, motion_file: &str) -> bool {
        self.entries
            .contains_key(&(model_path.to_string(), motion_file.to_string()))
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Fully-initialized, detached model shells keyed by model file path.
///
/// Attaching a cached model checks the shell out of the cache; unloading
/// with caching enabled checks it back in. The shell is never aliased
/// between two live avatars.
#[derive(Default)]
pub struct ModelCache {
    entries: HashMap<String, ModelShell>,
}

impl ModelCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check a shell out of the cache
    pub fn take(&mut self, model_path: &str) -> Option<ModelShell> {
        self.entries.remove(model_path)
    }

    /// Check a shell back in
    pub fn put(&mut self, model_path: &str, shell: ModelShell) {
        self.entries.insert(model_path.to_string(), shell);
    }

    pub fn contains(&self, model_path: &str) -> bool {
        self.entries.contains_key(model_path)
    }

    /// Drop every cached shell, releasing their rigs
    pub fn clear(&mut self) {
        for (_, mut shell) in self.entries.drain() {
            shell.rig.dispose();
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clip(name: &str) -> Arc<AnimationClip> {
        Arc::new(AnimationClip {
            name: name.to_string(),
            duration: 1.0,
            handle: 0,
        })
    }

    #[test]
    fn test_clip_cache_keyed_per_model() {
        let mut cache = ClipCache::new();
        cache.put("a.vrm", "idle1.bvh", clip("idle1.bvh"));

        assert!(cache.get("a.vrm", "idle1.bvh").is_some());
        assert!(cache.get("b.vrm", "idle1.bvh").is_none());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_clip_cache_clear() {
        let mut cache = ClipCache::new();
        cache.put("a.vrm", "idle1.bvh", clip("idle1.bvh"));
        cache.put("a.vrm", "wave.bvh", clip("wave.bvh"));

        cache.clear();
        assert!(cache.is_empty());
        assert!(cache.get("a.vrm", "idle1.bvh").is_none());
    }

    #[test]
    fn test_model_cache_checkout_semantics() {
        use crate::rig::testing::MockRig;
        use crate::stage::avatar::ModelShell;

        let mut cache = ModelCache::new();
        cache.put("a.vrm", ModelShell::new(Box::new(MockRig::new()), false));
        assert!(cache.contains("a.vrm"));

        let shell = cache.take("a.vrm");
        assert!(shell.is_some());
        // Checked out: a second take misses
        assert!(cache.take("a.vrm").is_none());

        cache.put("a.vrm", shell.unwrap());
        assert!(cache.contains("a.vrm"));
    }
}
