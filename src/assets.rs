//! Asset folder scanning.
//!
//! Models and animations live under a fixed folder convention:
//! `<assets_dir>/model` for model files and `<assets_dir>/animation` for
//! animation files. Animation file names are lowercased at ingestion; every
//! name comparison downstream relies on that.

use std::path::{Path, PathBuf};

use crate::animation::group_name;

const MODEL_EXTENSIONS: [&str; 2] = ["vrm", "glb"];
const ANIMATION_EXTENSIONS: [&str; 2] = ["bvh", "fbx"];

/// The available model and animation files
#[derive(Debug, Clone, Default)]
pub struct AssetLibrary {
    base_dir: PathBuf,
    models: Vec<String>,
    animations: Vec<String>,
}

impl AssetLibrary {
    /// Scan the asset folders. A missing folder is not an error, just an
    /// empty listing.
    pub fn scan<P: AsRef<Path>>(assets_dir: P) -> Self {
        let base_dir = assets_dir.as_ref().to_path_buf();

        let mut models = list_files(&base_dir.join("model"), &MODEL_EXTENSIONS);
        models.sort();

        let mut animations: Vec<String> = list_files(&base_dir.join("animation"), &ANIMATION_EXTENSIONS)
            .into_iter()
            .map(|f| f.to_lowercase())
            .collect();
        animations.sort();

        tracing::debug!(
            "Scanned assets: {} models, {} animations under {}",
            models.len(),
            animations.len(),
            base_dir.display()
        );

        Self {
            base_dir,
            models,
            animations,
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Model file names, relative to the model folder
    pub fn models(&self) -> &[String] {
        &self.models
    }

    /// Animation file names, lowercased, relative to the animation folder
    pub fn animations(&self) -> &[String] {
        &self.animations
    }

    /// Sorted, deduplicated animation group names
    pub fn animation_groups(&self) -> Vec<String> {
        let mut groups: Vec<String> = self.animations.iter().map(|f| group_name(f)).collect();
        groups.sort();
        groups.dedup();
        groups
    }

    /// Display label for a model entry: path separators normalized,
    /// extension stripped, leading folders dropped.
    pub fn model_label(entry: &str) -> String {
        let normalized = entry.replace('\\', "/");
        let name = normalized.rsplit('/').next().unwrap_or(&normalized);
        match name.rfind('.') {
            Some(dot) if dot > 0 => name[..dot].to_string(),
            _ => name.to_string(),
        }
    }
}

fn list_files(dir: &Path, extensions: &[&str]) -> Vec<String> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => {
            tracing::warn!("Asset folder does not exist: {}", dir.display());
            return Vec::new();
        }
    };

    entries
        .flatten()
        .filter_map(|entry| {
            let path = entry.path();
            let ext = path.extension()?.to_str()?.to_lowercase();
            if !extensions.contains(&ext.as_str()) {
                return None;
            }
            path.file_name().map(|n| n.to_string_lossy().into_owned())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn seed_assets() -> TempDir {
        let dir = TempDir::new().unwrap();
        let model_dir = dir.path().join("model");
        let anim_dir = dir.path().join("animation");
        std::fs::create_dir_all(&model_dir).unwrap();
        std::fs::create_dir_all(&anim_dir).unwrap();

        std::fs::write(model_dir.join("alice.vrm"), b"x").unwrap();
        std::fs::write(model_dir.join("bob.glb"), b"x").unwrap();
        std::fs::write(model_dir.join("notes.txt"), b"x").unwrap();

        std::fs::write(anim_dir.join("Idle1.bvh"), b"x").unwrap();
        std::fs::write(anim_dir.join("idle2.bvh"), b"x").unwrap();
        std::fs::write(anim_dir.join("Wave.fbx"), b"x").unwrap();
        std::fs::write(anim_dir.join("readme.md"), b"x").unwrap();

        dir
    }

    #[test]
    fn test_scan_filters_by_extension() {
        let dir = seed_assets();
        let library = AssetLibrary::scan(dir.path());

        assert_eq!(library.models(), &["alice.vrm", "bob.glb"]);
        assert_eq!(
            library.animations(),
            &["idle1.bvh", "idle2.bvh", "wave.fbx"]
        );
    }

    #[test]
    fn test_animations_lowercased() {
        let dir = seed_assets();
        let library = AssetLibrary::scan(dir.path());
        assert!(library.animations().iter().all(|f| *f == f.to_lowercase()));
    }

    #[test]
    fn test_animation_groups() {
        let dir = seed_assets();
        let library = AssetLibrary::scan(dir.path());
        assert_eq!(library.animation_groups(), vec!["idle", "wave"]);
    }

    #[test]
    fn test_missing_folder_is_empty() {
        let dir = TempDir::new().unwrap();
        let library = AssetLibrary::scan(dir.path().join("nope"));
        assert!(library.models().is_empty());
        assert!(library.animations().is_empty());
    }

    #[test]
    fn test_model_label() {
        assert_eq!(AssetLibrary::model_label("chars\\alice.vrm"), "alice");
        assert_eq!(AssetLibrary::model_label("bob.glb"), "bob");
        assert_eq!(AssetLibrary::model_label("plain"), "plain");
    }
}
