//! Motion name resolution.
//!
//! A requested motion may be an exact file name, a group name (shared
//! prefix with trailing digits stripped, one member picked at random), or
//! free text typed into a command, matched approximately against the known
//! file list.

use levenshtein::levenshtein;
use rand::seq::SliceRandom;
use rand::Rng;

use crate::error::AnimationError;

/// Group name of an animation file: extension stripped, trailing digit run
/// stripped. `"idle1.bvh"` and `"idle2.bvh"` both map to `"idle"`.
pub fn group_name(file: &str) -> String {
    let after_slash = file.rfind(['/', '\\']).map(|i| i + 1).unwrap_or(0);
    let stem = match file[after_slash..].rfind('.') {
        Some(dot) if dot > 0 => &file[..after_slash + dot],
        _ => file,
    };
    stem.trim_end_matches(|c: char| c.is_ascii_digit())
        .to_lowercase()
}

/// Resolves requested motion identifiers against the known animation files
#[derive(Debug, Clone, Default)]
pub struct AnimationResolver {
    /// Known animation file names, lowercased at ingestion
    files: Vec<String>,
}

impl AnimationResolver {
    pub fn new(files: Vec<String>) -> Self {
        Self {
            files: files.into_iter().map(|f| f.to_lowercase()).collect(),
        }
    }

    pub fn files(&self) -> &[String] {
        &self.files
    }

    /// Sorted, deduplicated group names of every known file
    pub fn groups(&self) -> Vec<String> {
        let mut groups: Vec<String> = self.files.iter().map(|f| group_name(f)).collect();
        groups.sort();
        groups.dedup();
        groups
    }

    /// Resolve a requested motion to one concrete file.
    ///
    /// With `random` set, the request's group is collected and one member
    /// is picked uniformly; an empty group is a resolution miss. Without
    /// `random` the literal requested path is used as-is.
    pub fn resolve<R: Rng>(
        &self,
        requested: &str,
        random: bool,
        rng: &mut R,
    ) -> Result<String, AnimationError> {
        if !random {
            return Ok(requested.to_string());
        }

        let key = group_name(requested);
        let members: Vec<&String> = self
            .files
            .iter()
            .filter(|f| group_name(f) == key)
            .collect();

        members
            .choose(rng)
            .map(|f| (*f).clone())
            .ok_or_else(|| AnimationError::NoMatch(requested.to_string()))
    }

    /// Approximate match for free-text command input. Picks the known file
    /// with the smallest edit distance to the typed text; distances beyond
    /// `max(3, len/2)` count as "not found".
    pub fn resolve_command(&self, text: &str) -> Option<String> {
        let needle = text.trim().to_lowercase();
        if needle.is_empty() {
            return None;
        }

        let best = self
            .files
            .iter()
            .map(|f| (levenshtein(&needle, f), f))
            .min_by_key(|(d, _)| *d)?;

        let ceiling = (needle.len() / 2).max(3);
        if best.0 <= ceiling {
            Some(best.1.clone())
        } else {
            None
        }
    }
}
