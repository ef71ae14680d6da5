//! Filler Engine (spec §4.5).
//!
//! Plays a short pre-recorded clip while the model is "thinking" so the
//! call never sits in dead air. Selection cascades language → principle
//! tags → client-profile tags, falling back a tier at a time down to
//! language-only and finally "no clip available"; round-robins within
//! whichever tier matches so the same clip doesn't repeat back-to-back.
//! Grounded in the same cooldown/round-robin shape as the backchannel
//! detector this module supersedes, extended with a cross-call cooldown
//! per clip id (SPEC_FULL.md §B).

use crate::types::FillerClip;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Minimum time between two fillers of the *same clip id*, independent of
/// call boundaries — prevents a caller who calls back immediately from
/// hearing the identical clip twice in a row (SPEC_FULL.md §B).
const CROSS_CALL_COOLDOWN: Duration = Duration::from_secs(20);

pub struct FillerEngine {
    clips: Vec<FillerClip>,
    next_index: HashMap<String, usize>,
    last_played_id: Option<String>,
    last_played_at: HashMap<String, Instant>,
}

/// A selected clip, or `None` when no clip matched any fallback tier.
pub struct Selection<'a> {
    pub clip: &'a FillerClip,
}

impl FillerEngine {
    pub fn new(clips: Vec<FillerClip>) -> Self {
        Self {
            clips,
            next_index: HashMap::new(),
            last_played_id: None,
            last_played_at: HashMap::new(),
        }
    }

    pub fn clip_count(&self) -> usize {
        self.clips.len()
    }

    /// Pick a clip for `language`, preferring ones tagged with both
    /// `principle_tags` and `client_profile_tags`, then relaxing a
    /// constraint at a time (spec §4.5 cascade):
    ///   1. language + principle + client profile
    ///   2. language + principle
    ///   3. language only
    ///   4. none (silence — caller waits with no filler)
    pub fn select(&mut self, language: &str, principle_tags: &[String], client_profile_tags: &[String]) -> Option<Selection<'_>> {
        let tiers: [fn(&FillerClip, &str, &[String], &[String]) -> bool; 3] = [
            |c, lang, principle, profile| {
                c.language == lang
                    && principle.iter().any(|t| c.principle_tags.contains(t))
                    && profile.iter().any(|t| c.client_profile_tags.contains(t))
            },
            |c, lang, principle, _profile| c.language == lang && principle.iter().any(|t| c.principle_tags.contains(t)),
            |c, lang, _principle, _profile| c.language == lang,
        ];

        for predicate in tiers {
            let candidates: Vec<usize> = self
                .clips
                .iter()
                .enumerate()
                .filter(|(_, c)| predicate(c, language, principle_tags, client_profile_tags))
                .map(|(i, _)| i)
                .collect();
            if candidates.is_empty() {
                continue;
            }
            if let Some(idx) = self.pick_round_robin(language, &candidates) {
                let clip = &self.clips[idx];
                self.last_played_id = Some(clip.id.clone());
                self.last_played_at.insert(clip.id.clone(), Instant::now());
                return Some(Selection { clip });
            }
        }
        None
    }

    /// Round-robins within `candidates`, skipping a clip that's either the
    /// immediately-previous pick or still inside its cross-call cooldown,
    /// unless every candidate is excluded (then the round-robin index wins
    /// anyway — a filler late is better than a filler never).
    fn pick_round_robin(&mut self, tier_key: &str, candidates: &[usize]) -> Option<usize> {
        if candidates.is_empty() {
            return None;
        }
        let start = *self.next_index.get(tier_key).unwrap_or(&0) % candidates.len();
        let now = Instant::now();

        for offset in 0..candidates.len() {
            let idx = candidates[(start + offset) % candidates.len()];
            let clip = &self.clips[idx];
            let is_immediate_repeat = self.last_played_id.as_deref() == Some(clip.id.as_str());
            let in_cooldown = self
                .last_played_at
                .get(&clip.id)
                .map(|t| now.duration_since(*t) < CROSS_CALL_COOLDOWN)
                .unwrap_or(false);
            if !is_immediate_repeat && !in_cooldown {
                self.next_index.insert(tier_key.to_string(), (start + offset + 1) % candidates.len());
                return Some(idx);
            }
        }
        // every candidate excluded: fall back to the plain round-robin slot
        let idx = candidates[start];
        self.next_index.insert(tier_key.to_string(), (start + 1) % candidates.len());
        Some(idx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clip(id: &str, lang: &str, principle: &[&str], profile: &[&str]) -> FillerClip {
        FillerClip {
            id: id.to_string(),
            language: lang.to_string(),
            principle_tags: principle.iter().map(|s| s.to_string()).collect(),
            client_profile_tags: profile.iter().map(|s| s.to_string()).collect(),
            pcm16_16k: vec![0; 100],
            duration: Duration::from_millis(500),
        }
    }

    #[test]
    fn picks_full_match_over_language_only() {
        let clips = vec![
            clip("generic-en", "en-US", &[], &[]),
            clip("sales-en", "en-US", &["sales"], &["smb"]),
        ];
        let mut engine = FillerEngine::new(clips);
        let sel = engine.select("en-US", &["sales".into()], &["smb".into()]).unwrap();
        assert_eq!(sel.clip.id, "sales-en");
    }

    #[test]
    fn falls_back_to_language_only_when_no_tag_match() {
        let clips = vec![clip("generic-en", "en-US", &[], &[])];
        let mut engine = FillerEngine::new(clips);
        let sel = engine.select("en-US", &["sales".into()], &["smb".into()]).unwrap();
        assert_eq!(sel.clip.id, "generic-en");
    }

    #[test]
    fn no_match_returns_none() {
        let clips = vec![clip("generic-fr", "fr-FR", &[], &[])];
        let mut engine = FillerEngine::new(clips);
        assert!(engine.select("en-US", &[], &[]).is_none());
    }

    #[test]
    fn round_robins_across_same_tier_candidates() {
        let clips = vec![clip("a", "en-US", &[], &[]), clip("b", "en-US", &[], &[])];
        let mut engine = FillerEngine::new(clips);
        let first = engine.select("en-US", &[], &[]).unwrap().clip.id.clone();
        let second = engine.select("en-US", &[], &[]).unwrap().clip.id.clone();
        assert_ne!(first, second, "should not immediately repeat the same clip");
    }
}
