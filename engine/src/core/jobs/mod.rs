//! Script Generation Jobs
//!
//! A generation job produces a long video script as a sequence of dependent
//! batches. Each batch carries a continuity anchor taken from the last
//! accepted scene so the narrative stays coherent across batches.

mod generator;
mod normalize;
mod orchestrator;
mod prompt;
mod service;

pub use generator::*;
pub use normalize::*;
pub use orchestrator::*;
pub use prompt::*;
pub use service::*;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::ai::{RecoveryMode, TokenUsage};
use crate::core::{new_job_id, CoreError, CoreResult, JobId, JobKey, OrdinalRange, ProviderId};

/// Longest narration excerpt carried in a continuity anchor (chars)
const ANCHOR_SUMMARY_CHARS: usize = 400;

// =============================================================================
// Scenes
// =============================================================================

/// One unit of script output
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptScene {
    /// Position in the final script (1-based)
    pub scene_number: u32,
    pub title: String,
    /// Voice-over text
    pub narration: String,
    /// Prompt for the scene image
    pub image_prompt: String,
    /// Suggested on-screen duration
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<f32>,
    /// Recurring character description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub character_lock: Option<String>,
    /// Visual style description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub style_lock: Option<String>,
    /// How the batch holding this scene was decoded
    pub recovery: RecoveryMode,
}

impl ScriptScene {
    /// Creates a scene with narration only
    pub fn new(scene_number: u32, narration: &str) -> Self {
        Self {
            scene_number,
            title: String::new(),
            narration: narration.to_string(),
            image_prompt: String::new(),
            duration_secs: None,
            character_lock: None,
            style_lock: None,
            recovery: RecoveryMode::Clean,
        }
    }

    /// Sets the title
    pub fn with_title(mut self, title: &str) -> Self {
        self.title = title.to_string();
        self
    }

    /// Sets the recovery mode
    pub fn with_recovery(mut self, recovery: RecoveryMode) -> Self {
        self.recovery = recovery;
        self
    }

    /// Whether the scene carries any content
    pub fn has_content(&self) -> bool {
        !self.narration.trim().is_empty() || !self.image_prompt.trim().is_empty()
    }
}

// =============================================================================
// Continuity
// =============================================================================

/// Identity and style fixed by the first accepted scene of a job
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StyleLocks {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub character: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub visual_style: Option<String>,
}

impl StyleLocks {
    /// Locks taken from a scene
    pub fn from_scene(scene: &ScriptScene) -> Self {
        Self {
            character: scene.character_lock.clone(),
            visual_style: scene.style_lock.clone(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.character.is_none() && self.visual_style.is_none()
    }
}

/// Snapshot of the last accepted scene, used to seed the next batch
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContinuityAnchor {
    /// Ordinal of the scene the anchor was taken from
    pub scene_number: u32,
    pub title: String,
    /// Tail of the scene narration
    pub summary: String,
    pub locks: StyleLocks,
}

impl ContinuityAnchor {
    /// Builds an anchor from an accepted scene
    pub fn from_scene(scene: &ScriptScene, locks: &StyleLocks) -> Self {
        Self {
            scene_number: scene.scene_number,
            title: scene.title.clone(),
            summary: tail_chars(&scene.narration, ANCHOR_SUMMARY_CHARS),
            locks: locks.clone(),
        }
    }
}

fn tail_chars(text: &str, max: usize) -> String {
    let count = text.chars().count();
    if count <= max {
        return text.trim().to_string();
    }
    let tail: String = text.chars().skip(count - max).collect();
    format!("...{}", tail.trim_start())
}

// =============================================================================
// Generation Job
// =============================================================================

/// Orchestrator state
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum JobState {
    /// First batch not yet accepted
    #[default]
    Seeding,
    /// At least one batch accepted, ordinals remain
    Extending,
    /// Every ordinal attempted
    Complete,
}

/// Mutable state of one running generation
#[derive(Clone, Debug)]
pub struct GenerationJob {
    pub id: JobId,
    /// Units requested in total
    pub total_units: u32,
    /// Units requested per batch after the first
    pub units_per_batch: u32,
    pub state: JobState,
    /// Accepted scenes, in order
    pub scenes: Vec<ScriptScene>,
    /// Script title, from the first batch that names one
    pub title: Option<String>,
    /// Anchor for the next batch
    pub anchor: Option<ContinuityAnchor>,
    /// Locks from the first accepted scene
    pub locks: Option<StyleLocks>,
    /// Set when any batch was skipped
    pub degraded: bool,
    /// Ranges whose batch failed
    pub skipped: Vec<OrdinalRange>,
    /// Next ordinal to request
    next_ordinal: u32,
    /// Batches committed so far
    committed_batches: u32,
}

/// Upper bound on the scene buffer reserved up front
const INITIAL_SCENE_CAPACITY: u32 = 256;

impl GenerationJob {
    /// Creates a job; both sizes must be at least 1
    pub fn new(total_units: u32, units_per_batch: u32) -> CoreResult<Self> {
        if total_units == 0 {
            return Err(CoreError::InvalidJob(
                "total units must be at least 1".to_string(),
            ));
        }
        if units_per_batch == 0 {
            return Err(CoreError::InvalidJob(
                "units per batch must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            id: new_job_id(),
            total_units,
            units_per_batch,
            state: JobState::Seeding,
            scenes: Vec::with_capacity(total_units.min(INITIAL_SCENE_CAPACITY) as usize),
            title: None,
            anchor: None,
            locks: None,
            degraded: false,
            skipped: Vec::new(),
            next_ordinal: 1,
            committed_batches: 0,
        })
    }

    /// The next contiguous range to request, or `None` when all were attempted.
    ///
    /// The very first batch asks for a single unit; later batches ask for up
    /// to `units_per_batch`.
    pub fn next_range(&self) -> Option<OrdinalRange> {
        if self.next_ordinal > self.total_units {
            return None;
        }
        let size = if self.next_ordinal == 1 {
            1
        } else {
            self.units_per_batch
        };
        let end = self
            .next_ordinal
            .saturating_add(size - 1)
            .min(self.total_units);
        Some(OrdinalRange::new(self.next_ordinal, end))
    }

    /// Number of batches accepted so far
    pub fn committed_batches(&self) -> u32 {
        self.committed_batches
    }

    /// Appends the scenes of an accepted batch.
    ///
    /// Extra scenes beyond the range are dropped. Scenes are numbered by
    /// position. Fallback output is kept but never becomes the anchor.
    /// Returns the number of scenes appended.
    pub fn commit(
        &mut self,
        range: OrdinalRange,
        mut scenes: Vec<ScriptScene>,
        mode: RecoveryMode,
        title: Option<String>,
    ) -> usize {
        scenes.retain(ScriptScene::has_content);
        scenes.truncate(range.len() as usize);
        self.next_ordinal = range.end.saturating_add(1);

        if scenes.is_empty() {
            self.skip(range);
            return 0;
        }

        let appended = scenes.len();
        for mut scene in scenes {
            scene.scene_number = self.scenes.len() as u32 + 1;
            scene.recovery = scene.recovery.max(mode);
            self.scenes.push(scene);
        }

        if self.title.is_none() {
            self.title = title.filter(|t| !t.trim().is_empty());
        }

        if mode != RecoveryMode::Fallback {
            if self.locks.is_none() {
                if let Some(first) = self.scenes.iter().find(|s| s.recovery != RecoveryMode::Fallback) {
                    self.locks = Some(StyleLocks::from_scene(first));
                }
            }
            if let Some(last) = self.scenes.last() {
                let locks = self.locks.clone().unwrap_or_default();
                self.anchor = Some(ContinuityAnchor::from_scene(last, &locks));
            }
        } else {
            debug!(range = %range, "Fallback batch appended, anchor unchanged");
        }

        self.committed_batches += 1;
        self.state = if self.next_ordinal > self.total_units {
            JobState::Complete
        } else {
            JobState::Extending
        };
        appended
    }

    /// Records a failed batch; its ordinals are never back-filled
    pub fn skip(&mut self, range: OrdinalRange) {
        self.next_ordinal = self.next_ordinal.max(range.end.saturating_add(1));
        self.degraded = true;
        self.skipped.push(range);
        if self.next_ordinal > self.total_units {
            self.state = JobState::Complete;
        }
    }

    /// Renumbers scenes 1..count in accumulation order
    pub fn renumber(&mut self) {
        for (i, scene) in self.scenes.iter_mut().enumerate() {
            scene.scene_number = i as u32 + 1;
        }
    }
}

// =============================================================================
// Job Result
// =============================================================================

/// Per-batch outcome recorded in the job result
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSummary {
    pub range: OrdinalRange,
    /// Provider that answered; `None` when the batch failed
    pub provider: Option<ProviderId>,
    pub mode: Option<RecoveryMode>,
    /// Scenes appended from this batch
    pub scenes: usize,
    /// Provider calls made for this batch
    pub attempts: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Final output of a generation job
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobResult {
    pub job_id: JobId,
    /// Idempotency key the job was billed under
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_key: Option<JobKey>,
    pub title: Option<String>,
    /// Scenes numbered 1..count
    pub scenes: Vec<ScriptScene>,
    pub requested_units: u32,
    /// True when at least one batch was skipped
    pub degraded: bool,
    /// True when the caller cancelled before all batches ran
    pub cancelled: bool,
    pub skipped: Vec<OrdinalRange>,
    pub batches: Vec<BatchSummary>,
    pub usage: TokenUsage,
    /// Whether the job key has been charged
    pub charged: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl JobResult {
    /// Recovery mode of each scene, in order
    pub fn modes(&self) -> Vec<RecoveryMode> {
        self.scenes.iter().map(|s| s.recovery).collect()
    }

    /// Whether every requested unit was produced from complete output
    pub fn is_complete(&self) -> bool {
        !self.degraded
            && !self.cancelled
            && self.scenes.len() as u32 == self.requested_units
            && self.scenes.iter().all(|s| s.recovery.is_complete())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn scene(number: u32, narration: &str) -> ScriptScene {
        ScriptScene::new(number, narration).with_title(&format!("Scene {}", number))
    }

    #[test]
    fn test_job_rejects_zero_sizes() {
        assert!(GenerationJob::new(0, 3).is_err());
        assert!(GenerationJob::new(3, 0).is_err());
    }

    #[test]
    fn test_huge_totals_do_not_reserve_upfront() {
        let job = GenerationJob::new(u32::MAX, 50).unwrap();
        assert!(job.scenes.capacity() <= INITIAL_SCENE_CAPACITY as usize);
        assert_eq!(job.next_range(), Some(OrdinalRange::new(1, 1)));
    }

    #[test]
    fn test_first_batch_is_single_unit() {
        let mut job = GenerationJob::new(10, 4).unwrap();
        assert_eq!(job.next_range(), Some(OrdinalRange::new(1, 1)));

        job.commit(OrdinalRange::new(1, 1), vec![scene(1, "a")], RecoveryMode::Clean, None);
        assert_eq!(job.next_range(), Some(OrdinalRange::new(2, 5)));

        job.commit(OrdinalRange::new(2, 5), vec![scene(2, "b")], RecoveryMode::Clean, None);
        assert_eq!(job.next_range(), Some(OrdinalRange::new(6, 9)));

        job.skip(OrdinalRange::new(6, 9));
        assert_eq!(job.next_range(), Some(OrdinalRange::new(10, 10)));
    }

    #[test]
    fn test_commit_truncates_and_renumbers() {
        let mut job = GenerationJob::new(3, 2).unwrap();
        job.commit(OrdinalRange::new(1, 1), vec![scene(1, "a"), scene(2, "extra")], RecoveryMode::Clean, None);
        job.commit(OrdinalRange::new(2, 3), vec![scene(7, "b"), scene(7, "c")], RecoveryMode::Repaired, None);

        let numbers: Vec<u32> = job.scenes.iter().map(|s| s.scene_number).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
        assert_eq!(job.scenes[0].narration, "a");
        assert_eq!(job.scenes[2].recovery, RecoveryMode::Repaired);
        assert_eq!(job.state, JobState::Complete);
    }

    #[test]
    fn test_anchor_tracks_last_trusted_scene() {
        let mut job = GenerationJob::new(5, 1).unwrap();
        let mut first = scene(1, "The hero wakes.");
        first.character_lock = Some("A tall woman in a red coat".to_string());

        job.commit(OrdinalRange::new(1, 1), vec![first], RecoveryMode::Clean, Some("Dawn".to_string()));
        let anchor = job.anchor.clone().unwrap();
        assert_eq!(anchor.scene_number, 1);
        assert_eq!(anchor.locks.character.as_deref(), Some("A tall woman in a red coat"));
        assert_eq!(job.title.as_deref(), Some("Dawn"));

        job.commit(OrdinalRange::new(2, 2), vec![scene(2, "garbled")], RecoveryMode::Fallback, None);
        assert_eq!(job.scenes.len(), 2);
        assert_eq!(job.anchor.as_ref().unwrap().scene_number, 1);

        job.commit(OrdinalRange::new(3, 3), vec![scene(3, "She walks on.")], RecoveryMode::Clean, None);
        let anchor = job.anchor.clone().unwrap();
        assert_eq!(anchor.scene_number, 3);
        assert_eq!(anchor.summary, "She walks on.");
        assert!(anchor.locks.character.is_some());
    }

    #[test]
    fn test_empty_batch_counts_as_skipped() {
        let mut job = GenerationJob::new(2, 1).unwrap();
        let appended = job.commit(OrdinalRange::new(1, 1), vec![scene(1, "  ")], RecoveryMode::Clean, None);

        assert_eq!(appended, 0);
        assert!(job.degraded);
        assert_eq!(job.skipped, vec![OrdinalRange::new(1, 1)]);
        assert_eq!(job.next_range(), Some(OrdinalRange::new(2, 2)));
    }

    #[test]
    fn test_anchor_summary_keeps_the_tail() {
        let long = "x".repeat(1000) + " ending";
        let anchor = ContinuityAnchor::from_scene(&scene(4, &long), &StyleLocks::default());

        assert!(anchor.summary.starts_with("..."));
        assert!(anchor.summary.ends_with(" ending"));
        assert!(anchor.summary.chars().count() <= ANCHOR_SUMMARY_CHARS + 3);
    }
}
