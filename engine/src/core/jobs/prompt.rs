//! Batch Prompts
//!
//! Turns a batch request (ordinal range plus continuity anchor) into the
//! system and user prompts sent to a provider.

use serde::{Deserialize, Serialize};

use super::ContinuityAnchor;
use crate::core::{JobId, OrdinalRange};

/// What the orchestrator asks of one batch
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchRequest {
    pub job_id: JobId,
    /// Ordinals this batch must produce
    pub range: OrdinalRange,
    /// Units in the whole job
    pub total_units: u32,
    /// Anchor from the last accepted scene; `None` for the seeding batch
    pub anchor: Option<ContinuityAnchor>,
}

impl BatchRequest {
    /// Whether this batch opens the script
    pub fn is_opening(&self) -> bool {
        self.range.start == 1
    }

    /// Whether this batch closes the script
    pub fn is_closing(&self) -> bool {
        self.range.end >= self.total_units
    }
}

/// Prompts for one provider call
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BatchPrompt {
    pub system: String,
    pub user: String,
}

/// Builds prompts for batches of a job
pub trait BatchPromptBuilder: Send + Sync {
    fn build(&self, batch: &BatchRequest) -> BatchPrompt;
}

// =============================================================================
// Script Prompt Builder
// =============================================================================

const SYSTEM_PROMPT: &str = r#"You are a professional scriptwriter for narrated videos.
Respond with a single JSON object and nothing else. No markdown, no commentary.

Schema:
{
  "title": "script title",
  "scenes": [
    {
      "scene_number": 1,
      "title": "short scene title",
      "narration": "voice-over text for this scene",
      "image_prompt": "detailed prompt for the scene image",
      "duration_secs": 8,
      "character_lock": "fixed description of the recurring character",
      "style_lock": "fixed visual style"
    }
  ]
}

Rules:
- Produce exactly the scene numbers requested, in order.
- Keep character_lock and style_lock identical across all scenes.
- Escape quotes inside strings. Do not use line breaks inside strings."#;

/// Default prompt builder for narrated video scripts
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptPromptBuilder {
    pub topic: String,
    pub tone: String,
    pub language: String,
    pub seconds_per_scene: u32,
}

impl ScriptPromptBuilder {
    /// Creates a builder for a topic
    pub fn new(topic: &str) -> Self {
        Self {
            topic: topic.trim().to_string(),
            tone: "engaging".to_string(),
            language: "English".to_string(),
            seconds_per_scene: 8,
        }
    }

    pub fn with_tone(mut self, tone: &str) -> Self {
        self.tone = tone.to_string();
        self
    }

    pub fn with_language(mut self, language: &str) -> Self {
        self.language = language.to_string();
        self
    }

    pub fn with_seconds_per_scene(mut self, seconds: u32) -> Self {
        self.seconds_per_scene = seconds.max(1);
        self
    }
}

impl BatchPromptBuilder for ScriptPromptBuilder {
    fn build(&self, batch: &BatchRequest) -> BatchPrompt {
        let mut user = format!(
            "Topic: {}\nTone: {}\nLanguage: {}\nThe full script has {} scenes of about {} seconds each.\n",
            self.topic, self.tone, self.language, batch.total_units, self.seconds_per_scene
        );

        if batch.range.start == batch.range.end {
            user.push_str(&format!("Write scene {} only.\n", batch.range.start));
        } else {
            user.push_str(&format!(
                "Write scenes {} to {} ({} scenes).\n",
                batch.range.start,
                batch.range.end,
                batch.range.len()
            ));
        }

        if batch.is_opening() {
            user.push_str("This is the opening: introduce the subject, the character, and the visual style.\n");
        }

        if let Some(anchor) = &batch.anchor {
            // Serializing a plain struct of strings cannot fail
            let anchor_json =
                serde_json::to_string_pretty(anchor).unwrap_or_else(|_| anchor.summary.clone());
            user.push_str(&format!(
                "\nContinue directly from the previous scene. Do not repeat it.\nPrevious scene:\n{}\n",
                anchor_json
            ));
            if let Some(character) = &anchor.locks.character {
                user.push_str(&format!("Use exactly this character_lock: {}\n", character));
            }
            if let Some(style) = &anchor.locks.visual_style {
                user.push_str(&format!("Use exactly this style_lock: {}\n", style));
            }
        }

        if batch.is_closing() {
            user.push_str("The last scene requested ends the video: give it a clear conclusion.\n");
        }

        BatchPrompt {
            system: SYSTEM_PROMPT.to_string(),
            user,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::jobs::StyleLocks;

    fn batch(start: u32, end: u32, total: u32, anchor: Option<ContinuityAnchor>) -> BatchRequest {
        BatchRequest {
            job_id: "job".to_string(),
            range: OrdinalRange::new(start, end),
            total_units: total,
            anchor,
        }
    }

    #[test]
    fn test_opening_prompt() {
        let prompt = ScriptPromptBuilder::new("  deep sea creatures ").build(&batch(1, 1, 12, None));

        assert!(prompt.system.contains("\"scenes\""));
        assert!(prompt.user.contains("Topic: deep sea creatures\n"));
        assert!(prompt.user.contains("Write scene 1 only."));
        assert!(prompt.user.contains("opening"));
        assert!(!prompt.user.contains("Previous scene"));
    }

    #[test]
    fn test_continuation_embeds_anchor_and_locks() {
        let anchor = ContinuityAnchor {
            scene_number: 4,
            title: "The Trench".to_string(),
            summary: "The submarine descends.".to_string(),
            locks: StyleLocks {
                character: Some("Captain Ilse, grey beard".to_string()),
                visual_style: None,
            },
        };
        let prompt = ScriptPromptBuilder::new("ocean")
            .with_language("German")
            .build(&batch(5, 8, 8, Some(anchor)));

        assert!(prompt.user.contains("Write scenes 5 to 8 (4 scenes)."));
        assert!(prompt.user.contains("The submarine descends."));
        assert!(prompt.user.contains("\"sceneNumber\": 4"));
        assert!(prompt.user.contains("character_lock: Captain Ilse, grey beard"));
        assert!(!prompt.user.contains("style_lock:"));
        assert!(prompt.user.contains("Language: German"));
        assert!(prompt.user.contains("conclusion"));
    }
}
