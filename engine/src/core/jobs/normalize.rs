//! Scene Normalization
//!
//! Maps a decoded model response onto [`ScriptScene`]s. Models disagree on
//! key names and on whether scenes arrive bare or wrapped, so several common
//! variants are accepted.

use serde_json::{Map, Value};

use super::ScriptScene;
use crate::core::ai::{RecoveredValue, RecoveryMode};

const ORDINAL_KEYS: &[&str] = &["scene_number", "sceneNumber", "number", "scene", "index"];
const TITLE_KEYS: &[&str] = &["title", "scene_title", "sceneTitle", "heading"];
const NARRATION_KEYS: &[&str] = &[
    "narration",
    "script",
    "text",
    "voiceover",
    "voice_over",
    "voiceOver",
    "content",
    "dialogue",
];
const IMAGE_KEYS: &[&str] = &[
    "image_prompt",
    "imagePrompt",
    "visual_prompt",
    "visualPrompt",
    "visual",
    "image",
];
const DURATION_KEYS: &[&str] = &["duration_secs", "durationSecs", "duration", "seconds"];
const CHARACTER_KEYS: &[&str] = &[
    "character_lock",
    "characterLock",
    "character_description",
    "characterDescription",
    "character",
    "characters",
];
const STYLE_KEYS: &[&str] = &[
    "style_lock",
    "styleLock",
    "visual_style",
    "visualStyle",
    "art_style",
    "style",
];
const COLLECTION_KEYS: &[&str] = &["scenes", "items", "script", "data"];

/// Batch content extracted from one response
#[derive(Clone, Debug, PartialEq)]
pub struct NormalizedBatch {
    /// Script title, when the response names one
    pub title: Option<String>,
    pub scenes: Vec<ScriptScene>,
    pub mode: RecoveryMode,
}

/// Extracts scenes and the script title from a decoded response
pub fn normalize_scenes(recovered: &RecoveredValue) -> NormalizedBatch {
    let mode = recovered.mode;
    let (title, items) = match &recovered.value {
        Value::Array(items) => (None, items.as_slice()),
        Value::Object(map) => {
            let title = first_string(map, &["script_title", "scriptTitle", "title"])
                .filter(|_| !looks_like_scene(map));
            match COLLECTION_KEYS.iter().find_map(|k| map.get(*k).and_then(Value::as_array)) {
                Some(items) => (title, items.as_slice()),
                None if looks_like_scene(map) => (None, std::slice::from_ref(&recovered.value)),
                None => (title, &[][..]),
            }
        }
        _ => (None, &[][..]),
    };

    let scenes = items
        .iter()
        .filter_map(Value::as_object)
        .map(|map| scene_from_object(map, mode))
        .filter(ScriptScene::has_content)
        .collect();

    NormalizedBatch {
        title,
        scenes,
        mode,
    }
}

/// Builds a scene from one object; missing fields stay empty
pub fn scene_from_object(map: &Map<String, Value>, mode: RecoveryMode) -> ScriptScene {
    ScriptScene {
        scene_number: first_ordinal(map).unwrap_or(0),
        title: first_string(map, TITLE_KEYS).unwrap_or_default(),
        narration: first_string(map, NARRATION_KEYS).unwrap_or_default(),
        image_prompt: first_string(map, IMAGE_KEYS).unwrap_or_default(),
        duration_secs: DURATION_KEYS
            .iter()
            .find_map(|k| map.get(*k).and_then(as_f32)),
        character_lock: first_string(map, CHARACTER_KEYS),
        style_lock: first_string(map, STYLE_KEYS),
        recovery: mode,
    }
}

fn looks_like_scene(map: &Map<String, Value>) -> bool {
    ORDINAL_KEYS.iter().any(|k| map.contains_key(*k))
        || NARRATION_KEYS.iter().any(|k| map.get(*k).is_some_and(Value::is_string))
}

fn first_ordinal(map: &Map<String, Value>) -> Option<u32> {
    ORDINAL_KEYS.iter().find_map(|k| match map.get(*k)? {
        Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    })
}

/// First non-empty text under any of `keys`; string arrays are joined
fn first_string(map: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| {
        let text = match map.get(*k)? {
            Value::String(s) => s.trim().to_string(),
            Value::Array(items) => items
                .iter()
                .filter_map(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .collect::<Vec<_>>()
                .join(", "),
            _ => return None,
        };
        (!text.is_empty()).then_some(text)
    })
}

fn as_f32(value: &Value) -> Option<f32> {
    match value {
        Value::Number(n) => n.as_f64().map(|v| v as f32),
        Value::String(s) => s.trim().trim_end_matches('s').trim().parse().ok(),
        _ => None,
    }
    .filter(|v: &f32| v.is_finite() && *v > 0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn recovered(value: Value, mode: RecoveryMode) -> RecoveredValue {
        RecoveredValue { value, mode }
    }

    #[test]
    fn test_wrapped_scenes_with_title() {
        let batch = normalize_scenes(&recovered(
            json!({
                "title": "The Lighthouse",
                "scenes": [
                    {"scene_number": 1, "title": "Storm", "narration": "Waves crash.", "image_prompt": "dark sea"},
                    {"sceneNumber": "2", "script": "Light flickers.", "visualStyle": "oil painting"}
                ]
            }),
            RecoveryMode::Clean,
        ));

        assert_eq!(batch.title.as_deref(), Some("The Lighthouse"));
        assert_eq!(batch.scenes.len(), 2);
        assert_eq!(batch.scenes[0].image_prompt, "dark sea");
        assert_eq!(batch.scenes[1].scene_number, 2);
        assert_eq!(batch.scenes[1].narration, "Light flickers.");
        assert_eq!(batch.scenes[1].style_lock.as_deref(), Some("oil painting"));
    }

    #[test]
    fn test_bare_array_and_single_object() {
        let batch = normalize_scenes(&recovered(
            json!([{"number": 4, "text": "One."}, {"voiceover": "Two."}]),
            RecoveryMode::Repaired,
        ));
        assert_eq!(batch.scenes.len(), 2);
        assert!(batch.title.is_none());
        assert_eq!(batch.scenes[1].recovery, RecoveryMode::Repaired);

        let single = normalize_scenes(&recovered(
            json!({"scene_number": 3, "title": "Alone", "narration": "Only one."}),
            RecoveryMode::Clean,
        ));
        assert_eq!(single.scenes.len(), 1);
        assert!(single.title.is_none());
        assert_eq!(single.scenes[0].title, "Alone");
    }

    #[test]
    fn test_empty_and_non_object_items_are_dropped() {
        let batch = normalize_scenes(&recovered(
            json!({"scenes": [{"scene_number": 1}, "stray", 42, {"narration": "kept"}]}),
            RecoveryMode::PartialExtraction,
        ));
        assert_eq!(batch.scenes.len(), 1);
        assert_eq!(batch.scenes[0].narration, "kept");
    }

    #[test]
    fn test_character_arrays_and_durations() {
        let scene = scene_from_object(
            json!({"narration": "x", "characters": ["Mira", " ", "the fox"], "duration": "6s"})
                .as_object()
                .unwrap(),
            RecoveryMode::Clean,
        );
        assert_eq!(scene.character_lock.as_deref(), Some("Mira, the fox"));
        assert_eq!(scene.duration_secs, Some(6.0));
    }

    #[test]
    fn test_fallback_placeholder_normalizes() {
        let decoder = crate::core::ai::ResilientJsonDecoder::new(
            crate::core::ai::DecoderProfile::script_scenes(),
        );
        let batch = normalize_scenes(&decoder.decode("The model refused."));

        assert_eq!(batch.mode, RecoveryMode::Fallback);
        assert_eq!(batch.scenes.len(), 1);
        assert_eq!(batch.scenes[0].narration, "The model refused.");
    }
}
