//! Resilient JSON Decoder
//!
//! Turns model output that is supposed to be JSON into a structured value,
//! whatever shape it arrives in: wrapped in prose or code fences, carrying raw
//! control characters or unescaped quotes inside strings, with trailing
//! commas, or cut off mid-object by a token limit.
//!
//! Decoding never fails. Each result carries a [`RecoveryMode`] telling the
//! caller how much of the structure survived:
//!
//! | Mode                | Meaning                                            |
//! |---------------------|----------------------------------------------------|
//! | `Clean`             | Parsed as-is or after lossless cleanup             |
//! | `Repaired`          | Missing closers appended (truncated output)        |
//! | `PartialExtraction` | Only individual keyed sub-objects could be parsed  |
//! | `Fallback`          | Nothing parsed; a placeholder of the right shape   |
//!
//! Every stage is a standalone function so it can be tested in isolation.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

/// Upper bound on tail elements dropped while closing a truncated document
const MAX_TAIL_CUTS: usize = 8;

/// Upper bound on sub-objects tried during partial extraction
const MAX_UNIT_CANDIDATES: usize = 512;

/// Longest raw excerpt kept in a fallback placeholder (chars)
const FALLBACK_EXCERPT_CHARS: usize = 2000;

// =============================================================================
// Recovered Value
// =============================================================================

/// How much of the original structure survived decoding
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RecoveryMode {
    Clean,
    Repaired,
    PartialExtraction,
    Fallback,
}

impl RecoveryMode {
    /// Whether the value can be assumed complete
    pub fn is_complete(self) -> bool {
        matches!(self, RecoveryMode::Clean | RecoveryMode::Repaired)
    }
}

impl std::fmt::Display for RecoveryMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecoveryMode::Clean => write!(f, "clean"),
            RecoveryMode::Repaired => write!(f, "repaired"),
            RecoveryMode::PartialExtraction => write!(f, "partial"),
            RecoveryMode::Fallback => write!(f, "fallback"),
        }
    }
}

/// Best-effort decoding result
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveredValue {
    pub value: Value,
    pub mode: RecoveryMode,
}

impl RecoveredValue {
    fn new(value: Value, mode: RecoveryMode) -> Self {
        Self { value, mode }
    }
}

// =============================================================================
// Decoder Profile
// =============================================================================

/// Shape knowledge the decoder uses for partial extraction and placeholders
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecoderProfile {
    /// Leading keys that identify one repeated unit (first one is canonical)
    pub ordinal_keys: Vec<String>,
    /// Key of the collection wrapping the units
    pub collection_key: String,
    /// Key receiving the raw text in a fallback placeholder
    pub fallback_text_key: String,
}

impl DecoderProfile {
    /// Profile for video script scene batches
    pub fn script_scenes() -> Self {
        Self {
            ordinal_keys: vec![
                "scene_number".to_string(),
                "sceneNumber".to_string(),
                "scene".to_string(),
            ],
            collection_key: "scenes".to_string(),
            fallback_text_key: "narration".to_string(),
        }
    }
}

impl Default for DecoderProfile {
    fn default() -> Self {
        Self {
            ordinal_keys: vec!["index".to_string()],
            collection_key: "items".to_string(),
            fallback_text_key: "text".to_string(),
        }
    }
}

// =============================================================================
// Decoder
// =============================================================================

/// Staged, never-failing JSON decoder
#[derive(Clone, Debug)]
pub struct ResilientJsonDecoder {
    profile: DecoderProfile,
    unit_start: Option<Regex>,
}

impl Default for ResilientJsonDecoder {
    fn default() -> Self {
        Self::new(DecoderProfile::default())
    }
}

impl ResilientJsonDecoder {
    /// Creates a decoder for a profile
    pub fn new(profile: DecoderProfile) -> Self {
        let alternatives: Vec<String> = profile
            .ordinal_keys
            .iter()
            .map(|k| regex::escape(k))
            .collect();
        let pattern = format!(r#"\{{\s*"(?:{})"\s*:"#, alternatives.join("|"));
        let unit_start = match Regex::new(&pattern) {
            Ok(re) => Some(re),
            Err(e) => {
                warn!("Partial extraction disabled, bad ordinal pattern: {}", e);
                None
            }
        };
        Self {
            profile,
            unit_start,
        }
    }

    /// Returns the profile
    pub fn profile(&self) -> &DecoderProfile {
        &self.profile
    }

    /// Decodes raw bytes, replacing invalid UTF-8
    pub fn decode_bytes(&self, raw: &[u8]) -> RecoveredValue {
        self.decode(&String::from_utf8_lossy(raw))
    }

    /// Decodes model output into a best-effort value
    pub fn decode(&self, raw: &str) -> RecoveredValue {
        let stripped = strip_code_fences(raw);

        if let Ok(value) = serde_json::from_str::<Value>(stripped) {
            return RecoveredValue::new(value, RecoveryMode::Clean);
        }
        if let Some(root) = extract_root(stripped) {
            if let Ok(value) = serde_json::from_str::<Value>(root) {
                return RecoveredValue::new(value, RecoveryMode::Clean);
            }
        }

        let cleaned = remove_control_chars(stripped);
        let Some(rooted) = locate_root_start(&cleaned) else {
            debug!("No JSON root found in model output");
            return self.fallback(raw);
        };

        let normalized = normalize_string_literals(rooted);
        let repaired = repair_structure(&normalized);
        let candidate = extract_root(&repaired).unwrap_or(&repaired);

        if let Ok(value) = serde_json::from_str::<Value>(candidate) {
            return RecoveredValue::new(value, RecoveryMode::Clean);
        }

        let closed = close_truncated(candidate);
        let partial = self.extract_units(candidate);

        match (closed, partial) {
            (Some((value, 0)), _) => RecoveredValue::new(value, RecoveryMode::Repaired),
            (Some((value, cuts)), Some(units)) => {
                if units.len() > self.count_units(&value) {
                    debug!(cuts, units = units.len(), "Partial extraction recovered more units than closing");
                    self.partial(units)
                } else {
                    RecoveredValue::new(value, RecoveryMode::Repaired)
                }
            }
            (Some((value, _)), None) => RecoveredValue::new(value, RecoveryMode::Repaired),
            (None, Some(units)) => self.partial(units),
            (None, None) => {
                debug!("Model output could not be recovered, using placeholder");
                self.fallback(raw)
            }
        }
    }

    /// Parses every sub-object that starts with an ordinal key.
    ///
    /// Each candidate is bounded by the start of the next one, so the cost
    /// stays linear in the input length.
    fn extract_units(&self, text: &str) -> Option<Vec<Value>> {
        let re = self.unit_start.as_ref()?;
        let starts: Vec<usize> = re
            .find_iter(text)
            .map(|m| m.start())
            .take(MAX_UNIT_CANDIDATES)
            .collect();

        let mut units = Vec::new();
        for (i, &start) in starts.iter().enumerate() {
            let end = starts.get(i + 1).copied().unwrap_or(text.len());
            let segment = &text[start..end];
            let object = extract_root(segment).unwrap_or(segment);

            let parsed = serde_json::from_str::<Value>(object)
                .ok()
                .or_else(|| close_truncated(object).map(|(v, _)| v));

            if let Some(Value::Object(map)) = parsed {
                if self.profile.ordinal_keys.iter().any(|k| map.contains_key(k)) {
                    units.push(Value::Object(map));
                }
            }
        }

        if units.is_empty() {
            None
        } else {
            Some(units)
        }
    }

    /// Counts objects carrying an ordinal key anywhere in a value
    fn count_units(&self, value: &Value) -> usize {
        match value {
            Value::Object(map) => {
                let own = usize::from(self.profile.ordinal_keys.iter().any(|k| map.contains_key(k)));
                own + map.values().map(|v| self.count_units(v)).sum::<usize>()
            }
            Value::Array(items) => items.iter().map(|v| self.count_units(v)).sum(),
            _ => 0,
        }
    }

    fn partial(&self, units: Vec<Value>) -> RecoveredValue {
        let mut map = Map::new();
        map.insert(self.profile.collection_key.clone(), Value::Array(units));
        RecoveredValue::new(Value::Object(map), RecoveryMode::PartialExtraction)
    }

    /// Single-unit placeholder preserving a cleaned excerpt of the raw text
    fn fallback(&self, raw: &str) -> RecoveredValue {
        let excerpt: String = collapse_whitespace(&remove_control_chars(strip_code_fences(raw)))
            .chars()
            .take(FALLBACK_EXCERPT_CHARS)
            .collect();

        let ordinal_key = self
            .profile
            .ordinal_keys
            .first()
            .cloned()
            .unwrap_or_else(|| "index".to_string());

        let mut unit = Map::new();
        unit.insert(ordinal_key, json!(1));
        unit.insert(self.profile.fallback_text_key.clone(), Value::String(excerpt));

        let mut root = Map::new();
        root.insert(
            self.profile.collection_key.clone(),
            Value::Array(vec![Value::Object(unit)]),
        );
        RecoveredValue::new(Value::Object(root), RecoveryMode::Fallback)
    }
}

// =============================================================================
// Stages
// =============================================================================

/// Removes markdown code fences and surrounding whitespace.
///
/// Text before the opening fence is dropped; a missing closing fence (cut-off
/// output) keeps everything after the opening one.
pub fn strip_code_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(open) = trimmed.find("```") else {
        return trimmed;
    };

    let after = &trimmed[open + 3..];
    let body = after.trim_start_matches(|c: char| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    let body = match body.find("```") {
        Some(close) => &body[..close],
        None => body,
    };
    body.trim()
}

/// Drops C0 control characters other than tab, newline, and carriage return,
/// plus byte-order marks.
pub fn remove_control_chars(text: &str) -> String {
    text.chars()
        .filter(|&c| {
            let code = c as u32;
            !(code < 0x20 && !matches!(c, '\n' | '\r' | '\t')) && c != '\u{feff}'
        })
        .collect()
}

/// Returns the text starting at the earliest `{` or `[`
pub fn locate_root_start(text: &str) -> Option<&str> {
    text.find(['{', '['])
        .map(|start| &text[start..])
}

/// Returns the first balanced `{..}` / `[..]` value, ignoring trailing prose.
///
/// Unbalanced (truncated) input yields everything from the root start.
pub fn extract_root(text: &str) -> Option<&str> {
    let body = locate_root_start(text)?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in body.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' | '[' => depth += 1,
            '}' | ']' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(&body[..i + c.len_utf8()]);
                }
            }
            _ => {}
        }
    }

    Some(body)
}

/// Cleans up the inside of string literals only.
///
/// Raw newlines, tabs, and escape sequences become spaces, backslashes are
/// stripped, quotes that do not end the literal become `'`, and whitespace
/// runs collapse. Text outside literals is copied untouched.
pub fn normalize_string_literals(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];

        if !in_string {
            if c == '"' {
                in_string = true;
            }
            out.push(c);
            i += 1;
            continue;
        }

        match c {
            '\\' => match chars.get(i + 1) {
                Some('n' | 'r' | 't' | 'b' | 'f') => {
                    push_space(&mut out);
                    i += 2;
                }
                Some('"') => {
                    out.push('\'');
                    i += 2;
                }
                Some('/') => {
                    out.push('/');
                    i += 2;
                }
                Some('u') => {
                    let hex: String = chars.iter().skip(i + 2).take(4).collect();
                    match u32::from_str_radix(&hex, 16).ok().and_then(char::from_u32) {
                        Some(decoded) if hex.len() == 4 => {
                            if decoded.is_control() || decoded == '"' {
                                push_space(&mut out);
                            } else {
                                out.push(decoded);
                            }
                            i += 6;
                        }
                        _ => i += 2,
                    }
                }
                Some('\\') => i += 2,
                _ => i += 1,
            },
            '"' => {
                if quote_closes_string(&chars, i + 1) {
                    in_string = false;
                    out.push('"');
                } else {
                    out.push('\'');
                }
                i += 1;
            }
            c if c.is_whitespace() => {
                push_space(&mut out);
                i += 1;
            }
            c => {
                out.push(c);
                i += 1;
            }
        }
    }

    out
}

/// Fixes trailing commas and unquoted object keys outside string literals
pub fn repair_structure(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len() + 16);
    let mut in_string = false;
    let mut escaped = false;
    let mut last_significant: Option<char> = None;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];

        if in_string {
            out.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
                last_significant = Some('"');
            }
            i += 1;
            continue;
        }

        match c {
            '"' => {
                in_string = true;
                out.push(c);
            }
            ',' => {
                let next = next_significant(&chars, i + 1);
                if !matches!(next, Some('}') | Some(']')) {
                    out.push(c);
                    last_significant = Some(c);
                }
            }
            c if (c.is_ascii_alphabetic() || c == '_')
                && matches!(last_significant, Some('{') | Some(',')) =>
            {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                let ident: String = chars[start..i].iter().collect();
                if next_significant(&chars, i) == Some(':') {
                    out.push('"');
                    out.push_str(&ident);
                    out.push('"');
                    last_significant = Some('"');
                } else {
                    out.push_str(&ident);
                    last_significant = ident.chars().last();
                }
                continue;
            }
            c => {
                out.push(c);
                if !c.is_whitespace() {
                    last_significant = Some(c);
                }
            }
        }
        i += 1;
    }

    out
}

/// Closes a truncated document.
///
/// Appends a closing quote for an open string and exactly the missing `}` / `]`
/// in nesting order. When the result still does not parse, the trailing
/// incomplete element is dropped and closing is retried. Returns the value
/// and the number of elements dropped.
pub fn close_truncated(text: &str) -> Option<(Value, usize)> {
    let mut current = text;

    for cuts in 0..=MAX_TAIL_CUTS {
        let closed = append_missing_closers(current);
        if let Ok(value) = serde_json::from_str::<Value>(&closed) {
            return Some((value, cuts));
        }
        current = &current[..last_separator(current)?];
    }

    None
}

/// Appends the closers needed to balance `text`
pub fn append_missing_closers(text: &str) -> String {
    let mut stack: Vec<char> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for c in text.chars() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => stack.push('}'),
            '[' => stack.push(']'),
            '}' | ']' => {
                if stack.last() == Some(&c) {
                    stack.pop();
                }
            }
            _ => {}
        }
    }

    let mut out = text.to_string();
    if in_string {
        if escaped {
            out.pop();
        }
        out.push('"');
    }
    trim_dangling(&mut out);
    while let Some(closer) = stack.pop() {
        out.push(closer);
    }
    out
}

// =============================================================================
// Helpers
// =============================================================================

fn push_space(out: &mut String) {
    if !out.ends_with(' ') {
        out.push(' ');
    }
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn next_significant(chars: &[char], from: usize) -> Option<char> {
    chars.iter().skip(from).copied().find(|c| !c.is_whitespace())
}

/// Decides whether a quote inside a literal ends it, from what follows
fn quote_closes_string(chars: &[char], from: usize) -> bool {
    let mut k = from;
    while k < chars.len() && chars[k].is_whitespace() {
        k += 1;
    }
    match chars.get(k) {
        None => true,
        Some(':' | '}' | ']') => true,
        Some(',') => looks_like_value_start(chars, k + 1),
        _ => false,
    }
}

/// After a comma: does the text continue like a JSON element or key?
fn looks_like_value_start(chars: &[char], from: usize) -> bool {
    let mut k = from;
    while k < chars.len() && chars[k].is_whitespace() {
        k += 1;
    }
    let Some(&c) = chars.get(k) else {
        return true;
    };
    match c {
        '"' | '{' | '[' | '}' | ']' | '-' => true,
        c if c.is_ascii_digit() => true,
        c if c.is_ascii_alphabetic() || c == '_' => {
            let word: String = chars[k..]
                .iter()
                .take_while(|c| c.is_ascii_alphanumeric() || **c == '_')
                .collect();
            if matches!(word.as_str(), "true" | "false" | "null") {
                return true;
            }
            next_significant(chars, k + word.chars().count()) == Some(':')
        }
        _ => false,
    }
}

/// Strips trailing commas, colons, and a key left without a value
fn trim_dangling(out: &mut String) {
    loop {
        let trimmed_len = out.trim_end().len();
        out.truncate(trimmed_len);

        if out.ends_with(',') {
            out.pop();
            continue;
        }
        if out.ends_with(':') {
            out.pop();
            let key_end = out.trim_end().len();
            out.truncate(key_end);
            if out.ends_with('"') {
                out.pop();
                if let Some(open) = out.rfind('"') {
                    out.truncate(open);
                }
            }
            continue;
        }
        break;
    }
}

/// Byte offset of the last comma outside string literals
fn last_separator(text: &str) -> Option<usize> {
    let mut in_string = false;
    let mut escaped = false;
    let mut last = None;

    for (i, c) in text.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            ',' => last = Some(i),
            _ => {}
        }
    }

    last
}

// =============================================================================
// Tests
// =============================================================================
