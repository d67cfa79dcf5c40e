//! Scriptwright Core Type Definitions
//!
//! Defines fundamental types used throughout the pipeline.

use serde::{Deserialize, Serialize};

// =============================================================================
// ID Types
// =============================================================================

/// Provider identifier (e.g. "openai", "gemini", "groq")
pub type ProviderId = String;

/// Generation job identifier (ULID)
pub type JobId = String;

/// Caller-supplied idempotency key for a logical generation job
pub type JobKey = String;

/// Creates a new job identifier
pub fn new_job_id() -> JobId {
    ulid::Ulid::new().to_string()
}

// =============================================================================
// Ordinal Ranges
// =============================================================================

/// Inclusive range of unit ordinals requested by a single batch
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "RawOrdinalRange")]
pub struct OrdinalRange {
    /// First ordinal (1-based)
    pub start: u32,
    /// Last ordinal (inclusive)
    pub end: u32,
}

/// Wire form; deserialized ranges go through [`OrdinalRange::new`]
#[derive(Deserialize)]
struct RawOrdinalRange {
    start: u32,
    end: u32,
}

impl From<RawOrdinalRange> for OrdinalRange {
    fn from(raw: RawOrdinalRange) -> Self {
        Self::new(raw.start, raw.end)
    }
}

impl OrdinalRange {
    /// Creates a new range; `end` is clamped so it never precedes `start`
    pub fn new(start: u32, end: u32) -> Self {
        Self {
            start,
            end: end.max(start),
        }
    }

    /// Number of ordinals covered by the range
    pub fn len(&self) -> u32 {
        self.end.saturating_sub(self.start).saturating_add(1)
    }

    /// Ranges always cover at least one ordinal
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Checks if the range contains an ordinal
    pub fn contains(&self, ordinal: u32) -> bool {
        ordinal >= self.start && ordinal <= self.end
    }
}

impl std::fmt::Display for OrdinalRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.start == self.end {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{}-{}", self.start, self.end)
        }
    }
}
