//! Size tier classification.
//!
//! Routes each document to a dispatch strategy based on the length of its
//! extracted text: small documents go out as one concurrent call, medium and
//! large documents as paced, strictly ordered sub-batches.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Dispatch tier of a document. Ordered `Small < Medium < Large`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SizeTier {
    Small,
    Medium,
    Large,
}

impl SizeTier {
    /// Whether documents of this tier are sent as paced sub-batches.
    pub fn is_batched(&self) -> bool {
        !matches!(self, SizeTier::Small)
    }
}

impl fmt::Display for SizeTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SizeTier::Small => write!(f, "small"),
            SizeTier::Medium => write!(f, "medium"),
            SizeTier::Large => write!(f, "large"),
        }
    }
}

/// Character-length thresholds separating the tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct TierThresholds {
    /// First length classified as medium.
    #[serde(default = "default_medium_from")]
    pub medium_from: usize,
    /// First length classified as large.
    #[serde(default = "default_large_from")]
    pub large_from: usize,
}

fn default_medium_from() -> usize {
    20_000
}

fn default_large_from() -> usize {
    200_000
}

impl Default for TierThresholds {
    fn default() -> Self {
        Self {
            medium_from: default_medium_from(),
            large_from: default_large_from(),
        }
    }
}

impl TierThresholds {
    pub fn new(medium_from: usize, large_from: usize) -> Self {
        Self {
            medium_from,
            large_from,
        }
    }

    /// Classify a document by its extracted text length in characters.
    pub fn classify(&self, text_len: usize) -> SizeTier {
        if text_len >= self.large_from {
            SizeTier::Large
        } else if text_len >= self.medium_from {
            SizeTier::Medium
        } else {
            SizeTier::Small
        }
    }
}
