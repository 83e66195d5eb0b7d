//! Category policy.
//!
//! Maps raw model labels onto domain categories and applies a global
//! confidence floor. The mapping is plain data so callers (and tests) can
//! swap it without touching the pipeline.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

/// Confidence floor used when nothing else is configured.
pub const DEFAULT_THRESHOLD: f32 = 0.5;

/// One category and the raw labels that map onto it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryRule {
    pub name: String,
    pub labels: Vec<String>,
}

impl CategoryRule {
    pub fn new(name: &str, labels: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            labels: labels.iter().map(|l| l.to_string()).collect(),
        }
    }
}

/// Ordered category mapping plus a confidence threshold.
#[derive(Clone, Debug, PartialEq)]
pub struct CategoryPolicy {
    threshold: f32,
    rules: Vec<CategoryRule>,
}

impl CategoryPolicy {
    pub fn new(threshold: f32, rules: Vec<CategoryRule>) -> Result<Self> {
        if !threshold.is_finite() || !(0.0..=1.0).contains(&threshold) {
            return Err(anyhow!(
                "confidence threshold must be within [0, 1], got {}",
                threshold
            ));
        }
        for (i, rule) in rules.iter().enumerate() {
            if rule.name.trim().is_empty() {
                return Err(anyhow!("category #{} has an empty name", i));
            }
            if rule.labels.is_empty() {
                return Err(anyhow!("category '{}' has no labels", rule.name));
            }
            if rules[..i].iter().any(|prev| prev.name == rule.name) {
                return Err(anyhow!("category '{}' is defined twice", rule.name));
            }
        }
        Ok(Self { threshold, rules })
    }

    /// fire / crash / medical watcher mapping over COCO-style labels.
    pub fn emergency(threshold: f32) -> Result<Self> {
        Self::new(
            threshold,
            vec![
                CategoryRule::new("fire", &["fire"]),
                CategoryRule::new("crash", &["car", "truck"]),
                CategoryRule::new("medical", &["person"]),
            ],
        )
    }

    /// Hand gesture mapping for the rock-paper-scissors model.
    pub fn gestures(threshold: f32) -> Result<Self> {
        Self::new(
            threshold,
            vec![
                CategoryRule::new("rock", &["rock"]),
                CategoryRule::new("paper", &["paper"]),
                CategoryRule::new("scissors", &["scissors"]),
            ],
        )
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn rules(&self) -> &[CategoryRule] {
        &self.rules
    }

    /// Map a raw detection onto a category.
    ///
    /// Returns the first category (in configured order) that lists
    /// `raw_label`, or `None` when no category matches or `confidence` is
    /// below the threshold.
    pub fn classify(&self, raw_label: &str, confidence: f32) -> Option<&str> {
        if confidence.is_nan() || confidence < self.threshold {
            return None;
        }
        self.rules
            .iter()
            .find(|rule| rule.labels.iter().any(|label| label == raw_label))
            .map(|rule| rule.name.as_str())
    }
}
