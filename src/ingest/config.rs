//! Policy points of the ingestion service

use std::fmt;
use std::str::FromStr;

use crate::data::{Attributes, Span};
use crate::validate::ValidationPolicy;

/// What a `createTrace` for a stored `IN_PROGRESS` trace does with its spans
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UpdateMode {
    /// Incoming spans replace the stored spans
    #[default]
    Replace,
    /// Incoming spans are added after the stored spans
    Append,
}

impl FromStr for UpdateMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "replace" => Ok(UpdateMode::Replace),
            "append" => Ok(UpdateMode::Append),
            other => Err(format!("unknown update mode '{other}'")),
        }
    }
}

impl fmt::Display for UpdateMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            UpdateMode::Replace => "replace",
            UpdateMode::Append => "append",
        })
    }
}

/// Who owns the `dropped_*_count` fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DroppedAttributesPolicy {
    /// Client counts are stored as sent; attribute maps are not touched
    #[default]
    TrustClient,
    /// Attribute maps larger than `max_attributes` are cut down to their
    /// first `max_attributes` keys, and the count grows by what was removed
    Enforce { max_attributes: usize },
}

impl DroppedAttributesPolicy {
    /// Apply to every attribute map of the spans, including events and links
    pub fn apply(&self, spans: &mut [Span]) {
        let DroppedAttributesPolicy::Enforce { max_attributes } = *self else {
            return;
        };
        for span in spans {
            truncate(&mut span.attributes, &mut span.dropped_attributes_count, max_attributes);
            for event in &mut span.events {
                truncate(&mut event.attributes, &mut event.dropped_attributes_count, max_attributes);
            }
            for link in &mut span.links {
                truncate(&mut link.attributes, &mut link.dropped_attributes_count, max_attributes);
            }
        }
    }
}

fn truncate(attributes: &mut Attributes, dropped: &mut u32, max: usize) {
    let Some(first_removed) = attributes.keys().nth(max).cloned() else {
        return;
    };
    let removed = attributes.split_off(&first_removed).len();
    *dropped = dropped.saturating_add(u32::try_from(removed).unwrap_or(u32::MAX));
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IngestConfig {
    pub validation: ValidationPolicy,
    pub update_mode: UpdateMode,
    pub dropped_attributes: DroppedAttributesPolicy,
}

impl IngestConfig {
    pub fn with_validation(mut self, validation: ValidationPolicy) -> Self {
        self.validation = validation;
        self
    }

    pub fn with_update_mode(mut self, update_mode: UpdateMode) -> Self {
        self.update_mode = update_mode;
        self
    }

    pub fn with_dropped_attributes(mut self, policy: DroppedAttributesPolicy) -> Self {
        self.dropped_attributes = policy;
        self
    }
}
