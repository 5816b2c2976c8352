// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Validation for push delivery tags.
//!
//! Keys are ASCII alphanumerics plus `_`, `-` and `.`, at most 128 bytes.
//! Values are at most 255 bytes. Checked before any call reaches the push
//! capability.

use std::collections::BTreeMap;

use crate::error::{Error, Result};

pub const MAX_TAG_KEY_LEN: usize = 128;
pub const MAX_TAG_VALUE_LEN: usize = 255;

/// Prefix for tags mirroring topic subscriptions.
pub const TOPIC_TAG_PREFIX: &str = "topic_";

fn invalid(key: &str, reason: impl Into<String>) -> Error {
    Error::InvalidTag {
        key: key.to_string(),
        reason: reason.into(),
    }
}

pub fn validate_tag_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(invalid(key, "key is empty"));
    }
    if key.len() > MAX_TAG_KEY_LEN {
        return Err(invalid(
            key,
            format!("key is {} bytes, max {}", key.len(), MAX_TAG_KEY_LEN),
        ));
    }
    if let Some(c) = key
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.')))
    {
        return Err(invalid(key, format!("key contains '{}'", c)));
    }
    Ok(())
}

pub fn validate_tag_value(key: &str, value: &str) -> Result<()> {
    if value.len() > MAX_TAG_VALUE_LEN {
        return Err(invalid(
            key,
            format!("value is {} bytes, max {}", value.len(), MAX_TAG_VALUE_LEN),
        ));
    }
    Ok(())
}

/// Validates every key and value in a tag set.
pub fn validate_tags(tags: &BTreeMap<String, String>) -> Result<()> {
    for (key, value) in tags {
        validate_tag_key(key)?;
        validate_tag_value(key, value)?;
    }
    Ok(())
}

/// Tag key mirroring a subscription to `topic_id`.
pub fn topic_tag_key(topic_id: &str) -> String {
    format!("{}{}", TOPIC_TAG_PREFIX, topic_id)
}

#[cfg(test)]
#[path = "tags_tests.rs"]
mod tests;
