// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Record types held by the entity store.
//!
//! Notifications own their comment thread. Topics carry a derived
//! `subscribed` flag that is recomputed from the subscription rows, never
//! set directly by a change event.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// How urgent an alert is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    /// Returns the string representation used on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Severity {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "low" => Ok(Severity::Low),
            "medium" => Ok(Severity::Medium),
            "high" => Ok(Severity::High),
            _ => Err(Error::InvalidSeverity(s.to_string())),
        }
    }
}

/// Handling state of an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// Raised and not yet looked at.
    New,
    /// Someone has seen it and is on it.
    Acknowledged,
    /// Dealt with.
    Resolved,
}

impl Status {
    /// Returns the string representation used on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::New => "new",
            Status::Acknowledged => "acknowledged",
            Status::Resolved => "resolved",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Status {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "new" => Ok(Status::New),
            "acknowledged" => Ok(Status::Acknowledged),
            "resolved" => Ok(Status::Resolved),
            _ => Err(Error::InvalidStatus(s.to_string())),
        }
    }
}

/// An alert raised against a site or topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    /// Identity shared by every delivery path.
    pub id: String,
    /// Id assigned by the push delivery service, used to match the
    /// foreground-delivery copy of the same alert.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    pub title: String,
    pub message: String,
    pub severity: Severity,
    pub status: Status,
    /// Free-form classification (e.g. "server_alert").
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub site: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    /// Thread, oldest first.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub comments: Vec<Comment>,
}

impl Notification {
    /// Creates a new alert in the `new` state.
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        message: impl Into<String>,
        severity: Severity,
        created_at: DateTime<Utc>,
    ) -> Self {
        Notification {
            id: id.into(),
            external_id: None,
            title: title.into(),
            message: message.into(),
            severity,
            status: Status::New,
            kind: String::new(),
            topic_id: None,
            site: None,
            created_at,
            updated_at: None,
            comments: Vec::new(),
        }
    }

    /// Builder-style setter for the topic reference.
    pub fn with_topic(mut self, topic_id: impl Into<String>) -> Self {
        self.topic_id = Some(topic_id.into());
        self
    }

    /// Builder-style setter for the push delivery id.
    pub fn with_external_id(mut self, external_id: impl Into<String>) -> Self {
        self.external_id = Some(external_id.into());
        self
    }

    /// Parses a store row.
    pub fn from_row(row: &Value) -> Result<Self> {
        Ok(serde_json::from_value(row.clone())?)
    }

    /// Returns true if `other` is the same logical alert, matched by id or
    /// by push delivery id.
    pub fn is_same_alert(&self, id: &str, external_id: Option<&str>) -> bool {
        if self.id == id {
            return true;
        }
        match (self.external_id.as_deref(), external_id) {
            (Some(mine), Some(theirs)) => mine == theirs,
            _ => false,
        }
    }

    /// Overlays the fields present in `row` onto this record.
    ///
    /// The comment thread is kept as-is. `updated_at` comes from the row if
    /// present, otherwise `now`.
    pub fn merge_row(&mut self, row: &Map<String, Value>, now: DateTime<Utc>) -> Result<()> {
        let mut current = match serde_json::to_value(&*self)? {
            Value::Object(map) => map,
            _ => return Err(Error::InvalidInput("notification is not an object".to_string())),
        };
        for (key, value) in row {
            if key == "comments" {
                continue;
            }
            current.insert(key.clone(), value.clone());
        }
        let incoming_updated = row.get("updated_at").filter(|v| !v.is_null()).is_some();
        let mut merged: Notification = serde_json::from_value(Value::Object(current))?;
        merged.comments = std::mem::take(&mut self.comments);
        if !incoming_updated {
            merged.updated_at = Some(now);
        }
        *self = merged;
        Ok(())
    }

    /// Inserts a comment keeping the thread sorted by creation time.
    ///
    /// Returns false if a comment with the same id is already present.
    pub fn insert_comment(&mut self, comment: Comment) -> bool {
        if self.comments.iter().any(|c| c.id == comment.id) {
            return false;
        }
        self.comments.push(comment);
        // Stable sort keeps arrival order among equal timestamps.
        self.comments.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        true
    }

    /// Removes a comment by id. Returns true if one was removed.
    pub fn remove_comment(&mut self, comment_id: &str) -> bool {
        let before = self.comments.len();
        self.comments.retain(|c| c.id != comment_id);
        self.comments.len() != before
    }
}

/// A local edit to a notification's mutable fields.
///
/// Patches coalesce: a later patch overrides the fields it sets and keeps
/// the rest of the earlier one.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NotificationPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Status>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub site: Option<String>,
}

impl NotificationPatch {
    /// A patch that only changes the status.
    pub fn status(status: Status) -> Self {
        NotificationPatch {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.status.is_none()
            && self.severity.is_none()
            && self.title.is_none()
            && self.message.is_none()
            && self.site.is_none()
    }

    /// Folds a newer patch into this one.
    pub fn merge(&mut self, newer: NotificationPatch) {
        if newer.status.is_some() {
            self.status = newer.status;
        }
        if newer.severity.is_some() {
            self.severity = newer.severity;
        }
        if newer.title.is_some() {
            self.title = newer.title;
        }
        if newer.message.is_some() {
            self.message = newer.message;
        }
        if newer.site.is_some() {
            self.site = newer.site;
        }
    }

    /// Applies the patch, stamping `updated_at`.
    pub fn apply_to(&self, notification: &mut Notification, now: DateTime<Utc>) {
        if let Some(status) = self.status {
            notification.status = status;
        }
        if let Some(severity) = self.severity {
            notification.severity = severity;
        }
        if let Some(title) = &self.title {
            notification.title = title.clone();
        }
        if let Some(message) = &self.message {
            notification.message = message.clone();
        }
        if let Some(site) = &self.site {
            notification.site = Some(site.clone());
        }
        notification.updated_at = Some(now);
    }

    /// Builds the payload committed to the remote store.
    pub fn to_payload(&self, id: &str, updated_at: DateTime<Utc>) -> Result<Value> {
        let mut payload = match serde_json::to_value(self)? {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        payload.insert("id".to_string(), Value::String(id.to_string()));
        payload.insert("updated_at".to_string(), serde_json::to_value(updated_at)?);
        Ok(Value::Object(payload))
    }
}

/// A comment in a notification's thread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub id: String,
    pub notification_id: String,
    pub user_id: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

impl Comment {
    /// Parses a store row.
    pub fn from_row(row: &Value) -> Result<Self> {
        Ok(serde_json::from_value(row.clone())?)
    }

    /// Display label relative to the viewing actor.
    pub fn author_label(&self, actor_id: &str) -> CommentAuthor {
        if self.user_id == actor_id {
            CommentAuthor::Me
        } else {
            CommentAuthor::Other
        }
    }
}

/// Who wrote a comment, from the viewer's perspective.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommentAuthor {
    Me,
    Other,
}

/// A subject alerts can be filed under.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Topic {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    /// Derived from subscription rows.
    #[serde(default)]
    pub subscribed: bool,
    /// Derived from subscription rows. Present iff `subscribed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscription_id: Option<String>,
}

impl Topic {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Topic {
            id: id.into(),
            name: name.into(),
            group_id: None,
            subscribed: false,
            subscription_id: None,
        }
    }

    /// Parses a store row. Derived fields in the row are ignored.
    pub fn from_row(row: &Value) -> Result<Self> {
        let mut topic: Topic = serde_json::from_value(row.clone())?;
        topic.subscribed = false;
        topic.subscription_id = None;
        Ok(topic)
    }
}

/// Links the current actor to one topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: String,
    pub user_id: String,
    /// Missing on some delete events, which only carry the key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic_id: Option<String>,
}

impl Subscription {
    pub fn new(id: impl Into<String>, user_id: impl Into<String>, topic_id: impl Into<String>) -> Self {
        Subscription {
            id: id.into(),
            user_id: user_id.into(),
            topic_id: Some(topic_id.into()),
        }
    }

    pub fn from_row(row: &Value) -> Result<Self> {
        Ok(serde_json::from_value(row.clone())?)
    }
}

/// Status of a monitored site. Attributes are opaque to the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitoredSite {
    pub id: String,
    #[serde(flatten)]
    pub attributes: Map<String, Value>,
}

impl MonitoredSite {
    pub fn from_row(row: &Value) -> Result<Self> {
        Ok(serde_json::from_value(row.clone())?)
    }

    /// Returns a string attribute, if present.
    pub fn attribute_str(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).and_then(Value::as_str)
    }
}

#[cfg(test)]
#[path = "model_tests.rs"]
mod tests;
