// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Row-level change events and the bindings that select them.
//!
//! The remote store emits one [`ChangeEvent`] per row mutation. Delivery is
//! at-least-once, ordered within a table and unordered across tables.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Tables the engine reads from or writes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Notifications,
    Comments,
    Topics,
    Subscriptions,
    Sites,
    /// Push delivery registrations. Written, never mirrored locally.
    Devices,
}

impl Table {
    pub fn as_str(&self) -> &'static str {
        match self {
            Table::Notifications => "notifications",
            Table::Comments => "comments",
            Table::Topics => "topics",
            Table::Subscriptions => "subscriptions",
            Table::Sites => "sites",
            Table::Devices => "devices",
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Table {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "notifications" => Ok(Table::Notifications),
            "comments" => Ok(Table::Comments),
            "topics" => Ok(Table::Topics),
            "subscriptions" => Ok(Table::Subscriptions),
            "sites" => Ok(Table::Sites),
            "devices" => Ok(Table::Devices),
            _ => Err(Error::InvalidTable(s.to_string())),
        }
    }
}

/// Kind of row mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Insert,
    Update,
    Delete,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Insert => "insert",
            Operation::Update => "update",
            Operation::Delete => "delete",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Column equality filter (`column = value`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub column: String,
    pub value: Value,
}

impl Filter {
    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter {
            column: column.into(),
            value: value.into(),
        }
    }

    /// Returns true if the row has the column set to the filter value.
    pub fn matches(&self, row: &Value) -> bool {
        row.get(&self.column) == Some(&self.value)
    }
}

/// One (table, operation-filter) pair a channel listens on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Binding {
    pub table: Table,
    /// `None` listens to every operation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<Operation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<Filter>,
}

impl Binding {
    /// Listens to every operation on `table`.
    pub fn all(table: Table) -> Self {
        Binding {
            table,
            operation: None,
            filter: None,
        }
    }

    /// Listens to a single operation on `table`.
    pub fn only(table: Table, operation: Operation) -> Self {
        Binding {
            table,
            operation: Some(operation),
            filter: None,
        }
    }

    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Returns true if the event falls within this binding.
    ///
    /// Filters are checked against the new row, or the old row for deletes.
    pub fn accepts(&self, event: &ChangeEvent) -> bool {
        if event.table != self.table {
            return false;
        }
        if let Some(op) = self.operation {
            if op != event.operation {
                return false;
            }
        }
        match &self.filter {
            None => true,
            Some(filter) => event.row().is_some_and(|row| filter.matches(row)),
        }
    }
}

/// A row mutation pushed by the remote store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub operation: Operation,
    pub table: Table,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old: Option<Value>,
}

impl ChangeEvent {
    pub fn insert(table: Table, row: Value) -> Self {
        ChangeEvent {
            operation: Operation::Insert,
            table,
            new: Some(row),
            old: None,
        }
    }

    pub fn update(table: Table, row: Value) -> Self {
        ChangeEvent {
            operation: Operation::Update,
            table,
            new: Some(row),
            old: None,
        }
    }

    pub fn delete(table: Table, old: Value) -> Self {
        ChangeEvent {
            operation: Operation::Delete,
            table,
            new: None,
            old: Some(old),
        }
    }

    /// The row that identifies the event: `old` for deletes, `new` otherwise.
    pub fn row(&self) -> Option<&Value> {
        match self.operation {
            Operation::Delete => self.old.as_ref().or(self.new.as_ref()),
            _ => self.new.as_ref(),
        }
    }

    /// The `id` column of the affected row.
    pub fn key(&self) -> Option<&str> {
        self.row().and_then(|row| row.get("id")).and_then(Value::as_str)
    }
}

#[cfg(test)]
#[path = "event_tests.rs"]
mod tests;
