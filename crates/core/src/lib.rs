// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! vigil-core: Shared data model for the vigil alert client
//!
//! This crate provides the record types, change events, wire protocol and
//! the in-memory entity store used by the synchronization engine.

pub mod error;
pub mod event;
pub mod model;
pub mod protocol;
pub mod store;
pub mod tags;

pub use error::{Error, Result};
pub use event::{Binding, ChangeEvent, Filter, Operation, Table};
pub use model::{
    Comment, CommentAuthor, MonitoredSite, Notification, NotificationPatch, Severity, Status,
    Subscription, Topic,
};
pub use store::{Collections, EntityStore};
