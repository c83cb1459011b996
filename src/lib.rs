//! version-watch: track upstream releases and drive deployment actions
//!
//! ```text
//!   Schedule ──tick──▶ Tracker ──▶ Lookup ──▶ url_commands ──▶ Require
//!                         │
//!                         ▼
//!                   resolve(candidate, stored)
//!                         │
//!                         ▼
//!                   StatusHandle ──▶ EventSink ──▶ broadcaster / StatusStore
//!                         │
//!                         ▼
//!                   Gate ──▶ Actions (commands, webhooks, notify)
//! ```
//!
//! # Modules
//!
//! - [`config`]: YAML configuration, defaults and durations
//! - [`context`]: HTTP clients, endpoints and timing shared by every service
//! - [`lookup`]: Fetching and extracting versions from release sources
//! - [`version`]: Semantic version parsing, ordering and change resolution
//! - [`service`]: Per-service status, scheduling and the service manager
//! - [`action`]: Commands, webhooks and notifications
//! - [`store`]: SQLite persistence of last-known statuses
//! - [`template`]: `{{ version }}` placeholder rendering
//! - [`process`]: External command execution with a timeout

pub mod action;
pub mod config;
pub mod context;
pub mod lookup;
pub mod process;
pub mod service;
pub mod store;
pub mod template;
pub mod version;
