#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

//! Delegation lifecycle coordination for agent sessions.
//!
//! A delegation is a background task dispatched to a named agent on a remote
//! session platform. [`manager::DelegationManager`] launches delegations,
//! tracks each through completion, cancellation, timeout, or failure, batches
//! completion notifications back to the parent session, and serves
//! read/cancel/resume over the tracked state.

pub mod analysis;
pub mod api;
pub mod catalog;
pub mod config;
pub mod delegation;
pub mod error;
pub mod format;
pub mod logging;
pub mod manager;
pub mod model;
pub mod notify;

pub use config::ManagerConfig;
pub use delegation::{Delegation, DelegationStatus};
pub use error::{Error, Result};
pub use manager::{DelegateRequest, DelegationManager, ReadArgs};
