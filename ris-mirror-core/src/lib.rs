#![doc = "ris-mirror-core: incremental crawl-and-reconcile engine for ALLRIS council portals."]

//! The engine discovers the portal's resource tree (session lists, sessions, agenda items,
//! proposals, attachments and attachment documents), stores what changed and deletes what
//! vanished upstream.
//!
//! # Usage
//! Build a [`dispatch::Dispatcher`] from a [`config::MirrorConfig`] and the three
//! collaborators of [`contract`], then start a crawl from [`synchronise`]. Fan-out either
//! recurses inline or goes through a [`queue::WorkQueue`].

pub mod change;
pub mod config;
pub mod contract;
pub mod descriptor;
pub mod dispatch;
pub mod download;
pub mod error;
pub mod extract;
pub mod fetch;
pub mod queue;
pub mod reconcile;
pub mod storage;
pub mod synchronise;

pub use error::MirrorError;
