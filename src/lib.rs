//! Import and export of feed subscription lists as OPML.
//!
//! [`feed`] converts between OPML documents and flat [`feed::FeedRecord`]
//! lists, [`storage`] persists those records in SQLite, and [`porter`]
//! runs imports and exports between byte streams and a store.

pub mod config;
pub mod feed;
pub mod porter;
pub mod storage;

pub use porter::{ExportReport, ImportReport, OpmlPorter, PortError, PortTask};
