//! Core trait abstractions.
//!
//! Applications provide a crawl engine and pick stores; embedding
//! providers ship with the crate.

pub mod crawler;
pub mod embedder;
pub mod ledger;
pub mod lock;
pub mod store;
