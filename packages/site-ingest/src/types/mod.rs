//! Domain types shared by the scheduler, the pipeline and the stores.

pub mod context;
pub mod job;
pub mod page;
pub mod website;
