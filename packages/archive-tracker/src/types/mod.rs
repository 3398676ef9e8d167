//! Domain types.

pub mod event;
pub mod job;
pub mod options;
pub mod result;
