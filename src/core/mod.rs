//! Timeline model, persistence, and the generation seam.

pub mod codec;
pub mod config;
pub mod generation;
pub mod sentiment;
pub mod timeline;
pub mod traversal;
pub mod worker;
