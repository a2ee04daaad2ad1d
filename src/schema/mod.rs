//! Data types stored in a project document.

pub mod asset;
pub mod character;
pub mod event;
