//! Story Timeline: the branching event graph behind a visual-novel editor.
//!
//! Authors and an external text generator append events to a single
//! timeline. Any event can become a branch point, one generation call can be
//! undone as a unit, and the whole project (events, characters, asset
//! references) round-trips through a JSON document.

pub mod core;
pub mod schema;
