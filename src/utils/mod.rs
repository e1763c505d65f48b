//! Utility helpers shared across modules

pub mod logging;
pub mod sqlite;
