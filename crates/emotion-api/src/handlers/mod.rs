//! HTTP handlers, one module per resource.

pub mod admin;
pub mod health;
pub mod jobs;
pub mod results;
pub mod snapshots;
