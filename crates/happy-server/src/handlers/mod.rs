//! HTTP handlers

pub mod health;
pub mod sessions;
pub mod ws;

pub use health::health;
