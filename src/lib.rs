#![forbid(unsafe_code)]

//! Account registration and sign-in service for the subscription tracker.

pub mod auth;
pub mod config;
pub mod gateway;

pub use config::Config;
