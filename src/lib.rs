//! Resolves social-media post URLs to directly playable video URLs.

pub mod api;
pub mod cache;
pub mod config;
pub mod context;
pub mod error;
pub mod extractors;
pub mod identity;
pub mod models;
pub mod platform;
pub mod quality;
pub mod service;
