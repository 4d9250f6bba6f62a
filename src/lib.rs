//! Pixel-art generation service
//!
//! Accepts text prompts or uploaded images, records each request as a
//! generation job, runs inference on a background worker and exposes the
//! job's status, history and finished images over HTTP.

pub mod app_state;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod routes;
pub mod services;
