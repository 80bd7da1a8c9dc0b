//! Roadside asset detection pipeline
//!
//! This library provides the core functionality for the roadeye
//! system: an asynchronous job pipeline that takes an uploaded video
//! through frame sampling and object detection to a persisted results
//! document, polled over HTTP.

pub mod app_state;
pub mod config;
pub mod models;
pub mod routes;
pub mod services;
pub mod store;
