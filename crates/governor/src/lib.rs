//! Test governor daemon
//!
//! Hosts the governor, drives a synthetic soak workload through it and
//! exposes health, metrics and governor state over HTTP.

pub mod api;
pub mod config;
pub mod workload;
