//! Engine logic and port definitions for taskloom.
//!
//! This crate defines the "ports" (repository, record store and agent
//! traits) that the infrastructure layer implements, plus in-memory
//! implementations of each. It depends only on `taskloom-types` -- never on
//! `taskloom-infra` or any database crate.

pub mod agent;
pub mod engine;
pub mod event;
pub mod output;
pub mod repository;
