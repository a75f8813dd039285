//! Veridoc - distributed document analysis orchestration engine.
//!
//! Submitted documents flow through an asynchronous agent pipeline
//! (extraction, similarity, AI-text detection, image analysis, retrieval
//! context, insight synthesis) executed by background workers coordinating
//! through a shared store. Retrieval fans out across multiple search
//! backends; progress and results stream back over event channels.

pub mod agents;
pub mod capability;
pub mod cli;
pub mod config;
pub mod events;
pub mod guard;
pub mod memory;
pub mod retrieval;
pub mod store;
pub mod tasks;
pub mod utils;
pub mod worker;
