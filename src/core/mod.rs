//! Core substrate of the control plane.
//!
//! Layered leaves-first: models (`project`, `stack`, `action`, `state`),
//! persistence (`state`, `audit`, `retry`), reliability (`circuit`,
//! `retry`), planning and execution (`engine`), and the use cases
//! (`ops`) that compose all of it for the CLI.

pub mod action;
pub mod audit;
pub mod circuit;
pub mod config;
pub mod detection;
pub mod engine;
pub mod error;
pub mod health;
pub mod logging;
pub mod ops;
pub mod project;
pub mod retry;
pub mod stack;
pub mod state;
pub mod time;
