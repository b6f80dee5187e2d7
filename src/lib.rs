#![allow(unused_assignments)] // thiserror/miette proc macros trigger false positives

pub mod cli;
pub mod config;
pub mod context;
pub mod error;
pub mod flow;
pub mod logging;
pub mod network;
pub mod observer;
pub mod paths;
pub mod progress;
pub mod provider;
pub mod session;
pub mod session_state;
pub mod setup;
pub mod shell;
pub mod tools;
pub mod workers;

#[cfg(test)]
pub mod testing;
