//! # revwatch
//!
//! Watches branches of git repositories. Every time a branch head moves, a
//! [`core::monitor::BranchMonitor`] clones the repository into a fresh
//! directory, checks out the new head, hands the checkout to its subscribers
//! as a [`core::handle::RevisionHandle`] and records the head so a restart
//! does not redo the work.
//!
//! - `core`: monitor, head store, emitter, handles, errors
//! - `git`: source repository access and materialization
//! - `daemon` / `cli`: the `revwatchd` daemon and its `revwatch` client
//! - `config`: daemon configuration file
//! - `log`: per-branch delivery log

pub mod cli;
pub mod config;
pub mod core;
pub mod daemon;
pub mod git;
pub mod log;
