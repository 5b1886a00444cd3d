//! Deployer - 目录差异部署引擎
//!
//! Copies what changed between paired source and destination directories,
//! stopping (and afterwards restarting) whatever holds destination files open.

pub mod config;
pub mod domain;
pub mod error;
pub mod infra;
pub mod services;
pub mod state;
