pub mod cli;
pub mod config;
pub mod flock;
pub mod git;
pub mod model;
pub mod provider;
pub mod resolver;
pub mod status;

mod api;

#[cfg(test)]
mod test_support;

pub use api::{AssetManager, AssetManagerBuilder, ProjectInfo, RunTarget};
