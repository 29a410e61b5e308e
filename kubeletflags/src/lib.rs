pub mod api;
pub mod cli;
pub mod commands;
pub mod kubelet;
pub mod utils;

pub use api::ClusterSpec;
pub use cli::{Cli, Commands};
pub use kubelet::{apply_defaults, set_kubelet_config, FlagMap, Profile};
