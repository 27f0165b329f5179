// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
pub mod config;
pub mod fs;

pub use config::{load_toml, ConfigError, EngineConfig, ProductInfo, Version};
pub use fs::{DiskFiles, FileSource, FsError};

/// Installs the global `fmt` subscriber, filtered by `RUST_LOG`.
///
/// Targets are kept in the output: they carry the log category
/// (`forge::render`, `forge::vulkan`, ...).
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};
    let _ = fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(true)
        .compact()
        .try_init();
}
