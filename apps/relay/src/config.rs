//! Server settings from a TOML file, overridden by command-line flags.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use capyrelay_server::ServerConfig;
use serde::Deserialize;

use crate::cli::ServeArgs;

/// On-disk config format. Every field is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ConfigFile {
    listen: Option<SocketAddr>,
    root: Option<PathBuf>,
    chunk_size: Option<usize>,
    delivery_interval_ms: Option<u64>,
    packets_per_tick: Option<usize>,
    write_timeout_ms: Option<u64>,
}

impl ConfigFile {
    fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            tracing::warn!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("failed to parse {}", path.display()))
    }
}

/// Builds the server config: defaults, then the file, then flags.
pub fn load(args: &ServeArgs) -> anyhow::Result<ServerConfig> {
    let file = match &args.config {
        Some(path) => ConfigFile::load(path)?,
        None => ConfigFile::default(),
    };

    let mut config = ServerConfig::default();

    if let Some(listen) = args.listen.or(file.listen) {
        config.listen = listen;
    }
    if let Some(root) = args.root.clone().or(file.root) {
        config.serve_root = root;
    }
    if let Some(chunk_size) = args.chunk_size.or(file.chunk_size) {
        config.chunk_size = chunk_size;
    }
    if let Some(ms) = args.delivery_interval_ms.or(file.delivery_interval_ms) {
        config.delivery_interval = Duration::from_millis(ms.max(1));
    }
    if let Some(packets) = args.packets_per_tick.or(file.packets_per_tick) {
        config.packets_per_tick = packets;
    }
    if let Some(ms) = args.write_timeout_ms.or(file.write_timeout_ms) {
        config.write_timeout = Duration::from_millis(ms.max(1));
    }

    Ok(config)
}
