use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the relay server.
    Serve(ServeArgs),
    /// Connect to a relay and chat with the other clients.
    Chat(ChatArgs),
    /// Download one file from a relay.
    Fetch(FetchArgs),
}

#[derive(Args, Debug, Clone, Default)]
pub struct ServeArgs {
    /// TOML config file. Flags given on the command line take precedence.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Socket address to bind. Use port 0 for an ephemeral port.
    #[arg(long)]
    pub listen: Option<SocketAddr>,

    /// Directory requested files are served from.
    #[arg(long)]
    pub root: Option<PathBuf>,

    /// Bytes per file data buffer.
    #[arg(long)]
    pub chunk_size: Option<usize>,

    /// Delivery loop period in milliseconds.
    #[arg(long)]
    pub delivery_interval_ms: Option<u64>,

    /// Packets written per client per delivery tick (0 = drain).
    #[arg(long)]
    pub packets_per_tick: Option<usize>,

    /// Milliseconds a single packet write may stall before the client is dropped.
    #[arg(long)]
    pub write_timeout_ms: Option<u64>,
}

#[derive(Args, Debug, Clone)]
pub struct ChatArgs {
    /// Address of the relay to connect to.
    #[arg(long, default_value = "127.0.0.1:1111")]
    pub server: SocketAddr,
}

#[derive(Args, Debug, Clone)]
pub struct FetchArgs {
    /// Address of the relay to connect to.
    #[arg(long, default_value = "127.0.0.1:1111")]
    pub server: SocketAddr,

    /// Name of the file on the relay, relative to its serve root.
    pub name: String,

    /// Where to write the file. Defaults to the file name in the current directory.
    #[arg(long, short)]
    pub output: Option<PathBuf>,
}
