use clap::{Parser, Subcommand};

/// probegate — capability-token access control for probes and tunnels
#[derive(Parser)]
#[command(name = "probegate", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the management server
    Serve {
        /// Port to bind
        #[arg(short, long, default_value = "8443")]
        port: u16,
    },

    /// Offline token utilities
    Token {
        #[command(subcommand)]
        command: TokenCommands,
    },
}

#[derive(Subcommand)]
pub enum TokenCommands {
    /// Draw a fresh token candidate value (for device provisioning)
    Generate,
}
