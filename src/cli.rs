use clap::{Parser, Subcommand};

/// OAuth2 token broker and REST proxy for Zoho Projects
#[derive(Parser)]
#[command(name = "oauth-broker", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP server
    Serve {
        /// Port to bind (defaults to BROKER_PORT)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Print the consent URL to start the authorization flow
    AuthUrl {
        /// Region to authorize against (com, eu, in, ...)
        #[arg(long)]
        location: Option<String>,
    },

    /// Inspect or rotate the stored token
    Token {
        #[command(subcommand)]
        command: TokenCommands,
    },

    /// Run database migrations and exit
    Migrate,
}

#[derive(Subcommand)]
pub enum TokenCommands {
    /// Show expiry and scope of the active token
    Status,
    /// Force a refresh grant now
    Refresh,
    /// Print the current valid access token (refreshing if stale)
    Show,
    /// Deactivate the active token
    Deactivate,
}
