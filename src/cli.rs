use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::models::token::TokenStatus;

/// Trouble Lab, a dispute consultation service
#[derive(Parser)]
#[command(name = "troublelab", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP server
    Serve {
        /// Port to bind (defaults to TROUBLELAB_PORT)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Manage access tokens
    Token {
        #[command(subcommand)]
        command: TokenCommands,
    },

    /// Manage user accounts
    User {
        #[command(subcommand)]
        command: UserCommands,
    },

    /// Import legacy contract exports
    Import {
        #[command(subcommand)]
        command: ImportCommands,
    },
}

#[derive(Subcommand)]
pub enum TokenCommands {
    /// Issue new UNUSED tokens
    Generate {
        #[arg(long, default_value = "1")]
        count: usize,
    },
    /// List tokens
    List {
        #[arg(long, value_parser = parse_status)]
        status: Option<TokenStatus>,
    },
    /// Change the status of a token
    SetStatus {
        #[arg(long)]
        value: String,
        #[arg(long, value_parser = parse_status)]
        status: TokenStatus,
    },
}

#[derive(Subcommand)]
pub enum UserCommands {
    /// Grant admin rights to a user
    Promote {
        #[arg(long)]
        id: uuid::Uuid,
    },
}

#[derive(Subcommand)]
pub enum ImportCommands {
    /// Classify an export without touching the database
    Preview {
        #[arg(long)]
        file: PathBuf,
    },
    /// Classify an export and apply its eligible rows
    Apply {
        #[arg(long)]
        file: PathBuf,
    },
}

fn parse_status(s: &str) -> Result<TokenStatus, String> {
    s.to_ascii_uppercase().parse()
}
