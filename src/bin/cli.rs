//! CLI for data and membership operations

use clap::{Parser, Subcommand};
use raftkv::command::MemberOp;
use raftkv::Client;

#[derive(Parser)]
#[command(name = "raftkv")]
#[command(about = "raftkv replicated key-value store CLI")]
#[command(version)]
struct Cli {
    /// Server to contact
    #[arg(long, default_value = "127.0.0.1:2317")]
    address: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Store a value
    Set {
        /// Key
        key: String,

        /// Value
        value: String,
    },

    /// Read a value
    Get {
        /// Key
        key: String,
    },

    /// Delete a key
    Del {
        /// Key
        key: String,
    },

    /// Cluster membership
    Member {
        #[command(subcommand)]
        command: MemberCommands,
    },
}

#[derive(Subcommand)]
enum MemberCommands {
    /// Add a voting member
    Add {
        /// Server ID
        server_id: String,

        /// Member address
        address: String,
    },

    /// Remove a member
    Remove {
        /// Server ID
        server_id: String,
    },

    /// List members
    List,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()),
        )
        .init();

    let cli = Cli::parse();
    let mut client = Client::connect(&cli.address).await?;

    match cli.command {
        Commands::Set { key, value } => {
            client.set(&key, &value).await?;
            println!("OK");
        }

        Commands::Get { key } => match client.get(&key).await? {
            Some(value) => println!("{}", value),
            None => println!("null"),
        },

        Commands::Del { key } => {
            let removed = client.del(&key).await?;
            println!("{}", removed);
        }

        Commands::Member { command } => {
            let reply = match command {
                MemberCommands::Add { server_id, address } => {
                    client.member(MemberOp::Add, &server_id, &address).await?
                }
                MemberCommands::Remove { server_id } => {
                    client.member(MemberOp::Remove, &server_id, "").await?
                }
                MemberCommands::List => client.member(MemberOp::List, "", "").await?,
            };
            println!("{}", reply);
        }
    }

    Ok(())
}
