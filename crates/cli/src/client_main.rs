//! `pgvault-cli` — the management client.
//!
//! Each verb maps to one management command over the control socket. The
//! process exit code mirrors the server's outcome field.

use clap::{Parser, Subcommand};
use serde_json::json;
use std::path::PathBuf;
use std::process;
use vault_wire::{Command, ManagementClient, Request};

#[derive(Parser)]
#[command(name = "pgvault-cli", version, about = "Management client for pgvault")]
struct Args {
    /// Directory holding the control socket
    #[arg(short = 's', long = "socket-dir", default_value = "/tmp")]
    socket_dir: PathBuf,

    #[command(subcommand)]
    verb: Verb,
}

#[derive(Subcommand)]
enum Verb {
    /// Take a backup of one server
    Backup { server: String },
    /// List the backups of one server
    ListBackup { server: String },
    /// Restore a backup (label, `newest` or `oldest`) into a directory
    Restore {
        server: String,
        label: String,
        output: PathBuf,
    },
    /// Verify a backup's checksums
    Verify { server: String, label: String },
    /// Archive a backup as a single tar artifact
    Archive {
        server: String,
        label: String,
        output: PathBuf,
        /// Object-store endpoint `host:port/prefix` to PUT the artifact to
        #[arg(long)]
        endpoint: Option<String>,
    },
    /// Delete a backup
    Delete { server: String, label: String },
    /// Apply the retention window of one server
    Retain { server: String },
    /// Engine status
    Status,
    /// Per-server details with backup listings
    Details,
    /// Liveness check
    Isalive,
    /// Stop the server
    Stop,
    /// Reset per-server runtime flags
    Reset,
    /// Reload the configuration file
    Reload,
}

fn main() {
    let args = Args::parse();
    let request = match &args.verb {
        Verb::Backup { server } => Request::new(Command::Backup, json!({ "server": server })),
        Verb::ListBackup { server } => {
            Request::new(Command::ListBackup, json!({ "server": server }))
        }
        Verb::Restore {
            server,
            label,
            output,
        } => Request::new(
            Command::Restore,
            json!({ "server": server, "label": label, "output": output.display().to_string() }),
        ),
        Verb::Verify { server, label } => Request::new(
            Command::Verify,
            json!({ "server": server, "label": label }),
        ),
        Verb::Archive {
            server,
            label,
            output,
            endpoint,
        } => Request::new(
            Command::Archive,
            json!({
                "server": server,
                "label": label,
                "output": output.display().to_string(),
                "endpoint": endpoint,
            }),
        ),
        Verb::Delete { server, label } => Request::new(
            Command::Delete,
            json!({ "server": server, "label": label }),
        ),
        Verb::Retain { server } => Request::new(Command::Retain, json!({ "server": server })),
        Verb::Status => Request::bare(Command::Status),
        Verb::Details => Request::bare(Command::Details),
        Verb::Isalive => Request::bare(Command::IsAlive),
        Verb::Stop => Request::bare(Command::Stop),
        Verb::Reset => Request::bare(Command::Reset),
        Verb::Reload => Request::bare(Command::Reload),
    };

    let client = ManagementClient::new(&args.socket_dir.join("pgvault"));
    let responses = match client.request(&request) {
        Ok(responses) => responses,
        Err(e) => {
            eprintln!("pgvault-cli: {e}");
            process::exit(1);
        }
    };

    let mut outcome = true;
    for response in &responses {
        outcome &= response.outcome;
        match serde_json::to_string_pretty(&response) {
            Ok(text) => println!("{text}"),
            Err(_) => println!("{:?}", response),
        }
    }
    process::exit(if outcome { 0 } else { 1 });
}
