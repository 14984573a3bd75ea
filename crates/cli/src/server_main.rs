//! `pgvault` — the backup server binary.
//!
//! Loads the configuration, probes each upstream once, binds the
//! management socket, and serves requests until STOP. Exit code 0 on
//! clean shutdown, 1 on unrecoverable setup errors.

use clap::Parser;
use std::net::TcpStream;
use std::path::PathBuf;
use std::process;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use vault_core::{Configuration, ConfigurationHandle};
use vault_wire::ManagementServer;

#[derive(Parser)]
#[command(name = "pgvault", version, about = "Backup engine for PostgreSQL primaries")]
struct Args {
    /// Configuration file
    #[arg(short = 'c', long = "config", default_value = "/etc/pgvault/pgvault.conf")]
    config: PathBuf,

    /// Users file (reserved for authenticated deployments)
    #[arg(short = 'u', long = "users")]
    users: Option<PathBuf>,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();
    let config = match Configuration::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("pgvault: {e}");
            process::exit(1);
        }
    };
    if let Some(users) = &args.users {
        if !users.is_file() {
            eprintln!("pgvault: users file {} not found", users.display());
            process::exit(1);
        }
    }

    probe_servers(&config);
    let handle = ConfigurationHandle::new(config);
    let server = ManagementServer::new(handle).with_config_path(&args.config);

    if let Err(e) = server.run() {
        eprintln!("pgvault: management socket failed: {e}");
        process::exit(1);
    }
    info!("clean shutdown");
}

/// One-shot health probe: a server with a local data directory is
/// considered online; otherwise a TCP connect to its host:port decides.
fn probe_servers(config: &Configuration) {
    for server in &config.servers {
        let online = if server.data_dir.as_deref().is_some_and(|d| d.is_dir()) {
            true
        } else {
            let address = format!("{}:{}", server.host, server.port);
            match address.parse() {
                Ok(addr) => {
                    TcpStream::connect_timeout(&addr, Duration::from_secs(2)).is_ok()
                }
                Err(_) => TcpStream::connect(&address).is_ok(),
            }
        };
        server.state.set_online(online);
        if online {
            info!(server = %server.name, "server online");
        } else {
            warn!(server = %server.name, "server offline");
        }
    }
}
