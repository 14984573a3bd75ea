//! The control-socket server: non-blocking accept over a Unix-domain
//! socket, one JSON request in, one or more JSON responses out.

use crate::frame::{read_frame, write_frame};
use crate::protocol::{Command, Request, Response};
use serde_json::json;
use std::io::ErrorKind;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use vault_core::ConfigurationHandle;
use vault_engine::bag::{NODE_FAILURES, NODE_KIND, NODE_LABEL};
use vault_engine::{BagValue, Orchestrator};

const ACCEPT_POLL: Duration = Duration::from_millis(100);

/// Serves management requests until asked to stop.
pub struct ManagementServer {
    config: ConfigurationHandle,
    config_path: Option<PathBuf>,
    socket_path: PathBuf,
    shutdown: Arc<AtomicBool>,
}

impl ManagementServer {
    /// Server bound to the configuration's socket path.
    pub fn new(config: ConfigurationHandle) -> Self {
        let socket_path = config.current().socket_path();
        ManagementServer {
            config,
            config_path: None,
            socket_path,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Remember where the configuration file lives so RELOAD can re-read
    /// it.
    pub fn with_config_path(mut self, path: &Path) -> Self {
        self.config_path = Some(path.to_path_buf());
        self
    }

    /// Handle for STOP and signal handlers.
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    /// Where the socket is (or will be) bound.
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Accept-dispatch loop. Returns when STOP arrives or the shutdown
    /// flag is raised externally.
    pub fn run(&self) -> std::io::Result<()> {
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path)?;
        }
        if let Some(parent) = self.socket_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let listener = UnixListener::bind(&self.socket_path)?;
        listener.set_nonblocking(true)?;
        info!(socket = %self.socket_path.display(), "management socket bound");

        while !self.shutdown.load(Ordering::Acquire) {
            match listener.accept() {
                Ok((stream, _)) => {
                    if let Err(e) = self.serve_connection(stream) {
                        warn!(error = %e, "management connection failed");
                    }
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    std::thread::sleep(ACCEPT_POLL);
                }
                Err(e) => return Err(e),
            }
        }
        let _ = std::fs::remove_file(&self.socket_path);
        info!("management socket closed");
        Ok(())
    }

    fn serve_connection(&self, mut stream: UnixStream) -> std::io::Result<()> {
        stream.set_nonblocking(false)?;
        let request: Request = match read_frame(&mut stream) {
            Ok(request) => request,
            Err(e) => {
                debug!(error = %e, "unreadable request");
                let _ = write_frame(&mut stream, &Response::error("UNKNOWN", &e.to_string()));
                return Ok(());
            }
        };
        debug!(command = ?request.command, "management request");

        for response in self.dispatch(&request) {
            if let Err(e) = write_frame(&mut stream, &response) {
                warn!(error = %e, "response write failed");
                break;
            }
        }
        Ok(())
    }

    fn dispatch(&self, request: &Request) -> Vec<Response> {
        let config = self.config.current();
        let orchestrator = Orchestrator::new(config.clone());
        let name = command_name(request.command);

        match request.command {
            Command::IsAlive => vec![Response::ok(name, json!({ "Alive": true }))],

            Command::Stop => {
                self.shutdown.store(true, Ordering::Release);
                vec![Response::ok(name, json!({}))]
            }

            Command::Reload => match &self.config_path {
                Some(path) => match vault_core::Configuration::load(path) {
                    Ok(next) => {
                        self.config.reload(next);
                        vec![Response::ok(name, json!({}))]
                    }
                    Err(e) => vec![Response::error(name, &e.to_string())],
                },
                None => vec![Response::error(name, "no configuration file to reload")],
            },

            Command::Reset => {
                for server in &config.servers {
                    server.state.release_repository();
                }
                vec![Response::ok(name, json!({}))]
            }

            Command::Status => {
                let servers: Vec<_> = config
                    .servers
                    .iter()
                    .map(|s| {
                        json!({
                            "Server": s.name,
                            "Online": s.state.is_online(),
                            "Workers": s.workers,
                        })
                    })
                    .collect();
                vec![Response::ok(name, json!({ "Servers": servers }))]
            }

            Command::Details => {
                let mut servers = Vec::new();
                for server in &config.servers {
                    let backups = orchestrator
                        .list_backups(&server.name)
                        .unwrap_or_default()
                        .into_iter()
                        .map(|b| backup_json(&b))
                        .collect::<Vec<_>>();
                    servers.push(json!({
                        "Server": server.name,
                        "Backups": backups,
                    }));
                }
                vec![Response::ok(name, json!({ "Servers": servers }))]
            }

            Command::ListBackup => {
                let Some(server) = request.arg_str("server") else {
                    return vec![Response::error(name, "missing server argument")];
                };
                match orchestrator.list_backups(server) {
                    Ok(backups) => {
                        let mut responses: Vec<Response> = backups
                            .iter()
                            .map(|b| Response::item(name, backup_json(b)))
                            .collect();
                        responses.push(Response::ok(name, json!({ "Count": backups.len() })));
                        responses
                    }
                    Err(e) => vec![Response::error(name, &e.to_string())],
                }
            }

            Command::Backup => {
                let Some(server) = request.arg_str("server") else {
                    return vec![Response::error(name, "missing server argument")];
                };
                let outcome = if request.arg_str("kind") == Some("full") {
                    orchestrator.backup_full(server, None)
                } else {
                    orchestrator.backup(server, None)
                };
                match outcome.result {
                    Ok(()) => {
                        let label = outcome.bag.get_str(NODE_LABEL).unwrap_or_default();
                        let kind = outcome.bag.get_str(NODE_KIND).unwrap_or("full");
                        vec![Response::ok(
                            name,
                            json!({ "Label": label, "Kind": kind }),
                        )]
                    }
                    Err(e) => vec![Response::error(name, &e.to_string())],
                }
            }

            Command::Restore => {
                let (Some(server), Some(label), Some(output)) = (
                    request.arg_str("server"),
                    request.arg_str("label"),
                    request.arg_str("output"),
                ) else {
                    return vec![Response::error(name, "missing arguments")];
                };
                let outcome = orchestrator.restore(server, label, Path::new(output));
                match outcome.result {
                    Ok(()) => {
                        let label = outcome.bag.get_str(NODE_LABEL).unwrap_or_default();
                        vec![Response::ok(name, json!({ "Label": label }))]
                    }
                    Err(e) => vec![Response::error(name, &e.to_string())],
                }
            }

            Command::Verify => {
                let (Some(server), Some(label)) =
                    (request.arg_str("server"), request.arg_str("label"))
                else {
                    return vec![Response::error(name, "missing arguments")];
                };
                let outcome = orchestrator.verify(server, label);
                let failures = match outcome.bag.get(NODE_FAILURES) {
                    Some(BagValue::StrList(failures)) => failures.clone(),
                    _ => Vec::new(),
                };
                match outcome.result {
                    Ok(()) => vec![Response::ok(name, json!({ "Failures": [] }))],
                    Err(e) => {
                        let mut response =
                            Response::error(name, &e.to_string());
                        response.data = json!({ "Failures": failures });
                        vec![response]
                    }
                }
            }

            Command::Archive => {
                let (Some(server), Some(label), Some(output)) = (
                    request.arg_str("server"),
                    request.arg_str("label"),
                    request.arg_str("output"),
                ) else {
                    return vec![Response::error(name, "missing arguments")];
                };
                let endpoint = request.arg_str("endpoint");
                let outcome = orchestrator.archive(server, label, Path::new(output), endpoint);
                match outcome.result {
                    Ok(()) => vec![Response::ok(name, json!({}))],
                    Err(e) => vec![Response::error(name, &e.to_string())],
                }
            }

            Command::Delete => {
                let (Some(server), Some(label)) =
                    (request.arg_str("server"), request.arg_str("label"))
                else {
                    return vec![Response::error(name, "missing arguments")];
                };
                let outcome = orchestrator.delete(server, label);
                match outcome.result {
                    Ok(()) => vec![Response::ok(name, json!({}))],
                    Err(e) => vec![Response::error(name, &e.to_string())],
                }
            }

            Command::Retain => {
                let Some(server) = request.arg_str("server") else {
                    return vec![Response::error(name, "missing server argument")];
                };
                match orchestrator.retention(server) {
                    Some(outcome) if outcome.is_ok() => {
                        vec![Response::ok(name, json!({}))]
                    }
                    Some(outcome) => vec![Response::error(
                        name,
                        &outcome
                            .result
                            .err()
                            .map(|e| e.to_string())
                            .unwrap_or_default(),
                    )],
                    None => vec![Response::error(name, "server busy or unknown")],
                }
            }
        }
    }
}

fn command_name(command: Command) -> &'static str {
    match command {
        Command::Backup => "BACKUP",
        Command::ListBackup => "LIST_BACKUP",
        Command::Restore => "RESTORE",
        Command::Delete => "DELETE",
        Command::Status => "STATUS",
        Command::Details => "DETAILS",
        Command::IsAlive => "ISALIVE",
        Command::Stop => "STOP",
        Command::Reset => "RESET",
        Command::Reload => "RELOAD",
        Command::Archive => "ARCHIVE",
        Command::Verify => "VERIFY",
        Command::Retain => "RETAIN",
    }
}

fn backup_json(backup: &vault_catalogue::BackupInfo) -> serde_json::Value {
    json!({
        "Label": backup.label,
        "Kind": backup.kind.to_string(),
        "Parent": backup.parent,
        "WalStart": backup.wal_start.to_string(),
        "WalStop": backup.wal_stop.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ManagementClient;
    use std::fs;

    fn test_config(tmp: &tempfile::TempDir) -> ConfigurationHandle {
        let base = tmp.path().join("repo");
        let data = tmp.path().join("pgdata");
        fs::create_dir_all(&data).unwrap();
        fs::write(data.join("PG_VERSION"), "17\n").unwrap();
        let text = format!(
            "[pgvault]\nbase_dir = {}\nunix_socket_dir = {}\n\n[primary]\nuser = repl\ndata_dir = {}\n",
            base.display(),
            tmp.path().join("sock").display(),
            data.display()
        );
        ConfigurationHandle::new(vault_core::Configuration::parse(&text).unwrap())
    }

    #[test]
    fn test_isalive_and_stop_over_socket() {
        let tmp = tempfile::tempdir().unwrap();
        let handle = test_config(&tmp);
        let server = Arc::new(ManagementServer::new(handle));
        let socket = server.socket_path().to_path_buf();

        let runner = {
            let server = server.clone();
            std::thread::spawn(move || server.run())
        };
        // wait for the socket to appear
        for _ in 0..100 {
            if socket.exists() {
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }

        let client = ManagementClient::new(&socket);
        let responses = client.request(&Request::bare(Command::IsAlive)).unwrap();
        assert_eq!(responses.len(), 1);
        assert!(responses[0].outcome);
        assert_eq!(responses[0].data["Alive"], true);

        let responses = client.request(&Request::bare(Command::Stop)).unwrap();
        assert!(responses[0].outcome);
        runner.join().unwrap().unwrap();
        assert!(!socket.exists());
    }

    #[test]
    fn test_backup_then_list_over_socket() {
        let tmp = tempfile::tempdir().unwrap();
        let handle = test_config(&tmp);
        let server = Arc::new(ManagementServer::new(handle));
        let socket = server.socket_path().to_path_buf();
        let runner = {
            let server = server.clone();
            std::thread::spawn(move || server.run())
        };
        for _ in 0..100 {
            if socket.exists() {
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        let client = ManagementClient::new(&socket);

        let responses = client
            .request(&Request::new(
                Command::Backup,
                json!({"server": "primary"}),
            ))
            .unwrap();
        assert!(responses[0].outcome, "{:?}", responses[0]);
        let label = responses[0].data["Label"].as_str().unwrap().to_string();

        let responses = client
            .request(&Request::new(
                Command::ListBackup,
                json!({"server": "primary"}),
            ))
            .unwrap();
        // one item + the final summary
        assert_eq!(responses.len(), 2);
        assert!(!responses[0].final_message);
        assert_eq!(responses[0].data["Label"], label.as_str());
        assert!(responses[1].final_message);
        assert_eq!(responses[1].data["Count"], 1);

        client.request(&Request::bare(Command::Stop)).unwrap();
        runner.join().unwrap().unwrap();
    }
}
