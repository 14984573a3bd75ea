//! Configuration loading and per-server runtime state.
//!
//! The configuration is a key/value file with one `[pgvault]` section for
//! engine-wide settings and one named section per server. It is parsed once
//! at startup into an immutable [`Configuration`]; the only mutable pieces
//! are the per-server atomic flags on [`ServerState`] and the reload path,
//! which replaces the whole struct under a writers' lock.
//!
//! ```text
//! [pgvault]
//! base_dir = /var/lib/pgvault
//! unix_socket_dir = /tmp
//! compression = zstd
//!
//! [primary]
//! host = localhost
//! port = 5432
//! user = repl
//! ```

use crate::error::ConfigError;
use crate::types::{CompressionKind, EncryptionKind};
use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;

/// Default number of worker threads per server (0 = run inline).
pub const DEFAULT_WORKERS: usize = 0;

/// Default server major version assumed when the section does not say.
pub const DEFAULT_SERVER_VERSION: u32 = 17;

/// Mutable per-server runtime flags.
///
/// These are the only mutable state reachable through the configuration.
/// `online` is written by the health monitor and read by orchestrators;
/// `repository` serialises retention and delete per server.
#[derive(Debug, Default)]
pub struct ServerState {
    online: AtomicBool,
    repository: AtomicBool,
}

impl ServerState {
    /// Whether the server is currently reachable.
    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::Acquire)
    }

    /// Record the health monitor's view of the server.
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::Release);
    }

    /// Try to take the per-server repository lock.
    ///
    /// Returns `true` when this caller won the lock. Exactly one retention
    /// or delete may hold it at a time.
    pub fn acquire_repository(&self) -> bool {
        self.repository
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Release the repository lock. Safe to call on every exit path.
    pub fn release_repository(&self) {
        self.repository.store(false, Ordering::Release);
    }

    /// Whether the repository lock is currently held.
    pub fn repository_held(&self) -> bool {
        self.repository.load(Ordering::Acquire)
    }
}

/// Retention window for one server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionWindow {
    /// Keep at least this many of the newest backups (0 = unlimited).
    pub keep_last: usize,
    /// Keep every backup younger than this many days (0 = no age floor).
    pub min_days: u32,
}

impl Default for RetentionWindow {
    fn default() -> Self {
        RetentionWindow {
            keep_last: 7,
            min_days: 0,
        }
    }
}

/// One configured upstream server.
#[derive(Debug)]
pub struct Server {
    /// Section name; scopes backup labels and the on-disk layout
    pub name: String,
    /// Upstream host
    pub host: String,
    /// Upstream port
    pub port: u16,
    /// Replication user
    pub user: String,
    /// Replication slot, when streaming WAL
    pub wal_slot: Option<String>,
    /// Data directory, when backups run as a local directory scan
    pub data_dir: Option<PathBuf>,
    /// Worker threads for this server's orchestrators
    pub workers: usize,
    /// Upstream major version, for WAL layout gating
    pub version: u32,
    /// Retention window
    pub retention: RetentionWindow,
    /// Runtime flags
    pub state: Arc<ServerState>,
}

/// Engine-wide configuration.
#[derive(Debug)]
pub struct Configuration {
    /// Root of the backup repository
    pub base_dir: PathBuf,
    /// Directory holding the management socket
    pub unix_socket_dir: PathBuf,
    /// Default compression for new backups
    pub compression: CompressionKind,
    /// Compression level (codec-specific range)
    pub compression_level: i32,
    /// Default encryption for new backups
    pub encryption: EncryptionKind,
    /// Path to the base64 master key file, when encryption is on
    pub master_key_path: Option<PathBuf>,
    /// Default worker count, overridable per server
    pub workers: usize,
    /// Configured servers, in file order
    pub servers: Vec<Server>,
}

impl Configuration {
    /// Parse a configuration file.
    pub fn load(path: &Path) -> Result<Configuration, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Unreadable {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let config = Self::parse(&content)?;
        info!(
            path = %path.display(),
            servers = config.servers.len(),
            "configuration loaded"
        );
        Ok(config)
    }

    /// Parse configuration text.
    pub fn parse(content: &str) -> Result<Configuration, ConfigError> {
        let mut base_dir: Option<PathBuf> = None;
        let mut unix_socket_dir = PathBuf::from("/tmp");
        let mut compression = CompressionKind::default();
        let mut compression_level = -1;
        let mut encryption = EncryptionKind::default();
        let mut master_key_path: Option<PathBuf> = None;
        let mut workers = DEFAULT_WORKERS;
        let mut servers: Vec<Server> = Vec::new();

        // None = before any section, Some("pgvault") = main section,
        // Some(other) = server section
        let mut section: Option<String> = None;
        let mut current: Option<ServerBuilder> = None;

        for (idx, raw) in content.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }

            if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
                if let Some(builder) = current.take() {
                    push_server(&mut servers, builder)?;
                }
                if name != "pgvault" {
                    current = Some(ServerBuilder::new(name));
                }
                section = Some(name.to_string());
                continue;
            }

            let (key, value) = line.split_once('=').ok_or_else(|| ConfigError::Malformed {
                line: idx + 1,
                content: raw.to_string(),
            })?;
            let key = key.trim();
            let value = value.trim();

            match section.as_deref() {
                Some("pgvault") => match key {
                    "base_dir" => base_dir = Some(PathBuf::from(value)),
                    "unix_socket_dir" => unix_socket_dir = PathBuf::from(value),
                    "compression" => {
                        compression = value.parse().map_err(|_| invalid(key, value))?
                    }
                    "compression_level" => {
                        compression_level = value.parse().map_err(|_| invalid(key, value))?
                    }
                    "encryption" => encryption = value.parse().map_err(|_| invalid(key, value))?,
                    "master_key_path" => master_key_path = Some(PathBuf::from(value)),
                    "workers" => workers = value.parse().map_err(|_| invalid(key, value))?,
                    _ => return Err(invalid(key, value)),
                },
                Some(_) => {
                    let builder = current.as_mut().ok_or_else(|| ConfigError::Malformed {
                        line: idx + 1,
                        content: raw.to_string(),
                    })?;
                    builder.set(key, value)?;
                }
                None => {
                    return Err(ConfigError::Malformed {
                        line: idx + 1,
                        content: raw.to_string(),
                    })
                }
            }
        }

        if let Some(builder) = current.take() {
            push_server(&mut servers, builder)?;
        }
        if servers.is_empty() {
            return Err(ConfigError::NoServers);
        }

        // Server sections inherit the engine-wide worker default
        for server in &mut servers {
            if server.workers == usize::MAX {
                server.workers = workers;
            }
        }

        Ok(Configuration {
            base_dir: base_dir.ok_or_else(|| ConfigError::MissingKey("base_dir".to_string()))?,
            unix_socket_dir,
            compression,
            compression_level,
            encryption,
            master_key_path,
            workers,
            servers,
        })
    }

    /// Look up a server by name.
    pub fn server(&self, name: &str) -> Option<&Server> {
        self.servers.iter().find(|s| s.name == name)
    }

    /// Repository directory for one server's backups.
    pub fn backup_root(&self, server: &str) -> PathBuf {
        self.base_dir.join(server).join("backup")
    }

    /// Repository directory for one server's archived WAL.
    pub fn wal_root(&self, server: &str) -> PathBuf {
        self.base_dir.join(server).join("wal")
    }

    /// Path of the management socket.
    pub fn socket_path(&self) -> PathBuf {
        self.unix_socket_dir.join("pgvault")
    }
}

fn invalid(key: &str, value: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    }
}

struct ServerBuilder {
    name: String,
    host: String,
    port: u16,
    user: Option<String>,
    wal_slot: Option<String>,
    data_dir: Option<PathBuf>,
    workers: usize,
    version: u32,
    retention: RetentionWindow,
}

impl ServerBuilder {
    fn new(name: &str) -> Self {
        ServerBuilder {
            name: name.to_string(),
            host: "localhost".to_string(),
            port: 5432,
            user: None,
            wal_slot: None,
            data_dir: None,
            workers: usize::MAX, // sentinel: inherit engine default
            version: DEFAULT_SERVER_VERSION,
            retention: RetentionWindow::default(),
        }
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        match key {
            "host" => self.host = value.to_string(),
            "port" => self.port = value.parse().map_err(|_| invalid(key, value))?,
            "user" => self.user = Some(value.to_string()),
            "wal_slot" => self.wal_slot = Some(value.to_string()),
            "data_dir" => self.data_dir = Some(PathBuf::from(value)),
            "workers" => self.workers = value.parse().map_err(|_| invalid(key, value))?,
            "version" => self.version = value.parse().map_err(|_| invalid(key, value))?,
            "retention" => {
                self.retention.keep_last = value.parse().map_err(|_| invalid(key, value))?
            }
            "retention_days" => {
                self.retention.min_days = value.parse().map_err(|_| invalid(key, value))?
            }
            _ => return Err(invalid(key, value)),
        }
        Ok(())
    }
}

fn push_server(servers: &mut Vec<Server>, builder: ServerBuilder) -> Result<(), ConfigError> {
    if servers.iter().any(|s| s.name == builder.name) {
        return Err(ConfigError::DuplicateServer(builder.name));
    }
    let user = builder
        .user
        .ok_or_else(|| ConfigError::MissingKey(format!("{}.user", builder.name)))?;
    servers.push(Server {
        name: builder.name,
        host: builder.host,
        port: builder.port,
        user,
        wal_slot: builder.wal_slot,
        data_dir: builder.data_dir,
        workers: builder.workers,
        version: builder.version,
        retention: builder.retention,
        state: Arc::new(ServerState::default()),
    });
    Ok(())
}

/// Shared, reloadable handle to the configuration.
///
/// Readers take the read lock for the duration of one lookup; the SIGHUP
/// reload path replaces the configuration wholesale under the write lock,
/// carrying the per-server runtime flags over to the new struct.
#[derive(Clone)]
pub struct ConfigurationHandle {
    inner: Arc<RwLock<Arc<Configuration>>>,
}

impl ConfigurationHandle {
    /// Wrap a freshly loaded configuration.
    pub fn new(config: Configuration) -> Self {
        ConfigurationHandle {
            inner: Arc::new(RwLock::new(Arc::new(config))),
        }
    }

    /// Snapshot the current configuration.
    pub fn current(&self) -> Arc<Configuration> {
        self.inner.read().clone()
    }

    /// Replace the configuration, preserving per-server runtime state for
    /// servers that survive the reload.
    pub fn reload(&self, mut next: Configuration) {
        let mut guard = self.inner.write();
        for server in &mut next.servers {
            if let Some(previous) = guard.server(&server.name) {
                server.state = previous.state.clone();
            }
        }
        info!(servers = next.servers.len(), "configuration reloaded");
        *guard = Arc::new(next);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
[pgvault]
base_dir = /var/lib/pgvault
unix_socket_dir = /run/pgvault
compression = zstd
workers = 4

[primary]
host = db1
port = 5433
user = repl
retention = 10
retention_days = 30

[replica]
user = repl
workers = 2
";

    #[test]
    fn test_parse_sections() {
        let config = Configuration::parse(SAMPLE).unwrap();
        assert_eq!(config.base_dir, PathBuf::from("/var/lib/pgvault"));
        assert_eq!(config.compression, CompressionKind::Zstd);
        assert_eq!(config.servers.len(), 2);

        let primary = config.server("primary").unwrap();
        assert_eq!(primary.host, "db1");
        assert_eq!(primary.port, 5433);
        assert_eq!(primary.retention.keep_last, 10);
        assert_eq!(primary.retention.min_days, 30);
        // inherits the engine default
        assert_eq!(primary.workers, 4);

        let replica = config.server("replica").unwrap();
        assert_eq!(replica.workers, 2);
        assert_eq!(replica.version, DEFAULT_SERVER_VERSION);
    }

    #[test]
    fn test_missing_base_dir() {
        let err = Configuration::parse("[pgvault]\n[s]\nuser = u\n").unwrap_err();
        assert!(matches!(err, ConfigError::MissingKey(k) if k == "base_dir"));
    }

    #[test]
    fn test_duplicate_server_rejected() {
        let text = "[pgvault]\nbase_dir = /b\n[s]\nuser = u\n[s]\nuser = u\n";
        let err = Configuration::parse(text).unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateServer(_)));
    }

    #[test]
    fn test_no_servers_rejected() {
        let err = Configuration::parse("[pgvault]\nbase_dir = /b\n").unwrap_err();
        assert!(matches!(err, ConfigError::NoServers));
    }

    #[test]
    fn test_repository_lock_cas() {
        let state = ServerState::default();
        assert!(state.acquire_repository());
        assert!(!state.acquire_repository());
        state.release_repository();
        assert!(state.acquire_repository());
    }

    #[test]
    fn test_reload_preserves_state() {
        let config = Configuration::parse(SAMPLE).unwrap();
        let handle = ConfigurationHandle::new(config);
        handle
            .current()
            .server("primary")
            .unwrap()
            .state
            .set_online(true);

        let next = Configuration::parse(SAMPLE).unwrap();
        handle.reload(next);
        assert!(handle.current().server("primary").unwrap().state.is_online());
    }

    #[test]
    fn test_socket_path() {
        let config = Configuration::parse(SAMPLE).unwrap();
        assert_eq!(config.socket_path(), PathBuf::from("/run/pgvault/pgvault"));
    }
}
