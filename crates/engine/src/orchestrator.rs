//! Orchestrators: one fixed workflow composition per end-user verb.
//!
//! The orchestrator owns the wiring: it snapshots the configuration,
//! builds the stage context, seeds the bag, runs the workflow, and (for
//! retention and delete) brackets the run with the per-server repository
//! lock. Errors are logged here exactly once; callers read the outcome.

use crate::bag::{Bag, BagValue, NODE_ENDPOINT, NODE_LABEL, NODE_OUTPUT, NODE_SERVER_ID, NODE_SOURCE_DIRECTORY};
use crate::error::{EngineError, WorkflowError};
use crate::stages::{archive, backup, maintenance, restore, verify, StageContext};
use crate::workflow::Workflow;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info, warn};
use vault_codec::MasterKey;
use vault_core::{Configuration, EncryptionKind, Server};

/// Outcome of one orchestrator invocation: the bag outlives the run so
/// callers can read outputs even when a stage failed.
pub struct RunOutcome {
    /// The workflow bag, with whatever the stages published
    pub bag: Bag,
    /// Success, or the originating `(stage, error)`
    pub result: Result<(), WorkflowError>,
}

impl RunOutcome {
    /// Whether the run succeeded.
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// Builds and runs verb workflows against one configuration snapshot.
pub struct Orchestrator {
    config: Arc<Configuration>,
}

impl Orchestrator {
    /// Orchestrator over a configuration snapshot.
    pub fn new(config: Arc<Configuration>) -> Self {
        Orchestrator { config }
    }

    fn server(&self, name: &str) -> Result<&Server, EngineError> {
        self.config
            .server(name)
            .ok_or_else(|| EngineError::Stage(format!("unknown server: {name}")))
    }

    fn context(&self, server: &Server) -> Result<Arc<StageContext>, EngineError> {
        let master_key = match (self.config.encryption, &self.config.master_key_path) {
            (EncryptionKind::None, _) => None,
            (_, Some(path)) => Some(MasterKey::load(path)?),
            (_, None) => return Err(EngineError::Codec(vault_codec::CodecError::KeyMissing)),
        };
        Ok(Arc::new(StageContext {
            server: server.name.clone(),
            base_dir: self.config.base_dir.clone(),
            compression: self.config.compression,
            compression_level: self.config.compression_level,
            encryption: self.config.encryption,
            master_key,
            workers: server.workers,
            server_version: server.version,
        }))
    }

    fn run(&self, verb: &str, server: &str, mut workflow: Workflow, mut bag: Bag) -> RunOutcome {
        bag.set(NODE_SERVER_ID, BagValue::Str(server.to_string()));
        let result = workflow.run(&mut bag);
        match &result {
            Ok(()) => info!(verb, server, "orchestrator finished"),
            Err(e) => error!(verb, server, stage = %e.stage, error = %e.source, "orchestrator failed"),
        }
        RunOutcome { bag, result }
    }

    /// Backup: `base_backup → tablespaces → manifest → sha256 → compress?
    /// → encrypt? → link_to_previous? → recovery_info`.
    ///
    /// `source` overrides the server's configured data directory. The kind
    /// is chosen automatically: incremental when a usable plain parent
    /// exists, full otherwise.
    pub fn backup(&self, server_name: &str, source: Option<&Path>) -> RunOutcome {
        self.backup_inner(server_name, source, false)
    }

    /// Backup, forcing a full snapshot even when a parent is available.
    pub fn backup_full(&self, server_name: &str, source: Option<&Path>) -> RunOutcome {
        self.backup_inner(server_name, source, true)
    }

    fn backup_inner(&self, server_name: &str, source: Option<&Path>, force_full: bool) -> RunOutcome {
        let mut bag = Bag::new();
        if force_full {
            bag.set(crate::bag::NODE_KIND, BagValue::Str("full".to_string()));
        }
        let workflow = match self.prepare_backup(server_name, source, &mut bag) {
            Ok(workflow) => workflow,
            Err(e) => {
                return RunOutcome {
                    bag,
                    result: Err(WorkflowError::new("backup", e)),
                }
            }
        };
        self.run("backup", server_name, workflow, bag)
    }

    fn prepare_backup(
        &self,
        server_name: &str,
        source: Option<&Path>,
        bag: &mut Bag,
    ) -> Result<Workflow, EngineError> {
        let server = self.server(server_name)?;
        let ctx = self.context(server)?;
        let source = source
            .map(Path::to_path_buf)
            .or_else(|| server.data_dir.clone())
            .ok_or_else(|| {
                EngineError::Stage(format!("server {server_name} has no data directory"))
            })?;
        bag.set(NODE_SOURCE_DIRECTORY, BagValue::Path(source));

        let mut workflow = Workflow::new();
        workflow.push(Box::new(backup::BaseBackupStage::new(ctx.clone())));
        workflow.push(Box::new(backup::TablespaceStage::new(ctx.clone())));
        workflow.push(Box::new(backup::ManifestStage::new(ctx.clone())));
        workflow.push(Box::new(backup::Sha256Stage::new(ctx.clone())));
        workflow.push(Box::new(backup::CompressStage::new(ctx.clone())));
        workflow.push(Box::new(backup::EncryptStage::new(ctx.clone())));
        workflow.push(Box::new(backup::LinkStage::new(ctx.clone())));
        workflow.push(Box::new(backup::RecoveryInfoStage::new(ctx)));
        Ok(workflow)
    }

    /// Restore: `locate → extract_layers → combine_incrementals? →
    /// copy_wal → permissions → cleanup`.
    pub fn restore(&self, server_name: &str, label: &str, output: &Path) -> RunOutcome {
        let mut bag = Bag::new();
        bag.set(NODE_LABEL, BagValue::Str(label.to_string()));
        bag.set(NODE_OUTPUT, BagValue::Path(output.to_path_buf()));

        let server = match self.server(server_name) {
            Ok(server) => server,
            Err(e) => {
                return RunOutcome {
                    bag,
                    result: Err(WorkflowError::new("restore", e)),
                }
            }
        };
        let ctx = match self.context(server) {
            Ok(ctx) => ctx,
            Err(e) => {
                return RunOutcome {
                    bag,
                    result: Err(WorkflowError::new("restore", e)),
                }
            }
        };

        let mut workflow = Workflow::new();
        workflow.push(Box::new(restore::LocateStage::new(ctx.clone(), true)));
        workflow.push(Box::new(restore::ExtractLayersStage::new(ctx.clone())));
        workflow.push(Box::new(restore::CombineIncrementalsStage::new(ctx.clone())));
        workflow.push(Box::new(restore::CopyWalStage::new(ctx.clone())));
        workflow.push(Box::new(restore::PermissionsStage));
        workflow.push(Box::new(restore::CleanupStage));
        self.run("restore", server_name, workflow, bag)
    }

    /// Verify: `locate → manifest_verify → sha256_verify`.
    pub fn verify(&self, server_name: &str, label: &str) -> RunOutcome {
        let mut bag = Bag::new();
        bag.set(NODE_LABEL, BagValue::Str(label.to_string()));

        let server = match self.server(server_name) {
            Ok(server) => server,
            Err(e) => {
                return RunOutcome {
                    bag,
                    result: Err(WorkflowError::new("verify", e)),
                }
            }
        };
        let ctx = match self.context(server) {
            Ok(ctx) => ctx,
            Err(e) => {
                return RunOutcome {
                    bag,
                    result: Err(WorkflowError::new("verify", e)),
                }
            }
        };

        let mut workflow = Workflow::new();
        workflow.push(Box::new(restore::LocateStage::new(ctx.clone(), false)));
        workflow.push(Box::new(verify::ManifestVerifyStage::new(ctx.clone())));
        workflow.push(Box::new(verify::Sha256VerifyStage::new(ctx.clone())));
        self.run("verify", server_name, workflow, bag)
    }

    /// Archive: `locate → tar_directory → deliver`.
    pub fn archive(
        &self,
        server_name: &str,
        label: &str,
        output: &Path,
        endpoint: Option<&str>,
    ) -> RunOutcome {
        let mut bag = Bag::new();
        bag.set(NODE_LABEL, BagValue::Str(label.to_string()));
        bag.set(NODE_OUTPUT, BagValue::Path(output.to_path_buf()));
        if let Some(endpoint) = endpoint {
            bag.set(NODE_ENDPOINT, BagValue::Str(endpoint.to_string()));
        }

        let server = match self.server(server_name) {
            Ok(server) => server,
            Err(e) => {
                return RunOutcome {
                    bag,
                    result: Err(WorkflowError::new("archive", e)),
                }
            }
        };
        let ctx = match self.context(server) {
            Ok(ctx) => ctx,
            Err(e) => {
                return RunOutcome {
                    bag,
                    result: Err(WorkflowError::new("archive", e)),
                }
            }
        };

        let mut workflow = Workflow::new();
        workflow.push(Box::new(restore::LocateStage::new(ctx.clone(), false)));
        workflow.push(Box::new(archive::TarDirectoryStage::new(ctx.clone())));
        workflow.push(Box::new(archive::DeliverStage::new(ctx.clone())));
        self.run("archive", server_name, workflow, bag)
    }

    /// Retention for one server, bracketed by the repository lock.
    ///
    /// Returns `None` when the server is skipped (lock already held). The
    /// lock is released on success and failure alike.
    pub fn retention(&self, server_name: &str) -> Option<RunOutcome> {
        let server = match self.server(server_name) {
            Ok(server) => server,
            Err(e) => {
                warn!(server = server_name, error = %e, "retention skipped");
                return None;
            }
        };
        if !server.state.acquire_repository() {
            info!(server = server_name, "retention skipped: repository busy");
            return None;
        }
        let state = server.state.clone();

        let outcome = (|| {
            let ctx = match self.context(server) {
                Ok(ctx) => ctx,
                Err(e) => {
                    return RunOutcome {
                        bag: Bag::new(),
                        result: Err(WorkflowError::new("retention", e)),
                    }
                }
            };
            let mut workflow = Workflow::new();
            workflow.push(Box::new(maintenance::RetentionStage::new(
                ctx,
                server.retention,
            )));
            self.run("retention", server_name, workflow, Bag::new())
        })();

        state.release_repository();
        Some(outcome)
    }

    /// Retention across every configured server: offline and locked
    /// servers are skipped.
    pub fn retention_all(&self) -> Vec<(String, Option<RunOutcome>)> {
        let mut outcomes = Vec::new();
        for server in &self.config.servers {
            if !server.state.is_online() {
                info!(server = %server.name, "retention skipped: offline");
                outcomes.push((server.name.clone(), None));
                continue;
            }
            outcomes.push((server.name.clone(), self.retention(&server.name)));
        }
        outcomes
    }

    /// Delete: `locate → check_no_children → unlink`, under the
    /// repository lock.
    pub fn delete(&self, server_name: &str, label: &str) -> RunOutcome {
        let mut bag = Bag::new();
        bag.set(NODE_LABEL, BagValue::Str(label.to_string()));

        let server = match self.server(server_name) {
            Ok(server) => server,
            Err(e) => {
                return RunOutcome {
                    bag,
                    result: Err(WorkflowError::new("delete", e)),
                }
            }
        };
        if !server.state.acquire_repository() {
            return RunOutcome {
                bag,
                result: Err(WorkflowError::new(
                    "delete",
                    EngineError::Stage("repository busy".to_string()),
                )),
            };
        }
        let state = server.state.clone();

        let outcome = (|| {
            let ctx = match self.context(server) {
                Ok(ctx) => ctx,
                Err(e) => {
                    return RunOutcome {
                        bag,
                        result: Err(WorkflowError::new("delete", e)),
                    }
                }
            };
            let mut workflow = Workflow::new();
            workflow.push(Box::new(restore::LocateStage::new(ctx.clone(), false)));
            workflow.push(Box::new(maintenance::CheckNoChildrenStage::new(ctx.clone())));
            workflow.push(Box::new(maintenance::UnlinkStage::new(ctx)));
            self.run("delete", server_name, workflow, bag)
        })();

        state.release_repository();
        outcome
    }

    /// Backups of one server, for listings.
    pub fn list_backups(
        &self,
        server_name: &str,
    ) -> Result<Vec<vault_catalogue::BackupInfo>, EngineError> {
        let server = self.server(server_name)?;
        let catalogue = vault_catalogue::Catalogue::open(&self.config.base_dir, &server.name);
        Ok(catalogue.list_backups()?)
    }
}
