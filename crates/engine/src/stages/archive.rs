//! Stages composing the archive verb: one backup becomes a single tar
//! artifact (optionally compressed and encrypted), delivered to a local
//! directory or an object-store endpoint.

use crate::bag::{Bag, BagValue, NODE_DIRECTORY, NODE_ENDPOINT, NODE_LABEL, NODE_OUTPUT, NODE_TARFILE};
use crate::error::EngineError;
use crate::stages::StageContext;
use crate::workflow::Stage;
use std::sync::Arc;
use tracing::info;
use vault_core::{CompressionKind, EncryptionKind};
use vault_storage::http::HttpClient;
use vault_storage::tarball;
use vault_storage::{LocalFile, Streamer, StreamerMode, VirtualFile};

/// Pack the backup directory into a tar file, applying the configured
/// codec layers on the way out.
pub struct TarDirectoryStage {
    ctx: Arc<StageContext>,
}

impl TarDirectoryStage {
    pub fn new(ctx: Arc<StageContext>) -> Self {
        TarDirectoryStage { ctx }
    }
}

impl Stage for TarDirectoryStage {
    fn name(&self) -> &str {
        "tar_directory"
    }

    fn execute(&mut self, bag: &mut Bag) -> Result<(), EngineError> {
        let dir = bag.require_path(NODE_DIRECTORY)?.clone();
        let output = bag.require_path(NODE_OUTPUT)?.clone();
        let label = bag.require_str(NODE_LABEL)?.to_string();
        std::fs::create_dir_all(&output)?;

        let plain_name = format!("{}-{label}.tar", self.ctx.server);
        let tar_path = output.join(&plain_name);
        tarball::pack_directory_to_file(&dir, &tar_path)?;

        let final_path = if self.ctx.compression != CompressionKind::None
            || self.ctx.encryption != EncryptionKind::None
        {
            let mut streamer = Streamer::new(
                StreamerMode::Backup,
                self.ctx.compression,
                self.ctx.encryption,
                self.ctx.compression_level,
                self.ctx.master_key.as_ref(),
            )?;
            let encoded = output.join(streamer.dest_file_name(&plain_name));
            let mut input = LocalFile::open(&tar_path)?;
            streamer.add_destination(Box::new(LocalFile::create(&encoded)?));
            let mut buf = vec![0u8; 256 * 1024];
            loop {
                let chunk = input.read(&mut buf)?;
                streamer.write(&buf[..chunk.read], chunk.last_chunk)?;
                if chunk.last_chunk {
                    break;
                }
            }
            streamer.finish()?;
            drop(input);
            std::fs::remove_file(&tar_path)?;
            encoded
        } else {
            tar_path
        };

        info!(server = %self.ctx.server, artifact = %final_path.display(), "archive packed");
        bag.set(NODE_TARFILE, BagValue::Path(final_path));
        Ok(())
    }
}

/// Deliver the artifact: PUT to the object-store endpoint when one is
/// configured, otherwise the tar file already sits in the output
/// directory and there is nothing to move.
pub struct DeliverStage {
    ctx: Arc<StageContext>,
}

impl DeliverStage {
    pub fn new(ctx: Arc<StageContext>) -> Self {
        DeliverStage { ctx }
    }
}

impl Stage for DeliverStage {
    fn name(&self) -> &str {
        "deliver"
    }

    fn execute(&mut self, bag: &mut Bag) -> Result<(), EngineError> {
        let Some(endpoint) = bag.get_str(NODE_ENDPOINT).map(str::to_string) else {
            return Ok(());
        };
        let tarfile = bag.require_path(NODE_TARFILE)?.clone();

        // endpoint shape: host:port/path-prefix
        let (host_port, prefix) = endpoint.split_once('/').unwrap_or((endpoint.as_str(), ""));
        let (host, port) = host_port
            .split_once(':')
            .ok_or_else(|| EngineError::Stage(format!("bad endpoint: {endpoint}")))?;
        let port: u16 = port
            .parse()
            .map_err(|_| EngineError::Stage(format!("bad endpoint port: {endpoint}")))?;

        let body = std::fs::read(&tarfile)?;
        let name = tarfile
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let path = if prefix.is_empty() {
            format!("/{name}")
        } else {
            format!("/{prefix}/{name}")
        };

        let client = HttpClient::new(host, port);
        let response = client.put(&path, &body).map_err(vault_core::Error::from)?;
        if !response.is_success() {
            return Err(EngineError::Stage(format!(
                "object store returned {}",
                response.status
            )));
        }
        info!(server = %self.ctx.server, endpoint = %endpoint, bytes = body.len(), "archive delivered");
        Ok(())
    }
}
