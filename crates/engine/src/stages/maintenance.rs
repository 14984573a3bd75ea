//! Stages composing the retention and delete verbs.

use crate::bag::{Bag, BagValue, NODE_BACKUPS, NODE_LABEL, NODE_OUTPUT};
use crate::error::EngineError;
use crate::stages::StageContext;
use crate::workflow::Stage;
use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};
use vault_catalogue::retention::{compute_retention_set, deletion_order};
use vault_core::config::RetentionWindow;

/// Apply the retention window: compute the expired set and delete it,
/// children before parents. The per-server repository lock is the
/// orchestrator's business; this stage assumes it is held.
pub struct RetentionStage {
    ctx: Arc<StageContext>,
    window: RetentionWindow,
}

impl RetentionStage {
    pub fn new(ctx: Arc<StageContext>, window: RetentionWindow) -> Self {
        RetentionStage { ctx, window }
    }
}

impl Stage for RetentionStage {
    fn name(&self) -> &str {
        "retention"
    }

    fn execute(&mut self, bag: &mut Bag) -> Result<(), EngineError> {
        let catalogue = self.ctx.catalogue();
        let expired = compute_retention_set(&catalogue, self.window, Utc::now())?;
        if expired.is_empty() {
            info!(server = %self.ctx.server, "retention: nothing to expire");
            bag.set(NODE_OUTPUT, BagValue::U64(0));
            return Ok(());
        }
        let ordered = deletion_order(&catalogue, &expired)?;
        let mut deleted = 0u64;
        for label in &ordered {
            if bag.is_cancelled() {
                warn!(server = %self.ctx.server, "retention cancelled mid-sweep");
                break;
            }
            catalogue.delete_backup(label)?;
            deleted += 1;
        }
        info!(server = %self.ctx.server, deleted, "retention sweep complete");
        bag.set(NODE_OUTPUT, BagValue::U64(deleted));
        Ok(())
    }
}

/// Refuse to delete a backup that still has incremental children.
pub struct CheckNoChildrenStage {
    ctx: Arc<StageContext>,
}

impl CheckNoChildrenStage {
    pub fn new(ctx: Arc<StageContext>) -> Self {
        CheckNoChildrenStage { ctx }
    }
}

impl Stage for CheckNoChildrenStage {
    fn name(&self) -> &str {
        "check_no_children"
    }

    fn execute(&mut self, bag: &mut Bag) -> Result<(), EngineError> {
        let label = bag.require_str(NODE_LABEL)?;
        let children = self.ctx.catalogue().children(label)?;
        if !children.is_empty() {
            return Err(vault_catalogue::CatalogueError::HasChildren(label.to_string()).into());
        }
        Ok(())
    }
}

/// Remove the backup directory.
pub struct UnlinkStage {
    ctx: Arc<StageContext>,
}

impl UnlinkStage {
    pub fn new(ctx: Arc<StageContext>) -> Self {
        UnlinkStage { ctx }
    }
}

impl Stage for UnlinkStage {
    fn name(&self) -> &str {
        "unlink"
    }

    fn execute(&mut self, bag: &mut Bag) -> Result<(), EngineError> {
        let label = bag.require_str(NODE_LABEL)?.to_string();
        self.ctx.catalogue().delete_backup(&label)?;
        bag.take(NODE_BACKUPS);
        Ok(())
    }
}
