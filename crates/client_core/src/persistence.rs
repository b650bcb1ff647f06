use std::sync::{Mutex, PoisonError};

use anyhow::{Context, Result};
use async_trait::async_trait;
use shared::domain::{BranchRef, ConversationId};
use storage::Storage;
use tracing::warn;

pub const BRANCH_KEY: &str = "selectedChatBranch";
pub const CONVERSATION_KEY: &str = "selectedChatId";

/// What the admin was looking at when the view was last used.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    pub branch: Option<BranchRef>,
    pub conversation: Option<ConversationId>,
}

#[async_trait]
pub trait SelectionStore: Send + Sync {
    async fn save(&self, selection: &Selection) -> Result<()>;
    async fn restore(&self) -> Result<Selection>;
    async fn clear(&self) -> Result<()>;
}

#[derive(Default)]
pub struct MemorySelectionStore {
    selection: Mutex<Selection>,
}

#[async_trait]
impl SelectionStore for MemorySelectionStore {
    async fn save(&self, selection: &Selection) -> Result<()> {
        *self.selection.lock().unwrap_or_else(PoisonError::into_inner) = selection.clone();
        Ok(())
    }

    async fn restore(&self) -> Result<Selection> {
        Ok(self
            .selection
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }

    async fn clear(&self) -> Result<()> {
        self.save(&Selection::default()).await
    }
}

/// Keeps the selection in the local SQLite key/value table.
#[async_trait]
impl SelectionStore for Storage {
    async fn save(&self, selection: &Selection) -> Result<()> {
        let branch_json = selection
            .branch
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .context("failed to encode selected branch")?;

        let mut puts = Vec::new();
        let mut deletes = Vec::new();
        match &branch_json {
            Some(json) => puts.push((BRANCH_KEY, json.as_str())),
            None => deletes.push(BRANCH_KEY),
        }
        match &selection.conversation {
            Some(id) => puts.push((CONVERSATION_KEY, id.as_str())),
            None => deletes.push(CONVERSATION_KEY),
        }
        self.apply_batch(&puts, &deletes).await
    }

    async fn restore(&self) -> Result<Selection> {
        let branch = match self.get_value(BRANCH_KEY).await? {
            Some(raw) => match serde_json::from_str::<BranchRef>(&raw) {
                Ok(branch) => Some(branch),
                Err(err) => {
                    warn!("persistence: discarding unreadable {BRANCH_KEY}: {err}");
                    None
                }
            },
            None => None,
        };
        let conversation = self
            .get_value(CONVERSATION_KEY)
            .await?
            .filter(|id| !id.trim().is_empty())
            .map(ConversationId::new);
        Ok(Selection {
            branch,
            conversation,
        })
    }

    async fn clear(&self) -> Result<()> {
        self.apply_batch(&[], &[BRANCH_KEY, CONVERSATION_KEY]).await
    }
}

#[cfg(test)]
#[path = "tests/persistence_tests.rs"]
mod tests;
