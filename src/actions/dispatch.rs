//! Execution dispatch for approved actions.
//!
//! The write side of the data providers mirrors the read side in
//! `crate::sources`: external collaborators behind traits, bundled per
//! deployment. Dispatch happens only from the store's approval path, never
//! directly from the pipeline.

use super::types::{
    ActionKind, ActionPayload, EmailDraft, EventDraft, NoteDraft, NoteEdit, NoteMove, TaskDraft,
    TaskUpdate,
};
use crate::error::ActionError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Opaque handle returned by a provider for a created/updated record.
pub type ProviderHandle = String;

#[async_trait]
pub trait TaskWriter: Send + Sync {
    async fn create_task(&self, draft: &TaskDraft) -> anyhow::Result<ProviderHandle>;
    async fn update_task(&self, update: &TaskUpdate) -> anyhow::Result<ProviderHandle>;
}

#[async_trait]
pub trait CalendarWriter: Send + Sync {
    async fn create_event(&self, draft: &EventDraft) -> anyhow::Result<ProviderHandle>;
}

#[async_trait]
pub trait NoteWriter: Send + Sync {
    async fn create_note(&self, draft: &NoteDraft) -> anyhow::Result<ProviderHandle>;
    async fn edit_note(&self, edit: &NoteEdit) -> anyhow::Result<ProviderHandle>;
    async fn move_note(&self, mv: &NoteMove) -> anyhow::Result<ProviderHandle>;
}

#[async_trait]
pub trait MailDrafter: Send + Sync {
    async fn save_draft(&self, draft: &EmailDraft) -> anyhow::Result<ProviderHandle>;
}

/// The writer capabilities available to action execution. Missing writers
/// surface as execution failures, not panics.
#[derive(Clone, Default)]
pub struct ProviderWriters {
    pub tasks: Option<Arc<dyn TaskWriter>>,
    pub calendar: Option<Arc<dyn CalendarWriter>>,
    pub notes: Option<Arc<dyn NoteWriter>>,
    pub mail: Option<Arc<dyn MailDrafter>>,
}

/// Outcome of one successful external dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionReceipt {
    /// The external service's response handle, if it returned one.
    pub handle: Option<ProviderHandle>,
    pub detail: String,
}

/// Dispatches an approved payload to the provider matching its kind.
pub struct ActionExecutor {
    writers: ProviderWriters,
}

impl ActionExecutor {
    pub fn new(writers: ProviderWriters) -> Self {
        Self { writers }
    }

    /// Execute one approved payload. Called exactly once per action by the
    /// store's approval path.
    pub async fn execute(&self, payload: &ActionPayload) -> anyhow::Result<ExecutionReceipt> {
        let kind = payload.kind();
        match payload {
            ActionPayload::CreateTask(draft) => {
                let writer = self.require(self.writers.tasks.as_ref(), kind)?;
                let handle = writer.create_task(draft).await?;
                Ok(receipt(handle, format!("task '{}' created", draft.title)))
            }
            ActionPayload::UpdateTask(update) => {
                let writer = self.require(self.writers.tasks.as_ref(), kind)?;
                let handle = writer.update_task(update).await?;
                Ok(receipt(handle, format!("task {} updated", update.task_id)))
            }
            ActionPayload::CreateEvent(draft) => {
                let writer = self.require(self.writers.calendar.as_ref(), kind)?;
                let handle = writer.create_event(draft).await?;
                Ok(receipt(handle, format!("event '{}' created", draft.subject)))
            }
            ActionPayload::CreateNote(draft) => {
                let writer = self.require(self.writers.notes.as_ref(), kind)?;
                let handle = writer.create_note(draft).await?;
                Ok(receipt(
                    handle,
                    format!("note '{}/{}' created", draft.folder, draft.filename),
                ))
            }
            ActionPayload::EditNote(edit) => {
                let writer = self.require(self.writers.notes.as_ref(), kind)?;
                let handle = writer.edit_note(edit).await?;
                Ok(receipt(
                    handle,
                    format!("note '{}/{}' updated", edit.folder, edit.filename),
                ))
            }
            ActionPayload::MoveNote(mv) => {
                let writer = self.require(self.writers.notes.as_ref(), kind)?;
                let handle = writer.move_note(mv).await?;
                Ok(receipt(
                    handle,
                    format!("note '{}' moved to '{}'", mv.filename, mv.target_folder),
                ))
            }
            ActionPayload::DraftEmail(draft) => {
                let writer = self.require(self.writers.mail.as_ref(), kind)?;
                let handle = writer.save_draft(draft).await?;
                Ok(receipt(handle, format!("draft '{}' saved", draft.subject)))
            }
        }
    }

    fn require<'a, T: ?Sized>(
        &self,
        writer: Option<&'a Arc<T>>,
        kind: ActionKind,
    ) -> anyhow::Result<&'a Arc<T>> {
        writer.ok_or_else(|| {
            ActionError::ProviderUnavailable {
                kind: kind.to_string(),
            }
            .into()
        })
    }
}

fn receipt(handle: ProviderHandle, detail: String) -> ExecutionReceipt {
    ExecutionReceipt {
        handle: if handle.is_empty() {
            None
        } else {
            Some(handle)
        },
        detail,
    }
}
