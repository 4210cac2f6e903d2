//! Ledger updates shared by the scheduler and the batch coordinator.

use storyreel_ledger::Ledger;
use storyreel_models::{ArtifactKind, FailureKind, FailureRecord, Phase, Stage, WorkItemId};
use tracing::{error, info, warn};

use crate::artifacts::{clean_title, ArtifactStore};
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::metrics;

/// Record a failure for the item's current phase.
pub(crate) async fn fail_item(
    ledger: &Ledger,
    id: &WorkItemId,
    failure: FailureRecord,
) -> OrchestratorResult<()> {
    let phase = failure.phase;
    let kind = failure.kind;
    let message = failure.message.clone();
    let item = ledger
        .update_item(id, |item| {
            item.fail(failure)?;
            Ok(item.clone())
        })
        .await
        .map_err(OrchestratorError::ledger_at(id, phase))?;

    metrics::record_item_failure(phase, kind);
    if item.is_terminally_failed() {
        error!(
            item_id = %id,
            phase = %phase,
            kind = %kind,
            retries_used = item.retry_count,
            max_retries = item.max_retries,
            "Item failed terminally: {}", message
        );
        metrics::record_item_finished("failed");
    } else {
        warn!(
            item_id = %id,
            phase = %phase,
            kind = %kind,
            attempt = item.retry_count + 1,
            "Item failed, will retry: {}", message
        );
    }
    Ok(())
}

/// Failure for an artifact the item's own work directory could not hold.
pub(crate) fn artifact_failure(phase: Phase, kind: ArtifactKind, e: &std::io::Error) -> FailureRecord {
    FailureRecord::new(
        phase,
        FailureKind::Artifact,
        format!("cannot write {} artifact: {}", kind, e),
        true,
    )
}

/// Store generated text and complete the item's text phase.
///
/// Empty output fails the item instead. Returns whether the phase completed.
pub(crate) async fn complete_text(
    ledger: &Ledger,
    store: &ArtifactStore,
    id: &WorkItemId,
    phase: Phase,
    raw: &str,
) -> OrchestratorResult<bool> {
    let (kind, text) = match phase.stage() {
        Some(Stage::Title) => (ArtifactKind::TitleText, clean_title(raw)),
        Some(Stage::Story) => (ArtifactKind::StoryText, raw.trim().to_string()),
        _ => {
            return Err(OrchestratorError::config(format!(
                "phase {} does not produce text",
                phase
            )))
        }
    };

    if text.is_empty() {
        let failure = FailureRecord::new(phase, FailureKind::Provider, "provider returned empty text", true);
        fail_item(ledger, id, failure).await?;
        return Ok(false);
    }

    let path = match store.write_text(id, kind, &text).await {
        Ok(path) => path,
        Err(e) => {
            fail_item(ledger, id, artifact_failure(phase, kind, &e)).await?;
            return Ok(false);
        }
    };
    let is_title = kind == ArtifactKind::TitleText;
    ledger
        .update_item(id, |item| {
            item.complete_phase(kind, path)?;
            if is_title {
                item.title = text.clone();
            }
            Ok(())
        })
        .await
        .map_err(OrchestratorError::ledger_at(id, phase))?;

    if is_title {
        info!(item_id = %id, title = %text, "Title ready");
    } else {
        info!(item_id = %id, chars = text.len(), "Story ready");
    }
    Ok(true)
}
