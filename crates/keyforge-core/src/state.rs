//! Key pool lifecycle state machine.
//!
//! A pure transition check over an immutable table built once per process.
//! Nothing here touches storage; callers validate a transition first and
//! only then persist the new status, inside the same transaction.

use std::collections::HashMap;
use std::sync::OnceLock;

use keyforge_repository::KeyPoolStatus;

use crate::error::TransitionError;

use KeyPoolStatus::{
    Active, Creating, Disabled, FinishedDelete, GenerateFailed, ImportFailed,
    PendingDeleteWasActive, PendingDeleteWasDisabled, PendingDeleteWasGenerateFailed,
    PendingDeleteWasImportFailed, PendingDeleteWasPendingImport, PendingGenerate, PendingImport,
    StartedDelete,
};

/// Legal successors per status. FinishedDelete maps to the empty set and is
/// therefore terminal.
fn transitions() -> &'static HashMap<KeyPoolStatus, &'static [KeyPoolStatus]> {
    static TABLE: OnceLock<HashMap<KeyPoolStatus, &'static [KeyPoolStatus]>> = OnceLock::new();
    TABLE.get_or_init(|| {
        HashMap::from([
            (Creating, &[PendingGenerate, PendingImport][..]),
            (ImportFailed, &[PendingDeleteWasImportFailed, PendingImport][..]),
            (
                PendingImport,
                &[PendingDeleteWasPendingImport, ImportFailed, Active][..],
            ),
            (PendingGenerate, &[GenerateFailed, Active][..]),
            (
                GenerateFailed,
                &[PendingDeleteWasGenerateFailed, PendingGenerate][..],
            ),
            (Active, &[PendingDeleteWasActive, Disabled][..]),
            (Disabled, &[PendingDeleteWasDisabled, Active][..]),
            (
                PendingDeleteWasImportFailed,
                &[FinishedDelete, ImportFailed][..],
            ),
            (
                PendingDeleteWasPendingImport,
                &[FinishedDelete, PendingImport][..],
            ),
            (PendingDeleteWasActive, &[FinishedDelete, Active][..]),
            (PendingDeleteWasDisabled, &[FinishedDelete, Disabled][..]),
            (
                PendingDeleteWasGenerateFailed,
                &[FinishedDelete, GenerateFailed][..],
            ),
            (StartedDelete, &[FinishedDelete][..]),
            (FinishedDelete, &[][..]),
        ])
    })
}

/// Check whether `current -> next` is a legal lifecycle transition.
///
/// # Errors
///
/// Returns [`TransitionError::NotAllowed`] if `next` is not a successor of
/// `current`. Self-transitions are never allowed.
pub fn can_transition(
    current: KeyPoolStatus,
    next: KeyPoolStatus,
) -> Result<(), TransitionError> {
    let allowed = transitions()
        .get(&current)
        .copied()
        .unwrap_or_default();
    if allowed.contains(&next) {
        Ok(())
    } else {
        Err(TransitionError::NotAllowed {
            from: current,
            to: next,
        })
    }
}

/// Check a transition given string-form statuses, as read from storage.
///
/// # Errors
///
/// Returns [`TransitionError::UnknownState`] if either string is not a
/// recognized status, [`TransitionError::NotAllowed`] if both parse but the
/// transition is illegal. The two cases are deliberately distinct: one means
/// a corrupted or future-version row, the other a disallowed request.
pub fn can_transition_str(current: &str, next: &str) -> Result<(), TransitionError> {
    let from: KeyPoolStatus = current.parse().map_err(|_| TransitionError::UnknownState {
        state: current.to_owned(),
    })?;
    let to: KeyPoolStatus = next.parse().map_err(|_| TransitionError::UnknownState {
        state: next.to_owned(),
    })?;
    can_transition(from, to)
}

/// The PendingDeleteWas* status recording `current` as the prior status, if
/// deletion is possible from `current`.
#[must_use]
pub fn pending_delete_for(current: KeyPoolStatus) -> Option<KeyPoolStatus> {
    match current {
        ImportFailed => Some(PendingDeleteWasImportFailed),
        PendingImport => Some(PendingDeleteWasPendingImport),
        Active => Some(PendingDeleteWasActive),
        Disabled => Some(PendingDeleteWasDisabled),
        GenerateFailed => Some(PendingDeleteWasGenerateFailed),
        _ => None,
    }
}

/// The prior status a PendingDeleteWas* records, for cancelling a delete.
#[must_use]
pub fn prior_status_for(pending: KeyPoolStatus) -> Option<KeyPoolStatus> {
    match pending {
        PendingDeleteWasImportFailed => Some(ImportFailed),
        PendingDeleteWasPendingImport => Some(PendingImport),
        PendingDeleteWasActive => Some(Active),
        PendingDeleteWasDisabled => Some(Disabled),
        PendingDeleteWasGenerateFailed => Some(GenerateFailed),
        _ => None,
    }
}
