//! Keeps image registry statuses in line with the images post content
//! references.
//!
//! Every post mutation is a two-phase operation: the post write itself, which
//! must succeed, followed by a best-effort registry update here. Registry
//! failures are logged and swallowed; drift is corrected by the next mutation
//! of the same post or, for stray `pending` rows, by the cleanup sweep.

use crate::images::{self, ImageStatus};
use crate::model::{Post, POST_DELETED};
use crate::scanner::ContentScanner;
use anyhow::Result;
use rusqlite::Connection;
use std::collections::BTreeSet;
use tracing::{debug, warn};

/// Rows changed by a reconciliation.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileOutcome {
    pub marked_used: usize,
    pub marked_pending: usize,
}

/// Flip registry statuses for the difference between two reference sets.
///
/// URLs in both sets are not touched at all.
pub fn reconcile(
    conn: &Connection,
    before: &BTreeSet<String>,
    after: &BTreeSet<String>,
) -> Result<ReconcileOutcome> {
    let released: Vec<&String> = before.difference(after).collect();
    let marked_pending = images::set_status_for_urls(conn, released, ImageStatus::Pending)?;
    // the batch update skips rows already `used`, so passing the full after-set
    // also repairs rows that drifted back to pending
    let marked_used = images::set_status_for_urls(conn, after, ImageStatus::Used)?;
    Ok(ReconcileOutcome {
        marked_used,
        marked_pending,
    })
}

/// Same as [`reconcile`] but never fails; errors are logged as warnings.
pub fn reconcile_best_effort(
    conn: &Connection,
    before: &BTreeSet<String>,
    after: &BTreeSet<String>,
) -> ReconcileOutcome {
    match reconcile(conn, before, after) {
        Ok(outcome) => {
            debug!(
                used = outcome.marked_used,
                pending = outcome.marked_pending,
                "image registry reconciled"
            );
            outcome
        }
        Err(e) => {
            warn!(error = %e, "image registry update failed; statuses left as they were");
            ReconcileOutcome::default()
        }
    }
}

/// A post was created (or restored) with `content`.
pub fn on_created(conn: &Connection, scanner: &ContentScanner, content: &str) -> ReconcileOutcome {
    reconcile_best_effort(conn, &BTreeSet::new(), &scanner.scan(content))
}

/// A post's content changed from `old` to `new`.
pub fn on_updated(
    conn: &Connection,
    scanner: &ContentScanner,
    old: &str,
    new: &str,
) -> ReconcileOutcome {
    reconcile_best_effort(conn, &scanner.scan(old), &scanner.scan(new))
}

/// A post holding `content` was soft-deleted.
pub fn on_deleted(conn: &Connection, scanner: &ContentScanner, content: &str) -> ReconcileOutcome {
    reconcile_best_effort(conn, &scanner.scan(content), &BTreeSet::new())
}

/// Reconcile a post whose stored row went from `old` to `new`.
///
/// Deleted posts reference nothing, so a status flip releases or re-claims
/// the whole content; a live-to-live change only touches the content diff.
pub fn on_post_changed(
    conn: &Connection,
    scanner: &ContentScanner,
    old: &Post,
    new: &Post,
) -> ReconcileOutcome {
    let was_live = old.status != POST_DELETED;
    let is_live = new.status != POST_DELETED;
    match (was_live, is_live) {
        (true, true) if old.content != new.content => {
            on_updated(conn, scanner, &old.content, &new.content)
        }
        (true, false) => on_deleted(conn, scanner, &old.content),
        (false, true) => on_created(conn, scanner, &new.content),
        _ => ReconcileOutcome::default(),
    }
}
