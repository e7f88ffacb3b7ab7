use crate::{
    api::AppState,
    db::DbPool,
    files::{self, Removal},
    images,
};
use anyhow::Result;
use time::{Duration, OffsetDateTime, Time, UtcOffset};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Counts from one cleanup run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub candidates: usize,
    pub deleted: usize,
    pub errors: usize,
}

/// Delete pending images older than `grace` as of `now`, file first, then
/// the registry row.
///
/// Age is measured from upload time, not from the last transition to pending,
/// so an image released long after upload is eligible on the next run.
/// A record whose file cannot be removed is kept for the next run.
pub async fn sweep(pool: &DbPool, now: OffsetDateTime, grace: Duration) -> Result<SweepReport> {
    let cutoff = now - grace;
    info!(cutoff = %cutoff, "image cleanup started");
    let stale = {
        let conn = pool.get()?;
        images::stale_pending(&conn, cutoff.unix_timestamp())?
    };
    let mut report = SweepReport {
        candidates: stale.len(),
        ..Default::default()
    };
    if stale.is_empty() {
        info!("image cleanup finished: nothing to delete");
        return Ok(report);
    }

    for image in stale {
        match files::remove_file(&image.path).await {
            Ok(Removal::Removed) => {}
            Ok(Removal::AlreadyMissing) => {
                warn!(path = %image.path, "file already gone, removing record anyway");
            }
            Err(e) => {
                error!(path = %image.path, error = %e, "failed to delete image file");
                report.errors += 1;
                continue;
            }
        }
        let removed = pool
            .get()
            .map_err(anyhow::Error::from)
            .and_then(|conn| images::delete_image(&conn, &image.id));
        match removed {
            Ok(_) => {
                info!(filename = %image.filename, "deleted stale image");
                report.deleted += 1;
            }
            Err(e) => {
                error!(id = %image.id, error = %e, "failed to delete image record");
                report.errors += 1;
            }
        }
    }

    info!(
        candidates = report.candidates,
        deleted = report.deleted,
        errors = report.errors,
        "image cleanup finished"
    );
    Ok(report)
}

/// Next UTC instant strictly after `now` whose time of day is `at`.
pub fn next_run_after(now: OffsetDateTime, at: Time) -> OffsetDateTime {
    let now = now.to_offset(UtcOffset::UTC);
    let today = now.date().with_time(at).assume_utc();
    if today > now {
        today
    } else {
        today + Duration::days(1)
    }
}

/// Spawn the daily cleanup task. It lives for the rest of the process.
pub fn run_housekeeping(state: &AppState) -> JoinHandle<()> {
    let pool = state.pool.clone();
    let at = state.config.cleanup_at;
    let grace = state.config.grace_period();
    info!(run_at = %at, grace_hours = grace.whole_hours(), "image cleanup scheduled");
    tokio::spawn(async move {
        loop {
            let now = OffsetDateTime::now_utc();
            let wait = std::time::Duration::try_from(next_run_after(now, at) - now)
                .unwrap_or_default();
            tokio::time::sleep(wait).await;
            if let Err(e) = sweep(&pool, OffsetDateTime::now_utc(), grace).await {
                error!(error = %e, "image cleanup failed");
            }
        }
    })
}
