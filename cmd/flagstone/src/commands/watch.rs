//! Watch command implementation.
//!
//! Keeps a flag service in sync with a definition file: the file is reloaded
//! whenever its modification time changes, and expired overrides are pruned
//! on every tick. A file that fails to load leaves the previous flags in
//! place.

use super::{apply_revision, load_flags, load_service};
use anyhow::Result;
use flagstone_store::{ChangeEntry, FlagService};
use std::fs;
use std::path::Path;
use std::time::{Duration, SystemTime};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Runs the watch command until Ctrl-C.
pub async fn run(flags_path: &Path, interval_secs: u64) -> Result<()> {
    let service = load_service(flags_path)?;
    let mut last_modified = modified(flags_path);

    info!(
        "Watching {} every {}s (Ctrl-C to stop)",
        flags_path.display(),
        interval_secs.max(1)
    );
    let mut ticker = interval(Duration::from_secs(interval_secs.max(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                service.prune_expired_overrides();

                let current = modified(flags_path);
                if current != last_modified {
                    last_modified = current;
                    reload(&service, flags_path);
                }
            }

            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal");
                break;
            }
        }
    }

    info!(
        "Stopped watching; {} flag(s), {} recorded change(s)",
        service.registry().len(),
        service.history().len()
    );
    Ok(())
}

fn modified(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|meta| meta.modified()).ok()
}

fn reload(service: &FlagService, flags_path: &Path) {
    let file = match load_flags(flags_path) {
        Ok(file) => file,
        Err(err) => {
            warn!("Keeping previous flags: {:#}", err);
            return;
        }
    };

    match apply_revision(service, &file) {
        Ok((report, removed)) => {
            if report.is_noop() && removed.is_empty() {
                debug!("{} touched but unchanged", flags_path.display());
                return;
            }
            let changed = report.created.iter().chain(&report.updated).chain(&removed);
            for key in changed {
                if let Some(entry) = service.get_history(key).ok().and_then(|h| h.last().cloned()) {
                    log_change(&entry);
                }
            }
        }
        Err(err) => warn!("Keeping previous flags: {:#}", err),
    }
}

fn log_change(entry: &ChangeEntry) {
    info!("{} flag '{}'", entry.action, entry.flag_key);
}
