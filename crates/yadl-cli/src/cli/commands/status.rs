//! `yadl status` – show every stored batch and its item counts.

use anyhow::Result;
use yadl_core::ledger::LedgerStore;

pub fn run_status() -> Result<()> {
    let store = LedgerStore::open_default()?;
    let mut jobs = store.list()?;
    if jobs.is_empty() {
        println!("No batches.");
        return Ok(());
    }
    jobs.sort_by_key(|j| j.created_at);

    println!(
        "{:<18} {:<9} {:<8} {:<8} {:<8} {}",
        "BATCH", "DONE", "FAILED", "PENDING", "ITEMS", "SOURCE"
    );
    for job in jobs {
        let c = job.counts();
        println!(
            "{:<18} {:<9} {:<8} {:<8} {:<8} {}",
            job.id,
            c.succeeded + c.skipped,
            c.failed,
            c.pending + c.in_progress,
            c.total(),
            job.source_path.display()
        );
    }
    Ok(())
}
