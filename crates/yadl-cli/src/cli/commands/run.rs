//! `yadl run` – process a source list to a terminal batch state.

use anyhow::{bail, Context, Result};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use yadl_core::config::YadlConfig;
use yadl_core::controller::{BatchController, RunOutcome};
use yadl_core::error::RunError;
use yadl_core::fetch::YtdlpFetcher;
use yadl_core::ledger::{LedgerError, LedgerStore};
use yadl_core::progress::ProgressSnapshot;
use yadl_core::source_list::{batch_id, read_source_list};

pub async fn run_batch(cfg: YadlConfig, file: &Path, resume: bool, fresh: bool) -> Result<()> {
    let list = read_source_list(file)
        .with_context(|| format!("cannot read source list {}", file.display()))?;
    for r in &list.rejected {
        println!("Ignoring line {}: not a video URL: {}", r.line, r.content);
    }
    if list.sources.is_empty() {
        println!("No sources in {}.", file.display());
        return Ok(());
    }

    let store = LedgerStore::open_default()?;
    if fresh {
        match store.delete(&batch_id(file)) {
            Ok(()) => tracing::info!("discarded previous ledger for {}", file.display()),
            Err(LedgerError::NotFound(_)) => {}
            Err(e) => return Err(e.into()),
        }
    }

    let fetcher = YtdlpFetcher::discover()
        .context("yt-dlp is required; install it and make sure it is on PATH")?;
    let progress_interval = Duration::from_millis(cfg.progress_interval_ms.max(100));
    let controller = BatchController::new(store, Arc::new(fetcher), cfg)?;

    let mut job = match controller.prepare(file, &list, resume) {
        Ok(job) => job,
        Err(RunError::Ledger(LedgerError::AlreadyExists(id))) => {
            bail!(
                "a ledger for {} already exists (batch {}); \
                 rerun with --resume to continue it or --fresh to start over",
                file.display(),
                id
            );
        }
        Err(RunError::Drift(e)) => {
            bail!(
                "{}; the stored ledger no longer matches {}; \
                 rerun with --fresh to start over from the current file",
                e,
                file.display()
            );
        }
        Err(e) => return Err(e.into()),
    };

    // First Ctrl-C cancels cooperatively; a second one exits hard.
    let cancel = controller.cancel_flag();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            println!("\nCancelling; press Ctrl-C again to abort immediately.");
            cancel.cancel();
        }
        if tokio::signal::ctrl_c().await.is_ok() {
            std::process::exit(130);
        }
    });

    let tracker = controller.tracker();
    let progress_handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(progress_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            render_progress(&tracker.snapshot());
        }
    });

    let result = controller.run(&mut job).await;
    progress_handle.abort();
    println!();

    let summary = match result {
        Ok(summary) => summary,
        Err(e) => {
            if e.resume_is_safe() {
                return Err(anyhow::Error::from(e)
                    .context("run stopped; the ledger is intact, rerun with --resume"));
            }
            return Err(e.into());
        }
    };

    let c = summary.counts;
    println!(
        "{} succeeded, {} failed, {} skipped of {} item(s) in {:.1}s ({:.1} MiB)",
        c.succeeded,
        c.failed,
        c.skipped,
        c.total(),
        summary.elapsed.as_secs_f64(),
        summary.bytes_transferred as f64 / 1_048_576.0,
    );
    if !summary.failed.is_empty() {
        println!("Failed items:");
        for f in &summary.failed {
            match f.line {
                Some(line) => println!("  line {}: {} ({})", line, f.source, f.failure.message),
                None => println!("  {} ({})", f.source, f.failure.message),
            }
        }
    }
    if summary.outcome == RunOutcome::Aborted {
        println!("Cancelled; rerun with --resume to continue.");
    }

    if c.failed > 0 {
        bail!("{} item(s) failed", c.failed);
    }
    Ok(())
}

fn render_progress(snap: &ProgressSnapshot) {
    let c = snap.counts;
    let done = c.succeeded + c.failed + c.skipped;
    let mib = snap.bytes_transferred as f64 / 1_048_576.0;
    let rate_mib = snap.smoothed_bytes_per_sec / 1_048_576.0;
    let eta = snap
        .eta
        .map(|d| format!("{:.0}s", d.as_secs_f64()))
        .unwrap_or_else(|| "?".to_string());
    print!(
        "\r  {}/{} items ({:.0}%)  {:.1} MiB  {:.2} MiB/s  ETA {}  ",
        done,
        c.total(),
        snap.fraction() * 100.0,
        mib,
        rate_mib,
        eta
    );
    let _ = std::io::stdout().flush();
}
