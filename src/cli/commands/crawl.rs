//! Crawl command: one run, or a run every interval in daemon mode.

use std::time::Duration;

use anyhow::Context;
use console::style;
use indicatif::{ProgressBar, ProgressStyle};

use crate::catalog::Catalog;
use crate::config::{FetchMode, Settings};
use crate::crawl::{CancelFlag, CrawlCoordinator, CrawlState, Poll, ProgressEvent, RunSummary};
use crate::extract::ProductPageExtractor;
use crate::scrapers::{resolve_user_agent, BrowserSession, HttpFetcher, SharedBrowser};

/// Crawl the catalog once, or repeatedly with `daemon`.
pub async fn cmd_crawl(settings: &Settings, daemon: bool, interval: u64) -> anyhow::Result<()> {
    settings
        .ensure_directories()
        .with_context(|| format!("Failed to create {}", settings.data_dir.display()))?;

    let cancel = CancelFlag::new();
    let flag = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!(
                "{} Stopping after the current product...",
                style("!").yellow()
            );
            flag.cancel();
        }
    });

    if daemon {
        println!(
            "{} Running in daemon mode (interval: {}s)",
            style("→").cyan(),
            interval
        );
    }

    loop {
        // Re-read every cycle so a re-harvested catalog is picked up
        let catalog = Catalog::load(&settings.catalog_path).with_context(|| {
            format!("Failed to load catalog {}", settings.catalog_path.display())
        })?;

        println!(
            "{} Crawling {} products ({} fetch{})",
            style("→").cyan(),
            catalog.len(),
            match settings.effective_fetch_mode() {
                FetchMode::Http => "http",
                FetchMode::Rendered => "rendered",
            },
            if settings.snapshots { ", snapshots" } else { "" }
        );

        let coordinator = build_coordinator(settings, cancel.clone())?;
        match run_with_progress(coordinator, catalog).await {
            Ok(summary) => print_summary(&summary),
            Err(e) if daemon => {
                println!("{} Run aborted: {:#}", style("✗").red(), e);
            }
            Err(e) => return Err(e),
        }

        if !daemon || cancel.is_cancelled() {
            break;
        }

        println!(
            "{} Sleeping for {}s before next run...",
            style("→").dim(),
            interval
        );
        if !sleep_unless_cancelled(Duration::from_secs(interval), &cancel).await {
            break;
        }
    }

    Ok(())
}

fn build_coordinator(settings: &Settings, cancel: CancelFlag) -> anyhow::Result<CrawlCoordinator> {
    let extractor = Box::new(ProductPageExtractor::new(&settings.extraction)?);
    let db_path = settings.database_path();

    let coordinator = match settings.effective_fetch_mode() {
        FetchMode::Http => {
            let fetcher = HttpFetcher::new(settings.user_agent.as_deref(), settings.request_timeout())?;
            CrawlCoordinator::new(&db_path, Box::new(fetcher), extractor)
        }
        FetchMode::Rendered => {
            let session = BrowserSession::new(
                settings.browser.clone(),
                resolve_user_agent(settings.user_agent.as_deref()),
            );
            let browser = SharedBrowser::new(
                session,
                settings.snapshot_settle(),
                settings.snapshot_quality,
            );
            let coordinator = CrawlCoordinator::new(&db_path, Box::new(browser.clone()), extractor);
            if settings.snapshots {
                coordinator.with_capturer(Box::new(browser))
            } else {
                coordinator
            }
        }
    };

    Ok(coordinator
        .with_delay(settings.request_delay())
        .with_metadata_policy(settings.metadata_policy)
        .with_cancel_flag(cancel))
}

/// Run on a worker task and render its events until the channel closes.
async fn run_with_progress(
    coordinator: CrawlCoordinator,
    catalog: Catalog,
) -> anyhow::Result<RunSummary> {
    let progress = ProgressBar::new(catalog.len() as u64);
    progress.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {wide_msg}")?
            .progress_chars("█▓░"),
    );

    let (handle, mut events) = coordinator.spawn(catalog);
    loop {
        match events.recv_timeout(Duration::from_millis(200)).await {
            Poll::Event(event) => render_event(&progress, &event),
            Poll::Empty => progress.tick(),
            Poll::Closed => break,
        }
    }
    progress.finish_and_clear();

    Ok(handle.await??)
}

fn render_event(progress: &ProgressBar, event: &ProgressEvent) {
    match event {
        ProgressEvent::EntryStarted { link, .. } => progress.set_message(link.clone()),
        ProgressEvent::EntryFinished {
            link,
            stock_amount,
            price,
            ..
        } => {
            progress.inc(1);
            if crate::cli::is_verbose() {
                progress.println(format!(
                    "  {} {} stock={} price={}",
                    style("✓").green(),
                    link,
                    stock_amount.map_or_else(|| "-".to_string(), |s| s.to_string()),
                    price.map_or_else(|| "-".to_string(), |p| p.to_string()),
                ));
            }
        }
        ProgressEvent::EntryFailed { link, reason, .. } => {
            progress.inc(1);
            progress.println(format!("  {} {}: {}", style("✗").red(), link, reason));
        }
        ProgressEvent::EntrySkipped { link, .. } => {
            progress.inc(1);
            if crate::cli::is_verbose() {
                progress.println(format!(
                    "  {} {} listed more than once, visited already",
                    style("→").dim(),
                    link
                ));
            }
        }
        ProgressEvent::SnapshotSkipped { link, reason } => {
            progress.println(format!(
                "  {} no snapshot for {}: {}",
                style("!").yellow(),
                link,
                reason
            ));
        }
        ProgressEvent::RunAborted { reason } => {
            progress.println(format!("  {} {}", style("✗").red(), reason));
        }
        ProgressEvent::RunStarted { .. }
        | ProgressEvent::RunCompleted { .. }
        | ProgressEvent::RunCancelled { .. } => {}
    }
}

fn print_summary(summary: &RunSummary) {
    let (mark, verb) = match summary.state {
        CrawlState::Cancelled => (style("!").yellow(), "cancelled"),
        _ => (style("✓").green(), "completed"),
    };
    println!(
        "{} Run {} at {}: {} succeeded, {} failed",
        mark,
        verb,
        summary.observed_at.to_rfc3339(),
        summary.succeeded,
        summary.failed
    );
    if summary.snapshots > 0 {
        println!("  {} snapshots stored", summary.snapshots);
    }
    if summary.duplicates > 0 {
        println!("  {} duplicate catalog entries skipped", summary.duplicates);
    }
    if summary.remaining > 0 {
        println!("  {} products not visited", summary.remaining);
    }
}

/// Sleep for `duration`, waking early on cancellation. Returns false if cancelled.
async fn sleep_unless_cancelled(duration: Duration, cancel: &CancelFlag) -> bool {
    let deadline = tokio::time::Instant::now() + duration;
    while tokio::time::Instant::now() < deadline {
        if cancel.is_cancelled() {
            return false;
        }
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        tokio::time::sleep(remaining.min(Duration::from_secs(1))).await;
    }
    !cancel.is_cancelled()
}
