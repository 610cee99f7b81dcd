//! Adding and syncing playlists.

use std::sync::Arc;
use tokio::runtime::Runtime;
use tokio::sync::oneshot;

use super::print_progress;
use crate::sync::{SyncReport, SyncService};

/// Register a playlist
pub fn cmd_add(rt: &Runtime, service: &SyncService, reference: &str) -> anyhow::Result<()> {
    let id = rt.block_on(service.add_collection(reference))?;
    let collection = service.store().collection(&id)?;
    println!("Added {} ({})", collection.title, id);
    println!("Folder: {}", service.settings().download_root.join(&collection.folder_name).display());
    println!("Run `syncy sync {id}` to download it.");
    Ok(())
}

/// Sync one collection, or all of them
pub fn cmd_sync(
    rt: &Runtime,
    service: Arc<SyncService>,
    collection: Option<&str>,
    all: bool,
) -> anyhow::Result<()> {
    let targets: Vec<String> = match collection {
        Some(id) => vec![id.to_string()],
        None if all => Vec::new(),
        None => anyhow::bail!("Name a collection or pass --all (see `syncy list`)"),
    };

    rt.block_on(async {
        let (stop, stopped) = oneshot::channel();
        let printer = service
            .progress()
            .map(|rx| tokio::spawn(print_progress(rx, stopped)));

        // First Ctrl-C lets running jobs finish
        let on_interrupt = Arc::clone(&service);
        let interrupt = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                println!("Interrupted, finishing running downloads...");
                on_interrupt.shutdown();
            }
        });

        let results = if targets.is_empty() {
            service.sync_all().await
        } else {
            let mut results = Vec::new();
            for id in targets {
                let result = service.sync_collection(&id).await;
                results.push((id, result));
            }
            results
        };
        interrupt.abort();

        let _ = stop.send(());
        if let Some(printer) = printer {
            let _ = printer.await;
        }

        let mut failures = 0;
        for (id, result) in &results {
            match result {
                Ok(report) => {
                    print_report(id, report);
                    failures += report.failed.len();
                }
                Err(e) => {
                    eprintln!("{id}: {e}");
                    failures += 1;
                }
            }
        }

        if results.is_empty() {
            println!("No playlist collections to sync. Add one with `syncy add <url>`.");
        }
        if failures > 0 {
            anyhow::bail!("{failures} item(s) failed; run sync again to retry");
        }
        Ok(())
    })
}

fn print_report(id: &str, report: &SyncReport) {
    println!();
    println!("{id}");
    println!("  New:       {}", report.added);
    println!("  Removed:   {}", report.removed);
    println!("  Scheduled: {}", report.scheduled);
    println!("  Done:      {}", report.completed);
    println!("  Failed:    {}", report.failed.len());
    for failure in report.failed.iter().take(10) {
        println!("    {} - {}", failure.key.item_id, failure.reason);
    }
    if report.failed.len() > 10 {
        println!("    ... and {} more", report.failed.len() - 10);
    }
}
