//! Availability check command.

use tokio::runtime::Runtime;

use crate::health::IssueFlags;
use crate::sync::SyncService;

/// Check that synced tracks and their covers still exist
pub fn cmd_check(rt: &Runtime, service: &SyncService, requeue: bool) -> anyhow::Result<()> {
    let report = rt.block_on(service.check_availability())?;

    println!("Availability Report");
    println!("===================");
    println!("Checked:          {}", report.checked);
    println!("Covers restored:  {} from media, {} downloaded",
        report.covers_restored_local, report.covers_restored_remote);
    println!("Missing media:    {}", report.missing_media().count());
    println!();

    for flagged in &report.flagged {
        let mut problems = Vec::new();
        if flagged.flags.contains(IssueFlags::MEDIA_MISSING) {
            problems.push("media missing");
        }
        if flagged.flags.contains(IssueFlags::COVER_MISSING) {
            problems.push("cover missing");
        }
        if flagged.flags.contains(IssueFlags::COVER_RESTORED) {
            problems.push("cover restored");
        }
        println!("  {} [{}] - {}", flagged.title, flagged.item_id, problems.join(", "));
    }
    for (item_id, reason) in &report.cover_failures {
        println!("  cover for {item_id} not restored: {reason}");
    }

    if report.is_clean() {
        println!("Everything recorded is on disk");
    } else if requeue {
        let count = service.requeue_missing(&report)?;
        println!("Requeued {count} item(s); run `syncy sync --all` to fetch them again");
    } else if report.missing_media().next().is_some() {
        println!("Run `syncy check --requeue` to fetch missing tracks on the next sync");
    }
    Ok(())
}
