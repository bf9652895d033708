//! Batch runs with a live progress bar, plus the post-run summary.

use indicatif::{ProgressBar, ProgressStyle};
use prostox_core::{BatchError, BatchSummary, ItemOutcome, ItemRegistry, ModelId, Orchestrator};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::cli::theme;

/// Which items a run picks up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pass {
    /// Pending and failed items
    Initial,
    /// Failed items only
    Retry(u32),
}

/// Run one pass, ticking a progress bar as each item settles.
pub async fn run_pass(
    orchestrator: &Orchestrator,
    model: ModelId,
    pass: Pass,
    eligible: usize,
) -> Result<BatchSummary, BatchError> {
    let progress = create_progress_bar(eligible as u64, pass);
    let failed = Arc::new(AtomicUsize::new(0));

    let on_result = {
        let progress = progress.clone();
        let failed = failed.clone();
        move |outcome: ItemOutcome| {
            if let ItemOutcome::Failed { .. } = outcome {
                failed.fetch_add(1, Ordering::Relaxed);
            }
            progress.inc(1);
            progress.set_message(format!("{} failed", failed.load(Ordering::Relaxed)));
        }
    };

    let result = match pass {
        Pass::Initial => orchestrator.process_all_with(model, on_result).await,
        Pass::Retry(_) => orchestrator.retry_failed_with(model, on_result).await,
    };
    progress.finish_and_clear();
    result
}

fn create_progress_bar(total: u64, pass: Pass) -> ProgressBar {
    let pb = ProgressBar::new(total);
    let prefix = match pass {
        Pass::Initial => "processing".to_string(),
        Pass::Retry(round) => format!("retry {round}"),
    };
    let style = ProgressStyle::default_bar()
        .template(
            "{spinner:.green} {prefix} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({percent}%) {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("##-");
    pb.set_style(style);
    pb.set_prefix(prefix);
    pb.enable_steady_tick(Duration::from_millis(120));
    pb
}

/// Per-item failure lines, in registry order.
pub fn failure_lines(registry: &ItemRegistry) -> Vec<String> {
    registry
        .snapshot()
        .iter()
        .filter_map(|item| {
            item.error_message()
                .map(|message| format!("{}: {message}", item.file_name))
        })
        .collect()
}

/// Print a summary table to stderr.
pub fn print_summary(registry: &ItemRegistry, model: ModelId, elapsed: Duration, rounds: u32) {
    let stats = registry.stats();
    let rate = if elapsed.as_secs_f64() > 0.0 {
        (stats.done + stats.error) as f64 / elapsed.as_secs_f64()
    } else {
        0.0
    };

    eprintln!();
    eprintln!("  ====================================");
    eprintln!("               Summary");
    eprintln!("  ====================================");
    eprintln!("    Model:        {:>18}", model.as_str());
    eprintln!(
        "    Done:         {:>8}",
        theme::ok().apply_to(stats.done)
    );
    if stats.error > 0 {
        eprintln!(
            "    Failed:       {:>8}",
            theme::warn().apply_to(stats.error)
        );
    }
    if rounds > 0 {
        eprintln!("    Retry rounds: {:>8}", rounds);
    }
    eprintln!("  ------------------------------------");
    eprintln!("    Total:        {:>8}", stats.total);
    eprintln!("    Complete:     {:>7.1}%", stats.percent_done());
    eprintln!("    Duration:     {:>7.1}s", elapsed.as_secs_f64());
    eprintln!("    Rate:         {:>7.1} img/sec", rate);
    eprintln!("  ====================================");

    let failures = failure_lines(registry);
    if !failures.is_empty() {
        eprintln!();
        for line in failures {
            eprintln!("  {} {line}", theme::warn().apply_to("✗"));
        }
    }
}
