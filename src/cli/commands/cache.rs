//! Cache command - manage the local cache store

use crate::cache::{format_bytes, CacheEntry, CacheStore, LocalCacheStore};
use crate::cli::args::{CacheAction, CacheArgs, OutputFormat};
use crate::config::{Config, ConfigManager};
use crate::error::CircletResult;
use crate::ui::{self, UiContext};
use console::style;
use tracing::debug;

/// Execute the cache command
pub async fn execute(args: CacheArgs, config: &Config) -> CircletResult<()> {
    let dir = config
        .cache
        .dir
        .clone()
        .unwrap_or_else(ConfigManager::cache_dir);
    debug!("Cache store at {}", dir.display());
    let store = LocalCacheStore::new(dir);

    match args.action {
        CacheAction::List { format } => list_entries(&store, format).await,
        CacheAction::Gc { days, dry_run } => gc_entries(&store, config, days, dry_run).await,
        CacheAction::Clear { yes } => clear_entries(&store, yes).await,
    }
}

async fn list_entries(store: &LocalCacheStore, format: OutputFormat) -> CircletResult<()> {
    let entries = store.entries().await?;

    if entries.is_empty() {
        println!("No cache entries found.");
        return Ok(());
    }

    match format {
        OutputFormat::Table => print_entry_table(&entries),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&entries)?),
        OutputFormat::Plain => {
            for entry in &entries {
                println!("{}", entry.key);
            }
        }
    }
    Ok(())
}

fn print_entry_table(entries: &[CacheEntry]) {
    println!("{:<60} {:>10} {:<20}", "KEY", "SIZE", "CREATED");
    println!("{}", "-".repeat(92));

    for entry in entries {
        println!(
            "{:<60} {:>10} {:<20}",
            entry.key,
            format_bytes(entry.size_bytes),
            entry.created_at.format("%Y-%m-%d %H:%M")
        );
    }

    let total: u64 = entries.iter().map(|e| e.size_bytes).sum();
    println!();
    println!(
        "Total: {} entr{} ({})",
        entries.len(),
        plural(entries.len()),
        format_bytes(total)
    );
}

async fn gc_entries(
    store: &LocalCacheStore,
    config: &Config,
    days: Option<u32>,
    dry_run: bool,
) -> CircletResult<()> {
    let ctx = UiContext::detect();
    let days = days.unwrap_or(config.cache.gc_days);
    if days == 0 {
        ui::step_warn_hint(&ctx, "Cache gc is disabled", "Set cache.gc_days or pass --days");
        return Ok(());
    }

    let removed = store.gc(days, dry_run).await?;
    if removed.is_empty() {
        ui::step_ok(&ctx, &format!("No entries older than {} days", days));
        return Ok(());
    }

    for key in &removed {
        ui::remark(&ctx, key);
    }
    if dry_run {
        ui::step_info(
            &ctx,
            &format!("Would remove {} entr{}", removed.len(), plural(removed.len())),
        );
    } else {
        ui::step_ok(
            &ctx,
            &format!("Removed {} entr{}", removed.len(), plural(removed.len())),
        );
    }
    Ok(())
}

async fn clear_entries(store: &LocalCacheStore, yes: bool) -> CircletResult<()> {
    let ctx = UiContext::detect().with_auto_yes(yes);
    let count = store.entries().await?.len();
    if count == 0 {
        println!("No cache entries found.");
        return Ok(());
    }

    let prompt = format!("Remove {} cache entr{}?", count, plural(count));
    if !ui::confirm(&ctx, &prompt, false).await? {
        println!("{}", style("Aborted").dim());
        return Ok(());
    }

    let removed = store.clear().await?;
    ui::step_ok(
        &ctx,
        &format!("Removed {} entr{} from {}", removed, plural(removed), store.dir().display()),
    );
    Ok(())
}

fn plural(count: usize) -> &'static str {
    if count == 1 {
        "y"
    } else {
        "ies"
    }
}
