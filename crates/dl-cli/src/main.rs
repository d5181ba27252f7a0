//! DomainLock CLI
//!
//! Drives the extension state machine against a JSON file store: seed it,
//! check URLs, flip settings, send background messages and export stats.

mod bench;
mod export;
mod file_store;

use std::fs;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use clap::{Parser, Subcommand};
use serde_json::Value;

use dl_core::{
    store::KeyValueStore, AllowList, Background, DomainMatcher, InstallReason, SettingsPatch,
    StateCache, StateSync,
};

use crate::bench::{run_bench, BenchOptions, DEFAULT_SEED};
use crate::export::{build_report, default_file_name};
use crate::file_store::FileStore;

#[derive(Parser)]
#[command(name = "dl-cli")]
#[command(about = "DomainLock allow-list checker and state tools")]
struct Cli {
    /// JSON file holding the extension storage
    #[arg(long, global = true, default_value = "domainlock-storage.json")]
    store: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Seed default settings as a fresh install would
    Install {
        /// Install reason (install, update, browser_update, shared_module_update)
        #[arg(long, default_value = "install")]
        reason: String,
    },

    /// Check whether URLs or hostnames would be blocked
    Check {
        /// URLs or bare hostnames
        #[arg(required = true)]
        targets: Vec<String>,
    },

    /// Show settings and statistics
    Status {
        /// Keep printing whenever the store changes
        #[arg(short, long)]
        watch: bool,

        /// Poll interval in seconds for --watch
        #[arg(long, default_value = "5")]
        interval: u64,
    },

    /// Turn blocking on
    Enable,

    /// Turn blocking off
    Disable,

    /// Zero the block counter
    ResetStats,

    /// Restore every setting to its default
    ResetSettings,

    /// Update individual settings
    Set {
        /// Allowed domains (comma or space separated, repeatable)
        #[arg(long, num_args = 1..)]
        allow: Vec<String>,

        #[arg(long)]
        notifications: Option<bool>,

        #[arg(long)]
        keyboard: Option<bool>,

        #[arg(long)]
        context_menu: Option<bool>,
    },

    /// Send a raw JSON message to the background handler
    Send {
        /// Message, e.g. '{"action":"getStats"}'
        message: String,
    },

    /// Write the statistics export file
    Export {
        /// Output file (default: website-blocker-stats-YYYY-MM-DD.json)
        #[arg(short, long)]
        output: Option<String>,
    },

    /// Benchmark allow-list matching
    Bench {
        /// Passes over the generated URL set
        #[arg(long, default_value = "100")]
        iterations: usize,

        #[arg(long, default_value_t = DEFAULT_SEED)]
        seed: u32,
    },
}

fn main() {
    let cli = Cli::parse();
    let store = cli.store.as_path();

    let result = match cli.command {
        Commands::Install { reason } => cmd_install(store, &reason),
        Commands::Check { targets } => cmd_check(store, &targets),
        Commands::Status { watch, interval } => {
            if watch {
                cmd_watch(store, interval)
            } else {
                cmd_status(store)
            }
        }
        Commands::Enable => cmd_set_enabled(store, true),
        Commands::Disable => cmd_set_enabled(store, false),
        Commands::ResetStats => cmd_reset_stats(store),
        Commands::ResetSettings => cmd_reset_settings(store),
        Commands::Set {
            allow,
            notifications,
            keyboard,
            context_menu,
        } => cmd_set(store, &allow, notifications, keyboard, context_menu),
        Commands::Send { message } => cmd_send(store, &message),
        Commands::Export { output } => cmd_export(store, output.as_deref()),
        Commands::Bench { iterations, seed } => cmd_bench(store, iterations, seed),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn open_store(path: &Path) -> Result<FileStore, String> {
    FileStore::open(path).map_err(|e| format!("Failed to open '{}': {}", path.display(), e))
}

fn cmd_install(path: &Path, reason: &str) -> Result<(), String> {
    let store = open_store(path)?;
    let written = Background::new(&store)
        .on_installed(InstallReason::from_str(reason))
        .map_err(|e| e.to_string())?;

    if written {
        println!("Installed defaults into '{}'", store.path().display());
    } else {
        println!("Nothing to do for reason '{}'", reason);
    }
    Ok(())
}

fn cmd_check(path: &Path, targets: &[String]) -> Result<(), String> {
    let store = open_store(path)?;
    let settings = StateSync::new(&store).get_settings().map_err(|e| e.to_string())?;

    if !settings.enabled {
        println!("Blocking is disabled; every page is allowed");
    }

    let matcher = DomainMatcher::new(settings.allowed_domains);
    let mut blocked = 0usize;

    for target in targets {
        let result = if target.contains("://") {
            matcher.check_url(target)
        } else {
            matcher.check_host(target)
        };
        let is_blocked = settings.enabled && result.is_blocked();
        if is_blocked {
            blocked += 1;
        }

        let entry = result
            .matched
            .and_then(|idx| matcher.allow_list().get(idx))
            .map(|d| format!(" (matches {})", d))
            .unwrap_or_default();
        println!("{:<6} {}{}", if is_blocked { "BLOCK" } else { "ALLOW" }, target, entry);
    }

    println!("{} of {} blocked", blocked, targets.len());
    Ok(())
}

fn print_status(cache: &StateCache) {
    let settings = cache.settings();
    let stats = cache.stats();

    println!("Enabled:            {}", settings.enabled);
    println!("Allowed domains:    {}", settings.allowed_domains);
    println!("Notifications:      {}", settings.show_notifications);
    println!("Block shortcuts:    {}", settings.block_keyboard_shortcuts);
    println!("Block context menu: {}", settings.block_context_menu);
    println!("Blocked count:      {}", stats.blocked_count);
    println!("Last reset:         {}", stats.last_reset);
}

fn read_cache(path: &Path) -> Result<StateCache, String> {
    let store = open_store(path)?;
    let raw = store.get_all().map_err(|e| e.to_string())?;
    Ok(StateCache::detached(raw))
}

fn cmd_status(path: &Path) -> Result<(), String> {
    print_status(&read_cache(path)?);
    Ok(())
}

fn cmd_watch(path: &Path, interval: u64) -> Result<(), String> {
    if interval == 0 {
        return Err("Interval must be at least one second".to_string());
    }

    let runtime = tokio::runtime::Runtime::new()
        .map_err(|e| format!("Failed to start tokio runtime: {}", e))?;

    runtime.block_on(watch_until(
        path,
        Duration::from_secs(interval),
        tokio::signal::ctrl_c(),
    ))?;
    println!("Stopped watching");
    Ok(())
}

/// Print the status on every tick where the store differs from the last one
/// shown, until `shutdown` resolves. Returns how many snapshots were printed.
async fn watch_until<F: Future>(path: &Path, period: Duration, shutdown: F) -> Result<usize, String> {
    let mut ticker = tokio::time::interval(period);
    let mut last: Option<StateCache> = None;
    let mut printed = 0usize;
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => return Ok(printed),
            _ = ticker.tick() => {
                let cache = read_cache(path)?;
                if last.as_ref().map_or(true, |prev| prev.raw() != cache.raw()) {
                    println!("--- {} ---", Utc::now().format("%Y-%m-%d %H:%M:%S"));
                    print_status(&cache);
                    printed += 1;
                    last = Some(cache);
                }
            }
        }
    }
}

fn cmd_set_enabled(path: &Path, enabled: bool) -> Result<(), String> {
    let store = open_store(path)?;
    StateSync::new(&store).set_enabled(enabled).map_err(|e| e.to_string())?;
    println!("Blocking {}", if enabled { "enabled" } else { "disabled" });
    Ok(())
}

fn cmd_reset_stats(path: &Path) -> Result<(), String> {
    let store = open_store(path)?;
    let stats = StateSync::new(&store).reset_stats().map_err(|e| e.to_string())?;
    println!("Statistics reset at {}", stats.last_reset);
    Ok(())
}

fn cmd_reset_settings(path: &Path) -> Result<(), String> {
    let store = open_store(path)?;
    let settings = StateSync::new(&store).reset_settings().map_err(|e| e.to_string())?;
    println!("Settings reset; allowed domains: {}", settings.allowed_domains);
    Ok(())
}

fn cmd_set(
    path: &Path,
    allow: &[String],
    notifications: Option<bool>,
    keyboard: Option<bool>,
    context_menu: Option<bool>,
) -> Result<(), String> {
    let allowed_domains = if allow.is_empty() {
        None
    } else {
        Some(AllowList::parse(&allow.join(",")).map_err(|e| e.to_string())?)
    };

    let patch = SettingsPatch {
        enabled: None,
        allowed_domains,
        show_notifications: notifications,
        block_keyboard_shortcuts: keyboard,
        block_context_menu: context_menu,
    };
    if patch.is_empty() {
        return Err("No settings given".to_string());
    }

    let store = open_store(path)?;
    StateSync::new(&store).set_settings(&patch).map_err(|e| e.to_string())?;
    println!("Updated {} setting(s)", patch.keys().bits().count_ones());
    Ok(())
}

fn cmd_send(path: &Path, message: &str) -> Result<(), String> {
    let message: Value =
        serde_json::from_str(message).map_err(|e| format!("Invalid JSON message: {}", e))?;

    let store = open_store(path)?;
    match Background::new(&store).handle_json(&message) {
        Some(response) => {
            let text = serde_json::to_string_pretty(&response)
                .map_err(|e| format!("Failed to serialize response: {}", e))?;
            println!("{}", text);
            Ok(())
        }
        None => Err("Message not understood".to_string()),
    }
}

fn cmd_export(path: &Path, output: Option<&str>) -> Result<(), String> {
    let cache = read_cache(path)?;
    let now = Utc::now();
    let report = build_report(cache.settings(), cache.stats(), now);

    let output = output.map(str::to_string).unwrap_or_else(|| default_file_name(now));
    let json = serde_json::to_string_pretty(&report)
        .map_err(|e| format!("Failed to serialize export: {}", e))?;
    fs::write(&output, json).map_err(|e| format!("Failed to write '{}': {}", output, e))?;

    println!("Exported statistics to '{}'", output);
    Ok(())
}

fn cmd_bench(path: &Path, iterations: usize, seed: u32) -> Result<(), String> {
    let cache = read_cache(path)?;
    run_bench(BenchOptions {
        allow_list: cache.settings().allowed_domains.clone(),
        iterations,
        seed,
    })
}
