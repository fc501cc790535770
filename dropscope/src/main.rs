//! # dropscope - Main Entry Point
//!
//! Orchestration only: the symbol table builds on a background blocking
//! task while the debug-info session and the netlink channel open
//! synchronously, then a bounded readiness loop drains, resolves, and
//! prints drop events until interrupted or the channel fails.

use anyhow::{Context, Result};
use clap::Parser;
use log::{debug, error, info, warn};
use std::time::Duration;
use tokio::io::unix::AsyncFd;
use tokio::io::Interest;
use tokio::task::JoinHandle;

use dropscope::cli::Args;
use dropscope::dropmon::DropMonitor;
use dropscope::resolver::EventResolver;
use dropscope::symbols::{DebugInfo, KallsymsTable};

// Exit codes
const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;
const EXIT_NOPERM: i32 = 77;

/// Readiness wait bound; keeps the loop responsive to the interrupt
/// signal and to background-build completion even with no traffic.
const POLL_INTERVAL: Duration = Duration::from_millis(250);

fn main() {
    env_logger::init();
    std::process::exit(match run() {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            let code = exit_code_for(&e);
            eprintln!("error: {e}");
            code
        }
    });
}

fn exit_code_for(err: &anyhow::Error) -> i32 {
    let msg = err.to_string().to_lowercase();
    if msg.contains("permission denied") || msg.contains("operation not permitted") {
        EXIT_NOPERM
    } else {
        EXIT_ERROR
    }
}

#[tokio::main]
async fn run() -> Result<()> {
    let args = Args::parse();

    // ── Symbol table: slow, build in the background ─────────────────────
    let kallsyms_path = args.kallsyms.clone();
    let mut table_build: Option<JoinHandle<_>> =
        Some(tokio::task::spawn_blocking(move || KallsymsTable::load(&kallsyms_path)));

    // ── Debug info session: cheap to attempt, open synchronously ────────
    let debuginfo = if args.no_debuginfo {
        None
    } else {
        match DebugInfo::open(&args.debuginfo) {
            Ok(session) => Some(session),
            Err(e) => {
                warn!("debug info lookup disabled: {e}");
                None
            }
        }
    };
    let mut resolver = EventResolver::new(debuginfo, args.keep_dwarf);

    // ── Event channel ───────────────────────────────────────────────────
    let mut monitor = DropMonitor::open().context("drop monitor channel unavailable")?;
    monitor.start().context("failed to start drop monitoring")?;

    if !args.quiet {
        println!("dropscope v{}", env!("CARGO_PKG_VERSION"));
    }
    EventResolver::print_header();

    let mut channel = AsyncFd::with_interest(monitor, Interest::READABLE)
        .context("failed to register channel for readiness")?;

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let mut exit_reason = "interrupted";
    let mut fatal: Option<anyhow::Error> = None;

    loop {
        // Adopt the background-built table exactly once, without blocking
        if table_build.as_ref().is_some_and(JoinHandle::is_finished) {
            if let Some(task) = table_build.take() {
                match task.await {
                    Ok(Ok(table)) if !table.is_empty() => {
                        info!("kernel symbol table ready: {} symbols", table.len());
                        resolver.adopt_symbols(table);
                    }
                    Ok(Ok(_)) => warn!("kernel symbol table is empty"),
                    Ok(Err(e)) => warn!("kernel symbol table unavailable: {e}"),
                    Err(e) => warn!("symbol table build task failed: {e}"),
                }
                if !resolver.usable() {
                    exit_reason = "no symbolization available";
                    fatal = Some(anyhow::anyhow!(
                        "kallsyms and debug info lookup both unavailable"
                    ));
                    break;
                }
            }
        }

        tokio::select! {
            guard = channel.readable_mut() => {
                match guard {
                    Ok(mut guard) => {
                        match guard.get_inner_mut().receive() {
                            Ok(events) => {
                                for event in events {
                                    resolver.print_event(event);
                                }
                            }
                            Err(e) => {
                                error!("drop monitor channel failed: {e}");
                                exit_reason = "channel failure";
                                fatal = Some(e.into());
                                break;
                            }
                        }
                        guard.clear_ready();
                    }
                    Err(e) => {
                        exit_reason = "poll failure";
                        fatal = Some(e.into());
                        break;
                    }
                }
            }
            () = tokio::time::sleep(POLL_INTERVAL) => {}
            _ = &mut ctrl_c => {
                break;
            }
        }
    }

    // Best-effort stop; the socket itself is released on drop
    if let Err(e) = channel.get_mut().stop() {
        debug!("stop request not delivered: {e}");
    }

    if !args.quiet {
        eprintln!(
            "\n{}: {} events ({} via symbol table, {} dwarf queries, {} cache hits)",
            exit_reason,
            resolver.events,
            resolver.symbolized,
            resolver.dwarf_queries,
            resolver.cache_hits,
        );
    }

    match fatal {
        Some(err) => Err(err),
        None => Ok(()),
    }
}
