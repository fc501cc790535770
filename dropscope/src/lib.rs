//! # dropscope - Kernel Packet-Drop Monitor with Live Symbolization
//!
//! dropscope subscribes to the kernel's drop-monitor subsystem (`NET_DM`)
//! over generic netlink and resolves every reported drop location - a raw
//! kernel program counter - into a human-readable symbol, inlined call
//! chain, and source line, as the drops happen.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Kernel (drop_monitor)                   │
//! └──────────────────────────┬──────────────────────────────────┘
//!                            │ netlink alert datagrams
//!                            ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   dropscope (this crate)                    │
//! │                                                             │
//! │  ┌────────────┐    ┌────────────┐    ┌─────────────────┐  │
//! │  │  dropmon   │───▶│  resolver  │───▶│  display line   │  │
//! │  │ (netlink)  │    │  (cache)   │    └─────────────────┘  │
//! │  └────────────┘    └─────┬──────┘                          │
//! │                          │                                  │
//! │             ┌────────────┴────────────┐                    │
//! │             ▼                         ▼                    │
//! │     ┌──────────────┐         ┌──────────────┐             │
//! │     │   kallsyms   │         │  debuginfo   │             │
//! │     │ (fast table) │         │   (DWARF)    │             │
//! │     └──────────────┘         └──────────────┘             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Structure
//!
//! - [`dropmon`]: generic-netlink channel to the drop monitor - family
//!   resolution, `START`/`STOP` control, non-blocking drain, and the
//!   bounds-checked decoding of alert datagrams into drop events
//! - [`symbols`]: the two symbolization subsystems - the streaming
//!   kallsyms table (fast path) and the kernel/module DWARF session
//!   (slow path with inline chains and source lines)
//! - [`resolver`]: per-event resolution combining both subsystems, with
//!   memoized DWARF results and an availability short-circuit
//! - [`cli`]: command-line argument parsing
//! - [`domain`]: core value types and per-subsystem error enums
//!
//! ## Degradation
//!
//! Each symbolization subsystem can be unavailable independently (missing
//! debug images, restricted kallsyms); output degrades to placeholders as
//! long as one of them works. Only the event channel is indispensable.
//!
//! ## Typical Usage
//!
//! ```bash
//! sudo dropscope
//! sudo dropscope --no-debuginfo     # skip DWARF, fast table only
//! ksyms 0xffffffff81512345          # one-shot lookups
//! ```

pub mod cli;
pub mod domain;
pub mod dropmon;
pub mod resolver;
pub mod symbols;
