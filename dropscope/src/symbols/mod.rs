//! # Symbol Resolution for Kernel Addresses
//!
//! Converts the raw program-counter addresses reported by the kernel's drop
//! monitor into human-readable names. Two independent subsystems cooperate:
//!
//! - [`kallsyms`]: a fast, ordered address→name table built once from
//!   `/proc/kallsyms`. Answers "nearest symbol at or below address X" in
//!   O(log n). Cheap enough to run on every event, but knows nothing about
//!   inlining or source lines.
//! - [`debuginfo`]: a DWARF session over the installed debug images of the
//!   running kernel and its loaded modules. Answers with the full inlined
//!   call chain and `file:line`, at a much higher per-query cost. The
//!   monitor loop memoizes its results per address.
//!
//! ## Address spaces
//!
//! `/proc/kallsyms` reports runtime addresses directly, so the table needs
//! no adjustment. Debug images carry link-time addresses; the session
//! computes a per-image bias from the runtime text base (`_stext` for the
//! kernel, `/sys/module/<name>/sections/.text` for modules) and the ELF
//! `.text` address, and probes DWARF with `runtime - bias`.
//!
//! ```text
//! drop address ──▶ kallsyms table ──▶ symbol+offset          (hot path)
//!           └────▶ region table ──▶ per-image DWARF context
//!                                   ──▶ inline chain + file:line
//! ```
//!
//! **Libraries used**:
//! - `object`: ELF parsing for debug images and the symtab fallback
//! - `gimli`: DWARF section loading
//! - `addr2line`: inlined-frame and line lookup built on gimli
//! - `rustc-demangle`: demangling for in-kernel Rust symbols (C names pass
//!   through unchanged)

pub mod debuginfo;
pub mod kallsyms;

pub use debuginfo::{DebugInfo, DebugLocation, DEFAULT_SEARCH_PATH};
pub use kallsyms::KallsymsTable;
