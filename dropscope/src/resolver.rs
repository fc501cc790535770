//! Per-event symbol resolution and display
//!
//! Owned by the monitor loop. Combines the fast kallsyms lookup (run on
//! every event, never cached) with the expensive DWARF lookup, which is
//! memoized per address. After the first address for which DWARF yields
//! nothing at all, further DWARF queries are skipped for the rest of the
//! run unless `keep_querying` was requested: in practice kernel debug info
//! is installed-or-not as a whole, and one miss predicts the rest.

use std::collections::HashMap;

use log::warn;

use crate::domain::DropEvent;
use crate::symbols::{DebugInfo, DebugLocation, KallsymsTable};

const PLACEHOLDER: &str = "?";

/// Resolves decoded drop events into display lines.
pub struct EventResolver {
    ksyms: Option<KallsymsTable>,
    debuginfo: Option<DebugInfo>,
    dwarf_enabled: bool,
    keep_querying: bool,
    cache: HashMap<u64, DebugLocation>,

    // Per-run counters for the end-of-run summary
    pub events: u64,
    pub symbolized: u64,
    pub dwarf_queries: u64,
    pub cache_hits: u64,
}

impl EventResolver {
    #[must_use]
    pub fn new(debuginfo: Option<DebugInfo>, keep_querying: bool) -> Self {
        let dwarf_enabled = debuginfo.is_some();
        Self {
            ksyms: None,
            debuginfo,
            dwarf_enabled,
            keep_querying,
            cache: HashMap::new(),
            events: 0,
            symbolized: 0,
            dwarf_queries: 0,
            cache_hits: 0,
        }
    }

    /// Adopt the symbol table built in the background. Called at most once.
    pub fn adopt_symbols(&mut self, table: KallsymsTable) {
        self.ksyms = Some(table);
    }

    #[must_use]
    pub fn has_symbols(&self) -> bool {
        self.ksyms.is_some()
    }

    /// Whether any symbolization subsystem is still usable. When this goes
    /// false there is no way to produce useful output.
    #[must_use]
    pub fn usable(&self) -> bool {
        self.ksyms.is_some() || self.debuginfo.is_some()
    }

    /// Column header preceding the event stream.
    pub fn print_header() {
        println!("{:>4}  {:>18}  {:>40}  {}", "#", "ip", "sym+off", "function (location)");
    }

    /// Resolve one event and print its display line.
    pub fn print_event(&mut self, event: DropEvent) {
        self.events += 1;
        println!("{}", self.format_event(event));
    }

    fn format_event(&mut self, event: DropEvent) -> String {
        let sym = match self.ksyms.as_ref().and_then(|t| t.lookup(event.address)) {
            Some((name, offset)) => {
                self.symbolized += 1;
                format!("{name}+0x{offset:x}")
            }
            None => PLACEHOLDER.to_string(),
        };

        let location = self.resolve(event.address);
        let dwarf = if location.function_chain.is_empty() {
            PLACEHOLDER.to_string()
        } else if location.compile_location.is_empty() {
            location.function_chain
        } else {
            format!("{} ({})", location.function_chain, location.compile_location)
        };

        format!("{:>4}  {:#018x}  {:>40}  {}", event.count, event.address, sym, dwarf)
    }

    /// Memoized DWARF lookup, with the global availability short-circuit.
    fn resolve(&mut self, address: u64) -> DebugLocation {
        if let Some(hit) = self.cache.get(&address) {
            self.cache_hits += 1;
            return hit.clone();
        }

        let Some(session) = self.debuginfo.as_ref().filter(|_| self.dwarf_enabled) else {
            return DebugLocation::default();
        };

        self.dwarf_queries += 1;
        let location = session.lookup(address);
        if location.function_chain.is_empty() && !self.keep_querying {
            warn!("debug info yielded nothing for 0x{address:x}; disabling further queries");
            self.dwarf_enabled = false;
        }
        // Negative results are cached too, so hot addresses never repeat
        // the expensive walk
        self.cache.insert(address, location.clone());
        location
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn table(source: &str) -> KallsymsTable {
        KallsymsTable::from_reader(Cursor::new(source.as_bytes()), 64).unwrap()
    }

    #[test]
    fn formats_symbol_and_offset() {
        let mut resolver = EventResolver::new(None, false);
        resolver.adopt_symbols(table("0000000000001000 T my_function\n"));

        let line = resolver.format_event(DropEvent { address: 0x1005, count: 2 });
        assert!(line.contains("my_function+0x5"), "line: {line}");
        assert!(line.contains("0x0000000000001005"), "line: {line}");
        assert!(line.trim_end().ends_with('?'), "line: {line}");
    }

    #[test]
    fn placeholder_when_nothing_covers_the_address() {
        let mut resolver = EventResolver::new(None, false);
        resolver.adopt_symbols(table("0000000000002000 t helper\n"));

        let line = resolver.format_event(DropEvent { address: 0x100, count: 1 });
        assert!(line.contains('?'), "line: {line}");
        assert_eq!(resolver.symbolized, 0);
    }

    #[test]
    fn no_session_means_no_queries() {
        let mut resolver = EventResolver::new(None, false);
        let location = resolver.resolve(0xdead_beef);
        assert!(location.is_empty());
        assert_eq!(resolver.dwarf_queries, 0);
    }

    #[test]
    fn usable_tracks_both_subsystems() {
        let mut resolver = EventResolver::new(None, false);
        assert!(!resolver.usable());
        resolver.adopt_symbols(table("0000000000001000 T f\n"));
        assert!(resolver.usable());
    }
}
