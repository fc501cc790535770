//! Kernel symbol table built from `/proc/kallsyms`
//!
//! The source is a line-oriented text stream, one symbol per line:
//!
//! ```text
//! ffffffff81000000 T _text
//! ffffffffc0a00120 t helper_fn\t[some_module]
//! ```
//!
//! The file is large (hundreds of thousands of lines) and is read in fixed
//! 32 KiB chunks; a logical line may straddle a chunk boundary, so any
//! trailing partial line is carried over and prefixed onto the next chunk.
//! The build runs once, on a blocking task; the finished table is immutable.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use crate::domain::KallsymsError;

/// Read granularity for the symbol source.
pub const CHUNK_SIZE: usize = 32 * 1024;

/// Separator between merged names when two lines share an address.
const MERGE_SEPARATOR: char = '/';

/// Collisions at address zero past this many lines mean the source is
/// hiding addresses, not that the kernel really has one giant symbol.
const RESTRICTED_LINE_THRESHOLD: usize = 10;

/// Ordered address→name table with nearest-below lookup.
///
/// Keys are unique: when two source lines report the same address (module
/// private symbols shadowing global ones do this), the names are merged
/// with [`MERGE_SEPARATOR`] so neither is lost.
#[derive(Debug, Default)]
pub struct KallsymsTable {
    syms: BTreeMap<u64, String>,
}

impl KallsymsTable {
    /// Build the table from a symbol source on disk.
    ///
    /// # Errors
    /// Fails on I/O errors, on any malformed line (a corrupt source cannot
    /// be trusted for ordered lookups, so no partial table is returned),
    /// and with [`KallsymsError::Restricted`] when the source reads as all
    /// zero addresses.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, KallsymsError> {
        let file = File::open(path)?;
        Self::from_reader(file, CHUNK_SIZE)
    }

    /// Build the table from any byte stream, reading `chunk_size` bytes at
    /// a time. Exposed so tests can force line splits at arbitrary offsets.
    ///
    /// # Errors
    /// Same contract as [`KallsymsTable::load`].
    pub fn from_reader<R: Read>(mut reader: R, chunk_size: usize) -> Result<Self, KallsymsError> {
        let mut syms = BTreeMap::new();
        let mut chunk = vec![0u8; chunk_size.max(1)];
        let mut pending: Vec<u8> = Vec::new();
        let mut line_no = 0usize;

        loop {
            let filled = read_retrying(&mut reader, &mut chunk)?;
            if filled == 0 {
                break;
            }
            pending.extend_from_slice(&chunk[..filled]);

            let mut start = 0;
            while let Some(nl) = pending[start..].iter().position(|&b| b == b'\n') {
                insert_line(&mut syms, &pending[start..start + nl], line_no)?;
                line_no += 1;
                start += nl + 1;
            }
            // Keep the trailing partial line for the next chunk
            pending.drain(..start);
        }

        // A source that does not end in a newline still has a final line
        if !pending.is_empty() {
            insert_line(&mut syms, &pending, line_no)?;
        }

        log::debug!("kernel symbol table built: {} entries", syms.len());
        Ok(Self { syms })
    }

    /// Nearest symbol at or below `address`.
    ///
    /// Returns the name and `address - key`; the offset is zero only on an
    /// exact match. `None` when the table is empty or the address lies
    /// below the smallest key (no symbol covers it).
    #[must_use]
    pub fn lookup(&self, address: u64) -> Option<(&str, u64)> {
        let (key, name) = self.syms.range(..=address).next_back()?;
        Some((name.as_str(), address - key))
    }

    /// Entries in address-ascending order.
    pub fn iter(&self) -> impl Iterator<Item = (u64, &str)> {
        self.syms.iter().map(|(addr, name)| (*addr, name.as_str()))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.syms.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.syms.is_empty()
    }
}

/// One read() with EINTR retried; short reads are fine, the caller copes
/// with arbitrary chunk boundaries anyway.
fn read_retrying<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    loop {
        match reader.read(buf) {
            Ok(n) => return Ok(n),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
}

fn insert_line(
    syms: &mut BTreeMap<u64, String>,
    raw: &[u8],
    line_no: usize,
) -> Result<(), KallsymsError> {
    let (address, text) = parse_line(raw).ok_or_else(|| KallsymsError::Malformed {
        line: line_no,
        content: String::from_utf8_lossy(raw).into_owned(),
    })?;

    if syms.contains_key(&address) {
        if address == 0 && line_no >= RESTRICTED_LINE_THRESHOLD && syms.len() <= 1 {
            return Err(KallsymsError::Restricted);
        }
        if let Some(existing) = syms.get_mut(&address) {
            existing.push(MERGE_SEPARATOR);
            existing.push_str(&text);
        }
    } else {
        syms.insert(address, text);
    }
    Ok(())
}

/// Split one `<hex addr> <type char> <name>[\t[<module>]]` line.
///
/// The stored symbol text keeps the ` [module]` annotation when present so
/// merged entries stay distinguishable. Returns `None` on any deviation
/// from the grammar.
fn parse_line(raw: &[u8]) -> Option<(u64, String)> {
    let line = std::str::from_utf8(raw).ok()?.trim_end_matches('\r');
    let mut fields = line.split_whitespace();

    let address = u64::from_str_radix(fields.next()?, 16).ok()?;
    let type_char = fields.next()?;
    if type_char.chars().count() != 1 {
        return None;
    }
    let name = fields.next()?;

    let mut text = String::from(name);
    match fields.next() {
        None => {}
        Some(module) if module.starts_with('[') && module.ends_with(']') => {
            text.push(' ');
            text.push_str(module);
        }
        Some(_) => return None,
    }
    if fields.next().is_some() {
        return None;
    }
    Some((address, text))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn table(source: &str) -> Result<KallsymsTable, KallsymsError> {
        KallsymsTable::from_reader(Cursor::new(source.as_bytes()), CHUNK_SIZE)
    }

    #[test]
    fn lookup_is_nearest_below() {
        let t = table("0000000000001000 T alpha\n0000000000002000 t beta\n").unwrap();

        assert_eq!(t.lookup(0x1000), Some(("alpha", 0)));
        assert_eq!(t.lookup(0x1005), Some(("alpha", 0x5)));
        assert_eq!(t.lookup(0x1fff), Some(("alpha", 0xfff)));
        assert_eq!(t.lookup(0x2000), Some(("beta", 0)));
        assert_eq!(t.lookup(0xffff_ffff), Some(("beta", 0xffff_dfff)));
        // Below the smallest key nothing covers the address
        assert_eq!(t.lookup(0xfff), None);
    }

    #[test]
    fn empty_table_finds_nothing() {
        let t = table("").unwrap();
        assert!(t.is_empty());
        assert_eq!(t.lookup(0x1234), None);
    }

    #[test]
    fn colliding_addresses_merge_both_names() {
        let t = table("0000000000002000 t helper\n0000000000002000 t helper\t[my_module]\n")
            .unwrap();

        assert_eq!(t.len(), 1);
        let (name, off) = t.lookup(0x2000).unwrap();
        assert_eq!(off, 0);
        assert_eq!(name, "helper/helper [my_module]");
    }

    #[test]
    fn module_annotation_is_kept() {
        let t = table("ffffffffc0a00120 t helper_fn\t[some_module]\n").unwrap();
        let (name, _) = t.lookup(0xffff_ffff_c0a0_0120).unwrap();
        assert_eq!(name, "helper_fn [some_module]");
    }

    #[test]
    fn malformed_line_aborts_build() {
        let err = table("0000000000001000 T good\nnot hex at all\n").unwrap_err();
        assert!(matches!(err, KallsymsError::Malformed { line: 1, .. }));

        // missing name field
        let err = table("0000000000001000 T\n").unwrap_err();
        assert!(matches!(err, KallsymsError::Malformed { .. }));

        // trailing garbage after the module annotation
        let err = table("0000000000001000 T name [mod] extra\n").unwrap_err();
        assert!(matches!(err, KallsymsError::Malformed { .. }));
    }

    #[test]
    fn all_zero_addresses_diagnose_restriction() {
        let mut source = String::new();
        for i in 0..16 {
            source.push_str(&format!("0000000000000000 T sym_{i}\n"));
        }
        let err = table(&source).unwrap_err();
        assert!(matches!(err, KallsymsError::Restricted));
    }

    #[test]
    fn a_few_zero_lines_are_not_restriction() {
        // Short sources with a zero-address collision merge as usual
        let t = table("0000000000000000 A zero_a\n0000000000000000 A zero_b\n").unwrap();
        assert_eq!(t.lookup(0).unwrap().0, "zero_a/zero_b");
    }

    #[test]
    fn final_line_without_newline_is_parsed() {
        let t = table("0000000000001000 T alpha\n0000000000002000 t beta").unwrap();
        assert_eq!(t.len(), 2);
        assert_eq!(t.lookup(0x2000), Some(("beta", 0)));
    }

    #[test]
    fn iteration_is_address_ascending() {
        let t = table("0000000000002000 t beta\n0000000000001000 T alpha\n").unwrap();
        let order: Vec<u64> = t.iter().map(|(addr, _)| addr).collect();
        assert_eq!(order, vec![0x1000, 0x2000]);
    }
}
