//! DWARF debug info session over the running kernel and its modules
//!
//! Opened once at startup against an installed debug image tree
//! (`/usr/lib/debug/lib/modules/<release>/` by convention: `vmlinux` plus
//! `*.ko`/`*.ko.debug` files). Per-address queries return the inlined call
//! chain and source `file:line`, falling back to a plain ELF symbol when a
//! module's DWARF is stripped. Failure to open renders the session
//! unavailable for the process lifetime; it is never retried.

#![allow(unsafe_code)] // uname() requires unsafe

use std::cell::RefCell;
use std::collections::HashMap;
use std::ffi::CStr;
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::rc::Rc;

use addr2line::Context;
use gimli::{EndianRcSlice, RunTimeEndian};
use log::{debug, warn};
use object::{Object, ObjectSection, ObjectSymbol};
use rustc_demangle::demangle;

use crate::domain::DebugInfoError;

/// Default root of the kernel debug image tree.
pub const DEFAULT_SEARCH_PATH: &str = "/usr/lib/debug/lib/modules";

/// Region name for the base kernel image.
const KERNEL_REGION: &str = "kernel";

/// Span assumed for the kernel text region when `_end` is not exported.
const KERNEL_SPAN_FALLBACK: u64 = 0x4000_0000;

/// Result of a per-address debug info query.
///
/// Either field may be empty on its own; both empty means "no debug
/// information for this address", which callers distinguish from "not yet
/// queried" by whether a cache entry exists at all.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DebugLocation {
    /// `file:line[:column]`, or a compile-unit name when line info is
    /// stripped, or empty.
    pub compile_location: String,
    /// Function names across the inlining chain, innermost first, joined
    /// with ` <- `; or empty.
    pub function_chain: String,
}

impl DebugLocation {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.compile_location.is_empty() && self.function_chain.is_empty()
    }
}

/// One contiguous piece of the running kernel's address space.
#[derive(Debug, Clone)]
struct Region {
    base: u64,
    end: u64,
    /// Runtime address of the image's `.text`, for bias computation.
    text_base: u64,
    name: String,
}

struct ElfSymbol {
    address: u64,
    size: u64,
    name: String,
}

/// A debug image opened on first hit and kept for the session lifetime.
struct LoadedImage {
    ctx: Context<EndianRcSlice<RunTimeEndian>>,
    /// runtime text base − link-time `.text` address
    bias: u64,
    /// Sized ELF text symbols sorted by address; the fallback when the
    /// DWARF scope walk yields nothing.
    symbols: Vec<ElfSymbol>,
}

impl LoadedImage {
    fn nearest_symbol(&self, probe: u64) -> Option<&str> {
        let idx = self.symbols.partition_point(|s| s.address <= probe);
        let sym = self.symbols[..idx].last()?;
        (probe - sym.address < sym.size).then(|| sym.name.as_str())
    }
}

/// Debug info session scoped to the running kernel image and its loaded
/// modules.
pub struct DebugInfo {
    regions: Vec<Region>,
    debug_files: HashMap<String, PathBuf>,
    kernel_image: PathBuf,
    /// Images are opened lazily; a failed load is remembered as `None` so
    /// it is not retried on every event.
    loaded: RefCell<HashMap<String, Option<LoadedImage>>>,
}

impl DebugInfo {
    /// Open a session for the running kernel under `search_root`.
    ///
    /// The kernel release directory must contain a `vmlinux` debug image,
    /// and the running kernel's text base must be readable from
    /// `/proc/kallsyms`. Module enumeration failures degrade to
    /// kernel-only coverage with a warning.
    ///
    /// # Errors
    /// Any failure to establish the kernel image itself makes the session
    /// unavailable; callers disable DWARF lookups for the run.
    pub fn open<P: AsRef<Path>>(search_root: P) -> Result<Self, DebugInfoError> {
        let release = kernel_release()?;
        let image_dir = search_root.as_ref().join(&release);
        let kernel_image = image_dir.join("vmlinux");
        if !kernel_image.is_file() {
            return Err(DebugInfoError::NoKernelImage(kernel_image.display().to_string()));
        }

        let (text_base, text_end) = kernel_text_range("/proc/kallsyms")?;
        let mut regions = vec![Region {
            base: text_base,
            end: text_end,
            text_base,
            name: KERNEL_REGION.to_string(),
        }];

        match load_module_regions("/proc/modules") {
            Ok(mut modules) => regions.append(&mut modules),
            Err(e) => warn!("module list unavailable, kernel-only coverage: {e}"),
        }
        regions.sort_by_key(|r| r.base);

        let mut debug_files = HashMap::new();
        index_debug_files(&image_dir, &mut debug_files);
        debug!(
            "debug info session: {} regions, {} module images under {}",
            regions.len(),
            debug_files.len(),
            image_dir.display()
        );

        Ok(Self { regions, debug_files, kernel_image, loaded: RefCell::new(HashMap::new()) })
    }

    /// Resolve one kernel address.
    ///
    /// Never fails: every miss along the way degrades toward the empty
    /// [`DebugLocation`].
    #[must_use]
    pub fn lookup(&self, address: u64) -> DebugLocation {
        let Some(region) = self.region_of(address) else {
            debug!("0x{address:x}: no loaded image covers this address");
            return DebugLocation::default();
        };
        self.ensure_loaded(region);
        let loaded = self.loaded.borrow();
        let Some(Some(image)) = loaded.get(&region.name) else {
            return DebugLocation::default();
        };

        let probe = address.wrapping_sub(image.bias);
        let mut chain = String::new();
        let mut location = String::new();

        if let Ok(mut frames) = image.ctx.find_frames(probe).skip_all_loads() {
            while let Ok(Some(frame)) = frames.next() {
                let name = frame
                    .function
                    .and_then(|f| f.demangle().ok().map(|s| s.to_string()))
                    .unwrap_or_else(|| "??".to_string());
                if !chain.is_empty() {
                    chain.push_str(" <- ");
                }
                chain.push_str(&name);
                // Innermost frame's line wins; later frames only extend the chain
                if location.is_empty() {
                    if let Some(loc) = frame.location {
                        location = format_location(loc.file, loc.line, loc.column);
                    }
                }
            }
        }

        // The compile unit name still places the address when line info is stripped
        if location.is_empty() {
            if let Some(unit) = image.ctx.find_dwarf_and_unit(probe).skip_all_loads() {
                if let Some(name) = unit.name.as_ref().and_then(|n| n.to_string_lossy().ok()) {
                    location = name.into_owned();
                }
            }
        }

        if chain.is_empty() {
            if let Some(sym) = image.nearest_symbol(probe) {
                chain = format!("{:#}", demangle(sym));
            }
        }

        DebugLocation { compile_location: location, function_chain: chain }
    }

    fn region_of(&self, address: u64) -> Option<&Region> {
        let idx = self.regions.partition_point(|r| r.base <= address);
        self.regions[..idx].iter().rev().find(|r| address < r.end)
    }

    fn ensure_loaded(&self, region: &Region) {
        let mut loaded = self.loaded.borrow_mut();
        if !loaded.contains_key(&region.name) {
            let image = match self.load_image(region) {
                Ok(image) => Some(image),
                Err(e) => {
                    warn!("debug image for {} unavailable: {e}", region.name);
                    None
                }
            };
            loaded.insert(region.name.clone(), image);
        }
    }

    fn image_path(&self, region: &Region) -> Option<&Path> {
        if region.name == KERNEL_REGION {
            return Some(&self.kernel_image);
        }
        self.debug_files.get(&normalize_module_name(&region.name)).map(PathBuf::as_path)
    }

    fn load_image(&self, region: &Region) -> Result<LoadedImage, DebugInfoError> {
        let Some(path) = self.image_path(region) else {
            return Err(DebugInfoError::NoKernelImage(format!(
                "no debug file indexed for module {}",
                region.name
            )));
        };
        let data = fs::read(path)?;
        let obj = object::File::parse(&*data)?;

        let endian =
            if obj.is_little_endian() { RunTimeEndian::Little } else { RunTimeEndian::Big };
        let load_section =
            |id: gimli::SectionId| -> Result<EndianRcSlice<RunTimeEndian>, gimli::Error> {
                let data = obj
                    .section_by_name(id.name())
                    .and_then(|section| section.uncompressed_data().ok())
                    .unwrap_or(std::borrow::Cow::Borrowed(&[][..]));
                Ok(EndianRcSlice::new(Rc::from(&*data), endian))
            };
        let dwarf = gimli::Dwarf::load(&load_section)?;
        let ctx = Context::from_dwarf(dwarf)?;

        let link_text = obj.section_by_name(".text").map_or(0, |s| s.address());
        let bias = region.text_base.wrapping_sub(link_text);

        let mut symbols: Vec<ElfSymbol> = obj
            .symbols()
            .filter(|sym| sym.kind() == object::SymbolKind::Text && sym.size() > 0)
            .filter_map(|sym| {
                sym.name().ok().filter(|name| !name.is_empty()).map(|name| ElfSymbol {
                    address: sym.address(),
                    size: sym.size(),
                    name: name.to_string(),
                })
            })
            .collect();
        symbols.sort_by_key(|s| s.address);

        debug!(
            "loaded debug image {} (bias 0x{bias:x}, {} text symbols)",
            path.display(),
            symbols.len()
        );
        Ok(LoadedImage { ctx, bias, symbols })
    }
}

fn format_location(file: Option<&str>, line: Option<u32>, column: Option<u32>) -> String {
    let Some(file) = file else { return String::new() };
    let mut out = String::from(file);
    if let Some(line) = line {
        out.push(':');
        out.push_str(&line.to_string());
        if let Some(col) = column.filter(|&c| c != 0) {
            out.push(':');
            out.push_str(&col.to_string());
        }
    }
    out
}

fn kernel_release() -> io::Result<String> {
    let mut uts = unsafe { std::mem::zeroed::<libc::utsname>() };
    if unsafe { libc::uname(&mut uts) } != 0 {
        return Err(io::Error::last_os_error());
    }
    let release = unsafe { CStr::from_ptr(uts.release.as_ptr()) };
    Ok(release.to_string_lossy().into_owned())
}

/// Runtime bounds of the base kernel's text, read from the live symbol
/// listing. This is an address-space probe for bias computation, separate
/// from the symbol table component.
fn kernel_text_range<P: AsRef<Path>>(kallsyms: P) -> Result<(u64, u64), DebugInfoError> {
    let file = File::open(kallsyms.as_ref())
        .map_err(|e| DebugInfoError::KernelLayout(format!("cannot read kernel layout: {e}")))?;

    let mut stext = None;
    let mut text = None;
    let mut end = None;
    for line in BufReader::new(file).lines() {
        let line = line?;
        let mut fields = line.split_whitespace();
        let (Some(addr), Some(_), Some(name)) = (fields.next(), fields.next(), fields.next())
        else {
            continue;
        };
        let Ok(addr) = u64::from_str_radix(addr, 16) else { continue };
        match name {
            "_stext" => stext = Some(addr),
            "_text" => text = Some(addr),
            "_end" => end = Some(addr),
            _ => {}
        }
        if stext.is_some() && end.is_some() {
            break;
        }
    }

    let base = stext
        .or(text)
        .ok_or_else(|| DebugInfoError::KernelLayout("_stext not listed".to_string()))?;
    if base == 0 {
        return Err(DebugInfoError::KernelLayout(
            "kernel text address reads as zero (kptr_restrict=1?)".to_string(),
        ));
    }
    let end = end.filter(|&e| e > base).unwrap_or(base + KERNEL_SPAN_FALLBACK);
    Ok((base, end))
}

fn load_module_regions<P: AsRef<Path>>(modules: P) -> io::Result<Vec<Region>> {
    let listing = fs::read_to_string(modules.as_ref())?;
    let mut regions = Vec::new();
    let mut hidden = 0usize;
    for line in listing.lines() {
        let Some((name, size, base)) = parse_modules_line(line) else {
            debug!("skipping module line {line:?}");
            continue;
        };
        if base == 0 {
            hidden += 1;
            continue;
        }
        let text_base = module_text_base(&name).unwrap_or(base);
        regions.push(Region { base, end: base.saturating_add(size), text_base, name });
    }
    if hidden > 0 {
        warn!("{hidden} modules report address zero and were skipped (kptr_restrict?)");
    }
    Ok(regions)
}

/// Parse one `/proc/modules` line:
/// `<name> <size> <refcnt> <deps> <state> <address> [taint]`
fn parse_modules_line(line: &str) -> Option<(String, u64, u64)> {
    let mut fields = line.split_whitespace();
    let name = fields.next()?;
    let size = fields.next()?.parse().ok()?;
    let address = fields.nth(3)?;
    let address = u64::from_str_radix(address.strip_prefix("0x")?, 16).ok()?;
    Some((name.to_string(), size, address))
}

/// Runtime `.text` address exported by sysfs, more precise than the
/// module's core base for bias computation.
fn module_text_base(name: &str) -> Option<u64> {
    let text = fs::read_to_string(format!("/sys/module/{name}/sections/.text")).ok()?;
    u64::from_str_radix(text.trim().strip_prefix("0x")?, 16).ok()
}

/// Module names use `_` in /proc/modules but may use `-` on disk.
fn normalize_module_name(name: &str) -> String {
    name.replace('-', "_")
}

fn index_debug_files(dir: &Path, index: &mut HashMap<String, PathBuf>) {
    let Ok(entries) = fs::read_dir(dir) else { return };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            index_debug_files(&path, index);
        } else if let Some(file_name) = path.file_name().and_then(|n| n.to_str()) {
            let stem =
                file_name.strip_suffix(".ko.debug").or_else(|| file_name.strip_suffix(".ko"));
            if let Some(stem) = stem {
                index.entry(normalize_module_name(stem)).or_insert(path);
            }
        }
    }
}
