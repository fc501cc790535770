//! One-shot debug info lookup: resolve kernel addresses to their inlined
//! call chain and source location. Doubles as the session test entry
//! point on systems with kernel debug images installed.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;

use dropscope::symbols::{DebugInfo, DEFAULT_SEARCH_PATH};

#[derive(Parser)]
#[command(
    name = "debuginfo",
    about = "Resolve kernel addresses through DWARF debug info",
    after_help = "\
EXAMPLES:
    debuginfo 0xffffffff81512345
    debuginfo --debuginfo /srv/debug 0xffffffffc092c460"
)]
struct Args {
    /// Addresses to resolve (0x-prefixed hex or decimal)
    #[arg(value_name = "ADDR", required = true)]
    addresses: Vec<String>,

    /// Root of the kernel debug info search path
    #[arg(long, value_name = "PATH", default_value = DEFAULT_SEARCH_PATH)]
    debuginfo: PathBuf,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let session = DebugInfo::open(&args.debuginfo)
        .with_context(|| format!("debug info session failed under {}", args.debuginfo.display()))?;

    for arg in &args.addresses {
        let address = parse_address(arg)?;
        let location = session.lookup(address);
        let chain =
            if location.function_chain.is_empty() { "?" } else { location.function_chain.as_str() };
        let place = if location.compile_location.is_empty() {
            "?"
        } else {
            location.compile_location.as_str()
        };
        println!("{arg}: {chain}  {place}");
    }
    Ok(())
}

fn parse_address(arg: &str) -> Result<u64> {
    let parsed = match arg.strip_prefix("0x").or_else(|| arg.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => arg.parse(),
    };
    parsed.with_context(|| format!("invalid address {arg:?}"))
}
