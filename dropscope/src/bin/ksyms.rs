//! One-shot kernel symbol table utility: dump every symbol in address
//! order, or resolve the addresses given as arguments.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;

use dropscope::symbols::KallsymsTable;

#[derive(Parser)]
#[command(
    name = "ksyms",
    about = "Dump the kernel symbol table or resolve addresses against it",
    after_help = "\
EXAMPLES:
    ksyms                            Dump all symbols in address order
    ksyms 0xffffffff81512345         Resolve one address
    ksyms 0xffffffff81512345 4096    Resolve several (hex or decimal)"
)]
struct Args {
    /// Addresses to resolve (0x-prefixed hex or decimal); dump everything
    /// when omitted
    #[arg(value_name = "ADDR")]
    addresses: Vec<String>,

    /// Kernel symbol source
    #[arg(long, value_name = "PATH", default_value = "/proc/kallsyms")]
    kallsyms: PathBuf,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let table = KallsymsTable::load(&args.kallsyms)
        .with_context(|| format!("failed to build symbol table from {}", args.kallsyms.display()))?;

    if args.addresses.is_empty() {
        for (address, name) in table.iter() {
            println!("0x{address:x} {name}");
        }
        return Ok(());
    }

    for arg in &args.addresses {
        let address = parse_address(arg)?;
        match table.lookup(address) {
            Some((name, offset)) => println!("{arg}: {name}+0x{offset:x}"),
            None => println!("{arg}: ?"),
        }
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
