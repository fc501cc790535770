//! CLI argument definitions

use clap::Parser;
use std::path::PathBuf;

use crate::symbols::DEFAULT_SEARCH_PATH;

#[derive(Parser)]
#[command(
    name = "dropscope",
    about = "Watch the kernel drop monitor and resolve drop locations live",
    after_help = "\
EXAMPLES:
    sudo dropscope                           Monitor with default sources
    sudo dropscope --no-debuginfo            Fast-table symbolization only
    sudo dropscope --debuginfo /srv/debug    Custom debug image tree"
)]
pub struct Args {
    /// Kernel symbol source for the fast lookup table
    #[arg(long, value_name = "PATH", default_value = "/proc/kallsyms")]
    pub kallsyms: PathBuf,

    /// Root of the kernel debug info search path
    #[arg(long, value_name = "PATH", default_value = DEFAULT_SEARCH_PATH)]
    pub debuginfo: PathBuf,

    /// Skip opening the DWARF debug info session
    #[arg(long)]
    pub no_debuginfo: bool,

    /// Keep querying debug info even after an address resolves to nothing
    #[arg(long)]
    pub keep_dwarf: bool,

    /// Suppress non-essential output
    #[arg(short, long)]
    pub quiet: bool,
}
