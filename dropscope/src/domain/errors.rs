//! Structured error types for dropscope
//!
//! Using thiserror for automatic Display implementation and error chaining.
//! Each subsystem that can become unavailable for the rest of the run has
//! its own enum so callers can degrade selectively.

use thiserror::Error;

/// Errors from building the kernel symbol table.
#[derive(Error, Debug)]
pub enum KallsymsError {
    #[error("malformed symbol line {line}: {content:?}")]
    Malformed { line: usize, content: String },

    #[error("reading kernel symbols failed: addresses are hidden (kptr_restrict=1?). Try again with root privileges")]
    Restricted,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Errors from opening the kernel debug info session.
#[derive(Error, Debug)]
pub enum DebugInfoError {
    #[error("kernel debug image not found: {0}")]
    NoKernelImage(String),

    #[error("kernel address layout unavailable: {0}")]
    KernelLayout(String),

    #[error("failed to parse debug image: {0}")]
    Object(#[from] object::Error),

    #[error("failed to load DWARF sections: {0}")]
    Dwarf(#[from] gimli::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Errors from the netlink drop-monitor channel.
#[derive(Error, Debug)]
pub enum ChannelError {
    #[error("netlink socket unavailable: {0}")]
    Socket(std::io::Error),

    #[error("generic netlink family {0:?} not resolved (drop_monitor not available?)")]
    FamilyNotFound(String),

    #[error("netlink send failed: {0}")]
    Send(std::io::Error),

    #[error("netlink receive failed: {0}")]
    Receive(std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kallsyms_error_display() {
        let err = KallsymsError::Malformed { line: 7, content: "bogus".to_string() };
        assert_eq!(err.to_string(), "malformed symbol line 7: \"bogus\"");
    }

    #[test]
    fn test_restricted_error_mentions_privileges() {
        let err = KallsymsError::Restricted;
        assert!(err.to_string().contains("root privileges"));
    }

    #[test]
    fn test_family_error_names_family() {
        let err = ChannelError::FamilyNotFound("NET_DM".to_string());
        assert!(err.to_string().contains("NET_DM"));
    }
}
