//! CLI command implementations.

mod info;
mod run;
mod send;

pub use info::show_info;
pub use run::run_service;
pub use send::send_file;

/// Resolve the pairing passphrase from the flag or the environment.
pub(crate) fn resolve_passphrase(flag: Option<String>) -> anyhow::Result<String> {
    flag.or_else(|| std::env::var("AIRLIFT_PASSPHRASE").ok())
        .filter(|p| !p.is_empty())
        .ok_or_else(|| {
            anyhow::anyhow!("no passphrase given; use --passphrase or AIRLIFT_PASSPHRASE")
        })
}
