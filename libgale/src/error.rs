pub use anyhow::Context;
pub use anyhow::Error;

pub type Result<T = (), E = Error> = core::result::Result<T, E>;

/// Reports a recoverable input anomaly. Unlike a fatal error, processing continues. Warnings all
/// go through here so that a suppression flag only needs to be wired up in one place.
pub(crate) fn warning(message: &str) {
    println!("WARNING: gale: {message}");
}
