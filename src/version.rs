//! Version metadata for the extension.

/// Version of the extension, as compiled into the binary.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
