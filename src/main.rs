//! Entry point of the otelcol extension controller.

use clap::Parser;

use otelcol_extension_controller::cli;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    // kube is built against rustls; pick ring as the process-wide crypto
    // provider before any TLS connection is made.
    rustls::crypto::ring::default_provider()
        .install_default()
        .ok();

    let flags = cli::Flags::parse();
    cli::run(flags).await
}
