//! otalink-ctl — push firmware images to an otalinkd receiver.

use std::path::Path;

use anyhow::{Context, Result};

use otalink_core::config::OtalinkConfig;

mod cmd;

fn print_usage() {
    println!("Usage: otalink-ctl <command>");
    println!();
    println!("Commands:");
    println!("  push <addr> <image> [--version <n>]   Send an image to a receiver");
    println!("  digest <image>                        Show size, SHA-256 and chunk count");
    println!("  help                                  Show this message");
    println!();
    println!("Config: {}", OtalinkConfig::file_path().display());
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();

    // Parse --version option
    let mut version = None;
    let mut remaining: Vec<&str> = Vec::new();
    let mut i = 0;
    while i < args.len() {
        if args[i] == "--version" {
            i += 1;
            version = Some(
                args.get(i)
                    .context("--version requires a value")?
                    .parse::<u32>()
                    .context("--version must be a number")?,
            );
        } else {
            remaining.push(&args[i]);
        }
        i += 1;
    }

    let config = OtalinkConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        OtalinkConfig::default()
    });

    match remaining.as_slice() {
        ["push", peer, image] => cmd::push::cmd_push(&config, peer, Path::new(image), version).await,
        ["digest", image] => cmd::digest::cmd_digest(&config, Path::new(image)),
        ["help"] | ["--help"] | ["-h"] | [] => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {}", other.join(" "));
            eprintln!();
            print_usage();
            std::process::exit(1);
        }
    }
}
