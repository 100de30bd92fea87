//! Write the transfer API's OpenAPI document
//!
//! ```text
//! export_openapi                          # stdout
//! export_openapi --output docs/openapi.json
//! ```

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use utoipa::OpenApi;

use occ_transfer::gateway::openapi::ApiDoc;

#[derive(Parser, Debug)]
#[command(name = "export_openapi", about = "Export the OpenAPI document as JSON")]
struct Args {
    /// Write here instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let json = ApiDoc::openapi()
        .to_pretty_json()
        .context("serializing OpenAPI document")?;

    match args.output {
        Some(path) => {
            std::fs::write(&path, &json).with_context(|| format!("writing {}", path.display()))?;
            eprintln!("OpenAPI document written to {}", path.display());
        }
        None => println!("{json}"),
    }
    Ok(())
}
