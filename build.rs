//! Build script rendering the demo binary's man page from its CLI definition.

use std::{fs, path::PathBuf};

use clap::CommandFactory;
use clap_mangen::Man;

#[path = "src/cli.rs"]
mod cli;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("cargo:rerun-if-changed=src/cli.rs");

    let cmd = cli::Cli::command();
    let page = format!("{}.1", cmd.get_name());
    let mut buf: Vec<u8> = Vec::new();
    Man::new(cmd).render(&mut buf)?;

    let out_dir = PathBuf::from("target/generated-man");
    fs::create_dir_all(&out_dir)?;
    fs::write(out_dir.join(page), buf)?;
    Ok(())
}
