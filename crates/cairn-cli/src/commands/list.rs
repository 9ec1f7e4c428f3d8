//! List command - print the suite tree without running it

use anyhow::Result;
use cairn_core::{build_root, SourceRegistry};
use std::path::PathBuf;

pub fn run(paths: &[PathBuf]) -> Result<()> {
    let mut registry = SourceRegistry::default();
    let root = build_root(paths, &mut registry)?;
    let tree = root.dump();
    if tree.is_empty() {
        println!("No tests found.");
    } else {
        println!("{}", tree);
    }
    Ok(())
}
