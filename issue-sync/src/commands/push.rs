//! Push command - send local edits, new issues and comments to GitHub

use std::path::Path;

use anyhow::{bail, Result};
use rand::rngs::StdRng;
use rand::SeedableRng;

use super::{cancel_on_interrupt, connect, open_store, runtime, spinner};
use crate::push::{push, PushOptions};
use crate::render;

pub fn run(root: Option<&Path>, targets: Vec<String>, dry_run: bool) -> Result<()> {
    let store = open_store(root)?;
    let client = connect(&store)?;
    let options = PushOptions { targets, dry_run };

    let cancel = cancel_on_interrupt();
    let rt = runtime()?;
    let mut rng = StdRng::from_entropy();
    let bar = spinner(&format!("Pushing to {}...", client.slug()));
    let result = rt.block_on(push(&store, &client, &options, &mut rng, &cancel));
    bar.finish_and_clear();

    let report = result?;
    render::push_report(&report).print();
    if !report.failures.is_empty() {
        bail!("{} issue(s) failed to push", report.failures.len());
    }
    Ok(())
}
