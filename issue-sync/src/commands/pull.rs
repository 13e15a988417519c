//! Pull command - fetch remote issues into the local store

use std::path::Path;

use anyhow::Result;

use super::{cancel_on_interrupt, connect, open_store, runtime, spinner};
use crate::conflict::ConflictPolicy;
use crate::pull::{pull, PullOptions};
use crate::render;

pub fn run(
    root: Option<&Path>,
    targets: Vec<String>,
    all: bool,
    label: Option<String>,
    discard_local: bool,
) -> Result<()> {
    let store = open_store(root)?;
    let client = connect(&store)?;
    let options = PullOptions {
        targets,
        all,
        label,
        policy: if discard_local {
            ConflictPolicy::DiscardLocal
        } else {
            ConflictPolicy::Skip
        },
    };

    let cancel = cancel_on_interrupt();
    let rt = runtime()?;
    let bar = spinner(&format!("Pulling from {}...", client.slug()));
    let result = rt.block_on(pull(&store, &client, &options, &cancel));
    bar.finish_and_clear();

    render::pull_report(&result?).print();
    Ok(())
}
