//! makefst: pack the files named in a response file into a fast file.

use anyhow::{Context, Result};
use mc_fastfile::FastFileConfig;
use mc_heap::{format_bytes, HeapList};
use mc_tools::cli::{fst_options, FstOptions};
use mc_tools::response::{pack, verify};
use mc_tools::{init_logging, system_heap};
use tracing::info;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

fn main() -> Result<()> {
    let options = fst_options().run();
    init_logging(options.verbosity_level);
    run(&options)
}

fn run(options: &FstOptions) -> Result<()> {
    let heaps = HeapList::default();
    let mut heap = system_heap(&heaps)?;

    let config = match &options.config {
        Some(path) => FastFileConfig::from_json_file(path)
            .with_context(|| format!("Cannot load config {}", path.display()))?,
        None => FastFileConfig::default(),
    };

    let summary = pack(
        &options.base_path,
        &options.rsp_file,
        &options.output,
        &config,
        !options.store,
    )?;
    info!(
        "Packed {} files: {} stored as {}",
        summary.entries,
        format_bytes(summary.uncompressed_bytes as usize),
        format_bytes(summary.stored_bytes as usize)
    );

    if options.verify {
        let checked = verify(&options.output, &config, &mut heap)?;
        info!("Verified {checked} entries");
    }

    Ok(())
}
