//! makersp: collect files matching wildcards into a response file.

use std::io;
use std::process::ExitCode;

use mc_heap::HeapList;
use mc_tools::cli::rsp_options;
use mc_tools::response::generate_response_file;
use mc_tools::wildcard::Wildcard;
use mc_tools::{init_logging, system_heap};
use tracing::{error, warn};
use tracing::level_filters::LevelFilter;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

fn main() -> ExitCode {
    let options = rsp_options().run();
    init_logging(options.verbosity_level);

    let heaps = HeapList::default();
    let _system_heap = match system_heap(&heaps) {
        Ok(heap) => heap,
        Err(e) => {
            error!("{e:#}");
            return ExitCode::FAILURE;
        }
    };

    let wildcards: Vec<Wildcard> = options.wildcards.iter().map(|w| Wildcard::parse(w)).collect();

    let found = match generate_response_file(&options.base_path, &wildcards, &options.rsp_file) {
        Ok(found) => found,
        Err(e) => {
            error!("{e:#}");
            return ExitCode::FAILURE;
        }
    };

    if options.verbosity_level >= LevelFilter::DEBUG {
        if let Err(e) = heaps.write_report(&mut io::stderr()) {
            warn!(error = %e, "Failed to write heap report");
        }
    }

    if found == 0 {
        println!("No files found to pack.");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
