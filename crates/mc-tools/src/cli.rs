//! Command line options for `makersp` and `makefst`.

use std::path::PathBuf;

use bpaf::{batteries::verbose_by_slice, construct, long, short, OptionParser, Parser};
use tracing::level_filters::LevelFilter;

#[derive(Debug, Clone)]
pub struct RspOptions {
    pub verbosity_level: LevelFilter,
    pub base_path: PathBuf,
    pub rsp_file: PathBuf,
    pub wildcards: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct FstOptions {
    pub verbosity_level: LevelFilter,
    pub base_path: PathBuf,
    pub rsp_file: PathBuf,
    pub output: PathBuf,
    pub store: bool,
    pub verify: bool,
    pub config: Option<PathBuf>,
}

fn verbosity() -> impl Parser<LevelFilter> {
    verbose_by_slice(
        3,
        [
            LevelFilter::OFF,
            LevelFilter::ERROR,
            LevelFilter::WARN,
            LevelFilter::INFO,
            LevelFilter::DEBUG,
            LevelFilter::TRACE,
        ],
    )
}

fn base_path() -> impl Parser<PathBuf> {
    short('p')
        .long("path")
        .help("Directory the listed files are relative to")
        .argument("DIR")
}

fn rsp_file() -> impl Parser<PathBuf> {
    long("rsp")
        .help("Response file listing one relative file per line")
        .argument("FILE")
        .complete_shell(bpaf::ShellComp::File { mask: Some("*.rsp") })
}

pub fn rsp_options() -> OptionParser<RspOptions> {
    let verbosity_level = verbosity();
    let base_path = base_path();
    let rsp_file = rsp_file();
    let wildcards = short('w')
        .long("wildcard")
        .help("dir/pattern to collect, * and ? allowed in the file name")
        .argument::<String>("WILDCARD")
        .some("at least one wildcard is required");

    construct!(RspOptions {
        verbosity_level,
        base_path,
        rsp_file,
        wildcards
    })
    .to_options()
    .descr("Write a response file listing the files to pack")
}

pub fn fst_options() -> OptionParser<FstOptions> {
    let verbosity_level = verbosity();
    let base_path = base_path();
    let rsp_file = rsp_file();
    let output = short('o')
        .long("output")
        .help("Fast file to create")
        .argument::<PathBuf>("FILE")
        .complete_shell(bpaf::ShellComp::File { mask: Some("*.fst") });
    let store = long("store")
        .help("Store every entry uncompressed")
        .switch();
    let verify = long("verify")
        .help("Reopen the archive and load every entry after writing it")
        .switch();
    let config = long("config")
        .help("JSON fast file configuration")
        .argument::<PathBuf>("FILE")
        .optional();

    construct!(FstOptions {
        verbosity_level,
        base_path,
        rsp_file,
        output,
        store,
        verify,
        config
    })
    .to_options()
    .descr("Pack the files named in a response file into a fast file")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_bpaf_invariants() {
        rsp_options().check_invariants(true);
        fst_options().check_invariants(true);
    }

    #[test]
    fn test_rsp_arguments() {
        let options = rsp_options()
            .run_inner(&["-p", "data", "-w", "art/*.tga", "-w", "*.fit", "--rsp", "out.rsp", "-v"])
            .unwrap();
        assert_eq!(options.base_path, PathBuf::from("data"));
        assert_eq!(options.wildcards, ["art/*.tga", "*.fit"]);
        assert_eq!(options.rsp_file, PathBuf::from("out.rsp"));
        assert_eq!(options.verbosity_level, LevelFilter::DEBUG);
    }

    #[test]
    fn test_rsp_requires_wildcard() {
        assert!(rsp_options()
            .run_inner(&["-p", "data", "--rsp", "out.rsp"])
            .is_err());
    }

    #[test]
    fn test_fst_arguments() {
        let options = fst_options()
            .run_inner(&["-p", "data", "--rsp", "in.rsp", "-o", "assets.fst", "--store"])
            .unwrap();
        assert!(options.store);
        assert!(!options.verify);
        assert_eq!(options.output, PathBuf::from("assets.fst"));
        assert_eq!(options.config, None);
        assert_eq!(options.verbosity_level, LevelFilter::INFO);
    }
}
