use env_logger::Builder;
use log::{debug, LevelFilter};
use std::path::PathBuf;
use structopt::StructOpt;

use mscx2notes::error::Error;
use mscx2notes::score::{ParseOptions, Score};

#[derive(Debug, Clone, StructOpt)]
#[structopt(
    name = "mscx2notes",
    about = "Parser for MuseScore3 MSCX files producing structural note tables."
)]
struct CliOpts {
    /// Absolute or relative path to the MSCX file you want to parse.
    #[structopt(name = "FILE", parse(from_os_str))]
    file: PathBuf,
    /// Set logging to one of the levels {DEBUG, INFO, WARNING, ERROR, CRITICAL}.
    #[structopt(short = "l", long = "logging", default_value = "INFO")]
    logging: String,
}

fn level_filter(name: &str) -> Option<LevelFilter> {
    match name.to_ascii_uppercase().as_str() {
        "DEBUG" => Some(LevelFilter::Debug),
        "INFO" => Some(LevelFilter::Info),
        "WARNING" => Some(LevelFilter::Warn),
        "ERROR" => Some(LevelFilter::Error),
        "CRITICAL" => Some(LevelFilter::Error),
        _ => None,
    }
}

fn main() -> Result<(), Error> {
    let cli_opt = CliOpts::from_args();
    let level = match level_filter(&cli_opt.logging) {
        Some(level) => level,
        None => {
            eprintln!(
                "Unknown logging level {:?}, falling back to INFO.",
                cli_opt.logging
            );
            LevelFilter::Info
        }
    };
    Builder::new().filter_level(level).init();

    let score = Score::from_file(&cli_opt.file, ParseOptions::default())?;
    println!("Successfully parsed.");
    for section in &score.sections {
        debug!("{}", section);
    }
    println!(
        "{} measure nodes in {} sections, played as {:?}.",
        score.measures.len(),
        score.sections.len(),
        score.section_order
    );
    Ok(())
}
