//! kemi-pv CLI entry point.

mod cli;

use std::io::Write;
use std::path::{Path, PathBuf};

use clap::Parser;
use cli::{Cli, Command};
use kemi_analyzer::analysis::extractor::extract_pv_occurrences;
use kemi_analyzer::diagnostics::{is_error, write_diagnostic};
use kemi_analyzer::{AnalysisHost, Config};
use kemi_front::{Document, uri_to_path};
use tracing_subscriber::EnvFilter;

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.log_level.as_deref());

    match cli.command {
        Command::Check { config, paths } => {
            let config = match config.as_deref().map(Config::load).transpose() {
                Ok(config) => config.unwrap_or_default(),
                Err(e) => {
                    eprintln!("Error: {e}");
                    std::process::exit(2);
                }
            };
            match check(config, &paths) {
                Ok(false) => {}
                Ok(true) => std::process::exit(1),
                Err(e) => {
                    eprintln!("Error: {e}");
                    std::process::exit(2);
                }
            }
        }
        Command::Pvs { file } => {
            if let Err(e) = list_pvs(&file) {
                eprintln!("Error: {e}");
                std::process::exit(2);
            }
        }
    }
}

fn init_tracing(level: Option<&str>) {
    let filter = match level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_env("KEMI_PV_LOG").unwrap_or_else(|_| EnvFilter::new("warn")),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Index `paths` and print every diagnostic. Returns whether any was an error.
fn check(config: Config, paths: &[PathBuf]) -> Result<bool, Box<dyn std::error::Error>> {
    let mut host = AnalysisHost::new(config)?;
    for path in paths {
        if path.is_dir() {
            host.add_root(path);
        }
    }
    host.enqueue_paths(paths);
    host.index_all(|_| {});

    let mut stdout = std::io::stdout().lock();
    let mut errors = 0;
    let mut warnings = 0;
    for uri in host.documents().uris() {
        let Some(document) = host.document(&uri) else {
            continue;
        };
        let display = uri_to_path(&uri)
            .map(|path| path.display().to_string())
            .unwrap_or_else(|| uri.clone());
        for diagnostic in host.diagnostics(&uri) {
            if is_error(&diagnostic) {
                errors += 1;
            } else {
                warnings += 1;
            }
            write_diagnostic(&mut stdout, &diagnostic, &document, &display, true)?;
        }
    }
    writeln!(
        stdout,
        "{} file(s) checked: {errors} error(s), {warnings} warning(s)",
        host.documents().len()
    )?;
    Ok(errors > 0)
}

fn list_pvs(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let text = std::fs::read_to_string(path)?;
    let uri = kemi_front::path_to_uri(path);
    let document = Document::parse(&uri, &text, 0)?;
    let source = document.source();

    let mut stdout = std::io::stdout().lock();
    for occurrence in extract_pv_occurrences(&document, &source) {
        let start = occurrence.range.start;
        writeln!(
            stdout,
            "{}:{}\t{}\t{}\t{}\t{}",
            start.line + 1,
            start.character + 1,
            if occurrence.is_write { "write" } else { "read" },
            occurrence.identity_key(),
            occurrence.method,
            occurrence.pv.full_match,
        )?;
    }
    Ok(())
}
