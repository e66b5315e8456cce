#[cfg(not(feature = "cli"))]
compile_error!("The `ibdscan` binary requires the `cli` feature. Build with `--features cli`.");

use clap::Parser;
use std::fs::File;
use std::io::Write;
use std::process;

use ibd::cli;
use ibd::cli::app::{Cli, ColorMode, Commands};
use ibd::cli::OpenOptions;
use ibd::IdbError;
use tracing_subscriber::EnvFilter;

fn init_logging(verbose: bool) {
    let default = if verbose { "ibd=debug" } else { "ibd=warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.color {
        ColorMode::Always => colored::control::set_override(true),
        ColorMode::Never => colored::control::set_override(false),
        ColorMode::Auto => {} // colored auto-detects tty
    }

    let to_file = cli.output.is_some();
    let writer_result: Result<Box<dyn Write>, IdbError> = match &cli.output {
        Some(path) => File::create(path)
            .map(|f| Box::new(f) as Box<dyn Write>)
            .map_err(|e| IdbError::Io(format!("Cannot create {}: {}", path, e))),
        None => Ok(Box::new(std::io::stdout()) as Box<dyn Write>),
    };

    let mut writer = match writer_result {
        Ok(w) => w,
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    };

    let open = |page_size: Option<u32>| OpenOptions {
        page_size,
        mmap: cli.mmap,
        cache_pages: cli.cache_pages,
    };

    let result = match cli.command {
        Commands::Pages {
            file,
            page,
            show_empty,
            hex,
            json,
            page_size,
        } => cli::pages::execute(
            &cli::pages::PagesOptions {
                file,
                page,
                show_empty,
                hex,
                json,
                open: open(page_size),
            },
            &mut writer,
        ),

        Commands::Check {
            file,
            errors_only,
            json,
            page_size,
        } => cli::check::execute(
            &cli::check::CheckOptions {
                file,
                errors_only,
                json,
                progress: !json || to_file,
                open: open(page_size),
            },
            &mut writer,
        ),

        Commands::Scan {
            file,
            schema,
            root,
            deleted,
            system_columns,
            no_resolve,
            no_verify,
            forensic,
            limit,
            json,
            page_size,
        } => cli::scan::execute(
            &cli::scan::ScanOptions {
                file,
                schema,
                root,
                deleted,
                system_columns,
                no_resolve,
                no_verify,
                forensic,
                limit,
                json,
                open: open(page_size),
            },
            &mut writer,
        ),

        Commands::Seek {
            file,
            schema,
            root,
            key,
            count,
            json,
            page_size,
        } => cli::seek::execute(
            &cli::seek::SeekOptions {
                file,
                schema,
                root,
                key,
                count,
                json,
                open: open(page_size),
            },
            &mut writer,
        ),

        Commands::Schema {
            file,
            raw,
            json,
            page_size,
        } => cli::schema::execute(
            &cli::schema::SchemaOptions {
                file,
                raw,
                json,
                open: open(page_size),
            },
            &mut writer,
        ),
    };

    if let Err(e) = writer.flush() {
        eprintln!("Error: {}", e);
        process::exit(1);
    }

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}
