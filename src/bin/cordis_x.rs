use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use cordis_explorer::app::{App, LoadOptions, LoadResult};
use cordis_explorer::error::ExplorerError;
use cordis_explorer::export::{EXPORT_FILENAME, ExportDelimiter};
use cordis_explorer::fetch::HttpArchiveClient;
use cordis_explorer::filter::{ALL, FilterSelection};
use cordis_explorer::output::{JsonOutput, OutputMode};
use cordis_explorer::session::Session;
use cordis_explorer::tui::Explorer;

#[derive(Parser)]
#[command(name = "cordis-x")]
#[command(about = "Explore links between Horizon Europe projects and their publications")]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true)]
    non_interactive: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Download both datasets, aggregate and join them")]
    Fetch(FetchArgs),
    #[command(about = "Fetch, filter the combined table and print matches")]
    Show(FilterArgs),
    #[command(about = "Fetch, filter and export the result to a delimited file")]
    Export(ExportArgs),
}

#[derive(Args, Clone)]
struct FetchArgs {
    #[arg(long)]
    force: bool,
}

#[derive(Args, Clone)]
struct FilterArgs {
    #[arg(long, default_value = ALL)]
    acronym: String,

    #[arg(long, default_value = ALL)]
    organization: String,

    #[arg(long, default_value = "")]
    project_id: String,
}

impl FilterArgs {
    fn selection(&self) -> FilterSelection {
        FilterSelection {
            acronym: self.acronym.clone(),
            organization: self.organization.clone(),
            project_id: self.project_id.clone(),
        }
    }
}

#[derive(Args, Clone)]
struct ExportArgs {
    #[command(flatten)]
    filters: FilterArgs,

    #[arg(long, default_value = EXPORT_FILENAME)]
    output: Utf8PathBuf,

    #[arg(long, value_enum, default_value_t = ExportDelimiter::Comma)]
    delimiter: ExportDelimiter,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(explorer) = report.downcast_ref::<ExplorerError>() {
            return ExitCode::from(map_exit_code(explorer));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &ExplorerError) -> u8 {
    match error {
        ExplorerError::FetchHttp(_)
        | ExplorerError::FetchStatus { .. }
        | ExplorerError::ArchiveRead(_) => 3,
        ExplorerError::NothingLoaded => 2,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.non_interactive {
        OutputMode::NonInteractive
    } else {
        OutputMode::Interactive
    };

    let client = HttpArchiveClient::new().into_diagnostic()?;
    let app = App::new(client);

    match cli.command {
        Some(Commands::Fetch(args)) => run_fetch(args, app, output_mode),
        Some(Commands::Show(args)) => run_show(args, app, output_mode),
        Some(Commands::Export(args)) => run_export(args, app, output_mode),
        None => Explorer::new(app).run(),
    }
}

fn run_fetch(args: FetchArgs, app: App<HttpArchiveClient>, mode: OutputMode) -> miette::Result<()> {
    let mut session = Session::default();
    let result = app
        .load(&mut session, LoadOptions { force: args.force }, &JsonOutput)
        .into_diagnostic()?;

    match mode {
        OutputMode::NonInteractive => JsonOutput::print_load(&result).into_diagnostic()?,
        OutputMode::Interactive => print_load_summary(&result),
    }
    Ok(())
}

fn run_show(args: FilterArgs, app: App<HttpArchiveClient>, mode: OutputMode) -> miette::Result<()> {
    let mut session = Session::default();
    app.load(&mut session, LoadOptions::default(), &JsonOutput)
        .into_diagnostic()?;

    let result = app
        .filter_view(&session, &args.selection())
        .into_diagnostic()?;

    match mode {
        OutputMode::NonInteractive => JsonOutput::print_filter(&result).into_diagnostic()?,
        OutputMode::Interactive => {
            println!("{} matching publications", result.matched);
            for row in &result.preview {
                println!("{}", row.join(";"));
            }
        }
    }
    Ok(())
}

fn run_export(args: ExportArgs, app: App<HttpArchiveClient>, mode: OutputMode) -> miette::Result<()> {
    let mut session = Session::default();
    app.load(&mut session, LoadOptions::default(), &JsonOutput)
        .into_diagnostic()?;

    let result = app
        .export(
            &session,
            &args.filters.selection(),
            &args.output,
            args.delimiter,
            &JsonOutput,
        )
        .into_diagnostic()?;

    match mode {
        OutputMode::NonInteractive => JsonOutput::print_export(&result).into_diagnostic()?,
        OutputMode::Interactive => println!("exported {} rows to {}", result.rows, result.path),
    }
    Ok(())
}

fn print_load_summary(result: &LoadResult) {
    println!("data loaded at {}", result.fetched_at);
    for source in &result.sources {
        match source.rows {
            Some(rows) => println!("  {} ({}): {rows} rows", source.url, source.action),
            None => println!("  {} ({}): no tabular entry", source.url, source.action),
        }
    }
    if let Some(note) = &result.aggregation_note {
        println!("  aggregation skipped: {note}");
    }
    match (&result.combined_rows, &result.merge_note) {
        (Some(rows), _) => println!("  combined publications: {rows}"),
        (None, Some(note)) => println!("  merge skipped: {note}"),
        (None, None) => {}
    }
}
