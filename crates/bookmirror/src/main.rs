use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use bookmirror_core::api::{ApiError, BookStackClient, BookStackClientConfig};
use bookmirror_core::catalog::{Catalog, CatalogOptions, build_catalog};
use bookmirror_core::config::{
    ExportFormat, ExportLevel, MirrorConfig, load_config, load_token, parse_header,
};
use bookmirror_core::export::{ExportOptions, run_export};
use bookmirror_core::hierarchy::Hierarchy;
use bookmirror_core::runtime::{
    PathOverrides, ResolutionContext, ResolvedPaths, ensure_dir, normalize_for_display,
    resolve_config_path, resolve_paths,
};
use clap::{Args, CommandFactory, Parser, Subcommand};
use log::{error, info};

#[derive(Debug, Parser)]
#[command(
    name = "bookmirror",
    version,
    disable_version_flag = true,
    about = "Mirror a BookStack wiki into a local folder tree"
)]
struct Cli {
    #[arg(long, global = true, value_name = "PATH", help = "Config file (bookmirror.toml)")]
    config: Option<PathBuf>,
    #[arg(long, global = true, help = "Print resolved runtime diagnostics")]
    diagnostics: bool,
    #[arg(
        short = 'V',
        long,
        global = true,
        default_value = "info",
        value_parser = ["debug", "info", "warning", "error"],
        help = "Verbosity level"
    )]
    log_level: String,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Export shelves, books, chapters and pages to disk")]
    Export(ExportArgs),
    #[command(about = "Print the remote content tree without writing files")]
    Tree(TreeArgs),
}

#[derive(Debug, Args)]
struct RemoteArgs {
    #[arg(short = 'H', long, value_name = "URL", help = "Wiki address, e.g. https://wiki.example.org")]
    host: Option<String>,
    #[arg(
        short = 't',
        long,
        value_name = "PATH",
        help = "File holding TOKEN_ID:TOKEN_SECRET on its first line"
    )]
    token_file: Option<PathBuf>,
    #[arg(long, value_name = "N", help = "Maximum API requests per minute, 0 disables")]
    rate_limit: Option<usize>,
    #[arg(long = "header", value_name = "NAME: VALUE", help = "Extra header sent with API requests")]
    headers: Vec<String>,
}

#[derive(Debug, Args)]
struct ExportArgs {
    #[command(flatten)]
    remote: RemoteArgs,
    #[arg(short = 'p', long, value_name = "PATH", help = "Where to put exported files")]
    path: Option<PathBuf>,
    #[arg(
        short = 'f',
        long,
        value_name = "FORMAT",
        num_args = 1..,
        value_delimiter = ',',
        value_parser = parse_format,
        help = "markdown, plaintext, pdf, html, zip"
    )]
    formats: Vec<ExportFormat>,
    #[arg(
        short = 'l',
        long = "level",
        value_name = "LEVEL",
        num_args = 1..,
        value_delimiter = ',',
        value_parser = parse_level,
        help = "pages, chapters, books"
    )]
    levels: Vec<ExportLevel>,
    #[arg(long, help = "Rewrite files even when they are up to date")]
    force_update_files: bool,
    #[arg(long, value_name = "CHARS", help = "Characters replaced with '_' in file names")]
    forbidden_chars: Option<String>,
    #[arg(long, help = "Export page attachments")]
    attachments: bool,
    #[arg(long, help = "Export gallery images")]
    images: bool,
    #[arg(long, help = "Do not download attachments that link to external URLs")]
    no_external_attachments: bool,
    #[arg(long, help = "Log and continue past attachments or images that fail to download")]
    skip_broken_links: bool,
    #[arg(long, value_name = "DIR", help = "Images directory below the export path")]
    images_dir: Option<String>,
    #[arg(long, help = "Point markdown image links at the local images directory")]
    markdown_images: bool,
}

#[derive(Debug, Args)]
struct TreeArgs {
    #[command(flatten)]
    remote: RemoteArgs,
    #[arg(long, help = "Include attachments")]
    attachments: bool,
    #[arg(long, help = "Include gallery images")]
    images: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    dotenvy::dotenv().ok();
    init_logging(&cli.log_level);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            error!("{error:#}");
            let forbidden = error
                .chain()
                .find_map(|cause| match cause.downcast_ref::<ApiError>() {
                    Some(ApiError::Forbidden { status, .. }) => Some(*status),
                    _ => None,
                });
            match forbidden {
                Some(status) => std::process::exit(i32::from(status)),
                None => ExitCode::FAILURE,
            }
        }
    }
}

fn init_logging(level: &str) {
    let level = match level {
        "warning" => "warn",
        other => other,
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();
}

fn run(cli: Cli) -> Result<()> {
    let context = ResolutionContext::from_process()?;

    match cli.command {
        Some(Commands::Export(args)) => run_export_command(&context, cli.config, cli.diagnostics, args),
        Some(Commands::Tree(args)) => run_tree(&context, cli.config, cli.diagnostics, args),
        None => {
            let mut command = Cli::command();
            command.print_help()?;
            println!();
            Ok(())
        }
    }
}

fn run_export_command(
    context: &ResolutionContext,
    config: Option<PathBuf>,
    diagnostics: bool,
    args: ExportArgs,
) -> Result<()> {
    let overrides = PathOverrides {
        output_root: args.path.clone(),
        config,
        token_file: args.remote.token_file.clone(),
        images_dir: args.images_dir.clone(),
    };
    let mut config = load_runtime_config(context, &overrides)?;
    apply_export_overrides(&mut config, &args);
    let paths = resolve_paths(context, &overrides, &config)?;

    let mut client = connect(&config, &paths, &args.remote)?;
    let options = ExportOptions {
        formats: config.formats(),
        levels: config.levels(),
        force: config.export.force,
        attachments: config.export.attachments,
        images: config.export.images,
        external_attachments: config.external_attachments(),
        skip_broken_links: config.export.skip_broken_links,
        markdown_images: config.export.markdown_images,
        host: resolve_host(&config, &args.remote),
    };

    ensure_dir(&paths.output_root)?;
    let catalog = build_catalog(
        &mut client,
        Hierarchy::new(&config.forbidden_chars()),
        &CatalogOptions {
            include_attachments: options.attachments,
            include_images: options.images,
        },
    )?;
    info!("Beginning files export...");
    let report = run_export(&mut client, &catalog, &paths, &options)?;

    println!("export complete");
    println!("output_root: {}", normalize_for_display(&paths.output_root));
    println!("host: {}", options.host);
    println!(
        "formats: {}",
        options
            .formats
            .iter()
            .map(|format| format.as_str())
            .collect::<Vec<_>>()
            .join(",")
    );
    println!(
        "levels: {}",
        options
            .levels
            .iter()
            .map(|level| level.as_str())
            .collect::<Vec<_>>()
            .join(",")
    );
    println!("written: {}", report.written);
    println!("skipped_up_to_date: {}", report.skipped);
    println!("attachments_written: {}", report.attachments_written);
    println!("images_written: {}", report.images_written);
    println!("skipped_external: {}", report.skipped_external);
    println!("created_dirs: {}", report.created_dirs);
    println!("requests: {}", report.request_count);
    if !report.broken_links.is_empty() {
        println!("broken_links:");
        for link in &report.broken_links {
            println!("  - {link}");
        }
    }
    if diagnostics {
        println!("\n[diagnostics]\n{}", paths.diagnostics());
    }
    Ok(())
}

fn run_tree(
    context: &ResolutionContext,
    config: Option<PathBuf>,
    diagnostics: bool,
    args: TreeArgs,
) -> Result<()> {
    let overrides = PathOverrides {
        config,
        token_file: args.remote.token_file.clone(),
        ..PathOverrides::default()
    };
    let config = load_runtime_config(context, &overrides)?;
    let paths = resolve_paths(context, &overrides, &config)?;

    let mut client = connect(&config, &paths, &args.remote)?;
    let catalog = build_catalog(
        &mut client,
        Hierarchy::new(&config.forbidden_chars()),
        &CatalogOptions {
            include_attachments: args.attachments || config.export.attachments,
            include_images: args.images || config.export.images,
        },
    )?;
    print_tree(&catalog);
    if diagnostics {
        println!("\n[diagnostics]\n{}", paths.diagnostics());
    }
    Ok(())
}

fn print_tree(catalog: &Catalog) {
    for line in catalog.outline() {
        println!("{line}");
    }
    let stats = catalog.stats();
    println!();
    println!("shelves: {}", stats.shelves);
    println!("books: {}", stats.books);
    println!("books_without_shelf: {}", stats.orphan_books);
    println!("chapters: {}", stats.chapters);
    println!("pages: {}", stats.pages);
    println!("pages_not_in_chapter: {}", stats.pages_not_in_chapter);
    println!("attachments: {}", stats.attachments);
    println!("orphaned_attachments: {}", stats.orphaned_attachments);
    println!("images: {}", stats.images);
}

fn load_runtime_config(
    context: &ResolutionContext,
    overrides: &PathOverrides,
) -> Result<MirrorConfig> {
    let (config_path, source) = resolve_config_path(context, overrides);
    info!(
        "Using config {} ({})",
        normalize_for_display(&config_path),
        source.as_str()
    );
    load_config(&config_path)
}

fn apply_export_overrides(config: &mut MirrorConfig, args: &ExportArgs) {
    if !args.formats.is_empty() {
        config.export.formats = args.formats.clone();
    }
    if !args.levels.is_empty() {
        config.export.levels = args.levels.clone();
    }
    if args.forbidden_chars.is_some() {
        config.export.forbidden_chars = args.forbidden_chars.clone();
    }
    config.export.force |= args.force_update_files;
    config.export.attachments |= args.attachments;
    config.export.images |= args.images;
    config.export.skip_broken_links |= args.skip_broken_links;
    config.export.markdown_images |= args.markdown_images;
    if args.no_external_attachments {
        config.export.external_attachments = Some(false);
    }
}

/// Host resolution: flag > env > config > default.
fn resolve_host(config: &MirrorConfig, remote: &RemoteArgs) -> String {
    match remote.host.as_deref() {
        Some(host) => host.trim_end_matches('/').to_string(),
        None => config.host(),
    }
}

fn connect(
    config: &MirrorConfig,
    paths: &ResolvedPaths,
    remote: &RemoteArgs,
) -> Result<BookStackClient> {
    let token = load_token(&paths.token_path)?;
    let mut client_config = BookStackClientConfig::from_config(config, token);
    client_config.host = resolve_host(config, remote);
    if let Some(rate_limit) = remote.rate_limit {
        client_config.rate_limit = rate_limit;
    }
    for header in &remote.headers {
        client_config.extra_headers.push(parse_header(header)?);
    }
    info!(
        "Connecting to {} (rate limit {} requests/min)",
        client_config.api_prefix(),
        client_config.rate_limit
    );
    BookStackClient::new(client_config)
}

fn parse_format(value: &str) -> Result<ExportFormat, String> {
    ExportFormat::parse(value).map_err(|error| error.to_string())
}

fn parse_level(value: &str) -> Result<ExportLevel, String> {
    ExportLevel::parse(value).map_err(|error| error.to_string())
}
