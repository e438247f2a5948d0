use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use miette::{IntoDiagnostic, Result};
use tracing_subscriber::EnvFilter;

use atlas_core::{AtlasError, OutputFormat, CONFIG_FILE_NAME};
use atlas_repomap::search::SearchOptions;
use atlas_repomap::{RepoMapRequest, RepoMapper};

#[derive(Parser)]
#[command(
    name = "atlas",
    version,
    about = "Token-budgeted, relevance-ranked repository maps",
    long_about = "Atlas summarizes a repository as a ranked map of its most important definitions,\n\
                   fitted to a token budget so it can be handed to a coding agent.\n\n\
                   Examples:\n  \
                     atlas map                          Map the current directory\n  \
                     atlas map --chat src/lib.rs        Map around a file you are editing\n  \
                     atlas search connect               Find where an identifier lives\n  \
                     atlas mcp --root /my/project       Serve both tools over MCP"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Output format: text or json
    #[arg(long, global = true, default_value = "text")]
    format: OutputFormat,

    /// Enable debug logging on stderr (RUST_LOG overrides)
    #[arg(long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Generate a ranked repository map
    #[command(long_about = "Generate a ranked repository map.\n\n\
        Extracts definitions and references with tree-sitter, ranks files with\n\
        personalized PageRank, and renders the best definitions within the budget.\n\n\
        Examples:\n  atlas map --tokens 1024\n  atlas map --chat src/main.rs --mention-ident parse_config")]
    Map {
        /// Project root (default: current directory)
        #[arg(long, default_value = ".")]
        root: PathBuf,

        /// Files already in context; boosted and left out of the map
        #[arg(long = "chat")]
        chat: Vec<String>,

        /// Files to consider (default: scan the whole root)
        #[arg(long = "file")]
        files: Vec<String>,

        /// Token budget (default: from .atlas.toml, else 2048)
        #[arg(long)]
        tokens: Option<usize>,

        /// Leave out definitions that nothing references
        #[arg(long)]
        exclude_unranked: bool,

        /// Ignore cached tags and maps
        #[arg(long)]
        refresh: bool,

        /// Files mentioned in conversation (mid-level boost)
        #[arg(long = "mention-file")]
        mention_files: Vec<String>,

        /// Identifiers mentioned in conversation
        #[arg(long = "mention-ident")]
        mention_idents: Vec<String>,

        /// Context window of the consuming model; widens the budget without chat files
        #[arg(long)]
        max_context_window: Option<usize>,
    },
    /// Search identifiers by name
    #[command(long_about = "Search identifiers by name.\n\n\
        Matches are case-insensitive substrings. Definitions are listed before\n\
        references, each with a few lines of surrounding source.\n\n\
        Examples:\n  atlas search connect\n  atlas search Config --no-refs --context-lines 4")]
    Search {
        /// Identifier or fragment to look for
        query: String,

        /// Project root (default: current directory)
        #[arg(long, default_value = ".")]
        root: PathBuf,

        /// Maximum results (default: 50)
        #[arg(long, default_value = "50")]
        max_results: usize,

        /// Lines of context around each hit (default: 2)
        #[arg(long, default_value = "2")]
        context_lines: u32,

        /// Skip definitions
        #[arg(long)]
        no_defs: bool,

        /// Skip references
        #[arg(long)]
        no_refs: bool,
    },
    /// Start the MCP server on stdio
    #[command(long_about = "Start the MCP (Model Context Protocol) server on stdio.\n\n\
        Exposes repo_map and search_identifiers to coding agents and IDEs.\n\
        Logs go to stderr so stdout carries only protocol traffic.\n\n\
        Example:\n  atlas mcp --root /my/project")]
    Mcp {
        /// Root used when a request gives no project_root (default: current directory)
        #[arg(long, default_value = ".")]
        root: PathBuf,
    },
    /// Create a default .atlas.toml in the project root
    Init {
        /// Project root (default: current directory)
        #[arg(long, default_value = ".")]
        root: PathBuf,
    },
}

const DEFAULT_CONFIG: &str = r#"# Atlas configuration

[map]
# token_limit = 2048
# map_mul_no_files = 8
# context_window_padding = 4096
# max_line_length = 100
# include_important_files = true

[ranking]
# damping = 0.85
# max_iterations = 100
# tolerance = 1e-9
# chat_prior = 100.0
# mentioned_prior = 10.0
# other_prior = 1.0
# rare_boost = 2.0
# noisy_dampen = 0.1
# noisy_max_len = 2
# widely_defined_threshold = 5
# mentioned_ident_boost = 10.0
# self_loop_factor = 0.1

[files]
# max_file_size = 1048576
# binary_check_bytes = 8192
# skip_dirs = ["node_modules", "__pycache__", "venv", "env", "target"]

[cache]
# enabled = true
# dir = ".atlas"
"#;

fn init_tracing(debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn open_mapper(root: &Path) -> Result<RepoMapper> {
    RepoMapper::open(root).map_err(|e| match e {
        AtlasError::FileNotFound(path) => miette::miette!(
            help = "pass an existing directory with --root",
            "project root directory not found: {}",
            path.display()
        ),
        other => other.into(),
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .build(),
        )
    }))
    .into_diagnostic()?;
    human_panic::setup_panic!();

    let cli = Cli::parse();
    init_tracing(cli.debug);

    match cli.command {
        Command::Map {
            ref root,
            ref chat,
            ref files,
            tokens,
            exclude_unranked,
            refresh,
            ref mention_files,
            ref mention_idents,
            max_context_window,
        } => {
            let mapper = open_mapper(root)?;
            let request = RepoMapRequest {
                chat_files: chat.clone(),
                other_files: files.clone(),
                token_limit: tokens,
                exclude_unranked,
                force_refresh: refresh,
                mentioned_files: mention_files.clone(),
                mentioned_idents: mention_idents.clone(),
                max_context_window,
            };
            let output = tokio::task::spawn_blocking(move || mapper.repo_map(&request))
                .await
                .into_diagnostic()??;

            match cli.format {
                OutputFormat::Json => {
                    println!(
                        "{}",
                        serde_json::to_string_pretty(&output).into_diagnostic()?
                    );
                }
                OutputFormat::Text => {
                    println!("{}", output.map.trim_end());
                    if output.report.over_budget {
                        tracing::warn!(
                            tokens = output.report.map_tokens,
                            "map exceeds the token budget; showing the smallest map"
                        );
                    }
                }
            }
        }
        Command::Search {
            ref query,
            ref root,
            max_results,
            context_lines,
            no_defs,
            no_refs,
        } => {
            let mapper = open_mapper(root)?;
            let options = SearchOptions {
                max_results,
                context_lines,
                include_definitions: !no_defs,
                include_references: !no_refs,
            };
            let query = query.clone();
            let results =
                tokio::task::spawn_blocking(move || mapper.search_identifiers(&query, &options))
                    .await
                    .into_diagnostic()??;

            match cli.format {
                OutputFormat::Json => {
                    println!(
                        "{}",
                        serde_json::to_string_pretty(&serde_json::json!({ "results": results }))
                            .into_diagnostic()?
                    );
                }
                OutputFormat::Text => {
                    if results.is_empty() {
                        println!("No matches.");
                    }
                    for hit in &results {
                        println!("{}:{} {} {}", hit.file, hit.line, hit.kind, hit.name);
                        println!("{}", hit.context);
                    }
                }
            }
        }
        Command::Mcp { ref root } => {
            let root = atlas_repomap::canonical_root(root)?;
            atlas_mcp::server::run_server(root).await?;
        }
        Command::Init { ref root } => {
            let path = root.join(CONFIG_FILE_NAME);
            if path.exists() {
                miette::bail!("{} already exists", path.display());
            }
            std::fs::write(&path, DEFAULT_CONFIG).into_diagnostic()?;
            println!("Created {}", path.display());
        }
    }

    Ok(())
}
