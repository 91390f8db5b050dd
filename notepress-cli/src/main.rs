//! # notepress CLI
//!
//! Command-line interface for publishing vault notes into a Hugo site.

mod commands;
mod git;
mod hugo;
mod report;

use clap::{Parser, Subcommand, ValueEnum};
use notepress_core::CandidateOrder;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "notepress")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(long, default_value = "notepress.yml", env = "NOTEPRESS_CONFIG")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write an example notepress.yml
    Init {
        /// Target directory (defaults to current directory)
        path: Option<PathBuf>,

        /// Overwrite an existing config
        #[arg(long)]
        force: bool,
    },

    /// Publish flagged notes into the site content tree
    Publish {
        /// Only these notes (file name, stem or vault-relative path)
        #[arg(short, long, num_args = 1..)]
        files: Vec<String>,

        /// Emit every note as a draft
        #[arg(long)]
        draft: bool,

        /// Show what would happen without writing anything
        #[arg(long)]
        dry_run: bool,

        /// Worker threads for preparing notes
        #[arg(short, long)]
        jobs: Option<usize>,

        /// Commit, build and push after publishing
        #[arg(long)]
        deploy: bool,

        /// Commit message used with --deploy
        #[arg(short, long)]
        message: Option<String>,
    },

    /// Remove published notes from the site
    Unpublish {
        /// Notes to remove (file name, stem or vault-relative path)
        files: Vec<String>,

        /// Remove every published note
        #[arg(long, conflicts_with = "files")]
        all: bool,

        /// Also set `publish: false` in the source note
        #[arg(long)]
        clear_flag: bool,

        /// Show what would happen without writing anything
        #[arg(long)]
        dry_run: bool,

        /// Commit, build and push afterwards
        #[arg(long)]
        deploy: bool,

        /// Commit message used with --deploy
        #[arg(short, long)]
        message: Option<String>,
    },

    /// Re-run publishing for notes that are already published
    Republish {
        /// Notes to republish (defaults to every published note)
        files: Vec<String>,

        /// Emit every note as a draft
        #[arg(long)]
        draft: bool,

        /// Show what would happen without writing anything
        #[arg(long)]
        dry_run: bool,

        /// Worker threads for preparing notes
        #[arg(short, long)]
        jobs: Option<usize>,

        /// Commit, build and push afterwards
        #[arg(long)]
        deploy: bool,

        /// Commit message used with --deploy
        #[arg(short, long)]
        message: Option<String>,
    },

    /// List published notes from the ledger
    List {
        /// Emit JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Show notes flagged for publishing and whether they are published
    Status {
        /// Sort order
        #[arg(long, value_enum, default_value_t = SortArg::Mtime)]
        sort: SortArg,

        /// Emit JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Run the Hugo development server
    Preview,

    /// Commit the site, build it and push the generated pages
    Deploy {
        /// Commit message
        #[arg(short, long)]
        message: Option<String>,
    },

    /// Inspect or grow the tag to category map
    Tags {
        #[command(subcommand)]
        command: TagsCommands,
    },

    /// Add images to published posts
    Image {
        #[command(subcommand)]
        command: ImageCommands,
    },
}

#[derive(Subcommand)]
enum ImageCommands {
    /// Copy an image into a published post and link it at the top
    Add {
        /// Published note (file name, stem or vault-relative path)
        post: String,

        /// Image file to copy
        image: PathBuf,

        /// Alt text for the inserted link
        #[arg(long, default_value = "")]
        alt: String,

        /// Show what would happen without writing anything
        #[arg(long)]
        dry_run: bool,
    },
}

#[derive(Subcommand)]
enum TagsCommands {
    /// Learn mappings for unknown tags from already published posts
    Learn {
        /// Report without saving the map
        #[arg(long)]
        dry_run: bool,
    },

    /// Print the map
    Show {
        /// Emit JSON instead of text
        #[arg(long)]
        json: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum SortArg {
    Mtime,
    Title,
    Path,
}

impl From<SortArg> for CandidateOrder {
    fn from(sort: SortArg) -> Self {
        match sort {
            SortArg::Mtime => CandidateOrder::Modified,
            SortArg::Title => CandidateOrder::Title,
            SortArg::Path => CandidateOrder::Path,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing; stdout stays free for command output
    let subscriber = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(if cli.verbose {
                tracing::Level::DEBUG.into()
            } else {
                tracing::Level::INFO.into()
            }),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Init { path, force } => commands::init_config(path.as_deref(), force),
        Commands::Publish {
            files,
            draft,
            dry_run,
            jobs,
            deploy,
            message,
        } => {
            let opts = commands::RunOptions {
                draft,
                dry_run,
                jobs,
                deploy,
                message,
            };
            commands::publish(&cli.config, &files, opts).await
        }
        Commands::Unpublish {
            files,
            all,
            clear_flag,
            dry_run,
            deploy,
            message,
        } => {
            let opts = commands::RunOptions {
                draft: false,
                dry_run,
                jobs: None,
                deploy,
                message,
            };
            commands::unpublish(&cli.config, &files, all, clear_flag, opts).await
        }
        Commands::Republish {
            files,
            draft,
            dry_run,
            jobs,
            deploy,
            message,
        } => {
            let opts = commands::RunOptions {
                draft,
                dry_run,
                jobs,
                deploy,
                message,
            };
            commands::republish(&cli.config, &files, opts).await
        }
        Commands::List { json } => commands::list_published(&cli.config, json),
        Commands::Status { sort, json } => commands::show_status(&cli.config, sort.into(), json),
        Commands::Preview => commands::preview(&cli.config).await,
        Commands::Deploy { message } => commands::deploy_site(&cli.config, message.as_deref()).await,
        Commands::Tags { command } => match command {
            TagsCommands::Learn { dry_run } => commands::learn_tags(&cli.config, dry_run),
            TagsCommands::Show { json } => commands::show_tags(&cli.config, json),
        },
        Commands::Image { command } => match command {
            ImageCommands::Add {
                post,
                image,
                alt,
                dry_run,
            } => commands::add_image(&cli.config, &post, &image, &alt, dry_run),
        },
    }
}
