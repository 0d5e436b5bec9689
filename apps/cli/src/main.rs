mod commands;

use clap::{Parser, Subcommand};
use kiln_ssg::DEFAULT_CONFIG_FILE;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "kiln")]
#[command(about = "A blog-aware static site generator", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Creates a new site scaffold in PATH
    #[command(alias = "n")]
    New { path: PathBuf },

    /// Creates a dated post in the posts directory
    #[command(alias = "p")]
    Newpost {
        name: Option<String>,

        #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
        config: PathBuf,
    },

    /// Builds the site once
    #[command(alias = "b")]
    Build {
        #[arg(short, long)]
        source: Option<PathBuf>,

        #[arg(short, long)]
        destination: Option<PathBuf>,

        #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
        config: PathBuf,
    },

    /// Builds the site, then serves it and rebuilds changed files
    #[command(alias = "s")]
    Serve {
        #[arg(long)]
        open: bool,

        #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::New { path } => commands::new_site(&path),
        Commands::Newpost { name, config } => commands::load_config(&config, None, None)
            .and_then(|config| commands::new_post(&config, name.as_deref()).map(|_| ())),
        Commands::Build {
            source,
            destination,
            config,
        } => commands::load_config(&config, source.as_deref(), destination.as_deref())
            .and_then(|config| commands::build_site(&config).map(|_| ())),
        Commands::Serve { open, config } => match commands::load_config(&config, None, None) {
            Ok(config) => commands::serve_site(config, open).await,
            Err(error) => Err(error),
        },
    };

    if let Err(error) = result {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}
