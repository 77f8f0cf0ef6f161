//! Chartyard CLI - chart repository sync and release reconciliation

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use chartyard_core::ChartyardConfig;
use chartyard_release::{MOCK_HELM_SENTINEL, mock_helm};

mod commands;
mod error;
mod exit_codes;

use error::{CliError, Result};

#[derive(Parser)]
#[command(name = "chartyard")]
#[command(author = "Chartyard Contributors")]
#[command(version)]
#[command(about = "Chart repository sync and release reconciliation", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug output
    #[arg(long, global = true)]
    debug: bool,

    /// Path to configuration file
    #[arg(long, global = true, env = "CHARTYARD_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Chart repository operations
    Repo {
        #[command(subcommand)]
        command: RepoCommands,
    },

    /// Release operations
    Release {
        #[command(subcommand)]
        command: ReleaseCommands,
    },
}

#[derive(Subcommand)]
enum RepoCommands {
    /// Fetch a repository index and merge it into a snapshot file
    Sync {
        /// Repository URL (http, https or s3)
        #[arg(long)]
        url: String,

        /// Repository name
        #[arg(long, default_value = "default")]
        name: String,

        /// Snapshot file to merge into and update
        #[arg(long)]
        snapshot: Option<PathBuf>,

        /// Basic auth user, or access key id for S3
        #[arg(long)]
        username: Option<String>,

        /// Basic auth password, or secret access key for S3
        #[arg(long)]
        password: Option<String>,

        /// CA bundle used to verify the server
        #[arg(long)]
        ca_file: Option<PathBuf>,

        /// Client certificate
        #[arg(long)]
        cert_file: Option<PathBuf>,

        /// Client private key
        #[arg(long)]
        key_file: Option<PathBuf>,

        /// Skip server certificate verification
        #[arg(long)]
        insecure_skip_tls_verify: bool,
    },

    /// List the applications in a snapshot file
    Show {
        /// Snapshot file
        #[arg(long)]
        snapshot: PathBuf,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum ReleaseCommands {
    /// Dry-run install of a chart archive and print the labelled manifest
    Render {
        /// Release name
        name: String,

        /// Chart archive
        chart: PathBuf,

        /// Target namespace
        #[arg(short, long, default_value = "default")]
        namespace: String,

        /// Values file
        #[arg(short = 'f', long = "values")]
        values: Option<PathBuf>,

        /// Use the built-in mock package manager
        #[arg(long)]
        mock: bool,
    },
}

fn init_tracing(debug: bool) {
    let default = if debug { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn load_config(path: Option<&std::path::Path>) -> Result<ChartyardConfig> {
    Ok(match path {
        Some(path) => ChartyardConfig::load_from(path)?,
        None => ChartyardConfig::load()?,
    })
}

async fn run(cli: Cli) -> Result<()> {
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Repo { command } => match command {
            RepoCommands::Sync {
                url,
                name,
                snapshot,
                username,
                password,
                ca_file,
                cert_file,
                key_file,
                insecure_skip_tls_verify,
            } => {
                let credentials = commands::repo::CredentialArgs {
                    username,
                    password,
                    ca_file,
                    cert_file,
                    key_file,
                    insecure_skip_tls_verify,
                };
                commands::repo::sync(&name, &url, snapshot.as_deref(), credentials, &config.sync)
                    .await
            }
            RepoCommands::Show { snapshot, json } => commands::repo::show(&snapshot, json),
        },

        Commands::Release { command } => match command {
            ReleaseCommands::Render {
                name,
                chart,
                namespace,
                values,
                mock,
            } => {
                commands::release::render(
                    commands::release::RenderArgs {
                        name: &name,
                        namespace: &namespace,
                        chart: &chart,
                        values: values.as_deref(),
                        mock,
                        debug: cli.debug,
                    },
                    &config,
                )
                .await
            }
        },
    }
}

/// Behave as the mock package manager when re-executed with the sentinel
fn mock_helm_mode() -> Option<i32> {
    let mut args = std::env::args().skip(1);
    if args.next().as_deref() != Some(MOCK_HELM_SENTINEL) {
        return None;
    }
    let rest: Vec<String> = args.collect();
    let output = mock_helm(&rest);
    print!("{}", output.stdout);
    eprint!("{}", output.stderr);
    Some(output.exit_code.unwrap_or(exit_codes::ERROR))
}

fn main() {
    if let Some(code) = mock_helm_mode() {
        std::process::exit(code);
    }

    // Setup miette for nice error display
    miette::set_panic_hook();

    let cli = Cli::parse();
    init_tracing(cli.debug);

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("{:?}", miette::Report::new(CliError::internal(e.to_string())));
            std::process::exit(exit_codes::ERROR);
        }
    };

    if let Err(err) = runtime.block_on(run(cli)) {
        let code = err.exit_code();
        eprintln!("{:?}", miette::Report::new(err));
        std::process::exit(code);
    }
}
