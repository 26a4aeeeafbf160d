mod commands;

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use commands::{EXIT_FAILURE, EXIT_FETCH_ERROR, EXIT_INPUT_ERROR};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "gemnix",
    version,
    about = "Convert a Bundler Gemfile.lock into a Nix gemset"
)]
struct Cli {
    /// Output results as structured JSON.
    #[arg(long, default_value_t = false, global = true)]
    json: bool,

    /// Enable verbose (debug) logging output.
    #[arg(short, long, default_value_t = false, global = true)]
    verbose: bool,

    /// Enable trace-level logging (more detailed than --verbose).
    #[arg(long, default_value_t = false, global = true)]
    trace: bool,

    /// Only print errors.
    #[arg(short, long, default_value_t = false, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Convert a lockfile into gemset.nix.
    Convert {
        /// Path to the Bundler lockfile.
        #[arg(long, default_value = "Gemfile.lock")]
        lockfile: PathBuf,
        /// Group/platform declarations (defaults to gemnix.toml next to the lockfile).
        #[arg(long)]
        declarations: Option<PathBuf>,
        /// Where to write the gemset.
        #[arg(long, default_value = "gemset.nix")]
        gemset: PathBuf,
        /// Directory of vendored .gem archives; may be repeated.
        #[arg(long = "cache-dir")]
        cache_dirs: Vec<PathBuf>,
        /// Maximum number of concurrent remote fetches.
        #[arg(long, short = 'j')]
        jobs: Option<usize>,
        /// Forbid all remote fetches; every gem must be vendored.
        #[arg(long, default_value_t = false)]
        offline: bool,
        /// Registry used when the lockfile lists no remote.
        #[arg(long)]
        remote: Option<String>,
        /// Per-request HTTP timeout in seconds.
        #[arg(long)]
        timeout: Option<u64>,
        /// Program used to prefetch git sources.
        #[arg(long)]
        prefetch_git: Option<String>,
        /// Ignore hashes recorded in an existing gemset and fetch everything.
        #[arg(long, default_value_t = false)]
        refresh: bool,
    },
    /// Print the reconciled groups and platforms of every gem (no fetching).
    Reconcile {
        /// Path to the Bundler lockfile.
        #[arg(long, default_value = "Gemfile.lock")]
        lockfile: PathBuf,
        /// Group/platform declarations (defaults to gemnix.toml next to the lockfile).
        #[arg(long)]
        declarations: Option<PathBuf>,
    },
    /// Generate shell completions for bash, zsh, fish, elvish, or powershell.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
    /// Generate man pages in the specified directory.
    ManPages {
        /// Output directory for man pages.
        #[arg(default_value = "man")]
        dir: PathBuf,
    },
}

fn main() -> ExitCode {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let msg = info.to_string();
        if msg.contains("Broken pipe")
            || msg.contains("broken pipe")
            || msg.contains("os error 32")
            || msg.contains("failed printing to stdout")
        {
            std::process::exit(0);
        }
        default_hook(info);
    }));

    let cli = Cli::parse();

    let default_level = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else if cli.quiet {
        "error"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("GEMNIX_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();

    let output = commands::Output {
        json: cli.json,
        quiet: cli.quiet,
    };

    let result = match cli.command {
        Commands::Convert {
            lockfile,
            declarations,
            gemset,
            cache_dirs,
            jobs,
            offline,
            remote,
            timeout,
            prefetch_git,
            refresh,
        } => commands::convert::run(
            &commands::convert::ConvertArgs {
                lockfile,
                declarations,
                gemset,
                cache_dirs,
                jobs,
                offline,
                remote,
                timeout,
                prefetch_git,
                refresh,
            },
            output,
        ),
        Commands::Reconcile {
            lockfile,
            declarations,
        } => commands::reconcile::run(&lockfile, declarations.as_deref(), output),
        Commands::Completions { shell } => commands::completions::run::<Cli>(shell),
        Commands::ManPages { dir } => commands::man_pages::run::<Cli>(&dir),
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(msg) => {
            eprintln!("error: {msg}");
            let code = if msg.starts_with("lockfile error:")
                || msg.starts_with("declaration error:")
                || msg.starts_with("reconcile error:")
                || msg.starts_with("platform error:")
            {
                EXIT_INPUT_ERROR
            } else if msg.starts_with("fetch error:") {
                EXIT_FETCH_ERROR
            } else {
                EXIT_FAILURE
            };
            ExitCode::from(code)
        }
    }
}
