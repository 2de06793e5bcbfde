use aptpilot::cli::GlobalOptions;
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use std::time::Instant;
use tracing::Level;

#[derive(Parser)]
#[command(name = "aptpilot")]
#[command(about = "Automated, robust apt mirror selection for Debian, Ubuntu and Linux Mint", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[command(flatten)]
    global: GlobalArgs,

    /// Increase logging verbosity (can be repeated)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Decrease logging verbosity (can be repeated)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    quiet: u8,
}

#[derive(Args)]
struct GlobalArgs {
    /// Exclude mirrors whose URL matches a glob pattern (can be repeated)
    #[arg(short = 'x', long = "exclude", value_name = "PATTERN", global = true)]
    exclude: Vec<String>,

    /// Rank at most this many mirrors (0 means all)
    #[arg(short, long = "max", value_name = "COUNT", global = true)]
    max: Option<usize>,

    /// Number of concurrent mirror probes
    #[arg(long, value_name = "COUNT", global = true)]
    concurrency: Option<usize>,

    /// Also rank the mirrors listed in this file (one URL per line)
    #[arg(short = 'F', long = "mirror-file", value_name = "PATH", global = true)]
    mirror_file: Option<PathBuf>,

    /// Configuration file (defaults to ~/.config/aptpilot/config.toml)
    #[arg(long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the mirror currently configured in the sources list
    Current,

    /// Print the best available mirror
    Best,

    /// Rank the available mirrors
    List {
        /// Width of the URL column
        #[arg(short = 'L', long)]
        url_char_len: Option<usize>,
    },

    /// Change the main mirror
    Change {
        /// Mirror URL to switch to
        #[arg(required_unless_present = "auto", conflicts_with = "auto")]
        url: Option<String>,

        /// Switch to the best available mirror
        #[arg(short, long)]
        auto: bool,

        /// Don't update the package lists afterwards
        #[arg(long)]
        no_update: bool,
    },

    /// Update the package lists, switching mirrors when needed
    Update {
        /// Give up after this many failed attempts
        #[arg(long)]
        max_attempts: Option<u32>,

        /// Never switch mirrors
        #[arg(long)]
        no_switch: bool,
    },

    /// Create a chroot with debootstrap using the best mirror
    Chroot {
        directory: PathBuf,

        /// Release to bootstrap (defaults to the running release)
        #[arg(short = 'C', long)]
        codename: Option<String>,

        /// Target architecture
        #[arg(long)]
        arch: Option<String>,
    },
}

fn log_level(verbose: u8, quiet: u8) -> Level {
    match i16::from(verbose) - i16::from(quiet) {
        i16::MIN..=-2 => Level::ERROR,
        -1 => Level::WARN,
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing
    let level = log_level(cli.verbose, cli.quiet);
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level.as_str())),
        )
        .with_writer(std::io::stderr)
        .init();

    let start = Instant::now();
    let options = GlobalOptions {
        config: cli.global.config,
        exclude: cli.global.exclude,
        max_mirrors: cli.global.max,
        concurrency: cli.global.concurrency,
        mirror_file: cli.global.mirror_file,
    };

    let (result, show_timing) = match cli.command {
        Commands::Current => (aptpilot::cli::current::execute(&options).await, false),
        Commands::Best => (aptpilot::cli::best::execute(&options).await, false),
        Commands::List { url_char_len } => (aptpilot::cli::list::execute(&options, url_char_len).await, false),
        Commands::Change { url, auto: _, no_update } => {
            (aptpilot::cli::change::execute(&options, url, !no_update).await, true)
        }
        Commands::Update {
            max_attempts,
            no_switch,
        } => (aptpilot::cli::update::execute(&options, max_attempts, !no_switch).await, true),
        Commands::Chroot {
            directory,
            codename,
            arch,
        } => (aptpilot::cli::chroot::execute(&options, &directory, codename, arch).await, true),
    };

    match result {
        Ok(_) => {
            if show_timing {
                let elapsed = start.elapsed();
                eprintln!("\n{} Completed in {:.2}s", "✓".green().bold(), elapsed.as_secs_f64());
            }
        }
        Err(e) => {
            eprintln!("{} {}", "✗".red().bold(), e);
            std::process::exit(1);
        }
    }
}
