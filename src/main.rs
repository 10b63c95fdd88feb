// SPDX-License-Identifier: GPL-3.0-only

use clap::{Parser, Subcommand};

mod cli;

#[derive(Parser)]
#[command(name = "backdrop")]
#[command(about = "Virtual camera with background blur, removal and replacement")]
#[command(version = backdrop::constants::app_info::version())]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List cameras that deliver frames
    List,

    /// Stream a camera to the virtual camera until Ctrl+C
    Stream(cli::StreamArgs),

    /// Read start/stop/status/devices/health commands from stdin
    Console,

    /// Print the effective configuration
    Config,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Set RUST_LOG to control log level
    // Examples: RUST_LOG=debug, RUST_LOG=backdrop=debug, RUST_LOG=info
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(true)
        .with_level(true)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::List => cli::list_cameras(),
        Commands::Stream(args) => cli::stream(args),
        Commands::Console => cli::console(),
        Commands::Config => cli::print_config(),
    }
}
