use clap::{Parser, Subcommand};

mod connect;
mod listen;

/// Scalability-protocol WebSocket handshake tool
///
/// Runs opening handshakes against real peers and prints what was negotiated.
///
/// Examples:
///   spwsc listen 127.0.0.1:5555 --protocol rep
///   spwsc connect ws://127.0.0.1:5555/ --protocol req
#[derive(Parser)]
#[command(author, version)]
struct Cli {
    /// Prints handshake transitions and rejections.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    Connect(connect::Cmd),
    Listen(listen::Cmd),
}

fn main() {
    let args = Cli::parse();

    let level = if args.verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Warn
    };
    // a second logger can only be installed by a library, ignore it
    let _ = simple_logger::SimpleLogger::new().with_level(level).init();

    let res = match args.command {
        Commands::Connect(cmd) => connect::run(cmd),
        Commands::Listen(cmd) => listen::run(cmd),
    };
    if let Err(err) = res {
        eprintln!("{:?}", err);
        std::process::exit(1);
    }
}
