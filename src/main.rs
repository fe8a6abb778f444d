//! respite - A minimal RESP server
//!
//! This is the main entry point for the respite server.
//! It parses the command line, sets up logging and runs the event loop on
//! the main thread.

use respite::commands::CommandHandler;
use respite::config::{help_text, Config, Invocation};
use respite::server::Server;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn print_banner(config: &Config) {
    println!(
        r#"
respite v{} - A minimal RESP server
──────────────────────────────────────────────────────────────
Binding to {} (backlog {})
Every command is answered with PONG.
"#,
        respite::VERSION,
        config.bind_address(),
        config.backlog,
    );
}

fn main() -> anyhow::Result<()> {
    let config = match Config::from_args(std::env::args().skip(1)) {
        Ok(Invocation::Run(config)) => config,
        Ok(Invocation::Help) => {
            println!("{}", help_text());
            return Ok(());
        }
        Ok(Invocation::Version) => {
            println!("respite version {}", respite::VERSION);
            return Ok(());
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!("{}", help_text());
            std::process::exit(1);
        }
    };

    // RUST_LOG takes precedence over --log-level
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    print_banner(&config);

    let server = Server::bind(&config, CommandHandler::new())?;
    info!(
        addr = %server.local_addr(),
        max_depth = config.proto_max_depth,
        "Server ready"
    );

    server.run()?;
    Ok(())
}
