//! Socksify - Transparent SOCKS Routing Engine
//!
//! Command-line front end for checking a routing configuration and trying
//! connections through it.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use socksify::config::{load_config, DEFAULT_CONFIG_PATH};
use socksify::readiness::{Interest, InterestSet};
use socksify::route::Route;
use socksify::socks::CredentialSource;
use socksify::transport::{ConnectProgress, SocketHandle, SocketIo, SocketTable};
use socksify::{Attempt, RoutingTable, Socksifier, StepOutcome};
use std::net::SocketAddrV4;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Socksify - route TCP connections through SOCKS4/SOCKS5 servers
#[derive(Parser, Debug)]
#[command(name = "socksify")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Enable JSON logging format
    #[arg(long)]
    json_log: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Validate the configuration and list servers in evaluation order
    Check,

    /// Show how a destination would be reached
    Route {
        /// Destination as IP:PORT
        destination: SocketAddrV4,
    },

    /// Connect to a destination, through a SOCKS server if needed
    Connect {
        /// Destination as IP:PORT
        destination: SocketAddrV4,

        /// Give up after this many seconds
        #[arg(short, long)]
        timeout: Option<u64>,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Setup logging
    setup_logging(&args.log_level, args.json_log)?;

    // Load configuration
    let config = load_config(&args.config)?;
    info!("Socksify v{}", socksify::VERSION);
    info!("Configuration loaded from: {:?}", args.config);

    let routes = RoutingTable::new(config);
    match args.command {
        Command::Check => check(&routes),
        Command::Route { destination } => show_route(&routes, destination),
        Command::Connect {
            destination,
            timeout,
        } => connect(&routes, destination, timeout.map(Duration::from_secs)),
    }
}

fn check(routes: &RoutingTable) -> Result<()> {
    let config = routes.config();

    println!("Local networks:");
    println!("  {} (always)", socksify::route::LOOPBACK_NETWORK);
    for rule in config.locals() {
        println!("  {}", rule);
    }

    println!("Servers, in evaluation order:");
    for profile in config.profiles() {
        match routes.server_for(profile) {
            Ok(server) => println!("  {} -> {}", profile, server),
            Err(err) => println!("  {} -> unusable: {}", profile, err),
        }
        for rule in &profile.reach_rules {
            println!("    reaches {}", rule);
        }
    }

    let problems = routes.problems().count();
    if problems > 0 {
        bail!("{} server(s) in the configuration cannot be used", problems);
    }
    println!("Configuration OK");
    Ok(())
}

fn show_route(routes: &RoutingTable, destination: SocketAddrV4) -> Result<()> {
    match routes.route(destination) {
        Route::Direct => println!("{} is local, connecting directly", destination),
        Route::Proxy(proxy) => println!(
            "{} goes through {} at {}",
            destination, proxy.profile, proxy.server
        ),
        Route::Unavailable(err) => bail!("{} cannot be reached: {}", destination, err),
    }
    Ok(())
}

fn connect(routes: &RoutingTable, destination: SocketAddrV4, timeout: Option<Duration>) -> Result<()> {
    let mut sockets = SocketTable::new().context("Failed to create poller")?;
    let handle = sockets.open_stream().context("Failed to open socket")?;
    let kind = sockets.kind(handle)?;
    let mut engine = Socksifier::new(routes, CredentialSource::from_env());

    match engine.attempt(&mut sockets, handle, destination, kind)? {
        Attempt::RoutingFailed(err) => {
            return Err(err).with_context(|| format!("Cannot route {}", destination));
        }
        Attempt::Bypass => {
            info!("Connecting to {} directly", destination);
            if sockets.connect(handle, destination)? == ConnectProgress::InProgress {
                wait_writable(&mut engine, &mut sockets, handle, timeout)?;
                if sockets.connect_status(handle)? == ConnectProgress::InProgress {
                    bail!("Connection to {} did not complete", destination);
                }
            }
        }
        Attempt::Proxied(id) => {
            wait_writable(&mut engine, &mut sockets, handle, timeout)?;
            match engine.poll_progress(&mut sockets, id)? {
                StepOutcome::Done => {}
                StepOutcome::Failed(err) => {
                    return Err(err).with_context(|| format!("Cannot connect to {}", destination));
                }
                StepOutcome::InProgress(_) => bail!("SOCKS negotiation did not complete"),
            }
        }
    }

    println!("Connected to {}", destination);
    sockets.close(handle)?;
    engine.notify_closed(handle);
    Ok(())
}

fn wait_writable(
    engine: &mut Socksifier<'_>,
    sockets: &mut SocketTable,
    handle: SocketHandle,
    timeout: Option<Duration>,
) -> Result<()> {
    let interest: InterestSet = [(handle, Interest::WRITE)].into_iter().collect();
    if engine.wait(sockets, &interest, timeout)?.is_empty() {
        bail!("Timed out waiting for socket {}", handle);
    }
    Ok(())
}

/// Setup logging based on configuration
///
/// `RUST_LOG`, when set, takes precedence over `--log-level`.
fn setup_logging(level: &str, json: bool) -> Result<()> {
    let level = match level.to_lowercase().as_str() {
        "trace" => "trace",
        "debug" => "debug",
        "warn" | "warning" => "warn",
        "error" => "error",
        _ => "info",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    if json {
        let subscriber = FmtSubscriber::builder()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .json()
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let subscriber = FmtSubscriber::builder()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_thread_ids(false)
            .with_thread_names(false)
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    }

    Ok(())
}
