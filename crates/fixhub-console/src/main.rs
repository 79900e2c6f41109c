//! FIX hub operator console - Entry Point

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use fixhub_console::{AppConfig, AppError, DashboardController, StdinConfirm};
use fixhub_core::{
    ActionOutcome, AutoConfirm, Confirm, Connection, Resource, Route, StreamEvent,
    DEFAULT_CONNECTION_PORT,
};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::info;

/// Operator console for the FIX message-routing hub
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file path (can also be set via FIXHUB_CONFIG env var)
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Answer yes to every confirmation prompt
    #[arg(short, long, global = true)]
    yes: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Log in and persist the credential
    Login {
        #[arg(short, long)]
        username: String,
        /// Password (falls back to FIXHUB_PASSWORD)
        #[arg(short, long)]
        password: Option<String>,
    },
    /// Drop the persisted credential
    Logout,
    /// Keep every component running and log a periodic summary
    Watch,
    /// Configured upstream/downstream connections
    Connections {
        #[command(subcommand)]
        action: ConnectionAction,
    },
    /// Routing rules
    Routes {
        #[command(subcommand)]
        action: RouteAction,
    },
    /// Active FIX sessions
    Sessions {
        #[command(subcommand)]
        action: SessionAction,
    },
    /// Tail the live message feed
    Stream {
        /// Exit after this many events
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },
}

#[derive(clap::Args, Debug)]
struct ConnectionFields {
    #[arg(long)]
    name: String,
    #[arg(long)]
    host: String,
    #[arg(long, default_value_t = DEFAULT_CONNECTION_PORT)]
    port: u16,
    #[arg(long)]
    settings_file: String,
}

impl ConnectionFields {
    fn into_draft(self) -> Connection {
        Connection::draft(self.name, self.host, self.port, self.settings_file)
    }
}

#[derive(Subcommand, Debug)]
enum ConnectionAction {
    List,
    Add(ConnectionFields),
    Update {
        id: String,
        #[command(flatten)]
        fields: ConnectionFields,
    },
    Delete {
        id: String,
    },
}

#[derive(clap::Args, Debug)]
struct RouteFields {
    #[arg(long)]
    from: String,
    #[arg(long)]
    to: String,
    /// FIX tag the condition applies to (e.g. 35)
    #[arg(long)]
    tag: Option<u32>,
    /// Required tag value (e.g. D)
    #[arg(long)]
    value: Option<String>,
}

impl RouteFields {
    fn into_draft(self) -> Route {
        Route {
            from: self.from,
            to: self.to,
            condition_tag: self.tag,
            condition_value: self.value,
        }
    }
}

#[derive(Subcommand, Debug)]
enum RouteAction {
    List,
    Add(RouteFields),
    Update {
        index: usize,
        #[command(flatten)]
        fields: RouteFields,
    },
    Delete {
        index: usize,
    },
}

#[derive(Subcommand, Debug)]
enum SessionAction {
    List,
    Disconnect { identity: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize TLS crypto provider (must be before any WS connections)
    fixhub_ws::init_crypto();

    let args = Args::parse();

    fixhub_telemetry::init_logging()?;
    info!("Starting fixhub console v{}", env!("CARGO_PKG_VERSION"));

    let config = AppConfig::load(args.config)?;
    info!(hub_url = %config.hub_url, "Configuration loaded");

    let controller = Arc::new(DashboardController::new(config)?);
    let confirm: Box<dyn Confirm> = if args.yes {
        Box::new(AutoConfirm)
    } else {
        Box::new(StdinConfirm)
    };

    let result = run(&controller, args.command, confirm.as_ref()).await;
    controller.shutdown();
    result
}

async fn run(
    controller: &Arc<DashboardController>,
    command: Command,
    confirm: &dyn Confirm,
) -> Result<()> {
    match command {
        Command::Login { username, password } => {
            let password = match password.or_else(|| std::env::var("FIXHUB_PASSWORD").ok()) {
                Some(p) => p,
                None => bail!("--password or FIXHUB_PASSWORD is required"),
            };
            let credential = controller.login(&username, &password).await?;
            println!("Logged in as {}", credential.username());
            return Ok(());
        }
        Command::Logout => {
            controller.logout().await;
            println!("Logged out");
            return Ok(());
        }
        _ => {}
    }

    if !controller.resume().await? {
        bail!(AppError::LoggedOut);
    }
    let dashboard = controller.require_dashboard()?;

    match command {
        Command::Login { .. } | Command::Logout => {}
        Command::Watch => {
            controller.watch().await?;
        }
        Command::Connections { action } => match action {
            ConnectionAction::List => {
                print_connections(&dashboard.connections.refresh().await?);
            }
            ConnectionAction::Add(fields) => {
                let created = dashboard.connections.create(&fields.into_draft()).await?;
                println!("Created connection {}", created.id.as_deref().unwrap_or("?"));
                print_connections(&dashboard.connections.snapshot());
            }
            ConnectionAction::Update { id, fields } => {
                dashboard.connections.update(&id, &fields.into_draft()).await?;
                print_connections(&dashboard.connections.snapshot());
            }
            ConnectionAction::Delete { id } => {
                report(dashboard.connections.delete(&id, confirm).await?);
                print_connections(&dashboard.connections.snapshot());
            }
        },
        Command::Routes { action } => match action {
            RouteAction::List => print_routes(&dashboard.routes.refresh().await?),
            RouteAction::Add(fields) => {
                dashboard.routes.create(&fields.into_draft()).await?;
                print_routes(&dashboard.routes.snapshot());
            }
            RouteAction::Update { index, fields } => {
                let expected = controller.route_at(index).await?;
                controller.update_route(&expected, &fields.into_draft()).await?;
                print_routes(&dashboard.routes.snapshot());
            }
            RouteAction::Delete { index } => {
                let expected = controller.route_at(index).await?;
                println!("{}", route_line(index, &expected));
                report(controller.delete_route(&expected, confirm).await?);
                print_routes(&dashboard.routes.snapshot());
            }
        },
        Command::Sessions { action } => match action {
            SessionAction::List => {
                let sessions = dashboard.sessions.poll().await?;
                if sessions.is_empty() {
                    println!("No active sessions");
                }
                for session in &sessions {
                    println!(
                        "{:<40} {:<12} {:<12} {}",
                        session.identity(),
                        session.sender_comp_id,
                        session.target_comp_id,
                        session.begin_string
                    );
                }
            }
            SessionAction::Disconnect { identity } => {
                report(dashboard.sessions.disconnect(&identity, confirm).await?);
            }
        },
        Command::Stream { limit } => {
            let mut events = dashboard.stream.subscribe();
            let mut seen = 0usize;
            eprintln!("Connecting to {}", dashboard.stream.config().url);
            loop {
                tokio::select! {
                    received = events.recv() => match received {
                        Ok(event) => {
                            print_event(&event);
                            seen += 1;
                            if limit.is_some_and(|n| seen >= n) {
                                break;
                            }
                        }
                        Err(RecvError::Lagged(skipped)) => eprintln!("... {skipped} events skipped"),
                        Err(RecvError::Closed) => break,
                    },
                    () = dashboard.ended() => bail!(AppError::LoggedOut),
                    _ = tokio::signal::ctrl_c() => break,
                }
            }
        }
    }

    Ok(())
}

fn report(outcome: ActionOutcome) {
    match outcome {
        ActionOutcome::Completed => println!("Done"),
        ActionOutcome::Declined => println!("Cancelled"),
    }
}

fn print_connections(connections: &[Connection]) {
    if connections.is_empty() {
        println!("No {}", Connection::KIND);
    }
    for c in connections {
        println!(
            "{:<38} {:<20} {}:{} {}",
            c.id.as_deref().unwrap_or("-"),
            c.name,
            c.host,
            c.port,
            c.settings_file
        );
    }
}

fn route_line(index: usize, route: &Route) -> String {
    let condition = match (&route.condition_tag, &route.condition_value) {
        (Some(tag), Some(value)) => format!("{tag}={value}"),
        (Some(tag), None) => format!("{tag}=*"),
        _ => "-".to_string(),
    };
    format!("{index:>3} {:<16} -> {:<16} {condition}", route.from, route.to)
}

fn print_routes(routes: &[Route]) {
    if routes.is_empty() {
        println!("No {}", Route::KIND);
    }
    for (index, route) in routes.iter().enumerate() {
        println!("{}", route_line(index, route));
    }
}

fn print_event(event: &StreamEvent) {
    let at = event
        .occurred_at()
        .map(|t| t.format("%H:%M:%S%.3f").to_string())
        .unwrap_or_else(|| event.timestamp.to_string());
    println!(
        "{at} {:<11} {} {}->{} 35={} {}",
        event.direction.to_string(),
        event.session_id,
        event.sender_comp_id,
        event.target_comp_id,
        event.message_type,
        event.message_body
    );
}
