//! callie CLI — phone briefings and interactive calls.
//!
//! ```text
//! callie call [--to +1...]            place the briefing call now
//! callie briefing                     print today's briefing
//! callie schedule                     call every day at the configured time
//! callie say "text" [--to +1...]      call and read custom text
//! callie test                         short test call
//! callie server                       run the conversation relay server
//! callie interactive [--to +1...]     call and hand off to the relay server
//! callie debug [text] [--to +1...]    call, then poll status to the end
//! callie dominos stores "addr, city"  find nearby stores
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::error;
use tracing_subscriber::EnvFilter;

use callie_lib::callie_core::Result;
use callie_lib::config::{Config, LoggingConfig};
use callie_lib::context::LiveContext;
use callie_lib::dominos::{stage_of, Dominos, Region};
use callie_lib::llm::Backends;
use callie_lib::notify::Notifier;
use callie_lib::server::{self, AppState};
use callie_lib::telephony::Caller;
use callie_lib::{briefing, scheduler};

const DEFAULT_CONFIG: &str = "callie.toml";

/// callie — phone assistant that calls you with a daily briefing
#[derive(Parser)]
#[command(name = "callie", version, about)]
struct Cli {
    /// Config file (defaults to ./callie.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Build the briefing and call now
    Call {
        #[arg(long)]
        to: Option<String>,
    },
    /// Print the briefing without calling
    Briefing,
    /// Call with the briefing every day at the configured time
    Schedule,
    /// Call and read custom text
    Say {
        /// Text to read
        #[arg(required = true)]
        text: Vec<String>,
        #[arg(long)]
        to: Option<String>,
    },
    /// Place a short test call
    Test {
        #[arg(long)]
        to: Option<String>,
    },
    /// Run the conversation relay server
    Server,
    /// Call and connect to the relay server for a conversation
    Interactive {
        #[arg(long)]
        to: Option<String>,
    },
    /// Place a call and poll its status until it ends
    Debug {
        /// Custom text; without it the call is interactive
        text: Vec<String>,
        #[arg(long)]
        to: Option<String>,
        #[arg(long, default_value = "180")]
        timeout_secs: u64,
        #[arg(long, default_value = "5")]
        interval_secs: u64,
    },
    /// Dominos store lookup, menu search, and order tracking
    Dominos {
        #[command(subcommand)]
        command: DominosCommand,
    },
}

#[derive(Subcommand)]
enum DominosCommand {
    /// Stores near `street, city, region`
    Stores {
        address: String,
        #[arg(long, default_value = "ca")]
        region: Region,
        /// Delivery or Carryout
        #[arg(long, default_value = "Delivery")]
        service: String,
    },
    /// Search a store's menu by product name
    Menu {
        store_id: String,
        query: Option<String>,
        #[arg(long, default_value = "ca")]
        region: Region,
    },
    /// Active orders for a phone number
    Track {
        phone: String,
        #[arg(long, default_value = "ca")]
        region: Region,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let path = cli
        .config
        .or_else(|| Some(PathBuf::from(DEFAULT_CONFIG)).filter(|p| p.is_file()));
    let config = match Config::load(path.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("callie: {e}");
            std::process::exit(1);
        }
    };
    init_logging(&config.logging);

    if let Err(e) = run(cli.command, config).await {
        error!("{e}");
        std::process::exit(1);
    }
}

fn init_logging(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if config.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn run(command: Command, config: Config) -> Result<()> {
    match command {
        Command::Call { to } => {
            let notifier = Notifier::new(config.notify.command.clone());
            if let Err(e) = scheduler::briefing_call(&config, to.as_deref()).await {
                notifier.call_failed(&e).await;
                return Err(e);
            }
        }

        Command::Briefing => {
            println!("{}", briefing::generate(&config).await?);
        }

        Command::Schedule => {
            let notifier = Notifier::new(config.notify.command.clone());
            scheduler::run(&config, &notifier).await?;
        }

        Command::Say { text, to } => {
            let caller = Caller::from_config(&config)?;
            let record = caller.call_with_text(&text.join(" "), to.as_deref()).await?;
            println!("call sid: {}", record.sid);
        }

        Command::Test { to } => {
            let record = Caller::from_config(&config)?.test_call(to.as_deref()).await?;
            println!("call sid: {}", record.sid);
        }

        Command::Server => {
            let backends = Backends::from_config(&config.llm);
            let context = Arc::new(LiveContext::from_config(&config));
            server::serve(AppState::new(config, backends, context)).await?;
        }

        Command::Interactive { to } => {
            let webhook = config.outbound_call_webhook()?;
            let record = Caller::from_config(&config)?
                .call_interactive(&webhook, to.as_deref())
                .await?;
            println!("call sid: {}", record.sid);
            println!("the relay server must be running and reachable at {webhook}");
        }

        Command::Debug {
            text,
            to,
            timeout_secs,
            interval_secs,
        } => {
            let caller = Caller::from_config(&config)?;
            let record = if text.is_empty() {
                let webhook = config.outbound_call_webhook()?;
                caller.call_interactive(&webhook, to.as_deref()).await?
            } else {
                caller.call_with_text(&text.join(" "), to.as_deref()).await?
            };
            println!("call sid: {}", record.sid);

            let report = caller
                .client()
                .wait_for_completion(
                    &record.sid,
                    Duration::from_secs(timeout_secs),
                    Duration::from_secs(interval_secs.max(1)),
                )
                .await?;

            for point in &report.timeline {
                println!(
                    "{}  {:<12} duration={:<6} answered_by={:?}",
                    point.at.format("%H:%M:%S"),
                    point.status.to_string(),
                    point.duration.map(|d| format!("{d}s")).unwrap_or_else(|| "n/a".into()),
                    point.answered_by,
                );
            }
            let call = &report.final_call;
            if report.timed_out {
                println!("gave up after {timeout_secs}s; last status {}", call.status);
            } else {
                println!(
                    "final: {} after {}s, answered by {:?}",
                    call.status,
                    call.duration.unwrap_or(0),
                    call.answered_by
                );
            }
        }

        Command::Dominos { command } => dominos(command).await?,
    }
    Ok(())
}

async fn dominos(command: DominosCommand) -> Result<()> {
    match command {
        DominosCommand::Stores {
            address,
            region,
            service,
        } => {
            let stores = Dominos::new(region).find_stores(&address, &service).await?;
            if stores.is_empty() {
                println!("no stores found");
            }
            for store in stores {
                let place = store
                    .address_description
                    .as_deref()
                    .unwrap_or("")
                    .replace('\n', ", ");
                println!(
                    "{:<6} {}  {}{}",
                    store.store_id,
                    place,
                    if store.is_open { "open" } else { "closed" },
                    store.min_distance.map(|d| format!(" ({d:.1} mi)")).unwrap_or_default(),
                );
            }
        }

        DominosCommand::Menu {
            store_id,
            query,
            region,
        } => {
            let menu = Dominos::new(region).menu(&store_id).await?;
            match query {
                Some(q) => {
                    for (code, product) in menu.search(&q) {
                        println!("{code:<12} {}", product.name);
                    }
                }
                None => {
                    for cat in menu.categories() {
                        println!("{:<12} {} ({} items)", cat.code, cat.name, cat.count);
                    }
                }
            }
        }

        DominosCommand::Track { phone, region } => {
            let report = Dominos::new(region).track_by_phone(&phone).await?;
            if report.orders.is_empty() {
                println!("no active orders");
            }
            for order in &report.orders {
                let stage = stage_of(order);
                println!(
                    "{} [{}/{}] {}  {}",
                    order.order_id.as_deref().unwrap_or("?"),
                    stage.index + 1,
                    stage.total,
                    stage.stage,
                    order.order_description.as_deref().unwrap_or(""),
                );
                if let Some(driver) = &order.driver_name {
                    println!("  driver: {driver}");
                }
            }
        }
    }
    Ok(())
}
