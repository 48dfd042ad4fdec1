use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info};

use issuewatch::watch::{
    GitHubClient, IssueRepository, LogSink, Reconciler, Scheduler, SubscriberId,
    SubscriptionRepository, SubscriptionService, SubscriptionStore,
};
use issuewatch::{parse_command, CommandHandler, Config, Database};

const INPUT_USAGE: &str = "Usage: <subscriber-id> /<command> [arguments]";

#[tokio::main]
async fn main() {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.toml".to_string());

    // Load configuration
    let config = match Config::load_with_env(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load {config_path}: {e}");
            eprintln!("Using default configuration.");
            let mut config = Config::default();
            config.apply_env_overrides();
            config
        }
    };

    // Initialize logging
    if let Err(e) = issuewatch::logging::init(&config.logging) {
        eprintln!("Failed to initialize logging: {e}");
        issuewatch::logging::init_console_only(&config.logging.level);
    }

    info!("issuewatch - GitHub issue watcher");

    if let Err(e) = run(config).await {
        error!("{}", e);
        std::process::exit(1);
    }
}

async fn run(config: Config) -> issuewatch::Result<()> {
    config.validate()?;

    let db = Database::open(&config.database.path).await?;
    info!("Database opened at {}", config.database.path);

    let subscriptions = SubscriptionRepository::new(db.pool());
    let reconciler = Reconciler::new(
        GitHubClient::new(&config.github)?,
        subscriptions.clone(),
        IssueRepository::new(db.pool()),
        LogSink::new(),
        &config.watch,
    );
    let scheduler = Scheduler::new(
        Arc::new(reconciler),
        Duration::from_secs(config.watch.check_interval_secs),
    );
    let commands = CommandHandler::new(SubscriptionService::new(subscriptions));

    scheduler.start();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut input_open = true;

    loop {
        tokio::select! {
            line = lines.next_line(), if input_open => match line {
                Ok(Some(line)) => {
                    if let Some(reply) = handle_line(&commands, &line).await {
                        println!("{reply}");
                    }
                }
                Ok(None) => {
                    info!("Input closed, watching until interrupted");
                    input_open = false;
                }
                Err(e) => {
                    error!("Failed to read input: {}", e);
                    input_open = false;
                }
            },
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    error!("Failed to listen for interrupt: {}", e);
                }
                info!("Shutting down");
                break;
            }
        }
    }

    scheduler.stop_and_wait().await;
    db.close().await;
    Ok(())
}

/// Execute one `<subscriber-id> <command>` input line.
async fn handle_line<T: SubscriptionStore>(
    commands: &CommandHandler<T>,
    line: &str,
) -> Option<String> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    let Some((id, input)) = line.split_once(char::is_whitespace) else {
        return Some(INPUT_USAGE.to_string());
    };
    let Ok(subscriber_id) = id.parse::<SubscriberId>() else {
        return Some(INPUT_USAGE.to_string());
    };

    match parse_command(input) {
        Some(command) => Some(commands.handle(subscriber_id, &command).await),
        None => Some("Commands start with /. Send /help for the list of commands.".to_string()),
    }
}
