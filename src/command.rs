//! Operator command parser and handlers for issuewatch.
//!
//! This module provides parsing and handling of commands like
//! /subscribe, /unsubscribe, /mysubscriptions and /help.

use tracing::{debug, warn};

use crate::watch::{SubscriberId, SubscriptionService, SubscriptionStore};

/// A parsed operator command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Greet the subscriber.
    Start,
    /// Show the command list.
    Help,
    /// Subscribe to a repository. `repository` is empty when missing.
    Subscribe {
        /// Repository in owner/repo form.
        repository: String,
        /// Comma separated label filter, possibly empty.
        labels: String,
    },
    /// Unsubscribe from a repository. `repository` is empty when missing.
    Unsubscribe {
        /// Repository in owner/repo form.
        repository: String,
    },
    /// List the subscriber's subscriptions.
    MySubscriptions,
    /// Unknown command.
    Unknown(String),
}

impl Command {
    /// Get the command name.
    pub fn name(&self) -> &str {
        match self {
            Command::Start => "start",
            Command::Help => "help",
            Command::Subscribe { .. } => "subscribe",
            Command::Unsubscribe { .. } => "unsubscribe",
            Command::MySubscriptions => "mysubscriptions",
            Command::Unknown(cmd) => cmd,
        }
    }
}

/// Parse an input line into a command.
///
/// Returns `None` for lines that do not start with `/`. A `@bot` suffix on
/// the command name is ignored.
pub fn parse_command(input: &str) -> Option<Command> {
    let trimmed = input.trim();
    let without_slash = trimmed.strip_prefix('/')?;

    let (cmd, args) = match without_slash.split_once(char::is_whitespace) {
        Some((cmd, args)) => (cmd, args.trim()),
        None => (without_slash, ""),
    };
    let cmd = cmd.split_once('@').map_or(cmd, |(name, _)| name);

    let command = match cmd.to_lowercase().as_str() {
        "start" => Command::Start,
        "help" => Command::Help,
        "subscribe" => {
            let (repository, labels) = match args.split_once(char::is_whitespace) {
                Some((repository, labels)) => (repository, labels.trim()),
                None => (args, ""),
            };
            Command::Subscribe {
                repository: repository.to_string(),
                labels: labels.to_string(),
            }
        }
        "unsubscribe" => Command::Unsubscribe {
            repository: args.split_whitespace().next().unwrap_or("").to_string(),
        },
        "mysubscriptions" => Command::MySubscriptions,
        _ => Command::Unknown(cmd.to_string()),
    };

    Some(command)
}

/// Command information for help display.
pub struct CommandInfo {
    /// Command syntax.
    pub syntax: &'static str,
    /// Command description.
    pub description: &'static str,
}

/// Get all available command information.
pub fn get_command_help() -> Vec<CommandInfo> {
    vec![
        CommandInfo {
            syntax: "/subscribe <owner/repo> [labels]",
            description: "subscribe to repository updates (labels separated by commas)",
        },
        CommandInfo {
            syntax: "/unsubscribe <owner/repo>",
            description: "unsubscribe from a repository",
        },
        CommandInfo {
            syntax: "/mysubscriptions",
            description: "show current subscriptions",
        },
        CommandInfo {
            syntax: "/help",
            description: "show this message",
        },
    ]
}

/// Format the help message for display.
pub fn format_help() -> String {
    let mut lines = vec!["Available commands:".to_string(), String::new()];
    for info in get_command_help() {
        lines.push(format!("{} - {}", info.syntax, info.description));
    }
    lines.join("\n")
}

/// Format the greeting shown on /start.
pub fn format_welcome() -> String {
    format!(
        "Hi!\n\nI'm a bot for tracking new GitHub repository issues.\n\n{}",
        format_help()
    )
}

/// Executes commands on behalf of subscribers.
pub struct CommandHandler<T> {
    service: SubscriptionService<T>,
}

impl<T: SubscriptionStore> CommandHandler<T> {
    /// Create a handler over a subscription service.
    pub fn new(service: SubscriptionService<T>) -> Self {
        Self { service }
    }

    /// Execute a command and return the reply text.
    pub async fn handle(&self, subscriber_id: SubscriberId, command: &Command) -> String {
        debug!("Subscriber {} sent /{}", subscriber_id, command.name());

        match command {
            Command::Start => format_welcome(),
            Command::Help => format_help(),
            Command::Subscribe { repository, labels } => {
                self.subscribe(subscriber_id, repository, labels).await
            }
            Command::Unsubscribe { repository } => {
                self.unsubscribe(subscriber_id, repository).await
            }
            Command::MySubscriptions => self.my_subscriptions(subscriber_id).await,
            Command::Unknown(cmd) => {
                format!("Unknown command: /{cmd}\nSend /help for the list of commands.")
            }
        }
    }

    async fn subscribe(&self, subscriber_id: SubscriberId, repository: &str, labels: &str) -> String {
        if repository.is_empty() {
            return "Usage: /subscribe <owner/repo> [labels]".to_string();
        }

        match self.service.subscribe(subscriber_id, repository, labels).await {
            Ok(sub) if sub.labels.is_empty() => format!("Subscribed to {}", sub.feed),
            Ok(sub) => {
                let labels: Vec<&str> = sub.labels.iter().map(String::as_str).collect();
                format!("Subscribed to {} with labels: {}", sub.feed, labels.join(", "))
            }
            Err(e) => {
                warn!("Subscribe failed for {}: {}", subscriber_id, e);
                format!("Error: {e}")
            }
        }
    }

    async fn unsubscribe(&self, subscriber_id: SubscriberId, repository: &str) -> String {
        if repository.is_empty() {
            return "Usage: /unsubscribe <owner/repo>".to_string();
        }

        match self.service.unsubscribe(subscriber_id, repository).await {
            Ok(true) => format!("Unsubscribed from {}", repository.trim()),
            Ok(false) => format!("You were not subscribed to {}", repository.trim()),
            Err(e) => {
                warn!("Unsubscribe failed for {}: {}", subscriber_id, e);
                format!("Error: {e}")
            }
        }
    }

    async fn my_subscriptions(&self, subscriber_id: SubscriberId) -> String {
        let subscriptions = match self.service.list(subscriber_id).await {
            Ok(subscriptions) => subscriptions,
            Err(e) => {
                warn!("Listing subscriptions failed for {}: {}", subscriber_id, e);
                return format!("Error: {e}");
            }
        };

        if subscriptions.is_empty() {
            return "You have no active subscriptions".to_string();
        }

        let entries: Vec<String> = subscriptions
            .iter()
            .map(|sub| {
                let labels = if sub.labels.is_empty() {
                    "all".to_string()
                } else {
                    sub.labels.iter().map(String::as_str).collect::<Vec<_>>().join(", ")
                };
                format!("Repository: {}\nLabels: {}", sub.feed, labels)
            })
            .collect();

        format!("Your subscriptions:\n\n{}", entries.join("\n\n"))
    }
}
