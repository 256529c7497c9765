//! sessionlens - browse Claude Code session history from the terminal.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sessionlens_core::format::{format_duration_secs, format_relative_time, format_token_count};
use sessionlens_core::{ClaudeStats, Config, Message, QueryService, Role, Session, TranscriptStore};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "sessionlens")]
#[command(about = "Local Claude Code session history and usage statistics")]
#[command(version)]
struct Cli {
    /// Claude home directory (default: ~/.claude)
    #[arg(long, global = true)]
    claude_home: Option<PathBuf>,

    /// Print raw JSON instead of formatted output
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Aggregate usage statistics across all projects
    Stats,
    /// Most recently active sessions
    Recent {
        /// Maximum number of sessions to show (default from config)
        #[arg(long)]
        limit: Option<i64>,
    },
    /// Sessions of one project
    Sessions {
        /// Absolute project path (e.g., /Users/me/code/app)
        project_path: String,
    },
    /// Full message history of one session
    Messages {
        /// Session identifier
        session_id: String,
    },
    /// Projects with recorded sessions
    Projects,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load().context("failed to load configuration")?;
    if let Some(home) = &cli.claude_home {
        config.claude.home = Some(home.clone());
    }
    let _log_guard = sessionlens_core::logging::init(&config.logging).ok();

    let store = TranscriptStore::from_config(&config.claude)
        .context("could not locate the Claude home directory")?;
    let service = QueryService::with_config(store, &config.stats);

    match cli.command {
        Command::Stats => {
            let stats = service.stats().context("failed to compute statistics")?;
            if cli.json {
                print_json(&stats)?;
            } else {
                print_stats(&stats);
            }
        }
        Command::Recent { limit } => {
            let limit = limit.unwrap_or(i64::from(config.stats.recent_limit));
            let sessions = service
                .recent_sessions(limit)
                .context("failed to list recent sessions")?;
            if cli.json {
                print_json(&sessions)?;
            } else {
                print_sessions(&sessions);
            }
        }
        Command::Sessions { project_path } => {
            let sessions = service
                .project_sessions(&project_path)
                .context("failed to list project sessions")?;
            if cli.json {
                print_json(&sessions)?;
            } else if sessions.is_empty() {
                println!("No sessions found for {}", project_path);
            } else {
                print_sessions(&sessions);
            }
        }
        Command::Messages { session_id } => {
            let messages = service
                .session_messages(&session_id)
                .with_context(|| format!("failed to load session {}", session_id))?;
            if cli.json {
                print_json(&messages)?;
            } else {
                print_messages(&messages);
            }
        }
        Command::Projects => {
            let projects = service
                .project_overview()
                .context("failed to list projects")?;
            if cli.json {
                print_json(&projects)?;
            } else if projects.is_empty() {
                println!("No projects found.");
            } else {
                for p in &projects {
                    println!(
                        "{:<50} {:>4} sessions  {:>6} messages  {}",
                        p.project_path,
                        p.session_count,
                        p.message_count,
                        format_relative_time(p.last_activity)
                    );
                }
            }
        }
    }

    Ok(())
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_stats(stats: &ClaudeStats) {
    println!();
    println!("USAGE");
    println!(
        "   Sessions: {:<10} Messages: {}",
        stats.total_sessions, stats.total_messages
    );
    println!(
        "   Today:    {} sessions, {} messages, {} tokens",
        stats.sessions_today,
        stats.messages_today,
        format_token_count(stats.tokens_today)
    );
    if let Some(first) = stats.first_session_date {
        println!("   Since:    {}", first);
    }
    println!();

    if !stats.model_usage.is_empty() {
        println!("MODELS");
        for (model, usage) in &stats.model_usage {
            println!(
                "   {:<30} in {:>8}  out {:>8}  cached {:>8}",
                model,
                format_token_count(usage.input_tokens),
                format_token_count(usage.output_tokens),
                format_token_count(usage.cache_read_tokens)
            );
        }
        println!();
    }

    if let Some(longest) = &stats.longest_session {
        println!("LONGEST SESSION");
        println!(
            "   {} - {} over {} messages, started {}",
            longest.session_id,
            format_duration_secs(longest.duration_secs),
            longest.message_count,
            longest.timestamp.format("%Y-%m-%d %H:%M UTC")
        );
        println!();
    }

    if !stats.daily_activity.is_empty() {
        println!("RECENT DAYS");
        for day in stats.daily_activity.iter().rev().take(7) {
            println!(
                "   {}  {:>5} messages  {:>3} sessions  {:>4} tool calls",
                day.date, day.message_count, day.session_count, day.tool_call_count
            );
        }
        println!();
    }
}

fn print_sessions(sessions: &[Session]) {
    for s in sessions {
        let model = s.model.as_deref().unwrap_or("-");
        println!(
            "{}  {:<20} {:>4} msgs  {:>7} tok  {:<24} {}",
            s.id,
            s.project_name,
            s.message_count,
            format_token_count(s.total_tokens),
            model,
            format_relative_time(s.last_activity)
        );
        if !s.first_message.is_empty() {
            println!("    \"{}\"", s.first_message);
        }
    }
}

fn print_messages(messages: &[Message]) {
    for m in messages {
        let speaker = match m.role {
            Role::User => "user",
            Role::Assistant => m.model.as_deref().unwrap_or("assistant"),
        };
        println!(
            "[{}] {}",
            m.timestamp.format("%Y-%m-%d %H:%M:%S"),
            speaker
        );
        for line in m.content.lines() {
            println!("    {}", line);
        }
        println!();
    }
}
