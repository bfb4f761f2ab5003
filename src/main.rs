use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use courtyard::community::{Message, Post};
use courtyard::config::Config;
use courtyard::Session;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "courtyard")]
#[command(about = "Community feed and chat from the terminal")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/courtyard/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Community to use instead of the configured one
  #[arg(long)]
  community: Option<String>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Show the first page of the community feed
  Feed,
  /// Like a post
  Like {
    post: String,
    /// Take a previous like back instead
    #[arg(long)]
    unlike: bool,
  },
  /// Vote for a poll option
  Vote { post: String, option: String },
  /// Send a chat message
  Send {
    conversation: String,
    body: String,
    #[arg(long)]
    reply_to: Option<String>,
  },
  /// List conversations with their last message
  Conversations,
  /// Follow a conversation live until interrupted
  Watch { conversation: String },
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  let mut config = Config::load(args.config.as_deref())?;
  if let Some(community) = args.community {
    config.session.community_id = Some(community);
  }

  let _guard = init_tracing(config.log.directory.as_deref());

  let mut session = Session::start(&config)?;
  let result = run(&mut session, args.command).await;
  session.end();
  result
}

/// Reads `COURTYARD_LOG` for per-module levels, falling back to `courtyard=info`.
fn init_tracing(directory: Option<&Path>) -> WorkerGuard {
  let filter = EnvFilter::try_from_env("COURTYARD_LOG").unwrap_or_else(|_| EnvFilter::new("courtyard=info"));

  let (writer, guard) = match directory {
    Some(dir) => tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, "courtyard.log")),
    None => tracing_appender::non_blocking(std::io::stderr()),
  };

  tracing_subscriber::registry()
    .with(fmt::layer().with_target(true).with_writer(writer))
    .with(filter)
    .init();
  guard
}

async fn run(session: &mut Session, command: Command) -> Result<()> {
  match command {
    Command::Feed => {
      let community = community_of(session)?;
      let feed = session.feed().feed(&community).await?;
      warn_if_offline(feed.is_offline(), feed.cached_at);
      for post in feed.data.items() {
        print_post(post);
      }
    }
    Command::Like { post, unlike } => {
      let feed = session.feed();
      if unlike != feed.liked_posts().await?.data.contains(&post) {
        println!("nothing to do for {}", post);
        return Ok(());
      }
      if feed.toggle_like(&post, unlike).await?.is_already_pending() {
        println!("still waiting on the previous like for {}", post);
      } else {
        println!("{} {}", if unlike { "unliked" } else { "liked" }, post);
      }
    }
    Command::Vote { post, option } => {
      let feed = session.feed();
      let votes = feed.poll_votes().await?.data;
      let previous = votes.choice_for(&post);
      if previous == Some(option.as_str()) {
        println!("already voted for {}", option);
        return Ok(());
      }
      feed.cast_vote(&post, &option, previous).await?;
      println!("voted for {} on {}", option, post);
    }
    Command::Send {
      conversation,
      body,
      reply_to,
    } => {
      let message = session.chat().send_message(&conversation, &body, reply_to.as_deref()).await?;
      print_message(&message);
    }
    Command::Conversations => {
      let conversations = session.chat().conversations().await?;
      warn_if_offline(conversations.is_offline(), conversations.cached_at);
      for conversation in conversations.data {
        println!(
          "{:<38} {:>3} unread  {}",
          conversation.title.as_deref().unwrap_or(&conversation.id),
          conversation.unread_count,
          conversation.last_message.as_deref().unwrap_or("")
        );
      }
    }
    Command::Watch { conversation } => watch(session, &conversation).await?,
  }
  Ok(())
}

async fn watch(session: &mut Session, conversation: &str) -> Result<()> {
  let chat = session.chat();
  let mut observer = chat.observe_messages(conversation);
  observer.fetch();
  session.listen(chat.message_listener(conversation));
  session.listen(chat.conversation_listener());
  info!(conversation, "watching conversation");

  let mut shown = std::collections::HashSet::new();
  let mut tick = tokio::time::interval(Duration::from_millis(250));
  loop {
    tokio::select! {
      _ = tick.tick() => {
        if !observer.poll() {
          continue;
        }
        if let Some(error) = observer.error() {
          eprintln!("refresh failed: {}", error);
        }
        if let Some(messages) = observer.data() {
          let mut fresh: Vec<&Message> = messages
            .items()
            .filter(|m| !m.pending && !shown.contains(&m.id))
            .collect();
          fresh.reverse();
          for message in fresh {
            shown.insert(message.id.clone());
            print_message(message);
          }
        }
      }
      _ = tokio::signal::ctrl_c() => break,
    }
  }
  Ok(())
}

fn community_of(session: &Session) -> Result<String> {
  session
    .community_id()
    .map(str::to_string)
    .ok_or_else(|| eyre!("No community selected. Pass --community or set session.community_id"))
}

fn warn_if_offline(offline: bool, cached_at: Option<DateTime<Utc>>) {
  if let (true, Some(at)) = (offline, cached_at) {
    eprintln!("offline: showing data cached at {}", at.format("%Y-%m-%d %H:%M"));
  }
}

fn print_post(post: &Post) {
  println!(
    "{}  {}  [{} likes]",
    post.created_at.format("%Y-%m-%d %H:%M"),
    post.body,
    post.like_count
  );
  if let Some(poll) = &post.poll {
    println!("    {}", poll.question);
    for option in &poll.options {
      println!("      {:<4} {} ({})", option.id, option.label, option.vote_count);
    }
  }
}

fn print_message(message: &Message) {
  if let Some(preview) = &message.reply_preview {
    println!("    > {}", preview.excerpt);
  }
  println!(
    "{} {}: {}",
    message.created_at.format("%H:%M"),
    message.sender_id,
    message.body
  );
}
