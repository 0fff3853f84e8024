//! Follows one game session in the terminal.
//!
//! ```text
//! cargo run -p spectate -- session_20251031_123045 --poll-secs 2
//! ```
//!
//! Settings come from `WOLFWATCH_*` variables (a `.env` file is read if
//! present); the flags below override them.

use std::time::Duration;

use clap::Parser;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use wolfwatch::prelude::*;

#[derive(Parser, Debug)]
#[command(name = "spectate", about = "Watch a live werewolf game")]
struct Args {
    /// Game session to watch.
    session_id: String,

    /// Push channel base URL.
    #[arg(long)]
    ws_url: Option<String>,

    /// REST base URL.
    #[arg(long)]
    http_url: Option<String>,

    /// Skip the REST status fetch on join. Polling needs it.
    #[arg(long, conflicts_with = "poll_secs")]
    no_bootstrap: bool,

    /// Poll the REST status every N seconds while the push channel is down.
    #[arg(long, value_name = "N")]
    poll_secs: Option<u64>,

    /// Print connection notices and diagnostics too.
    #[arg(long, short)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<(), WolfwatchError> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "wolfwatch=info,wolfwatch_connection=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();

    let mut config = SpectatorConfig::from_env();
    if let Some(url) = args.ws_url {
        config = config.with_ws_url(url);
    }
    if let Some(url) = args.http_url {
        config = config.with_http_url(url);
    }
    tracing::info!(ws = %config.ws_url, http = %config.http_url, "starting spectator");

    let client = SpectatorClient::open(config);
    let mut feed = if args.verbose {
        client.subscribe_all()
    } else {
        client.subscribe(&narrated_kinds())
    };

    if !args.no_bootstrap {
        match client.bootstrap(&args.session_id).await {
            Ok(state) => print_summary(&state),
            Err(e) => tracing::warn!(error = %e, "bootstrap failed, waiting for live events"),
        }
    }
    if let Some(secs) = args.poll_secs {
        client.start_polling(Duration::from_secs(secs.max(1)))?;
    }

    if let Err(e) = client.connect(&args.session_id).await {
        if args.poll_secs.is_none() {
            return Err(e);
        }
        tracing::warn!(error = %e, "push channel unavailable, relying on polling");
    }

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = feed.recv() => {
                let Some(event) = event else { break };
                println!("{}", event.line());
                if event.kind() == EventKind::GameComplete {
                    print_summary(&client.snapshot());
                    break;
                }
            }
        }
    }

    client.disconnect().await;
    client.close();
    Ok(())
}

fn narrated_kinds() -> Vec<EventKind> {
    EventKind::ALL
        .into_iter()
        .filter(|kind| !kind.is_system())
        .collect()
}

fn print_summary(state: &GameState) {
    let alive = state.alive_players().len();
    println!(
        "== {} | {} | {} players, {} alive | round {} ==",
        state.session_id.as_deref().unwrap_or("-"),
        state.status,
        state.players.len(),
        alive,
        state.rounds.len() + usize::from(state.current_round.is_some()),
    );
    for player in &state.players {
        let mark = if player.alive { " " } else { "x" };
        println!("  [{mark}] {} ({})", player.name, player.role);
    }
    if let Some(winner) = state.winner() {
        println!("  Winner: {winner}");
    }
}
