//! Flare - SOS broadcast and ally response coordination

use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use futures::future::join_all;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use flare::config::{Args, Command, LogFormat};
use flare::flare::FlareStatus;
use flare::projection::{FeedProjector, FeedState, FeedView, VictimState, VictimStatusProjector};
use flare::{FlareService, Session};

const WAIT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    // Logs go to stderr so they do not interleave with the rendered views
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("flare={},info", args.log_level).into());
    match args.log_format {
        LogFormat::Text => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init(),
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init(),
    }

    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    info!(
        collection = %args.collection,
        allow_direct_resolve = args.allow_direct_resolve,
        "Starting flare"
    );

    let service = FlareService::in_memory(args.flare_config(), args.store_config());

    match args.command {
        Command::Demo { allies } => run_demo(&service, allies).await,
        Command::Shell { user } => run_shell(&service, &user).await,
    }
}

async fn run_demo(service: &FlareService, allies: usize) -> anyhow::Result<()> {
    let victim = service.session("victim-0001")?;
    let allies = (1..=allies)
        .map(|n| service.session(&format!("ally-{:04}", n)))
        .collect::<flare::Result<Vec<_>>>()?;

    let mut feed = service.feed().await?;
    let mut status = victim.my_status().await?;
    wait_feed(&mut feed, |s| *s != FeedState::Loading).await?;
    wait_status(&mut status, |s| *s == VictimState::Hidden).await?;
    println!("== Start");
    print_feed(&feed.view(), None);

    let id = victim
        .create_flare("Coordinated harassment", "https://example.com/thread/42")
        .await?;
    wait_feed(&mut feed, |s| s.flares().iter().any(|f| f.id == id)).await?;
    wait_status(&mut status, |s| s.flare().is_some()).await?;
    println!("== Victim sent flare {}", id);
    print_feed(&feed.view(), None);
    print_status(&status);

    match victim.create_flare("Threats", "https://example.com/other").await {
        Ok(_) => println!("!! Second flare was accepted"),
        Err(e) => println!("== Second flare refused: {}", e),
    }

    let outcomes = join_all(allies.iter().map(|ally| ally.claim_flare(&id))).await;
    let mut claimer = None;
    for (ally, outcome) in allies.iter().zip(outcomes) {
        match outcome {
            Ok(_) => {
                println!("== {} claimed the flare", ally.user_id());
                claimer = Some(ally.clone());
            }
            Err(e) => println!("== {} could not claim: {}", ally.user_id(), e),
        }
    }
    let claimer = claimer.context("no ally managed to claim the flare")?;

    wait_feed(&mut feed, |s| {
        s.flares().iter().any(|f| f.id == id && f.status == FlareStatus::InProgress)
    })
    .await?;
    wait_status(&mut status, |s| {
        s.flare().map(|f| f.status) == Some(FlareStatus::InProgress)
    })
    .await?;
    print_feed(&feed.view(), Some(claimer.user_id()));
    print_status(&status);

    claimer.resolve_flare(&id).await?;
    wait_feed(&mut feed, |s| {
        s.flares().iter().any(|f| f.id == id && f.status == FlareStatus::Resolved)
    })
    .await?;
    wait_status(&mut status, |s| *s == VictimState::Hidden).await?;
    println!("== {} resolved the flare", claimer.user_id());
    print_feed(&feed.view(), Some(claimer.user_id()));
    print_status(&status);

    feed.release();
    status.release();
    Ok(())
}

async fn run_shell(service: &FlareService, user: &str) -> anyhow::Result<()> {
    let mut session = service.session(user)?;
    let feed = service.feed().await?;
    let mut status = session.my_status().await?;

    println!("Signed in as {}. Type 'help' for commands.", session.user_id());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let mut parts = line.split_whitespace();
        let Some(cmd) = parts.next() else {
            continue;
        };
        let rest: Vec<&str> = parts.collect();

        if matches!(cmd, "quit" | "exit") {
            break;
        }

        let result = handle_command(service, &mut session, &mut status, &feed, cmd, &rest).await;
        if let Err(e) = result {
            println!("Error: {}", e);
        }
    }

    Ok(())
}

async fn handle_command(
    service: &FlareService,
    session: &mut Session,
    status: &mut VictimStatusProjector,
    feed: &FeedProjector,
    cmd: &str,
    args: &[&str],
) -> anyhow::Result<()> {
    match (cmd, args) {
        ("flare", [kind @ .., link]) if !kind.is_empty() => {
            let id = session.create_flare(&kind.join(" "), link).await?;
            println!("Flare sent: {}", id);
        }
        ("claim", [id]) => {
            session.claim_flare(id).await?;
            println!("Claimed {}", id);
        }
        ("resolve", [id]) => {
            session.resolve_flare(id).await?;
            println!("Resolved {}", id);
        }
        ("feed", []) => print_feed(&feed.view(), Some(session.user_id())),
        ("status", []) => print_status(status),
        ("as", [other]) => {
            *session = service.session(other)?;
            *status = session.my_status().await?;
            println!("Signed in as {}", session.user_id());
        }
        ("help", []) => println!(
            "flare <type...> <link> | claim <id> | resolve <id> | feed | status | as <user> | quit"
        ),
        _ => println!("Unrecognised command. Type 'help'."),
    }
    Ok(())
}

async fn wait_feed<F>(feed: &mut FeedProjector, ready: F) -> anyhow::Result<()>
where
    F: FnMut(&FeedState) -> bool,
{
    tokio::time::timeout(WAIT, feed.wait_for(ready))
        .await
        .context("timed out waiting for the feed")??;
    Ok(())
}

async fn wait_status<F>(status: &mut VictimStatusProjector, ready: F) -> anyhow::Result<()>
where
    F: FnMut(&VictimState) -> bool,
{
    tokio::time::timeout(WAIT, status.wait_for(ready))
        .await
        .context("timed out waiting for the victim status")??;
    Ok(())
}

fn print_feed(view: &FeedView, viewer: Option<&str>) {
    match view {
        FeedView::Loading => println!("  [feed] loading..."),
        FeedView::AllClear => println!("  [feed] all clear"),
        FeedView::Degraded { reason } => println!("  [feed] unavailable: {}", reason),
        FeedView::Entries { entries } => {
            for entry in entries {
                let mut line = format!(
                    "  [{}] {} {} ({} min ago) {}",
                    entry.status_label(),
                    entry.id,
                    entry.kind,
                    entry.minutes_ago,
                    entry.link
                );
                if let Some(claimer) = entry.claimer_display(viewer) {
                    line.push_str(&format!(" | claimed by {}", claimer));
                }
                if entry.status == FlareStatus::Resolved {
                    line.push_str(&format!(" | resolved by {}", entry.resolver_display()));
                }
                if let Some(action) = entry.available_action() {
                    line.push_str(&format!(" | can {}", action));
                }
                println!("{}", line);
            }
        }
    }
}

fn print_status(status: &VictimStatusProjector) {
    let view = status.view();
    if !view.is_visible() {
        println!("  [you] no open flare");
        return;
    }
    println!("  [you] {}", view.headline());
    let detail = view.detail();
    if !detail.is_empty() {
        println!("        {}", detail);
    }
}
