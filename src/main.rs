mod avatar;
mod dialog;
mod error;
mod networking;
mod transfer;

use anyhow::Result;
use dotenv::dotenv;
use log::{debug, info};
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use avatar::AvatarLoader;
use dialog::{ChannelSurface, Dialog, Options, Outcome, SurfaceEvent, SurfaceHandle};
use transfer::{ShareCommand, ShareConfig, ShareInfo, TransferOrchestrator};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if it exists
    dotenv().ok();

    // Initialize logging
    env_logger::init_from_env(env_logger::Env::default().default_filter_or("info"));

    let config = ShareConfig::from_env();
    info!(
        "Starting VRM share companion (port {}, storage root {}).",
        config.session.port,
        config.storage_root.display()
    );

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Ctrl-C received, shutting down.");
                shutdown.cancel();
            }
        });
    }

    // One prompt surface, shared by every subsystem through the dialog
    // coordinator; the stdin loop below renders it.
    let (surface, surface_handle) = ChannelSurface::new();
    let dialog = Dialog::spawn(surface, shutdown.child_token());

    let mut loader = AvatarLoader::new(dialog.clone());
    let avatar_events = loader.subscribe();

    let (orchestrator, share_info) = TransferOrchestrator::new(dialog.clone(), config)?;
    let (command_tx, command_rx) = mpsc::unbounded_channel();
    tokio::spawn(orchestrator.run(command_rx, avatar_events, shutdown.clone()));

    // Loads run on their own task so their dialogs never block the stdin
    // loop that answers them.
    let (load_tx, mut load_rx) = mpsc::unbounded_channel::<PathBuf>();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            loop {
                let path = tokio::select! {
                    _ = shutdown.cancelled() => break,
                    path = load_rx.recv() => match path {
                        Some(path) => path,
                        None => break,
                    },
                };
                if let Err(err) = loader.load(&path, &shutdown).await {
                    debug!("Load ended early: {}", err);
                }
            }
        });
    }

    run_frontend(surface_handle, share_info, command_tx, load_tx, shutdown).await
}

fn print_help() {
    println!("Commands:");
    println!("  load <path>  load a .vrm model (sibling metadata.json is picked up)");
    println!("  save         export the loaded avatar to the storage root");
    println!("  share        start sharing the loaded avatar to the headset");
    println!("  cancel       cancel an in-flight share");
    println!("  quit         exit");
}

fn prompt_keys(options: Options) -> &'static str {
    if options.allows(Outcome::Confirm) && options.allows(Outcome::Cancel) {
        "[y = confirm, n = cancel]"
    } else if options.allows(Outcome::Confirm) {
        "[y = confirm]"
    } else {
        "[n = cancel]"
    }
}

fn parse_choice(line: &str, options: Options) -> Option<Outcome> {
    let choice = match line.to_ascii_lowercase().as_str() {
        "y" | "yes" | "confirm" => Outcome::Confirm,
        "n" | "no" | "cancel" => Outcome::Cancel,
        _ => return None,
    };
    options.allows(choice).then_some(choice)
}

/// The stdin loop doubles as command REPL and prompt frontend: while a
/// prompt is displayed, input lines answer it instead of acting as
/// commands.
async fn run_frontend(
    mut surface: SurfaceHandle,
    mut share_info: watch::Receiver<Option<ShareInfo>>,
    commands: mpsc::UnboundedSender<ShareCommand>,
    loads: mpsc::UnboundedSender<PathBuf>,
    shutdown: CancellationToken,
) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut active_prompt: Option<Options> = None;

    print_help();
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,

            event = surface.events.recv() => match event {
                Some(SurfaceEvent::Show { text, options }) => {
                    println!("\n{}", text);
                    println!("{}", prompt_keys(options));
                    active_prompt = Some(options);
                }
                Some(SurfaceEvent::Hide) => {
                    active_prompt = None;
                }
                None => break,
            },

            changed = share_info.changed() => {
                if changed.is_err() {
                    break;
                }
                match share_info.borrow_and_update().clone() {
                    Some(info) => println!("\n{}", info),
                    None => println!("\nSharing window closed."),
                }
            }

            line = lines.next_line() => {
                let Some(line) = line? else {
                    // stdin closed
                    shutdown.cancel();
                    break;
                };
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                if let Some(options) = active_prompt {
                    match parse_choice(line, options) {
                        Some(outcome) => {
                            let _ = surface.choices.send(outcome);
                        }
                        None => println!("{}", prompt_keys(options)),
                    }
                    continue;
                }

                match line.split_once(' ').map_or((line, ""), |(cmd, rest)| (cmd, rest.trim())) {
                    ("load", path) if !path.is_empty() => {
                        let _ = loads.send(PathBuf::from(path));
                    }
                    ("save", _) => {
                        let _ = commands.send(ShareCommand::SaveAvatar);
                    }
                    ("share", _) => {
                        let _ = commands.send(ShareCommand::StartSharing);
                    }
                    ("cancel", _) => {
                        let _ = commands.send(ShareCommand::CancelSharing);
                    }
                    ("quit", _) | ("exit", _) => {
                        shutdown.cancel();
                        break;
                    }
                    ("help", _) => print_help(),
                    _ => println!("Unknown command, type 'help' for the list."),
                }
            }
        }
    }

    println!("\nStopping VRM share companion...");
    Ok(())
}
