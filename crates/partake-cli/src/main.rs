//! `partake` command-line interface.
//!
//! Three subcommands: `serve` runs the signaling/relay server, `host` shares
//! a folder and prints the link, `join` downloads through a pasted link.

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use partake_client::{ClientEvent, HostOptions, JoinOptions, Session, ShareLink};
use partake_server::{Server, ServerConfig};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing::warn;

#[derive(Parser)]
#[command(name = "partake", version, about = "Encrypted peer-to-peer folder sharing")]
struct Cli {
    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the signaling/relay server
    Serve {
        /// Address to listen on (defaults to 0.0.0.0 and the PORT
        /// environment variable)
        #[arg(long)]
        bind: Option<SocketAddr>,
    },
    /// Share a folder and print its link
    Host {
        /// Folder to share
        folder: PathBuf,
        /// Signaling server URL
        #[arg(long, default_value = "ws://127.0.0.1:3000")]
        server: String,
        /// Accept uploads from peers
        #[arg(long)]
        allow_write: bool,
    },
    /// Download through a share link
    Join {
        /// Link printed by the host (`room:key`)
        link: String,
        /// Signaling server URL
        #[arg(long, default_value = "ws://127.0.0.1:3000")]
        server: String,
        /// Directory downloads land in
        #[arg(long, default_value = ".")]
        output: PathBuf,
        /// Download a single file instead of the whole share
        #[arg(long)]
        path: Option<String>,
    },
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Serve { bind } => serve(bind).await,
        Commands::Host {
            folder,
            server,
            allow_write,
        } => host(folder, server, allow_write).await,
        Commands::Join {
            link,
            server,
            output,
            path,
        } => join(link, server, output, path).await,
    }
}

async fn serve(bind: Option<SocketAddr>) -> anyhow::Result<()> {
    let config = ServerConfig::from_env().context("reading server configuration")?;
    let addr = bind.unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], config.port)));
    let server = Server::bind(addr, config).await.context("binding listener")?;
    server.run().await.context("accept loop failed")?;
    Ok(())
}

async fn host(folder: PathBuf, server: String, allow_write: bool) -> anyhow::Result<()> {
    if !folder.is_dir() {
        bail!("{} is not a directory", folder.display());
    }
    let (session, link, mut events) = Session::host(HostOptions {
        server_url: server,
        root: folder.clone(),
        allow_write,
        factory: None,
    })
    .await
    .context("connecting to the signaling server")?;

    println!("Sharing {}", folder.display());
    println!("Share link: {link}");
    if allow_write {
        println!("Uploads from peers are enabled");
    }

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(ClientEvent::PeerJoined(peer)) => println!("Peer joined: {peer}"),
                Some(ClientEvent::PeerLeft(peer)) => println!("Peer left: {peer}"),
                Some(ClientEvent::UploadStored { peer, path }) => {
                    println!("Received {path} from {peer}");
                }
                Some(ClientEvent::Redirected { instance }) => {
                    bail!("room is owned by instance {instance}; reconnect there");
                }
                Some(ClientEvent::ServerRejected { message }) => bail!("server refused: {message}"),
                Some(ClientEvent::Disconnected) | None => bail!("connection to the server lost"),
                Some(_) => {}
            },
            _ = tokio::signal::ctrl_c() => {
                println!("Stopping share");
                session.close().await;
                return Ok(());
            }
        }
    }
}

async fn join(
    link: String,
    server: String,
    output: PathBuf,
    path: Option<String>,
) -> anyhow::Result<()> {
    let link = ShareLink::parse(&link).context("parsing the share link")?;
    let (session, mut events) = Session::join(JoinOptions {
        server_url: server,
        link,
        output,
        file: path,
        factory: None,
    })
    .await
    .context("connecting to the signaling server")?;

    let progress = MultiProgress::new();
    let style = ProgressStyle::with_template("{msg:40!} [{bar:30}] {pos}/{len}")
        .context("building progress style")?
        .progress_chars("=> ");
    let mut bars: HashMap<String, ProgressBar> = HashMap::new();
    let mut failed = 0usize;

    while let Some(event) = events.recv().await {
        match event {
            ClientEvent::FileList { files, .. } => {
                println!("Share lists {} file(s)", files.len());
            }
            ClientEvent::DownloadProgress {
                path,
                received,
                total,
            } => {
                let bar = bars.entry(path.clone()).or_insert_with(|| {
                    let bar = progress.add(ProgressBar::new(u64::from(total)));
                    bar.set_style(style.clone());
                    bar.set_message(path.clone());
                    bar
                });
                bar.set_position(u64::from(received));
            }
            ClientEvent::FileSaved { path, location } => {
                if let Some(bar) = bars.remove(&path) {
                    bar.finish_and_clear();
                }
                println!("Saved {}", location.display());
            }
            ClientEvent::TransferFailed { path, reason } => {
                if let Some(bar) = bars.remove(&path) {
                    bar.abandon();
                }
                warn!(path, reason, "transfer failed");
                failed += 1;
            }
            ClientEvent::AllDownloadsDone => break,
            ClientEvent::Redirected { instance } => {
                bail!("room is owned by instance {instance}; reconnect there");
            }
            ClientEvent::ServerRejected { message } => bail!("server refused: {message}"),
            ClientEvent::Disconnected => bail!("connection to the server lost"),
            _ => {}
        }
    }

    session.close().await;
    if failed > 0 {
        bail!("{failed} transfer(s) failed");
    }
    println!("Done");
    Ok(())
}
