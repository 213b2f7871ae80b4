use std::path::PathBuf;
use anyhow::Context;
use clap::Parser;
use leech::{start_download, Config, MetaInfo, UserCommand};

#[derive(Parser)]
#[command(name = "leech", version, about = "Download a torrent from a UDP tracker")]
struct Args {
    #[arg(help = "Path to torrent file")]
    torrent: PathBuf,

    #[arg(short, long, default_value = "downloads", help = "Directory to write the download to")]
    output: PathBuf,

    #[arg(short, long, default_value_t = 6881, help = "Port reported to the tracker")]
    port: u16,

    #[arg(short, long, help = "Verbose output")]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {

    let args = Args::parse();

    // Set up logging.
    let level = if args.verbose { tracing::Level::DEBUG } else { tracing::Level::INFO };
    let sub = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(sub)?;

    let metainfo = MetaInfo::new(&args.torrent)
        .with_context(|| format!("failed to parse torrent {:?}", args.torrent))?;
    println!("{}: {} ({})", metainfo.name(), metainfo.info_hash_hex(), metainfo.size_fmt());

    let config = Config {
        dir: args.output,
        port: args.port,
        ..Default::default()
    };
    let (handle, mut rx) = start_download(metainfo, config);

    let mut last_percent = 0;
    loop {
        tokio::select! {
            cmd = rx.recv() => match cmd {
                Some(UserCommand::Progress { received, total }) => {
                    let percent = received * 100 / total.max(1);
                    if percent >= last_percent + 10 {
                        last_percent = percent;
                        println!("{}% ({}/{} blocks)", percent, received, total);
                    }
                },
                Some(UserCommand::TorrentComplete) => {
                    println!("download complete");
                    break;
                },
                Some(UserCommand::TorrentError(_)) => {
                    return handle.join().await.context("download failed");
                },
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                println!("stopping download");
                break;
            },
        }
    }

    handle.shutdown().await?;
    Ok(())
}
