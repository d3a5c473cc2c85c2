#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(clippy::cargo)]
#![warn(clippy::perf)]
#![warn(clippy::complexity)]
#![warn(clippy::style)]
#![allow(clippy::multiple_crate_versions)]

use std::path::PathBuf;

use anyhow::{Result, bail};
use clap::Parser;
use config::CaptureConfig;
use ffmpeg::Ffmpeg;
use recorder::Recorder;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tunein::{api::OpmlClient, extract_station_id};
use util::{init_http_client, spawn_ct_watcher};

pub mod config;
pub mod error;
pub mod ffmpeg;
pub mod grabber;
pub mod playlist;
pub mod poller;
pub mod recorder;
pub mod transcoder;
pub mod tunein;
pub mod util;

/// Records a live TuneIn radio station into hourly, tagged MP3 files
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// TuneIn station ID (`s297990`) or station page URL
    #[arg(env = "STATION")]
    station: String,

    /// Directory where raw hour files are assembled
    #[arg(long, env = "ARCHIVE_DIR", default_value = "archive")]
    archive_dir: PathBuf,

    /// Directory where transcoded recordings are saved, one folder per day
    #[arg(long, env = "OUTPUT_DIR", default_value = "recordings")]
    output_dir: PathBuf,

    /// IANA timezone used to split and name the hours
    #[arg(long, env = "TIMEZONE", default_value = "America/New_York")]
    timezone: String,

    /// Artist tag for the recordings [default: the station's name]
    #[arg(long, env = "ARTIST")]
    artist: Option<String>,

    /// Seconds between polls when the playlist doesn't say how much audio it holds
    #[arg(long, env = "POLL_INTERVAL", default_value_t = 120)]
    poll_interval: u64,

    /// Seconds before any single HTTP request is given up on
    #[arg(long, env = "REQUEST_TIMEOUT", default_value_t = 30)]
    request_timeout: u64,

    /// MP3 bitrate passed to ffmpeg
    #[arg(long, env = "BITRATE", default_value = "128k")]
    bitrate: String,

    /// How many discovered segments may wait for download
    #[arg(long, env = "QUEUE_CAPACITY", default_value_t = 256)]
    queue_capacity: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    dotenvy::dotenv().ok();

    let args = Args::parse();
    if !ffmpeg::is_installed().await {
        bail!("ffmpeg is not installed!");
    }

    let config = CaptureConfig::new(
        args.archive_dir,
        args.output_dir,
        &args.timezone,
        args.poll_interval,
        args.request_timeout,
        args.bitrate,
        args.queue_capacity,
    )?;
    let station_id = extract_station_id(&args.station)?;

    let client = init_http_client(config.request_timeout);
    let ct = CancellationToken::new();
    spawn_ct_watcher(ct.clone());

    info!("Recording station {station_id}");
    let opml = OpmlClient::new(client.clone());
    let stream_url = match opml.resolve_stream_url(&station_id).await {
        Ok(url) => url,
        Err(e) => {
            error!("Unable to resolve a stream for station {station_id}: {e:#}");
            return Err(e);
        }
    };

    let artist = match args.artist {
        Some(artist) => artist,
        None => opml
            .describe_station(&station_id)
            .await
            .unwrap_or_else(|e| {
                warn!("Unable to look up station name, tagging as {station_id}: {e:#}");
                station_id.clone()
            }),
    };
    info!("Station name: {artist}");

    let tool = Ffmpeg::new(config.bitrate.clone());
    Recorder::new(client, tool, config, stream_url, artist)
        .record(ct)
        .await?;

    info!("All done!");
    Ok(())
}
