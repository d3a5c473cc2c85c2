use anyhow::{Context, Result, anyhow, bail, ensure};
use m3u8_rs::Playlist;
use reqwest::Url;
use serde::{Deserialize, de::DeserializeOwned};
use tracing::{info, instrument};

pub const OPML_API_BASE: &str = "https://opml.radiotime.com/";

#[derive(Debug, Deserialize)]
#[serde(bound = "T: Deserialize<'de>")]
struct OpmlResponse<T> {
    head: OpmlHead,
    #[serde(default)]
    body: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct OpmlHead {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    fault: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StreamEntry {
    pub url: String,
    #[serde(default)]
    pub media_type: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StationOutline {
    pub name: String,
}

/// Client for TuneIn's OPML directory service
#[derive(Debug, Clone)]
pub struct OpmlClient {
    http: reqwest::Client,
    base: Url,
}

impl OpmlClient {
    /// # Panics
    /// Never, the default base URL is valid
    #[must_use]
    pub fn new(http: reqwest::Client) -> Self {
        Self::with_base(http, Url::parse(OPML_API_BASE).unwrap())
    }

    #[must_use]
    pub const fn with_base(http: reqwest::Client, base: Url) -> Self {
        Self { http, base }
    }

    async fn get<T: DeserializeOwned>(&self, endpoint: &str, station_id: &str) -> Result<Vec<T>> {
        let req = self
            .http
            .get(self.base.join(endpoint)?)
            .query(&[("id", station_id), ("formats", "hls"), ("render", "json")])
            .send()
            .await
            .with_context(|| format!("Requesting {endpoint}"))?;
        ensure!(
            req.status().is_success(),
            "{endpoint} responded with status {}",
            req.status()
        );

        let res = req
            .json::<OpmlResponse<T>>()
            .await
            .with_context(|| format!("Parsing {endpoint} response"))?;
        if let Some(status) = res.head.status.as_deref() {
            if status != "200" {
                bail!(
                    "{endpoint} returned status {status}: {}",
                    res.head.fault.unwrap_or_default()
                );
            }
        }

        Ok(res.body)
    }

    /// Looks up the station's display name
    ///
    /// # Errors
    /// Errors on network error / malformed body / unknown station
    #[instrument(skip(self))]
    pub async fn describe_station(&self, station_id: &str) -> Result<String> {
        let outlines = self
            .get::<StationOutline>("Describe.ashx", station_id)
            .await?;
        outlines
            .into_iter()
            .next()
            .map(|o| o.name)
            .context("Station description is empty")
    }

    /// Resolves a station to the URL of the live media playlist that gets polled
    ///
    /// # Errors
    /// Errors when the station has no HLS stream or its master playlist is unusable
    #[instrument(skip(self))]
    pub async fn resolve_stream_url(&self, station_id: &str) -> Result<String> {
        let streams = self.get::<StreamEntry>("Tune.ashx", station_id).await?;
        let master_url = streams
            .into_iter()
            .find(|s| s.media_type.as_deref().is_none_or(|t| t == "hls"))
            .map(|s| s.url)
            .context("Station has no HLS stream")?;
        info!("Master playlist: {master_url}");

        let req = self
            .http
            .get(&master_url)
            .send()
            .await
            .context("Fetching master playlist")?;
        ensure!(
            req.status().is_success(),
            "Master playlist responded with status {}",
            req.status()
        );
        let body = req.bytes().await.context("Decoding master playlist")?;

        let playlist = m3u8_rs::parse_playlist_res(&body)
            .map_err(|e| anyhow!("Parsing master playlist: {e:?}"))?;
        let stream_url = match playlist {
            Playlist::MasterPlaylist(master) => {
                let variant = master
                    .variants
                    .first()
                    .context("Master playlist has no variants")?;
                Url::parse(&master_url)?.join(&variant.uri)?.to_string()
            }
            Playlist::MediaPlaylist(_) => master_url,
        };
        info!("Live media playlist: {stream_url}");

        Ok(stream_url)
    }
}
