use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;
use url::Url;

/// Prefix of a direct track reference such as `spotify:track:4uLU6hMCjMI75M1A2tKUQC`.
const URI_PREFIX: &str = "spotify:track:";
/// Host of shared track links.
const LINK_HOST: &str = "open.spotify.com";

/// Playable media item as returned by the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Track {
    /// Catalog identifier, also the queue dedup key.
    pub id: String,
    /// Playable URI handed to the sink.
    #[serde(default)]
    pub uri: String,
    /// Display title.
    #[serde(default)]
    pub title: String,
    /// Cover art URL.
    #[serde(default)]
    pub image: String,
    /// Artist names.
    #[serde(default)]
    pub artists: Vec<String>,
    /// Length, when the catalog knows it.
    #[serde(default, alias = "duration_ms")]
    pub duration_ms: Option<u64>,
}

impl Track {
    /// Artists joined for display.
    pub fn artist_line(&self) -> String {
        self.artists.join(", ")
    }
}

/// Errors raised by the Playback Sink or its catalog.
#[derive(Debug, Error)]
pub enum PlaybackError {
    /// No track matches the reference.
    #[error("track not found: {0}")]
    NotFound(String),
    /// The reference is malformed.
    #[error("invalid track reference: {0}")]
    InvalidReference(String),
    /// The playback device rejected the instruction.
    #[error("playback device error: {0}")]
    Device(String),
    /// The catalog lookup failed.
    #[error("catalog error: {0}")]
    Catalog(String),
}

/// Result of sink and catalog calls.
pub type PlaybackResult<T> = Result<T, PlaybackError>;

/// What a viewer asked for: an explicit identifier or free text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackQuery {
    /// Track identifier taken from a URI or link.
    Direct(String),
    /// Free-text search.
    Search(String),
}

impl TrackQuery {
    /// Classify a query. `spotify:track:<id>` URIs and `open.spotify.com/track/<id>` links are
    /// direct references; anything else is searched.
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if let Some(id) = raw.strip_prefix(URI_PREFIX).filter(|id| is_track_id(id)) {
            return Self::Direct(id.to_owned());
        }
        if let Some(id) = link_track_id(raw) {
            return Self::Direct(id);
        }
        Self::Search(raw.to_owned())
    }
}

fn link_track_id(raw: &str) -> Option<String> {
    if !raw.contains(LINK_HOST) {
        return None;
    }
    let url = Url::parse(raw)
        .or_else(|_| Url::parse(&format!("https://{raw}")))
        .ok()?;
    if url.host_str() != Some(LINK_HOST) {
        return None;
    }
    let mut segments = url.path_segments()?.filter(|segment| !segment.is_empty());
    // Localised links look like /intl-fr/track/<id>.
    let id = segments.find(|segment| *segment == "track").and_then(|_| segments.next())?;
    is_track_id(id).then(|| id.to_owned())
}

fn is_track_id(id: &str) -> bool {
    !id.is_empty() && id.chars().all(|c| c.is_ascii_alphanumeric())
}

/// Media playback device.
pub trait PlaybackSink: Send + Sync {
    /// Start `track` from the beginning.
    fn play(&self, track: Track) -> BoxFuture<'static, PlaybackResult<()>>;
    /// Play `track` starting at `position_ms`.
    fn resume_at(&self, track: Track, position_ms: u64) -> BoxFuture<'static, PlaybackResult<()>>;
}

/// Track lookup and search.
pub trait Catalog: Send + Sync {
    /// Track with identifier `id`, if any.
    fn lookup(&self, id: &str) -> BoxFuture<'static, PlaybackResult<Option<Track>>>;
    /// Up to `limit` tracks matching `query`, best first.
    fn search(&self, query: &str, limit: usize) -> BoxFuture<'static, PlaybackResult<Vec<Track>>>;
}

/// Resolve a viewer query to a single track; the first search hit wins.
pub async fn resolve(catalog: &dyn Catalog, query: &TrackQuery) -> PlaybackResult<Option<Track>> {
    match query {
        TrackQuery::Direct(id) => catalog.lookup(id).await,
        TrackQuery::Search(text) => Ok(catalog.search(text, 1).await?.into_iter().next()),
    }
}

/// Sink that only logs what it would play; stands in for a real device.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingSink;

impl PlaybackSink for LoggingSink {
    fn play(&self, track: Track) -> BoxFuture<'static, PlaybackResult<()>> {
        Box::pin(async move {
            info!(track = %track.id, title = %track.title, artists = %track.artist_line(), "play");
            Ok(())
        })
    }

    fn resume_at(&self, track: Track, position_ms: u64) -> BoxFuture<'static, PlaybackResult<()>> {
        Box::pin(async move {
            info!(track = %track.id, title = %track.title, position_ms, "resume at");
            Ok(())
        })
    }
}

/// In-memory catalog over a fixed track list.
///
/// Search terms are separated by ` OR `. A bare term matches titles and artists
/// case-insensitively; `title:` and `artist:` restrict the field. Other `field:value` terms (such
/// as `genre:`) are not indexed here and match every track.
#[derive(Debug, Default, Clone)]
pub struct StaticCatalog {
    tracks: Vec<Track>,
}

impl StaticCatalog {
    /// Catalog over a fixed track list.
    pub fn new(tracks: Vec<Track>) -> Self {
        Self { tracks }
    }

    /// Number of tracks.
    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    /// Whether the catalog has no tracks.
    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    fn matches(track: &Track, term: &str) -> bool {
        let (field, value) = match term.split_once(':') {
            Some((field, value)) => (Some(field.trim()), value.trim()),
            None => (None, term.trim()),
        };
        let value = value.to_lowercase();
        let in_title = || track.title.to_lowercase().contains(&value);
        let in_artists = || {
            track
                .artists
                .iter()
                .any(|artist| artist.to_lowercase().contains(&value))
        };
        match field {
            None => in_title() || in_artists(),
            Some("title") | Some("track") => in_title(),
            Some("artist") => in_artists(),
            Some(_) => true,
        }
    }
}

impl Catalog for StaticCatalog {
    fn lookup(&self, id: &str) -> BoxFuture<'static, PlaybackResult<Option<Track>>> {
        let found = self.tracks.iter().find(|track| track.id == id).cloned();
        Box::pin(async move { Ok(found) })
    }

    fn search(&self, query: &str, limit: usize) -> BoxFuture<'static, PlaybackResult<Vec<Track>>> {
        let terms: Vec<&str> = query
            .split(" OR ")
            .map(str::trim)
            .filter(|term| !term.is_empty())
            .collect();
        let found: Vec<Track> = if terms.is_empty() {
            Vec::new()
        } else {
            self.tracks
                .iter()
                .filter(|track| terms.iter().any(|term| Self::matches(track, term)))
                .take(limit)
                .cloned()
                .collect()
        };
        Box::pin(async move { Ok(found) })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn track(id: &str, title: &str) -> Track {
        Track {
            id: id.into(),
            uri: format!("{URI_PREFIX}{id}"),
            title: title.into(),
            image: String::new(),
            artists: vec!["Darude".into()],
            duration_ms: Some(180_000),
        }
    }

    #[test]
    fn direct_references_bypass_search() {
        assert_eq!(
            TrackQuery::parse("spotify:track:4uLU6hMCjMI75M1A2tKUQC"),
            TrackQuery::Direct("4uLU6hMCjMI75M1A2tKUQC".into())
        );
        assert_eq!(
            TrackQuery::parse("https://open.spotify.com/track/4uLU6hMCjMI75M1A2tKUQC?si=abc"),
            TrackQuery::Direct("4uLU6hMCjMI75M1A2tKUQC".into())
        );
        assert_eq!(
            TrackQuery::parse("open.spotify.com/intl-fr/track/4uLU6hMCjMI75M1A2tKUQC"),
            TrackQuery::Direct("4uLU6hMCjMI75M1A2tKUQC".into())
        );
        assert_eq!(
            TrackQuery::parse(" sandstorm "),
            TrackQuery::Search("sandstorm".into())
        );
    }

    #[test]
    fn links_to_other_hosts_are_searched() {
        assert!(matches!(
            TrackQuery::parse("https://example.com/open.spotify.com/track/abc"),
            TrackQuery::Search(_)
        ));
    }

    #[tokio::test]
    async fn static_catalog_resolves_by_id_and_text() {
        let catalog = StaticCatalog::new(vec![track("a1", "Sandstorm"), track("b2", "Levels")]);

        let direct = resolve(&catalog, &TrackQuery::Direct("b2".into())).await.unwrap();
        assert_eq!(direct.map(|t| t.title), Some("Levels".into()));

        let searched = resolve(&catalog, &TrackQuery::Search("sand".into())).await.unwrap();
        assert_eq!(searched.map(|t| t.id), Some("a1".into()));

        let missing = resolve(&catalog, &TrackQuery::Search("zzz".into())).await.unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn unindexed_fields_match_everything() {
        let catalog = StaticCatalog::new(vec![
            track("a1", "Sandstorm"),
            track("b2", "Levels"),
            track("c3", "Strobe"),
        ]);

        let seeds = catalog.search("genre:bass OR genre:party", 2).await.unwrap();
        assert_eq!(seeds.len(), 2);
        let by_title = catalog.search("title:strobe", 5).await.unwrap();
        assert_eq!(by_title.len(), 1);
    }
}
