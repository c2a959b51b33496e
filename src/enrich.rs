//! # Catalog Enrichment
//!
//! Fills node attributes from an external music catalog: track popularity
//! and duration, audio features, and artist popularity and genres.
//!
//! The catalog itself sits behind [`EnrichmentGateway`]; this module only
//! batches ids, merges the returned records with set-once semantics, and
//! keeps going when a batch fails. Failures are logged and collected in the
//! [`EnrichmentReport`] instead of aborting the pass.
//!
//! Node ids are catalog URIs (`spotify:track:<id>`); batches carry the
//! object id, i.e. the last `:`-separated segment.

use crate::attributes::{keys, AttributeValue};
use crate::graph::{GraphStore, NodeIndex};
use anyhow::Context;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Largest batch the catalog accepts.
pub const MAX_BATCH_SIZE: usize = 50;

/// Track details as returned by the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackRecord {
    pub uri: String,
    pub popularity: i64,
    pub duration_ms: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioFeatureRecord {
    pub uri: String,
    pub acousticness: f64,
    pub danceability: f64,
    pub duration_ms: i64,
    pub energy: f64,
    pub instrumentalness: f64,
    pub key: i64,
    pub liveness: f64,
    pub loudness: f64,
    pub mode: i64,
    pub speechiness: f64,
    pub tempo: f64,
    pub time_signature: i64,
    pub valence: f64,
}

impl AudioFeatureRecord {
    fn fields(&self) -> [(&'static str, AttributeValue); 13] {
        [
            (keys::ACOUSTICNESS, self.acousticness.into()),
            (keys::DANCEABILITY, self.danceability.into()),
            (keys::DURATION_MS, self.duration_ms.into()),
            (keys::ENERGY, self.energy.into()),
            (keys::INSTRUMENTALNESS, self.instrumentalness.into()),
            (keys::KEY, self.key.into()),
            (keys::LIVENESS, self.liveness.into()),
            (keys::LOUDNESS, self.loudness.into()),
            (keys::MODE, self.mode.into()),
            (keys::SPEECHINESS, self.speechiness.into()),
            (keys::TEMPO, self.tempo.into()),
            (keys::TIME_SIGNATURE, self.time_signature.into()),
            (keys::VALENCE, self.valence.into()),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtistRecord {
    pub uri: String,
    pub popularity: i64,
    #[serde(default)]
    pub genres: Vec<String>,
}

/// Batch access to the external catalog.
pub trait EnrichmentGateway {
    /// # Errors
    ///
    /// Any transport or decoding failure for this batch.
    fn fetch_track_batch(&mut self, ids: &[String]) -> anyhow::Result<Vec<TrackRecord>>;

    /// # Errors
    ///
    /// Any transport or decoding failure for this batch.
    fn fetch_audio_feature_batch(&mut self, ids: &[String]) -> anyhow::Result<Vec<AudioFeatureRecord>>;

    /// # Errors
    ///
    /// Any transport or decoding failure for this batch.
    fn fetch_artist_batch(&mut self, ids: &[String]) -> anyhow::Result<Vec<ArtistRecord>>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnrichmentConfig {
    /// Ids per request, clamped to [`MAX_BATCH_SIZE`].
    pub batch_size: usize,
    /// How many of the most frequent genres to keep on artist tracks.
    pub top_genres: usize,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            batch_size: MAX_BATCH_SIZE,
            top_genres: 10,
        }
    }
}

/// A batch the gateway could not serve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchFailure {
    pub batch: usize,
    pub ids: Vec<String>,
    pub error: String,
}

/// Outcome of one enrichment pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnrichmentReport {
    pub batches: usize,
    pub records: usize,
    /// Attribute writes that took effect (set-once conflicts excluded).
    pub fields_written: usize,
    /// Records whose URI matches no node.
    pub unmatched: usize,
    pub failures: Vec<BatchFailure>,
}

impl EnrichmentReport {
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Object id of a catalog URI: the last `:`-separated segment.
#[must_use]
pub fn object_id(uri: &str) -> &str {
    uri.rsplit(':').next().unwrap_or(uri)
}

/// Split `ids` into comma-free batches of at most `size` (clamped to 1..=50).
#[must_use]
pub fn batches(ids: &[String], size: usize) -> Vec<&[String]> {
    ids.chunks(size.clamp(1, MAX_BATCH_SIZE)).collect()
}

/// Most frequent genres as `(genre, count)`, ties ordered by name.
#[must_use]
pub fn top_genres(records: &[ArtistRecord], n: usize) -> Vec<(String, usize)> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for genre in records.iter().flat_map(|r| &r.genres) {
        *counts.entry(genre.as_str()).or_default() += 1;
    }
    let mut ranked: Vec<(String, usize)> = counts
        .into_iter()
        .map(|(g, c)| (g.to_string(), c))
        .collect();
    // BTreeMap order is by name; a stable sort keeps it for equal counts
    ranked.sort_by(|a, b| b.1.cmp(&a.1));
    ranked.truncate(n);
    ranked
}

/// Drives a gateway over a graph.
#[derive(Debug)]
pub struct Enricher<G> {
    gateway: G,
    config: EnrichmentConfig,
}

impl<G: EnrichmentGateway> Enricher<G> {
    #[must_use]
    pub fn new(gateway: G, config: EnrichmentConfig) -> Self {
        if config.batch_size > MAX_BATCH_SIZE {
            warn!(
                "Batch size {} exceeds the catalog limit, using {MAX_BATCH_SIZE}",
                config.batch_size
            );
        }
        Self { gateway, config }
    }

    pub fn gateway_mut(&mut self) -> &mut G {
        &mut self.gateway
    }

    pub fn into_gateway(self) -> G {
        self.gateway
    }

    /// Fetch popularity and duration for every track node.
    pub fn enrich_tracks(&mut self, graph: &mut GraphStore) -> EnrichmentReport {
        let lookup = object_lookup(graph);
        let ids: Vec<String> = graph.ids().map(|id| object_id(id).to_string()).collect();
        let (records, mut report) =
            self.run_batches("tracks", &ids, |g, batch| g.fetch_track_batch(batch));

        for record in records {
            let Some(&idx) = lookup.get(object_id(&record.uri)) else {
                report.unmatched += 1;
                continue;
            };
            report.fields_written += usize::from(graph.set_attribute_once_at(idx, keys::POPULARITY, record.popularity));
            report.fields_written += usize::from(graph.set_attribute_once_at(idx, keys::DURATION_MS, record.duration_ms));
        }
        log_report("tracks", &report);
        report
    }

    /// Fetch the audio feature vector for every track node.
    pub fn enrich_audio_features(&mut self, graph: &mut GraphStore) -> EnrichmentReport {
        let lookup = object_lookup(graph);
        let ids: Vec<String> = graph.ids().map(|id| object_id(id).to_string()).collect();
        let (records, mut report) = self.run_batches("audio-features", &ids, |g, batch| {
            g.fetch_audio_feature_batch(batch)
        });

        for record in records {
            let Some(&idx) = lookup.get(object_id(&record.uri)) else {
                report.unmatched += 1;
                continue;
            };
            for (key, value) in record.fields() {
                report.fields_written += usize::from(graph.set_attribute_once_at(idx, key, value));
            }
        }
        log_report("audio-features", &report);
        report
    }

    /// Fetch artists referenced by the joined `artist_uri` attribute and copy
    /// their popularity and (top) genres onto each of their tracks.
    ///
    /// Genres are stored as one `", "`-joined text value, keeping only the
    /// configured number of most frequent genres across all fetched artists.
    pub fn enrich_artists(&mut self, graph: &mut GraphStore) -> EnrichmentReport {
        let mut tracks_by_artist: BTreeMap<String, Vec<NodeIndex>> = BTreeMap::new();
        for idx in 0..graph.node_count() {
            if let Some(uri) = graph.attributes_at(idx).get(keys::ARTIST_URI).and_then(AttributeValue::as_str) {
                tracks_by_artist
                    .entry(object_id(uri).to_string())
                    .or_default()
                    .push(idx);
            }
        }
        if tracks_by_artist.is_empty() {
            warn!("No artist_uri attributes found; join the name table before artist enrichment");
        }

        let ids: Vec<String> = tracks_by_artist.keys().cloned().collect();
        let (records, mut report) =
            self.run_batches("artists", &ids, |g, batch| g.fetch_artist_batch(batch));

        let kept: Vec<String> = top_genres(&records, self.config.top_genres)
            .into_iter()
            .map(|(genre, _)| genre)
            .collect();
        debug!("Keeping top genres: {kept:?}");

        for record in &records {
            let Some(tracks) = tracks_by_artist.get(object_id(&record.uri)) else {
                report.unmatched += 1;
                continue;
            };
            let genres = record
                .genres
                .iter()
                .filter(|g| kept.contains(g))
                .map(String::as_str)
                .collect::<Vec<_>>()
                .join(", ");
            for &idx in tracks {
                report.fields_written +=
                    usize::from(graph.set_attribute_once_at(idx, keys::ARTIST_POPULARITY, record.popularity));
                report.fields_written += usize::from(graph.set_attribute_once_at(idx, keys::GENRES, genres.as_str()));
            }
        }
        log_report("artists", &report);
        report
    }

    fn run_batches<T, F>(&mut self, stage: &str, ids: &[String], mut fetch: F) -> (Vec<T>, EnrichmentReport)
    where
        F: FnMut(&mut G, &[String]) -> anyhow::Result<Vec<T>>,
    {
        let mut report = EnrichmentReport::default();
        let mut records = Vec::new();

        for (i, batch) in batches(ids, self.config.batch_size).into_iter().enumerate() {
            report.batches += 1;
            let result = fetch(&mut self.gateway, batch)
                .with_context(|| format!("{stage} batch {i} ({} ids)", batch.len()));
            match result {
                Ok(mut fetched) => {
                    report.records += fetched.len();
                    records.append(&mut fetched);
                }
                Err(err) => {
                    warn!("Enrichment batch failed: {err:#}");
                    report.failures.push(BatchFailure {
                        batch: i,
                        ids: batch.to_vec(),
                        error: format!("{err:#}"),
                    });
                }
            }
        }
        (records, report)
    }
}

fn object_lookup(graph: &GraphStore) -> HashMap<String, NodeIndex> {
    graph
        .ids()
        .enumerate()
        .map(|(idx, id)| (object_id(id).to_string(), idx))
        .collect()
}

fn log_report(stage: &str, report: &EnrichmentReport) {
    info!(
        "Enriched {stage}: {} records over {} batches, {} fields written, {} failed batches",
        report.records,
        report.batches,
        report.fields_written,
        report.failures.len()
    );
    if report.unmatched > 0 {
        warn!("{} {stage} records matched no node", report.unmatched);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::NameRecord;
    use anyhow::bail;

    /// Serves tracks from a fixed catalog and fails chosen batch numbers.
    #[derive(Default)]
    struct MockCatalog {
        calls: usize,
        fail_calls: Vec<usize>,
        requested: Vec<Vec<String>>,
        artists: Vec<ArtistRecord>,
    }

    impl MockCatalog {
        fn next_call(&mut self, ids: &[String]) -> anyhow::Result<()> {
            let call = self.calls;
            self.calls += 1;
            self.requested.push(ids.to_vec());
            if self.fail_calls.contains(&call) {
                bail!("HTTP 503 on call {call}");
            }
            Ok(())
        }
    }

    impl EnrichmentGateway for MockCatalog {
        fn fetch_track_batch(&mut self, ids: &[String]) -> anyhow::Result<Vec<TrackRecord>> {
            self.next_call(ids)?;
            Ok(ids
                .iter()
                .enumerate()
                .map(|(i, id)| TrackRecord {
                    uri: format!("spotify:track:{id}"),
                    popularity: i64::try_from(i).unwrap(),
                    duration_ms: 200_000,
                })
                .collect())
        }

        fn fetch_audio_feature_batch(&mut self, ids: &[String]) -> anyhow::Result<Vec<AudioFeatureRecord>> {
            self.next_call(ids)?;
            Ok(ids
                .iter()
                .map(|id| AudioFeatureRecord {
                    uri: format!("spotify:track:{id}"),
                    acousticness: 0.1,
                    danceability: 0.8,
                    duration_ms: 1,
                    energy: 0.7,
                    instrumentalness: 0.0,
                    key: 5,
                    liveness: 0.2,
                    loudness: -6.0,
                    mode: 1,
                    speechiness: 0.05,
                    tempo: 120.0,
                    time_signature: 4,
                    valence: 0.6,
                })
                .collect())
        }

        fn fetch_artist_batch(&mut self, ids: &[String]) -> anyhow::Result<Vec<ArtistRecord>> {
            self.next_call(ids)?;
            Ok(self
                .artists
                .iter()
                .filter(|a| ids.iter().any(|id| id == object_id(&a.uri)))
                .cloned()
                .collect())
        }
    }

    fn chain(n: usize) -> GraphStore {
        let ids: Vec<String> = (0..n).map(|i| format!("spotify:track:t{i}")).collect();
        let edges: Vec<(&str, &str, f64)> = ids
            .windows(2)
            .map(|w| (w[0].as_str(), w[1].as_str(), 1.0))
            .collect();
        GraphStore::from_edges(&edges).unwrap()
    }

    #[test]
    fn test_object_id() {
        assert_eq!(object_id("spotify:track:abc123"), "abc123");
        assert_eq!(object_id("plain"), "plain");
    }

    #[test]
    fn test_batch_size_is_clamped() {
        let ids: Vec<String> = (0..120).map(|i| i.to_string()).collect();
        let sizes: Vec<usize> = batches(&ids, 500).iter().map(|b| b.len()).collect();
        assert_eq!(sizes, vec![50, 50, 20]);
        assert_eq!(batches(&ids, 0).len(), 120);
    }

    #[test]
    fn test_enrich_tracks_survives_failed_batch() {
        let mut graph = chain(5);
        let catalog = MockCatalog {
            fail_calls: vec![1],
            ..MockCatalog::default()
        };
        let config = EnrichmentConfig {
            batch_size: 2,
            ..EnrichmentConfig::default()
        };
        let mut enricher = Enricher::new(catalog, config);
        let report = enricher.enrich_tracks(&mut graph);

        assert_eq!(report.batches, 3);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].ids, vec!["t2".to_string(), "t3".to_string()]);
        assert!(report.failures[0].error.contains("HTTP 503"));
        assert!(!report.is_complete());

        assert!(graph.attributes("spotify:track:t0").unwrap().contains(keys::POPULARITY));
        assert!(!graph.attributes("spotify:track:t2").unwrap().contains(keys::POPULARITY));
        assert!(graph.attributes("spotify:track:t4").unwrap().contains(keys::DURATION_MS));
        assert_eq!(enricher.gateway_mut().requested[0], vec!["t0".to_string(), "t1".to_string()]);
    }

    #[test]
    fn test_audio_features_do_not_overwrite_duration() {
        let mut graph = chain(2);
        let mut enricher = Enricher::new(MockCatalog::default(), EnrichmentConfig::default());
        enricher.enrich_tracks(&mut graph);
        let report = enricher.enrich_audio_features(&mut graph);

        // 13 fields per track, duration already set
        assert_eq!(report.fields_written, 2 * 12);
        let attrs = graph.attributes("spotify:track:t0").unwrap();
        assert_eq!(attrs.numeric("t0", keys::DURATION_MS).unwrap(), 200_000.0);
        assert_eq!(attrs.numeric("t0", keys::TEMPO).unwrap(), 120.0);
        let vector: Vec<String> = keys::AUDIO_FEATURES.iter().map(|k| (*k).to_string()).collect();
        assert_eq!(attrs.numeric_vector("t0", &vector).unwrap().len(), 12);
    }

    #[test]
    fn test_enrich_artists_copies_to_tracks() {
        let mut graph = chain(3);
        let name = |song: &str, artist: &str| NameRecord {
            song_id: song.to_string(),
            song_name: song.to_string(),
            artist_name: artist.to_string(),
            album_name: "album".to_string(),
            artist_uri: format!("spotify:artist:{artist}"),
            album_uri: "spotify:album:x".to_string(),
        };
        graph.join_names(&[
            name("spotify:track:t0", "a1"),
            name("spotify:track:t1", "a1"),
            name("spotify:track:t2", "a2"),
        ]);

        let catalog = MockCatalog {
            artists: vec![
                ArtistRecord {
                    uri: "spotify:artist:a1".into(),
                    popularity: 80,
                    genres: vec!["pop".into(), "dance pop".into()],
                },
                ArtistRecord {
                    uri: "spotify:artist:a2".into(),
                    popularity: 40,
                    genres: vec!["pop".into(), "zydeco".into()],
                },
            ],
            ..MockCatalog::default()
        };
        let config = EnrichmentConfig {
            top_genres: 2,
            ..EnrichmentConfig::default()
        };
        let mut enricher = Enricher::new(catalog, config);
        let report = enricher.enrich_artists(&mut graph);
        assert!(report.is_complete());
        assert_eq!(enricher.gateway_mut().requested, vec![vec!["a1".to_string(), "a2".to_string()]]);

        let t1 = graph.attributes("spotify:track:t1").unwrap();
        assert_eq!(t1.numeric("t1", keys::ARTIST_POPULARITY).unwrap(), 80.0);
        assert_eq!(t1.text("t1", keys::GENRES).unwrap(), "pop, dance pop");
        // "zydeco" ties with "dance pop" on count but sorts after it
        let t2 = graph.attributes("spotify:track:t2").unwrap();
        assert_eq!(t2.text("t2", keys::GENRES).unwrap(), "pop");
    }

    #[test]
    fn test_top_genres_ranking() {
        let artist = |genres: &[&str]| ArtistRecord {
            uri: "spotify:artist:x".into(),
            popularity: 1,
            genres: genres.iter().map(|g| (*g).to_string()).collect(),
        };
        let records = vec![artist(&["rock", "indie"]), artist(&["indie"]), artist(&["jazz"])];
        assert_eq!(
            top_genres(&records, 2),
            vec![("indie".to_string(), 2), ("jazz".to_string(), 1)]
        );
    }

    #[test]
    fn test_unmatched_records_are_counted() {
        struct Stray;
        impl EnrichmentGateway for Stray {
            fn fetch_track_batch(&mut self, _ids: &[String]) -> anyhow::Result<Vec<TrackRecord>> {
                Ok(vec![TrackRecord {
                    uri: "spotify:track:elsewhere".into(),
                    popularity: 1,
                    duration_ms: 1,
                }])
            }
            fn fetch_audio_feature_batch(&mut self, _ids: &[String]) -> anyhow::Result<Vec<AudioFeatureRecord>> {
                Ok(Vec::new())
            }
            fn fetch_artist_batch(&mut self, _ids: &[String]) -> anyhow::Result<Vec<ArtistRecord>> {
                Ok(Vec::new())
            }
        }
        let mut graph = chain(2);
        let report = Enricher::new(Stray, EnrichmentConfig::default()).enrich_tracks(&mut graph);
        assert_eq!(report.unmatched, 1);
        assert_eq!(report.fields_written, 0);
    }
}
