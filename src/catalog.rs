//! The weighted catalog of playable items.
//!
//! The catalog is loaded once at process start from an external CSV dataset
//! and is read-only from then on, shared by every viewer worker without
//! locking. Loading is deliberately forgiving: rows missing any field are
//! discarded and a source that yields nothing usable degrades to a synthetic
//! single-item catalog, so callers never observe an empty catalog. The
//! sampling step is pure and independent of where the rows came from.

use std::path::Path;

use rand::Rng;
use rand::distr::{Distribution, weighted::WeightedIndex};
use serde::Deserialize;
use tracing::{debug, warn};

/// External sources record runtime in minutes; sessions count seconds.
const SECONDS_PER_MINUTE: f64 = 60.0;

#[derive(thiserror::Error, Debug)]
/// Errors produced by [`Catalog`].
pub enum Error {
    /// Reading the catalog source failed.
    #[error("failed to read catalog source: {0}")]
    Csv(#[from] csv::Error),
    /// Every row in the source was discarded.
    #[error("catalog source contained no usable rows")]
    NoUsableRows,
    /// The computed weights do not form a valid distribution.
    #[error("invalid catalog weights: {0}")]
    Weights(#[from] rand::distr::weighted::Error),
}

#[derive(Debug, Clone, PartialEq)]
/// One playable item. Immutable after load.
pub struct CatalogItem {
    /// Source id of the item.
    pub id: String,
    /// Title of the item.
    pub title: String,
    /// Total runtime in seconds, always positive.
    pub duration_seconds: u32,
    /// Selection weight in `(0, 1]`, proportional to draw probability. The
    /// highest-scored item in the catalog has weight exactly 1.0.
    pub weight: f64,
}

/// A raw catalog row as it appears in the source dataset. Extra columns are
/// ignored; listed columns may be absent or empty.
#[derive(Debug, Deserialize)]
struct RawRow {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    runtime: Option<f64>,
    #[serde(default)]
    imdb_score: Option<f64>,
}

/// A row that survived validation, score not yet normalized.
#[derive(Debug)]
struct ScoredRow {
    id: String,
    title: String,
    duration_seconds: u32,
    score: f64,
}

impl RawRow {
    /// Validate this row, discarding it if any field is missing, empty or
    /// out of domain. Runtime is converted from minutes to seconds here.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn validate(self) -> Option<ScoredRow> {
        let id = self.id.filter(|id| !id.trim().is_empty())?;
        let title = self.title.filter(|title| !title.trim().is_empty())?;
        let runtime_minutes = self.runtime.filter(|m| m.is_finite() && *m > 0.0)?;
        let score = self.imdb_score.filter(|s| s.is_finite() && *s > 0.0)?;

        let duration_seconds = (runtime_minutes * SECONDS_PER_MINUTE).round() as u32;
        Some(ScoredRow {
            id,
            title,
            // A sub-second runtime still has to be watchable.
            duration_seconds: duration_seconds.max(1),
            score,
        })
    }
}

/// Normalize scores so that the best-scored row has weight exactly 1.0.
fn normalize(scored: Vec<ScoredRow>) -> Vec<CatalogItem> {
    let max_score = scored.iter().map(|row| row.score).fold(f64::MIN, f64::max);

    scored
        .into_iter()
        .map(|row| CatalogItem {
            id: row.id,
            title: row.title,
            duration_seconds: row.duration_seconds,
            weight: row.score / max_score,
        })
        .collect()
}

#[derive(Debug, Clone)]
/// The weighted catalog.
///
/// Each [`Catalog::draw`] is an independent weighted selection; the same item
/// may be drawn again on a later call.
pub struct Catalog {
    items: Vec<CatalogItem>,
    index: WeightedIndex<f64>,
}

impl Catalog {
    /// Build a catalog directly from weighted items.
    ///
    /// # Errors
    ///
    /// Function will return an error if `items` is empty or the weights do
    /// not form a valid distribution.
    pub fn new(items: Vec<CatalogItem>) -> Result<Self, Error> {
        if items.is_empty() {
            return Err(Error::NoUsableRows);
        }
        let index = WeightedIndex::new(items.iter().map(|item| item.weight))?;
        Ok(Self { items, index })
    }

    /// Load the catalog from a CSV source, falling back to the synthetic
    /// single-item catalog on any failure. This is the entrypoint used at
    /// process start.
    #[must_use]
    pub fn load(path: &Path) -> Self {
        match Self::from_csv(path) {
            Ok(catalog) => {
                debug!(items = catalog.len(), "catalog loaded");
                catalog
            }
            Err(err) => {
                warn!("falling back to synthetic catalog: {err}");
                Self::fallback()
            }
        }
    }

    /// Load the catalog from a CSV source with columns `id`, `title`,
    /// `runtime` (minutes) and `imdb_score`. Rows missing any of these are
    /// discarded.
    ///
    /// # Errors
    ///
    /// Function will return an error if the source cannot be read or yields
    /// no usable rows.
    pub fn from_csv(path: &Path) -> Result<Self, Error> {
        let mut reader = csv::Reader::from_path(path)?;

        let mut scored = Vec::new();
        for record in reader.deserialize::<RawRow>() {
            let row = match record {
                Ok(row) => row,
                Err(err) => {
                    debug!("discarding unreadable catalog row: {err}");
                    continue;
                }
            };
            if let Some(valid) = row.validate() {
                scored.push(valid);
            }
        }

        if scored.is_empty() {
            return Err(Error::NoUsableRows);
        }
        Self::new(normalize(scored))
    }

    /// The synthetic catalog used when no external source is usable.
    ///
    /// # Panics
    ///
    /// None known: the fallback item is a fixed, valid distribution.
    #[must_use]
    pub fn fallback() -> Self {
        let items = vec![CatalogItem {
            id: "unknown".to_string(),
            title: "Unknown".to_string(),
            duration_seconds: 300,
            weight: 1.0,
        }];
        Self::new(items).expect("fallback catalog is nonempty with weight 1.0")
    }

    /// Draw one item, weight-proportionally. Independent per call.
    pub fn draw<R>(&self, rng: &mut R) -> &CatalogItem
    where
        R: Rng + ?Sized,
    {
        &self.items[self.index.sample(rng)]
    }

    /// All items in this catalog.
    #[must_use]
    pub fn items(&self) -> &[CatalogItem] {
        &self.items
    }

    /// Number of items in this catalog.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Always false: construction rejects empty catalogs.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use proptest::{prop_assert, proptest};
    use rand::{SeedableRng, rngs::StdRng};

    use super::{Catalog, Error, RawRow, ScoredRow, normalize};

    fn write_catalog(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        file.write_all(contents.as_bytes()).expect("write");
        file
    }

    #[test]
    fn loads_rows_and_converts_minutes() -> Result<(), Error> {
        let file = write_catalog(
            "id,title,genre,runtime,imdb_score\n\
             m1,First,drama,90,8.0\n\
             m2,Second,comedy,120,4.0\n",
        );

        let catalog = Catalog::from_csv(file.path())?;
        assert_eq!(catalog.len(), 2);

        let first = &catalog.items()[0];
        assert_eq!(first.duration_seconds, 90 * 60);
        assert!((first.weight - 1.0).abs() < f64::EPSILON);

        let second = &catalog.items()[1];
        assert_eq!(second.duration_seconds, 120 * 60);
        assert!((second.weight - 0.5).abs() < f64::EPSILON);
        Ok(())
    }

    #[test]
    fn discards_incomplete_rows() -> Result<(), Error> {
        let file = write_catalog(
            "id,title,runtime,imdb_score\n\
             m1,Keep,90,8.0\n\
             ,NoId,90,8.0\n\
             m3,,90,8.0\n\
             m4,NoRuntime,,8.0\n\
             m5,NoScore,90,\n\
             m6,ZeroRuntime,0,8.0\n\
             m7,NegativeScore,90,-1.0\n",
        );

        let catalog = Catalog::from_csv(file.path())?;
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog.items()[0].id, "m1");
        Ok(())
    }

    #[test]
    fn empty_source_falls_back() {
        let file = write_catalog("id,title,runtime,imdb_score\n");

        let catalog = Catalog::load(file.path());
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog.items()[0].id, "unknown");
        assert_eq!(catalog.items()[0].duration_seconds, 300);
        assert!((catalog.items()[0].weight - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn missing_source_falls_back() {
        let catalog = Catalog::load(std::path::Path::new("/nonexistent/catalog.csv"));
        assert_eq!(catalog.items()[0].id, "unknown");
    }

    #[test]
    fn draw_respects_weights() -> Result<(), Error> {
        let file = write_catalog(
            "id,title,runtime,imdb_score\n\
             heavy,Heavy,90,9.9\n\
             light,Light,90,0.1\n",
        );
        let catalog = Catalog::from_csv(file.path())?;

        let mut rng = StdRng::seed_from_u64(41);
        let draws = 1_000;
        let heavy = (0..draws)
            .filter(|_| catalog.draw(&mut rng).id == "heavy")
            .count();

        // Heavy carries 99% of the mass; leave generous slack for the rng.
        assert!(heavy > draws * 9 / 10, "heavy drawn {heavy}/{draws} times");
        Ok(())
    }

    #[test]
    fn quoted_titles_survive() -> Result<(), Error> {
        let file = write_catalog(
            "id,title,runtime,imdb_score\n\
             m1,\"Comma, The Movie\",90,8.0\n",
        );
        let catalog = Catalog::from_csv(file.path())?;
        assert_eq!(catalog.items()[0].title, "Comma, The Movie");
        Ok(())
    }

    proptest! {
        #[test]
        fn weights_are_normalized(scores in proptest::collection::vec(0.01_f64..100.0, 1..32)) {
            let rows: Vec<ScoredRow> = scores
                .iter()
                .enumerate()
                .map(|(i, score)| {
                    RawRow {
                        id: Some(format!("m{i}")),
                        title: Some(format!("Title {i}")),
                        runtime: Some(90.0),
                        imdb_score: Some(*score),
                    }
                    .validate()
                    .expect("row is valid")
                })
                .collect();

            let items = normalize(rows);
            let max_weight = items.iter().map(|item| item.weight).fold(f64::MIN, f64::max);

            prop_assert!((max_weight - 1.0).abs() < f64::EPSILON);
            for item in &items {
                prop_assert!(item.weight > 0.0 && item.weight <= 1.0);
            }
        }
    }
}
