//! Concert poster data model.
//!
//! Missing or unreadable values are the literal `"Unknown"`, supplied by the
//! model on instruction; nothing here substitutes values.

use std::collections::HashMap;
use std::fmt;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// CSV columns, in write order.
pub const CSV_HEADER: [&str; 9] = [
    "timestamp",
    "source_image",
    "band_name",
    "genre",
    "country",
    "venue",
    "location",
    "date",
    "event_name",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Concert {
    pub venue: String,
    pub location: String,
    pub date: String,
    /// Festival or named event, if the concert is part of one.
    pub event_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct BandInfo {
    pub band_name: String,
    pub concerts: Vec<Concert>,
}

/// What the extraction agent returns for one poster.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ConcertExtraction {
    pub bands: Vec<BandInfo>,
}

/// Enriched information about a band from web search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct BandEnrichment {
    pub genre: String,
    pub country: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct EnrichedBandInfo {
    pub band_name: String,
    pub genre: String,
    pub country: String,
    pub concerts: Vec<Concert>,
}

impl EnrichedBandInfo {
    pub fn from_parts(band: BandInfo, enrichment: BandEnrichment) -> Self {
        Self {
            band_name: band.band_name,
            genre: enrichment.genre,
            country: enrichment.country,
            concerts: band.concerts,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct EnrichedConcertExtraction {
    pub bands: Vec<EnrichedBandInfo>,
}

impl EnrichedConcertExtraction {
    /// One row per (band, concert) pair, all stamped with `timestamp`.
    pub fn rows(&self, timestamp: &str, source_image: &str) -> Vec<ConcertRow> {
        self.bands
            .iter()
            .flat_map(|band| {
                band.concerts.iter().map(move |concert| ConcertRow {
                    timestamp: timestamp.to_string(),
                    source_image: source_image.to_string(),
                    band_name: band.band_name.clone(),
                    genre: band.genre.clone(),
                    country: band.country.clone(),
                    venue: concert.venue.clone(),
                    location: concert.location.clone(),
                    date: concert.date.clone(),
                    event_name: concert.event_name.clone().unwrap_or_default(),
                })
            })
            .collect()
    }
}

/// One line of the output CSV. Field order matches [`CSV_HEADER`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConcertRow {
    pub timestamp: String,
    pub source_image: String,
    pub band_name: String,
    pub genre: String,
    pub country: String,
    pub venue: String,
    pub location: String,
    pub date: String,
    pub event_name: String,
}

impl ConcertRow {
    /// Values in column order.
    pub fn fields(&self) -> [&str; 9] {
        [
            &self.timestamp,
            &self.source_image,
            &self.band_name,
            &self.genre,
            &self.country,
            &self.venue,
            &self.location,
            &self.date,
            &self.event_name,
        ]
    }
}

/// Case-insensitive identity of a band name.
fn band_key(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Merge bands that share a name, ignoring case and surrounding whitespace.
///
/// The first occurrence is kept with its original spelling; concerts of
/// later duplicates are appended to it. Output is in first-seen order.
pub fn dedupe_bands(bands: Vec<BandInfo>) -> Vec<BandInfo> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut unique: Vec<BandInfo> = Vec::with_capacity(bands.len());

    for band in bands {
        match index.get(&band_key(&band.band_name)) {
            Some(&i) => unique[i].concerts.extend(band.concerts),
            None => {
                index.insert(band_key(&band.band_name), unique.len());
                unique.push(band);
            }
        }
    }
    unique
}

/// Merge several extractions into one list of bands, deduplicated across
/// all of them.
pub fn aggregate_by_band<I>(extractions: I) -> Vec<BandInfo>
where
    I: IntoIterator<Item = ConcertExtraction>,
{
    dedupe_bands(extractions.into_iter().flat_map(|e| e.bands).collect())
}

impl fmt::Display for Concert {
    /// `Venue: <venue> - <location> (<event>)` then `Date: <date>`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Venue: {} - {}", self.venue, self.location)?;
        if let Some(event) = self.event_name.as_deref().filter(|e| !e.is_empty()) {
            write!(f, " ({event})")?;
        }
        write!(f, "\nDate: {}", self.date)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn concert(venue: &str, event: Option<&str>) -> Concert {
        Concert {
            venue: venue.into(),
            location: "Helsinki".into(),
            date: "2025-06-27".into(),
            event_name: event.map(Into::into),
        }
    }

    fn band(name: &str, venues: &[&str]) -> BandInfo {
        BandInfo {
            band_name: name.into(),
            concerts: venues.iter().map(|v| concert(v, None)).collect(),
        }
    }

    #[test]
    fn dedupe_is_case_insensitive_and_keeps_first_spelling() {
        let bands = vec![
            band("Nightwish", &["Tavastia"]),
            band("Amorphis", &["Nosturi"]),
            band("  NIGHTWISH ", &["Tuska"]),
            band("nightwish", &["Ratina"]),
        ];

        let unique = dedupe_bands(bands);
        assert_eq!(unique.len(), 2);
        assert_eq!(unique[0].band_name, "Nightwish");
        let venues: Vec<&str> = unique[0].concerts.iter().map(|c| c.venue.as_str()).collect();
        assert_eq!(venues, vec!["Tavastia", "Tuska", "Ratina"]);
        assert_eq!(unique[1].band_name, "Amorphis");
    }

    #[test]
    fn dedupe_empty_input() {
        assert!(dedupe_bands(Vec::new()).is_empty());
    }

    #[test]
    fn aggregate_merges_across_extractions() {
        let first = ConcertExtraction {
            bands: vec![band("Sonata Arctica", &["Pakkahuone"])],
        };
        let second = ConcertExtraction {
            bands: vec![band("HIM", &["Tavastia"]), band("sonata arctica", &["Tuska"])],
        };

        let merged = aggregate_by_band([first, second]);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].band_name, "Sonata Arctica");
        assert_eq!(merged[0].concerts.len(), 2);
        assert_eq!(merged[1].band_name, "HIM");
    }

    #[test]
    fn rows_flatten_band_concert_pairs() {
        let extraction = EnrichedConcertExtraction {
            bands: vec![
                EnrichedBandInfo::from_parts(
                    BandInfo {
                        band_name: "Nightwish".into(),
                        concerts: vec![concert("Tavastia", None), concert("Tuska", Some("Tuska Open Air"))],
                    },
                    BandEnrichment {
                        genre: "Symphonic Metal".into(),
                        country: "Finland".into(),
                    },
                ),
                EnrichedBandInfo::from_parts(
                    band("Ghost", &["Ice Hall"]),
                    BandEnrichment {
                        genre: "Heavy Metal".into(),
                        country: "Sweden".into(),
                    },
                ),
            ],
        };

        let rows = extraction.rows("2025-01-01T12:00:00", "poster.png");
        assert_eq!(rows.len(), 3);
        assert!(rows.iter().all(|r| r.timestamp == "2025-01-01T12:00:00"));
        assert!(rows.iter().all(|r| r.fields().len() == CSV_HEADER.len()));
        assert_eq!(rows[0].event_name, "");
        assert_eq!(rows[1].event_name, "Tuska Open Air");
        assert_eq!(rows[2].band_name, "Ghost");
        assert_eq!(rows[2].country, "Sweden");
        assert_eq!(
            rows[1].fields(),
            [
                "2025-01-01T12:00:00",
                "poster.png",
                "Nightwish",
                "Symphonic Metal",
                "Finland",
                "Tuska",
                "Helsinki",
                "2025-06-27",
                "Tuska Open Air",
            ]
        );
    }

    #[test]
    fn band_without_concerts_yields_no_rows() {
        let extraction = EnrichedConcertExtraction {
            bands: vec![EnrichedBandInfo {
                band_name: "Lonely".into(),
                genre: "Unknown".into(),
                country: "Unknown".into(),
                concerts: vec![],
            }],
        };
        assert!(extraction.rows("t", "x.png").is_empty());
    }

    #[test]
    fn extraction_accepts_null_event_name() {
        let json = r#"{"bands":[{"band_name":"Kent","concerts":[
            {"venue":"Unknown","location":"Stockholm","date":"Unknown","event_name":null}]}]}"#;
        let extraction: ConcertExtraction = serde_json::from_str(json).unwrap();
        assert_eq!(extraction.bands[0].concerts[0].event_name, None);
    }

    #[test]
    fn concert_display_includes_event_when_present() {
        assert_eq!(
            concert("Tuska", Some("Tuska Open Air")).to_string(),
            "Venue: Tuska - Helsinki (Tuska Open Air)\nDate: 2025-06-27"
        );
        assert_eq!(
            concert("Tavastia", None).to_string(),
            "Venue: Tavastia - Helsinki\nDate: 2025-06-27"
        );
    }

    #[test]
    fn extraction_schema_lists_band_fields() {
        let schema = serde_json::to_value(schemars::schema_for!(ConcertExtraction)).unwrap();
        assert!(schema["properties"]["bands"].is_object());
        assert!(schema["definitions"]["Concert"]["properties"]["event_name"].is_object());
    }
}
