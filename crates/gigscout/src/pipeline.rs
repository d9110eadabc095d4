use std::fmt::Write as _;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures::future::{join_all, try_join_all};
use tracing::{error, info};

use crate::agent::AgentRunner;
use crate::concert::{
    BandEnrichment, BandInfo, ConcertExtraction, EnrichedBandInfo, EnrichedConcertExtraction,
    dedupe_bands,
};
use crate::error::Error;
use crate::llm::LlmProvider;
use crate::llm::types::{ContentBlock, WebSearchOptions};
use crate::media::{is_supported_image, media_type_for};
use crate::sink::CsvSink;

pub const EXTRACTION_INSTRUCTIONS: &str = "\
Extract concert information from the image.
For each band visible, extract:
- The band name
- The venue(s) where they play
- The location of each venue
- The date of each concert
- The event/festival name (if it's part of a named event like a festival)
If any information is unclear or missing, use \"Unknown\" as the value.
Leave event_name as null if there's no specific event/festival name.";

pub const EXTRACTION_PROMPT: &str = "Extract all concert information from this image.";

pub const ENRICHMENT_INSTRUCTIONS: &str = "\
You are given a band name. Use web search to find information about the band.
Find:
- The music genre(s) of the band (e.g., \"Rock\", \"Heavy Metal\", \"Pop\")
- The country of origin (e.g., \"USA\", \"UK\", \"Sweden\")
If you cannot find the information, use \"Unknown\" as the value.";

pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(500);

/// Turns a poster image into structured concert data.
pub trait ConcertExtractor: Send + Sync {
    fn extract(
        &self,
        image: &[u8],
        media_type: &str,
    ) -> impl Future<Output = Result<ConcertExtraction, Error>> + Send;
}

/// Looks up genre and country for a band.
pub trait BandEnricher: Send + Sync {
    fn enrich(&self, band_name: &str)
    -> impl Future<Output = Result<BandEnrichment, Error>> + Send;
}

/// Extraction backed by a vision-capable model.
pub struct AgentExtractor<P: LlmProvider> {
    agent: AgentRunner<P>,
}

impl<P: LlmProvider> AgentExtractor<P> {
    pub fn new(provider: Arc<P>, max_tokens: u32) -> Self {
        let agent = AgentRunner::builder(provider)
            .name("extraction")
            .instructions(EXTRACTION_INSTRUCTIONS)
            .max_tokens(max_tokens)
            .build();
        Self { agent }
    }
}

impl<P: LlmProvider> ConcertExtractor for AgentExtractor<P> {
    async fn extract(&self, image: &[u8], media_type: &str) -> Result<ConcertExtraction, Error> {
        let content = vec![
            ContentBlock::text(EXTRACTION_PROMPT),
            ContentBlock::image(media_type, image),
        ];
        let output = self
            .agent
            .execute_structured::<ConcertExtraction>(content)
            .await?;
        Ok(output.value)
    }
}

/// Enrichment backed by a model with provider-side web search.
pub struct WebSearchEnricher<P: LlmProvider> {
    agent: AgentRunner<P>,
}

impl<P: LlmProvider> WebSearchEnricher<P> {
    pub fn new(provider: Arc<P>, web_search: WebSearchOptions, max_tokens: u32) -> Self {
        let agent = AgentRunner::builder(provider)
            .name("enrichment")
            .instructions(ENRICHMENT_INSTRUCTIONS)
            .web_search(web_search)
            .max_tokens(max_tokens)
            .build();
        Self { agent }
    }
}

pub fn enrichment_prompt(band_name: &str) -> String {
    format!("Find the genre and country of origin for the band: {band_name}")
}

impl<P: LlmProvider> BandEnricher for WebSearchEnricher<P> {
    async fn enrich(&self, band_name: &str) -> Result<BandEnrichment, Error> {
        let content = vec![ContentBlock::text(enrichment_prompt(band_name))];
        let output = self
            .agent
            .execute_structured::<BandEnrichment>(content)
            .await?;
        Ok(output.value)
    }
}

/// Result of one successfully processed image.
#[derive(Debug, Clone)]
pub struct ProcessedImage {
    pub source_image: String,
    pub extraction: EnrichedConcertExtraction,
    pub rows_written: usize,
}

/// extract → dedupe → enrich → append, for one image at a time.
pub struct ConcertPipeline<E, B> {
    extractor: E,
    enricher: B,
    sink: CsvSink,
    settle_delay: Duration,
}

impl<E: ConcertExtractor, B: BandEnricher> ConcertPipeline<E, B> {
    pub fn new(extractor: E, enricher: B, sink: CsvSink) -> Self {
        Self {
            extractor,
            enricher,
            sink,
            settle_delay: DEFAULT_SETTLE_DELAY,
        }
    }

    /// Pause before reading a file so its writer can finish.
    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    pub fn sink(&self) -> &CsvSink {
        &self.sink
    }

    /// Run the whole pipeline for `path`.
    ///
    /// Paths without a supported image extension are skipped with `Ok(None)`.
    /// A failure in any band's enrichment aborts the image; nothing is
    /// written for it.
    pub async fn process_image(&self, path: &Path) -> Result<Option<ProcessedImage>, Error> {
        if !is_supported_image(path) {
            return Ok(None);
        }
        let name = file_name(path);
        println!("\nProcessing: {name}");

        if !self.settle_delay.is_zero() {
            tokio::time::sleep(self.settle_delay).await;
        }

        let image = tokio::fs::read(path).await?;
        let media_type = media_type_for(path);

        println!("   Agent 1: Extracting concert info from image...");
        let extraction = self.extractor.extract(&image, media_type).await?;
        let bands = dedupe_bands(extraction.bands);

        println!("   Agent 2: Enriching {} bands in parallel...", bands.len());
        let enriched = try_join_all(bands.into_iter().map(|band| self.enrich_band(band))).await?;
        let extraction = EnrichedConcertExtraction { bands: enriched };

        let rows_written = self.sink.append(&name, &extraction)?;
        println!("   Saved to {}", self.sink.path().display());
        info!(
            image = %name,
            bands = extraction.bands.len(),
            rows = rows_written,
            "image processed"
        );

        Ok(Some(ProcessedImage {
            source_image: name,
            extraction,
            rows_written,
        }))
    }

    async fn enrich_band(&self, band: BandInfo) -> Result<EnrichedBandInfo, Error> {
        println!("   Agent 2: Searching web for '{}' info...", band.band_name);
        let enrichment = self.enricher.enrich(&band.band_name).await?;
        let enriched = EnrichedBandInfo::from_parts(band, enrichment);
        println!("{}", band_report(&enriched));
        Ok(enriched)
    }

    /// [`process_image`](Self::process_image), with errors logged and
    /// printed instead of returned.
    pub async fn process_image_logged(&self, path: &Path) -> Option<ProcessedImage> {
        match self.process_image(path).await {
            Ok(processed) => processed,
            Err(e) => {
                let name = file_name(path);
                error!(image = %name, error = %e, "failed to process image");
                println!("   Error processing {name}: {e}");
                None
            }
        }
    }

    /// Process every supported image already in `folder`, concurrently.
    pub async fn process_existing(&self, folder: &Path) -> Result<Vec<ProcessedImage>, Error> {
        let images = list_images(folder)?;
        if images.is_empty() {
            return Ok(Vec::new());
        }

        println!(
            "\nProcessing {} existing image(s) in parallel...",
            images.len()
        );
        let results = join_all(images.iter().map(|p| self.process_image_logged(p))).await;
        Ok(results.into_iter().flatten().collect())
    }
}

/// Supported images directly inside `folder`, sorted by path.
pub fn list_images(folder: &Path) -> Result<Vec<PathBuf>, Error> {
    let mut images = Vec::new();
    for entry in std::fs::read_dir(folder)? {
        let path = entry?.path();
        if path.is_file() && is_supported_image(&path) {
            images.push(path);
        }
    }
    images.sort();
    Ok(images)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Console block for one enriched band.
pub fn band_report(band: &EnrichedBandInfo) -> String {
    let mut out = format!(
        "   Band: {}\n      Genre: {}\n      Country: {}",
        band.band_name, band.genre, band.country
    );
    for concert in &band.concerts {
        for line in concert.to_string().lines() {
            let _ = write!(out, "\n      {line}");
        }
    }
    out
}
