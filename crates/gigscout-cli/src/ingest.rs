use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;

use gigscout::media::media_type_for;
use gigscout::pipeline::list_images;
use gigscout::{
    AgentExtractor, ConcertExtraction, ConcertExtractor, ConcertPipeline, CsvSink, FolderWatcher,
    GigscoutConfig, WebSearchEnricher, aggregate_by_band, provider_from_config,
};

/// Batch extraction: every image in `folder`, merged by band name.
pub async fn extract(config: &GigscoutConfig, folder: &Path) -> Result<()> {
    let provider = Arc::new(provider_from_config(
        &config.provider,
        config.extraction_model(),
    )?);
    let extractor = AgentExtractor::new(provider, config.extraction.max_tokens);

    let images = list_images(folder)
        .with_context(|| format!("failed to list images in {}", folder.display()))?;
    if images.is_empty() {
        println!("No images found in {}", folder.display());
        return Ok(());
    }

    let mut extractions = Vec::with_capacity(images.len());
    for path in &images {
        let name = path.display().to_string();
        println!("Extracting: {name}");
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("failed to read {name}"))?;
        match extractor.extract(&bytes, media_type_for(path)).await {
            Ok(extraction) => {
                println!("   Found {} band(s)", extraction.bands.len());
                extractions.push(extraction);
            }
            Err(e) => {
                tracing::error!(image = %name, error = %e, "extraction failed");
                println!("   Error processing {name}: {e}");
            }
        }
    }

    let aggregated = ConcertExtraction {
        bands: aggregate_by_band(extractions),
    };
    println!("{}", serde_json::to_string_pretty(&aggregated)?);
    Ok(())
}

pub async fn watch(
    config: &GigscoutConfig,
    folder: Option<PathBuf>,
    csv: Option<PathBuf>,
) -> Result<()> {
    let folder = folder.unwrap_or_else(|| config.pipeline.watch_folder.clone());
    let csv = csv.unwrap_or_else(|| config.pipeline.csv_output.clone());

    let watcher = FolderWatcher::new(&folder);
    watcher.ensure_exists()?;

    let extraction_provider = Arc::new(provider_from_config(
        &config.provider,
        config.extraction_model(),
    )?);
    let enrichment_provider = Arc::new(provider_from_config(
        &config.provider,
        config.enrichment_model(),
    )?);
    let pipeline = ConcertPipeline::new(
        AgentExtractor::new(extraction_provider, config.extraction.max_tokens),
        WebSearchEnricher::new(
            enrichment_provider,
            config.enrichment.web_search.clone(),
            config.enrichment.max_tokens,
        ),
        CsvSink::new(&csv),
    )
    .with_settle_delay(Duration::from_millis(config.pipeline.settle_delay_ms));

    let absolute = std::path::absolute(&folder).unwrap_or_else(|_| folder.clone());
    println!("Watching folder: {}", absolute.display());

    if pipeline
        .sink()
        .initialize()
        .with_context(|| format!("failed to create {}", csv.display()))?
    {
        println!("Created {}", csv.display());
    }

    pipeline.process_existing(&folder).await?;

    println!("\nAgent is now watching for new images. Press Ctrl+C to stop.\n");
    let cancel = CancellationToken::new();
    let ctrl_c_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c_cancel.cancel();
        }
    });

    watcher.run(&pipeline, cancel).await?;

    println!("\nStopping watcher...");
    println!("Done!");
    Ok(())
}
