use std::path::PathBuf;

use notify::event::CreateKind;
use notify::{
    Config as NotifyConfig, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::Error;
use crate::media::is_supported_image;
use crate::pipeline::{BandEnricher, ConcertExtractor, ConcertPipeline};

/// Watches one folder (non-recursively) for newly created poster images.
pub struct FolderWatcher {
    folder: PathBuf,
}

impl FolderWatcher {
    pub fn new(folder: impl Into<PathBuf>) -> Self {
        Self {
            folder: folder.into(),
        }
    }

    pub fn ensure_exists(&self) -> Result<(), Error> {
        if self.folder.is_dir() {
            Ok(())
        } else {
            Err(Error::Config(format!(
                "Folder '{}' not found",
                self.folder.display()
            )))
        }
    }

    /// Feed every new image through the pipeline, one at a time in arrival
    /// order, until `cancel` fires.
    pub async fn run<E, B>(
        &self,
        pipeline: &ConcertPipeline<E, B>,
        cancel: CancellationToken,
    ) -> Result<(), Error>
    where
        E: ConcertExtractor,
        B: BandEnricher,
    {
        self.ensure_exists()?;

        let (tx, mut rx) = mpsc::unbounded_channel::<PathBuf>();
        let mut watcher = RecommendedWatcher::new(
            move |res: Result<Event, notify::Error>| match res {
                Ok(event) => {
                    for path in created_images(&event) {
                        let _ = tx.send(path);
                    }
                }
                Err(e) => warn!(error = %e, "file watch error"),
            },
            NotifyConfig::default(),
        )?;
        watcher.watch(&self.folder, RecursiveMode::NonRecursive)?;
        info!(folder = %self.folder.display(), "watching for new images");

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                maybe_path = rx.recv() => match maybe_path {
                    Some(path) => {
                        debug!(path = %path.display(), "new image");
                        pipeline.process_image_logged(&path).await;
                    }
                    None => break,
                },
            }
        }

        info!(folder = %self.folder.display(), "watcher stopped");
        Ok(())
    }
}

/// Image paths created by `event`. Anything but a file creation yields nothing.
pub fn created_images(event: &Event) -> Vec<PathBuf> {
    match event.kind {
        EventKind::Create(CreateKind::Folder) => Vec::new(),
        EventKind::Create(_) => event
            .paths
            .iter()
            .filter(|p| is_supported_image(p) && !p.is_dir())
            .cloned()
            .collect(),
        _ => Vec::new(),
    }
}
