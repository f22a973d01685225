//! Import/export orchestration between OPML streams and a [`FeedStore`].
//!
//! Each operation can be awaited directly or started as a background task
//! with the `spawn_*` methods, which return a [`PortTask`] resolving to the
//! operation's outcome. Failures are logged with their full cause and
//! reported to the caller as a [`PortError`] kind.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context as TaskContext, Poll};

use anyhow::Context;
use chrono::Utc;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::task::JoinHandle;

use crate::feed::{OpmlDecoder, OpmlEncoder, OpmlError, OpmlOptions};
use crate::storage::FeedStore;

/// Outcome kinds reported to the caller of an import or export.
#[derive(Debug, Error)]
pub enum PortError {
    /// The source is not OPML, even after repairing its header.
    #[error("Cannot read OPML: {0}")]
    Parse(#[from] OpmlError),

    /// The source parsed but held nothing to import.
    #[error("No feeds found to import")]
    EmptyResult,

    /// The bulk insert failed; nothing was imported.
    #[error("Failed to store imported feeds: {0}")]
    Store(String),

    /// Reading the store or writing the destination failed.
    #[error("Feed export failed: {0}")]
    Export(String),

    /// The background task panicked or was aborted.
    #[error("Background task failed: {0}")]
    Task(String),
}

/// Successful import.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportReport {
    /// Records stored, groups included.
    pub imported: usize,
}

/// Successful export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportReport {
    /// Display name of the destination.
    pub destination: String,
    /// Records read from the store.
    pub exported: usize,
}

/// A running import or export. Await it to get the outcome.
///
/// Dropping the task does not stop the operation.
#[must_use = "await the task to observe the outcome"]
pub struct PortTask<T> {
    handle: JoinHandle<Result<T, PortError>>,
}

impl<T> Future for PortTask<T> {
    type Output = Result<T, PortError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.handle).poll(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            Poll::Ready(Err(e)) => {
                tracing::error!(error = %e, "OPML task did not complete");
                Poll::Ready(Err(PortError::Task(e.to_string())))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Moves feed lists between OPML streams and a store.
pub struct OpmlPorter<S> {
    store: Arc<S>,
    decoder: OpmlDecoder,
    encoder: OpmlEncoder,
}

impl<S> Clone for OpmlPorter<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            decoder: self.decoder.clone(),
            encoder: self.encoder.clone(),
        }
    }
}

impl<S: FeedStore + 'static> OpmlPorter<S> {
    pub fn new(store: Arc<S>, options: OpmlOptions) -> Self {
        Self {
            store,
            decoder: OpmlDecoder::new(options.clone()),
            encoder: OpmlEncoder::new(options),
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    // ========================================================================
    // Import
    // ========================================================================

    /// Decodes `source` and stores the records in one bulk insert.
    ///
    /// # Errors
    ///
    /// - [`PortError::Parse`] if the source is not OPML or cannot be read
    /// - [`PortError::EmptyResult`] if nothing importable was found
    /// - [`PortError::Store`] if the insert failed
    pub async fn import_from<R: AsyncRead + Unpin>(
        &self,
        source: R,
    ) -> Result<ImportReport, PortError> {
        let records = match self.read_records(source).await {
            Ok(records) => records,
            Err(e) => {
                tracing::warn!(error = %e, "OPML import failed");
                return Err(PortError::Parse(e));
            }
        };

        if records.is_empty() {
            tracing::info!("OPML contained no importable feeds");
            return Err(PortError::EmptyResult);
        }

        let imported = self.store.insert_all(&records).await.map_err(|e| {
            tracing::error!(error = %format!("{e:#}"), "Failed to store imported feeds");
            PortError::Store(format!("{e:#}"))
        })?;

        tracing::info!(imported, "Imported feeds from OPML");
        Ok(ImportReport { imported })
    }

    /// Opens `path` and imports it. See [`OpmlPorter::import_from`].
    pub async fn import_from_file(&self, path: &Path) -> Result<ImportReport, PortError> {
        let file = tokio::fs::File::open(path).await.map_err(|e| {
            tracing::warn!(path = %path.display(), error = %e, "Failed to open OPML file");
            PortError::Parse(OpmlError::Io(e))
        })?;
        self.import_from(tokio::io::BufReader::new(file)).await
    }

    /// Runs [`OpmlPorter::import_from`] on a background task.
    pub fn spawn_import<R>(&self, source: R) -> PortTask<ImportReport>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let porter = self.clone();
        PortTask {
            handle: tokio::spawn(async move { porter.import_from(source).await }),
        }
    }

    /// Runs [`OpmlPorter::import_from_file`] on a background task.
    pub fn spawn_import_file(&self, path: impl Into<PathBuf>) -> PortTask<ImportReport> {
        let porter = self.clone();
        let path = path.into();
        PortTask {
            handle: tokio::spawn(async move { porter.import_from_file(&path).await }),
        }
    }

    async fn read_records<R: AsyncRead + Unpin>(
        &self,
        mut source: R,
    ) -> Result<Vec<crate::feed::FeedRecord>, OpmlError> {
        let mut content = Vec::new();
        source.read_to_end(&mut content).await?;
        self.decoder.decode_bytes(&content)
    }

    // ========================================================================
    // Export
    // ========================================================================

    /// Writes every stored record to `destination` as OPML 2.0.
    ///
    /// `name` is the destination's display name, echoed in the report.
    ///
    /// # Errors
    ///
    /// [`PortError::Export`] for any store, encoding, or write failure. The
    /// destination may hold a partial document.
    pub async fn export_to<W: AsyncWrite + Unpin>(
        &self,
        mut destination: W,
        name: &str,
    ) -> Result<ExportReport, PortError> {
        let exported = self.write_opml(&mut destination).await.map_err(|e| {
            tracing::error!(destination = %name, error = %format!("{e:#}"), "OPML export failed");
            PortError::Export(format!("{e:#}"))
        })?;

        tracing::info!(destination = %name, exported, "Exported feeds to OPML");
        Ok(ExportReport {
            destination: name.to_string(),
            exported,
        })
    }

    /// Exports to `path` atomically.
    ///
    /// The document is written to a temporary file in the same directory,
    /// synced to disk, then renamed over `path`, so the destination is never
    /// left in a partial state.
    pub async fn export_to_file(&self, path: &Path) -> Result<ExportReport, PortError> {
        use std::time::{SystemTime, UNIX_EPOCH};

        let name = display_name(path);

        // SEC-009: Randomized temp filename to prevent TOCTOU race conditions
        let random_suffix = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        let temp_path = path.with_extension(format!("tmp.{:016x}", random_suffix));

        match self.write_atomically(path, &temp_path).await {
            Ok(exported) => {
                tracing::info!(destination = %name, exported, "Exported feeds to OPML");
                Ok(ExportReport {
                    destination: name,
                    exported,
                })
            }
            Err(e) => {
                let _ = tokio::fs::remove_file(&temp_path).await;
                tracing::error!(destination = %name, error = %format!("{e:#}"), "OPML export failed");
                Err(PortError::Export(format!("{e:#}")))
            }
        }
    }

    /// Runs [`OpmlPorter::export_to`] on a background task.
    pub fn spawn_export<W>(&self, destination: W, name: impl Into<String>) -> PortTask<ExportReport>
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let porter = self.clone();
        let name = name.into();
        PortTask {
            handle: tokio::spawn(async move { porter.export_to(destination, &name).await }),
        }
    }

    /// Runs [`OpmlPorter::export_to_file`] on a background task.
    pub fn spawn_export_file(&self, path: impl Into<PathBuf>) -> PortTask<ExportReport> {
        let porter = self.clone();
        let path = path.into();
        PortTask {
            handle: tokio::spawn(async move { porter.export_to_file(&path).await }),
        }
    }

    async fn write_opml<W: AsyncWrite + Unpin>(&self, destination: &mut W) -> anyhow::Result<usize> {
        let records = self
            .store
            .get_all()
            .await
            .context("Failed to read feeds from store")?;
        let content = self
            .encoder
            .encode_to_vec(&records, Utc::now())
            .context("Failed to encode OPML")?;

        destination
            .write_all(&content)
            .await
            .context("Failed to write OPML")?;
        destination
            .flush()
            .await
            .context("Failed to flush OPML destination")?;

        Ok(records.len())
    }

    async fn write_atomically(&self, path: &Path, temp_path: &Path) -> anyhow::Result<usize> {
        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(temp_path)
            .await
            .with_context(|| {
                format!(
                    "Failed to create temporary file '{}': check directory permissions",
                    temp_path.display()
                )
            })?;

        let exported = self.write_opml(&mut file).await?;

        file.sync_all().await.with_context(|| {
            format!(
                "Failed to sync temporary file '{}' to disk",
                temp_path.display()
            )
        })?;
        drop(file);

        tokio::fs::rename(temp_path, path).await.with_context(|| {
            format!(
                "Failed to rename '{}' to '{}'",
                temp_path.display(),
                path.display()
            )
        })?;

        Ok(exported)
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
