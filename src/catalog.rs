//! Hand-off of resolved episodes to the catalog.
//!
//! The pipeline only ever pushes complete [`EpisodeManifest`] records;
//! persistence, deduplication and notifications happen on the other side.

use std::io::Write;
use std::sync::Mutex;

use anyhow::{Context, Result};

use crate::fallback::EpisodeManifest;

/// Receives each resolved episode as soon as its job completes.
pub trait CatalogSink: Send + Sync {
    fn accept(&self, manifest: &EpisodeManifest) -> Result<()>;
}

/// One JSON object per line.
pub struct JsonLinesSink<W> {
    writer: Mutex<W>,
}

impl<W: Write + Send> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    pub fn into_inner(self) -> W {
        self.writer
            .into_inner()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl<W: Write + Send> CatalogSink for JsonLinesSink<W> {
    fn accept(&self, manifest: &EpisodeManifest) -> Result<()> {
        let mut writer = self
            .writer
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        serde_json::to_writer(&mut *writer, manifest).context("Failed to serialize manifest")?;
        writeln!(writer).context("Failed to write manifest record")?;
        writer.flush().context("Failed to flush catalog output")?;
        Ok(())
    }
}

/// Keeps records in memory, in arrival order.
#[derive(Default)]
pub struct MemorySink {
    records: Mutex<Vec<EpisodeManifest>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<EpisodeManifest> {
        self.records
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}

impl CatalogSink for MemorySink {
    fn accept(&self, manifest: &EpisodeManifest) -> Result<()> {
        self.records
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(manifest.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::episode::{ContentType, EpisodeDescriptor};
    use crate::fallback::{AttemptOutcome, StrategyAttempt, StrategyKind};
    use crate::manifest::{ExtractionStrategy, ManifestContent, StreamManifest};

    fn manifest(ordinal: u32) -> EpisodeManifest {
        EpisodeManifest {
            descriptor: EpisodeDescriptor {
                title: format!("Episode {ordinal}"),
                ordinal: Some(ordinal),
                source_url: format!("https://www.iq.com/play/show-episode-{ordinal}-aa"),
                content_type: ContentType::Episode,
                description: None,
                thumbnail: None,
                duration: Some("45:00".into()),
            },
            manifest: StreamManifest {
                tvid: "100".into(),
                content: ManifestContent::Playlist("#EXTM3U".into()),
                extraction: ExtractionStrategy::FixedPath,
            },
            subtitles: Vec::new(),
            strategy_used: StrategyKind::DirectExtraction,
            attempted_strategies: vec![StrategyAttempt {
                strategy: StrategyKind::DirectExtraction,
                outcome: AttemptOutcome::Succeeded {
                    url: "https://www.iq.com/play/show-episode-1-aa".into(),
                },
                elapsed_ms: 12,
            }],
            resolved_url: "https://www.iq.com/play/show-episode-1-aa".into(),
            latency_ms: 12,
        }
    }

    #[test]
    fn writes_one_record_per_line() {
        let sink = JsonLinesSink::new(Vec::new());
        sink.accept(&manifest(1)).unwrap();
        sink.accept(&manifest(2)).unwrap();

        let output = String::from_utf8(sink.into_inner()).unwrap();
        let lines: Vec<&str> = output.lines().collect();
        assert_eq!(lines.len(), 2);

        let record: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(record["ordinal"], 2);
        assert_eq!(record["content_type"], "episode");
        assert_eq!(record["strategy_used"], "direct_extraction");
        assert_eq!(record["manifest"]["content"]["kind"], "playlist");
        assert_eq!(record["attempted_strategies"][0]["outcome"]["status"], "succeeded");
    }

    #[test]
    fn memory_sink_keeps_arrival_order() {
        let sink = MemorySink::new();
        sink.accept(&manifest(2)).unwrap();
        sink.accept(&manifest(1)).unwrap();
        let ordinals: Vec<_> = sink.records().iter().map(|m| m.descriptor.ordinal).collect();
        assert_eq!(ordinals, vec![Some(2), Some(1)]);
    }
}
