use anyhow::{Context, Result};
use serde::Serialize;

use iqresolve::{
    AttemptOutcome, EpisodeDescriptor, EpisodeManifest, ManifestContent, ResolutionFailure,
    SeriesListing, SubtitleTrack,
};

use crate::OutputFormat;

/// Write one JSON record as a single stdout line.
pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let line = serde_json::to_string(value).context("Failed to serialize output")?;
    println!("{line}");
    Ok(())
}

pub fn print_manifest(manifest: &EpisodeManifest, format: OutputFormat) -> Result<()> {
    if format == OutputFormat::Json {
        return print_json(manifest);
    }

    let d = &manifest.descriptor;
    println!("📺 {}", display_title(d));
    println!("   Page: {}", manifest.resolved_url);
    println!("   TVID: {}", manifest.manifest.tvid);
    println!(
        "   Strategy: {} (#{}) in {}ms",
        manifest.strategy_used,
        manifest.strategy_used.number(),
        manifest.latency_ms
    );
    match &manifest.manifest.content {
        ManifestContent::Playlist(text) => {
            println!("   Manifest: playlist, {} lines", text.lines().count());
        }
        ManifestContent::MediaUrl(url) => println!("   Manifest: {url}"),
    }
    print_track_lines(&manifest.subtitles);
    Ok(())
}

pub fn print_failure(failure: &ResolutionFailure, format: OutputFormat) -> Result<()> {
    if format == OutputFormat::Json {
        return print_json(failure);
    }

    eprintln!("❌ {}", failure.descriptor.source_url);
    for attempt in &failure.attempts {
        let detail = match &attempt.outcome {
            AttemptOutcome::Succeeded { url } => format!("succeeded at {url}"),
            AttemptOutcome::Skipped { reason } => format!("skipped: {reason}"),
            AttemptOutcome::Failed { error } => format!("failed: {error}"),
        };
        eprintln!("   {}. {} {}", attempt.strategy.number(), attempt.strategy, detail);
    }
    Ok(())
}

pub fn print_tracks(tracks: &[SubtitleTrack], format: OutputFormat) -> Result<()> {
    if format == OutputFormat::Json {
        for track in tracks {
            print_json(track)?;
        }
        return Ok(());
    }
    print_track_lines(tracks);
    Ok(())
}

pub fn print_listing(
    listing: &SeriesListing,
    entries: &[&EpisodeDescriptor],
    format: OutputFormat,
) -> Result<()> {
    if format == OutputFormat::Json {
        for entry in entries {
            print_json(entry)?;
        }
        return Ok(());
    }

    if let Some(title) = &listing.title {
        println!("📚 {title}");
    }
    match listing.total_advertised {
        Some(total) => println!("   {} entries ({total} advertised)\n", listing.episodes.len()),
        None => println!("   {} entries\n", listing.episodes.len()),
    }
    for entry in entries {
        let ordinal = entry
            .ordinal
            .map_or_else(|| "-".to_string(), |n| n.to_string());
        println!(
            "{ordinal:>4}  {:<8} {}  {}",
            entry.content_type,
            entry.title,
            entry.duration.as_deref().unwrap_or("")
        );
        println!("      {}", entry.source_url);
    }
    Ok(())
}

fn print_track_lines(tracks: &[SubtitleTrack]) {
    if tracks.is_empty() {
        println!("   Subtitles: none");
        return;
    }
    println!("   Subtitles: {}", tracks.len());
    for track in tracks {
        println!("     {} [{}] {}: {}", track.language, track.language_code, track.format, track.url);
    }
}

fn display_title(descriptor: &EpisodeDescriptor) -> String {
    let title = if descriptor.title.is_empty() {
        descriptor.source_url.as_str()
    } else {
        descriptor.title.as_str()
    };
    match descriptor.ordinal {
        Some(n) => format!("{title} ({} {n})", descriptor.content_type),
        None => format!("{title} ({})", descriptor.content_type),
    }
}
