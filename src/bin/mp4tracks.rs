use anyhow::Context;
use clap::Parser;
use mp4demux::{MetaKey, Mp4Extractor};
use serde::Serialize;
use std::fs::File;

#[derive(Parser, Debug)]
#[command(version, about = "Dump track and file metadata from an MP4")]
struct Args {
    /// MP4/ISOBMFF file path
    path: String,

    /// Output as JSON instead of human-readable text
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Serialize)]
struct TrackReport {
    index: usize,
    track_id: u32,

    #[serde(skip_serializing_if = "Option::is_none")]
    mime: Option<String>,

    timescale: u32,
    duration_ticks: u64,
    duration_seconds: f64,

    #[serde(skip_serializing_if = "Option::is_none")]
    width: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    height: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    channels: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    sample_rate: Option<i64>,
}

#[derive(Debug, Serialize)]
struct FileReport {
    file: String,
    fragmented: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    artist: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    album: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pssh_hex: Option<String>,

    tracks: Vec<TrackReport>,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let file = File::open(&args.path).with_context(|| format!("opening {}", args.path))?;
    let extractor = Mp4Extractor::new(file).context("parsing metadata")?;

    let pssh = extractor.pssh_data();
    let mut report = FileReport {
        file: args.path.clone(),
        fragmented: extractor.is_fragmented(),
        title: extractor.file_meta().str(MetaKey::Title).map(str::to_string),
        artist: extractor.file_meta().str(MetaKey::Artist).map(str::to_string),
        album: extractor.file_meta().str(MetaKey::Album).map(str::to_string),
        pssh_hex: pssh.first().map(hex::encode),
        tracks: Vec::new(),
    };

    for index in 0..extractor.track_count() {
        let track = extractor.track(index);
        let duration_seconds = if track.timescale > 0 {
            track.duration as f64 / track.timescale as f64
        } else {
            0.0
        };
        report.tracks.push(TrackReport {
            index,
            track_id: track.id,
            mime: track.mime().map(str::to_string),
            timescale: track.timescale,
            duration_ticks: track.duration,
            duration_seconds,
            width: track.meta.int(MetaKey::Width),
            height: track.meta.int(MetaKey::Height),
            channels: track.meta.int(MetaKey::ChannelCount),
            sample_rate: track.meta.int(MetaKey::SampleRate),
        });
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{} ({} tracks, fragmented={})", report.file, report.tracks.len(), report.fragmented);
        for t in &report.tracks {
            print!("  #{} id={} {}", t.index, t.track_id, t.mime.as_deref().unwrap_or("?"));
            if let (Some(w), Some(h)) = (t.width, t.height) {
                print!(" {}x{}", w, h);
            }
            if let Some(ch) = t.channels {
                print!(" {}ch", ch);
            }
            if let Some(sr) = t.sample_rate {
                print!(" {}Hz", sr);
            }
            println!(" {:.2}s", t.duration_seconds);
        }
    }
    Ok(())
}
