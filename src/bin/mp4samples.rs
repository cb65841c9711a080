use anyhow::Context;
use clap::Parser;
use mp4demux::{Mp4Extractor, SampleData};
use serde::Serialize;
use std::fs::File;

#[derive(Parser, Debug)]
#[command(version, about = "Walk a track's samples in decode order")]
struct Args {
    /// MP4/ISOBMFF file path
    path: String,

    /// Track index (see mp4tracks)
    #[arg(long, default_value_t = 0)]
    track: usize,

    /// Seek to this time (track timescale units) before reading
    #[arg(long)]
    seek: Option<u64>,

    /// Restrict the seek target to sync samples
    #[arg(long)]
    sync_only: bool,

    /// Stop after this many samples
    #[arg(long)]
    limit: Option<usize>,

    /// Output as JSON lines instead of a table
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Serialize)]
struct SampleRow {
    index: usize,
    timestamp: u64,
    pts: u64,
    duration: u32,
    size: u32,
    offset: u64,
    sync: bool,
    nal_units: Option<usize>,
    encrypted: bool,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let file = File::open(&args.path).with_context(|| format!("opening {}", args.path))?;
    let extractor = Mp4Extractor::new(file).context("parsing metadata")?;
    if args.track >= extractor.track_count() {
        anyhow::bail!("track {} out of range ({} tracks)", args.track, extractor.track_count());
    }

    let mut reader = extractor.reader(args.track);
    let mut produced = 0usize;
    let mut next = if let Some(time) = args.seek {
        reader.seek(time, args.sync_only).context("seeking")?
    } else {
        reader.next_sample().context("reading first sample")?
    };

    if !args.json {
        println!("{:>6} {:>10} {:>10} {:>7} {:>9} {:>11} sync", "index", "dts", "pts", "dur", "size", "offset");
    }
    while let Some(sample) = next {
        let nal_units = match &sample.data {
            SampleData::Nals(units) => Some(units.len()),
            _ => None,
        };
        let row = SampleRow {
            index: produced,
            timestamp: sample.meta.timestamp,
            pts: sample.meta.pts(),
            duration: sample.meta.duration,
            size: sample.meta.size,
            offset: sample.meta.data_offset,
            sync: sample.meta.is_sync,
            nal_units,
            encrypted: sample.meta.encryption.is_some(),
        };
        if args.json {
            println!("{}", serde_json::to_string(&row)?);
        } else {
            println!(
                "{:>6} {:>10} {:>10} {:>7} {:>9} {:>11} {}",
                row.index, row.timestamp, row.pts, row.duration, row.size, row.offset,
                if row.sync { "*" } else { " " }
            );
        }
        produced += 1;
        if args.limit.map(|l| produced >= l).unwrap_or(false) {
            break;
        }
        next = reader.next_sample().context("reading sample")?;
    }

    eprintln!("{} samples", produced);
    Ok(())
}
