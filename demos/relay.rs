//! Relay synthetic audio to two readers
//!
//! Run with: cargo run --example relay [SECONDS]
//!
//! A publisher writes one 20 ms PCMU frame every 20 ms. Two readers are
//! attached:
//! - `recorder` asks for decoded samples and keeps up
//! - `viewer` only wants RTP packets and is deliberately slow, so its queue
//!   overflows and units are dropped
//!
//! Set RUST_LOG=media_relay=debug to see lifecycle and error reports.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use bytes::Bytes;
use media_relay::{
    Description, Format, G711Format, Media, OnUnit, ReaderId, Stream, StreamConfig, Unit,
};

/// 20 ms at 8 kHz
const FRAME_SAMPLES: usize = 160;

fn print_usage() {
    eprintln!("Usage: relay [SECONDS]");
    eprintln!();
    eprintln!("  relay        # runs for 3 seconds");
    eprintln!("  relay 10     # runs for 10 seconds");
}

/// One frame of a µ-law sawtooth
fn frame(index: u64) -> Bytes {
    let start = (index as usize * FRAME_SAMPLES) % 256;
    Bytes::from(
        (0..FRAME_SAMPLES)
            .map(|i| ((start + i) % 256) as u8)
            .collect::<Vec<_>>(),
    )
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().collect();
    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_usage();
        return Ok(());
    }

    let seconds: u64 = match args.get(1) {
        Some(s) => match s.parse() {
            Ok(n) => n,
            Err(e) => {
                eprintln!("Error: invalid duration {:?}: {}", s, e);
                eprintln!();
                print_usage();
                std::process::exit(1);
            }
        },
        None => 3,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("media_relay=info".parse()?)
                .add_directive("relay=debug".parse()?),
        )
        .init();

    let description = Description {
        title: Some("demo".into()),
        medias: vec![Media::audio(vec![Format::G711(G711Format::pcmu())])],
    };
    let (track, payload_type) = description
        .find_format("PCMU")
        .map(|(index, format)| (index, format.payload_type()))
        .ok_or("description has no PCMU track")?;

    let config = StreamConfig::default().reader_queue_capacity(8);
    let stream = Arc::new(Stream::initialize(description, config)?);

    let recorded = Arc::new(AtomicU64::new(0));
    let recorder = ReaderId::new(1);
    {
        let recorded = recorded.clone();
        stream.add_reader(
            recorder,
            track,
            payload_type,
            OnUnit::new(move |unit: Arc<Unit>| {
                let recorded = recorded.clone();
                async move {
                    if let Some(samples) = unit.get_samples() {
                        recorded.fetch_add(samples.len() as u64, Ordering::Relaxed);
                    }
                    Ok(())
                }
            }),
        )?;
    }

    let viewer = ReaderId::new(2);
    stream.add_rtp_reader(
        viewer,
        track,
        payload_type,
        OnUnit::new(|unit: Arc<Unit>| async move {
            // a congested client link
            tokio::time::sleep(Duration::from_millis(45)).await;
            tracing::trace!(
                packets = unit.rtp_packets.len(),
                pts = unit.pts,
                "Viewer sent packets"
            );
            Ok(())
        }),
    )?;

    stream.start_reader(recorder)?;
    stream.start_reader(viewer)?;
    stream.wait_running_reader().await?;

    println!("Relaying PCMU for {}s to 2 readers", seconds);

    let frames = seconds * 1000 / 20;
    let mut ticker = tokio::time::interval(Duration::from_millis(20));
    for index in 0..frames {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                println!("Interrupted");
                break;
            }
        }

        let pts = (index * FRAME_SAMPLES as u64) as i64;
        let unit = Unit::samples(pts, SystemTime::now(), frame(index));
        if let Err(e) = stream.write_unit(track, payload_type, unit) {
            tracing::warn!(error = %e, "Failed to write unit");
        }
    }

    // let the readers drain
    tokio::time::sleep(Duration::from_millis(500)).await;

    let stats = stream.stats();
    println!();
    println!("=== Stream ===");
    println!("units written:     {}", stats.units_written);
    println!("bytes received:    {}", stats.bytes_received);
    println!("processing errors: {}", stats.processing_errors);

    for (name, id) in [("recorder", recorder), ("viewer", viewer)] {
        let r = stream.reader_stats(id)?;
        println!();
        println!("=== {} ===", name);
        println!("delivered: {}", r.delivered);
        println!("dropped:   {}", r.dropped);
        println!("failed:    {}", r.failed);
    }
    println!();
    println!("recorder got {} bytes of samples", recorded.load(Ordering::Relaxed));

    stream.close();
    Ok(())
}
