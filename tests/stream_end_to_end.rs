//! End-to-end: publish decoded units, receive RTP on the other side

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use bytes::Bytes;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};
use util::marshal::Marshal;

use media_relay::{
    Description, Error, Format, FormatProcessor, LpcmFormat, Media, OnUnit, ReaderId, Stream,
    StreamConfig, Unit,
};

fn l8_mono() -> Format {
    Format::Lpcm(LpcmFormat {
        payload_type: 96,
        bit_depth: 8,
        sample_rate: 8000,
        channel_count: 1,
    })
}

fn collector() -> (OnUnit, UnboundedReceiver<Arc<Unit>>) {
    let (tx, rx) = unbounded_channel();
    let on_unit = OnUnit::new(move |unit: Arc<Unit>| {
        let tx = tx.clone();
        async move {
            tx.send(unit).map_err(|_| Error::delivery("test receiver gone"))?;
            Ok(())
        }
    });
    (on_unit, rx)
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[tokio::test]
async fn test_publish_pcm_unit() {
    init_tracing();

    let description = Description::new(vec![Media::audio(vec![l8_mono()])]);
    let stream = Stream::initialize(description, StreamConfig::default().max_payload_size(1472))
        .unwrap();

    let reader = ReaderId::new(1);
    let (on_unit, mut rx) = collector();
    stream.add_reader(reader, 0, 96, on_unit).unwrap();
    stream.start_reader(reader).unwrap();

    let samples = Bytes::from_static(&[1, 2, 3, 4]);
    stream
        .write_unit(0, 96, Unit::samples(30000, SystemTime::now(), samples.clone()))
        .unwrap();

    let unit = tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(unit.rtp_packets.len(), 1);

    let pkt = unit.rtp_packets[0].clone();
    let origin = stream.rtp_timestamp_origin(0, 96).unwrap();
    assert_eq!(pkt.header.timestamp, origin.wrapping_add(30000));
    assert_eq!(pkt.header.payload_type, 96);

    let mut decoder = FormatProcessor::new(&l8_mono(), 1472, false).unwrap();
    let decoded = decoder
        .process_rtp_packet(pkt, SystemTime::now(), 30000, true)
        .unwrap();
    assert_eq!(decoded.get_samples(), Some(&samples));

    // exactly one unit
    assert!(tokio::time::timeout(Duration::from_millis(20), rx.recv())
        .await
        .is_err());

    let stats = stream.stats();
    assert_eq!(stats.units_written, 1);
    assert_eq!(stats.bytes_received, 4);
    assert_eq!(stats.processing_errors, 0);

    stream.close();
}

#[tokio::test]
async fn test_relay_between_streams() {
    init_tracing();

    // origin stream packetizes, relay stream only forwards
    let origin =
        Stream::initialize(Description::new(vec![Media::audio(vec![l8_mono()])]), StreamConfig::default())
            .unwrap();
    let relay = Stream::initialize(
        Description::new(vec![Media::audio(vec![l8_mono()])]),
        StreamConfig::relay_only(),
    )
    .unwrap();

    let (on_unit, mut origin_rx) = collector();
    origin.add_rtp_reader(ReaderId::new(1), 0, 96, on_unit).unwrap();
    origin.start_reader(ReaderId::new(1)).unwrap();

    let (on_unit, mut relay_rx) = collector();
    relay.add_reader(ReaderId::new(1), 0, 96, on_unit).unwrap();
    relay.start_reader(ReaderId::new(1)).unwrap();

    let samples = Bytes::from((0..3000u32).map(|i| i as u8).collect::<Vec<_>>());
    origin
        .write_unit(0, 96, Unit::samples(0, SystemTime::now(), samples.clone()))
        .unwrap();

    let unit = origin_rx.recv().await.unwrap();
    // 1460 bytes of budget per packet
    assert_eq!(unit.rtp_packets.len(), 3);

    for pkt in &unit.rtp_packets {
        let raw = pkt.marshal().unwrap();
        relay
            .write_rtp_bytes(0, 96, &raw, unit.ntp, unit.pts)
            .unwrap();
    }

    let mut received = Vec::new();
    for _ in 0..3 {
        let unit = relay_rx.recv().await.unwrap();
        received.extend_from_slice(unit.get_samples().unwrap());
    }
    assert_eq!(Bytes::from(received), samples);
    assert_eq!(relay.stats().rtp_packets_received, 3);
}
