use fmadring::pcap::{
    PcapError, PcapFileHeader, PcapReader, PcapRecordHeader, PcapWriter, FILE_HEADER_LEN,
    LINK_ETHERNET, MAGIC_USEC, RECORD_HEADER_LEN,
};
use fmadring::{PacketInfo, Received, RingBuilder};

#[test]
fn test_ring_to_pcap_stream() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ring");

    let mut tx = RingBuilder::new(&path)
        .with_depth(8)
        .with_port_passthrough(true)
        .build_producer()
        .unwrap();
    let mut rx = RingBuilder::new(&path)
        .with_depth(8)
        .with_wait_for_data(false)
        .build_consumer()
        .unwrap();

    tx.send(1_600_000_000_000_000_001, 60, 0, &[0x11; 60]).unwrap();
    tx.send(1_600_000_000_500_000_000, 1514, 1, &[0x22; 128]).unwrap();
    tx.send_end_of_stream(1_600_000_001_000_000_000).unwrap();

    let mut writer = PcapWriter::new(Vec::new(), PcapFileHeader::nanosecond(LINK_ETHERNET)).unwrap();
    let mut buf = [0u8; 2048];
    loop {
        match rx.receive(&mut buf).unwrap() {
            Received::Packet(info) => writer
                .write_packet(&info, &buf[..info.length_capture as usize])
                .unwrap(),
            Received::EndOfStream { .. } | Received::NoData => break,
        }
    }
    assert_eq!(writer.packets(), 2);
    assert_eq!(writer.bytes(), 188);

    let stream = writer.into_inner();
    assert_eq!(stream.len(), FILE_HEADER_LEN + 2 * RECORD_HEADER_LEN + 188);

    let mut reader = PcapReader::new(stream.as_slice()).unwrap();
    assert_eq!(reader.time_scale(), 1);
    assert!(!reader.is_swapped());

    let first = reader.next_record(&mut buf).unwrap().unwrap();
    assert_eq!(first.timestamp_ns(1), 1_600_000_000_000_000_001);
    assert_eq!(first.length_capture, 60);
    assert_eq!(first.port(), 0);

    let second = reader.next_record(&mut buf).unwrap().unwrap();
    assert_eq!(second.sec, 1_600_000_000);
    assert_eq!(second.frac, 500_000_000);
    assert_eq!(second.wire_length(), 1514);
    assert_eq!(second.port(), 1);
    assert!(buf[..128].iter().all(|&b| b == 0x22));

    assert!(reader.next_record(&mut buf).unwrap().is_none());
}

#[test]
fn test_microsecond_stream_imports_to_ring() {
    let mut header = PcapFileHeader::nanosecond(LINK_ETHERNET);
    header.magic = MAGIC_USEC;
    let mut stream = header.to_bytes().to_vec();
    let rec = PcapRecordHeader {
        sec: 10,
        frac: 250,
        length_capture: 4,
        length_wire: 64,
    };
    stream.extend_from_slice(&rec.to_bytes());
    stream.extend_from_slice(b"data");

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ring");
    let mut tx = RingBuilder::new(&path).with_depth(4).build_producer().unwrap();
    let mut rx = RingBuilder::new(&path)
        .with_depth(4)
        .with_wait_for_data(false)
        .build_consumer()
        .unwrap();

    let mut reader = PcapReader::new(stream.as_slice()).unwrap();
    let mut buf = [0u8; 64];
    while let Some(h) = reader.next_record(&mut buf).unwrap() {
        let len = h.length_capture as usize;
        tx.send(h.timestamp_ns(reader.time_scale()), h.wire_length(), h.port(), &buf[..len])
            .unwrap();
    }

    let mut out = [0u8; 64];
    let info: PacketInfo = match rx.receive(&mut out).unwrap() {
        Received::Packet(info) => info,
        other => panic!("unexpected {:?}", other),
    };
    assert_eq!(info.timestamp_ns, 10_000_250_000);
    assert_eq!(info.length_wire, 64);
    assert_eq!(&out[..4], b"data");
}

#[test]
fn test_reader_rejects_garbage_and_oversized_records() {
    let header = PcapFileHeader::nanosecond(LINK_ETHERNET).to_bytes();
    assert!(matches!(
        PcapReader::new(&header[..10]),
        Err(PcapError::Truncated { what: "file header" })
    ));
    assert!(matches!(
        PcapReader::new(&[0xffu8; FILE_HEADER_LEN][..]),
        Err(PcapError::BadMagic(0xffff_ffff))
    ));

    let mut stream = PcapFileHeader::nanosecond(LINK_ETHERNET).to_bytes().to_vec();
    let rec = PcapRecordHeader {
        sec: 0,
        frac: 0,
        length_capture: 100,
        length_wire: 100,
    };
    stream.extend_from_slice(&rec.to_bytes());
    stream.extend_from_slice(&[0u8; 100]);

    let mut reader = PcapReader::new(stream.as_slice()).unwrap();
    let mut small = [0u8; 50];
    assert!(matches!(
        reader.next_record(&mut small),
        Err(PcapError::RecordTooLarge { len: 100, max: 50 })
    ));
}
