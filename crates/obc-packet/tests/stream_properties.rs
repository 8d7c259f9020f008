//! Stream parser properties over realistic traffic.

use obc_fields::ObcDateTime;
use obc_packet::*;

fn sample_stream() -> (Vec<u8>, Vec<Vec<u8>>) {
    let payloads = vec![
        CommandPacket {
            seq: 1,
            command_id: 0x0001,
            date_time: ObcDateTime::IMMEDIATE,
            args: vec![],
        }
        .encode(),
        ResponsePacket::with_result(1, ResultCode::Success, &[0xAB, 0xCD, 0xAB]).encode(),
        LogEntry {
            group: 0,
            signal: 0,
            timestamp: ObcDateTime::from_seconds(123_456),
            data: (0..200).map(|i| i as u8).collect(),
        }
        .encode(),
        vec![],
        ResponsePacket::scheduled(2, 0x0102_0304).encode(),
    ];

    let mut stream = vec![0x00, 0xAB, 0x13];
    for (i, payload) in payloads.iter().enumerate() {
        stream.extend(SerialFrame::new(payload.clone()).unwrap().serialize());
        if i % 2 == 0 {
            stream.extend_from_slice(&[0xFF, 0xAB]);
        }
    }
    (stream, payloads)
}

fn parse_in_chunks(stream: &[u8], chunk: usize) -> Vec<Vec<u8>> {
    let mut parser = StreamParser::new(SerialFormat::serial());
    stream
        .chunks(chunk)
        .flat_map(|c| parser.push(c))
        .map(SerialFrame::into_payload)
        .collect()
}

#[test]
fn test_chunking_does_not_change_output() {
    let (stream, payloads) = sample_stream();
    let all_at_once = parse_in_chunks(&stream, stream.len());
    assert_eq!(all_at_once, payloads);

    for chunk in [1, 2, 3, 7, 64] {
        assert_eq!(parse_in_chunks(&stream, chunk), all_at_once, "chunk size {}", chunk);
    }
}

#[test]
fn test_every_split_point() {
    let frame = SerialFrame::new(b"split me anywhere".to_vec()).unwrap().serialize();
    for split in 0..=frame.len() {
        let mut parser = StreamParser::new(SerialFormat::serial());
        let mut out = parser.push(&frame[..split]);
        out.extend(parser.push(&frame[split..]));
        assert_eq!(out.len(), 1, "split at {}", split);
        assert_eq!(out[0].payload(), b"split me anywhere");
    }
}

#[test]
fn test_single_byte_corruption_drops_only_that_frame() {
    let first = SerialFrame::new(b"telemetry".to_vec()).unwrap().serialize();
    let second = SerialFrame::new(b"next".to_vec()).unwrap().serialize();

    for index in 3..first.len() - 2 {
        for flip in [0x01u8, 0x80, 0xFF] {
            let mut corrupted = first.clone();
            corrupted[index] ^= flip;
            let mut stream = corrupted;
            stream.extend_from_slice(&second);

            let mut parser = StreamParser::new(SerialFormat::serial());
            let frames = parser.push(&stream);
            assert_eq!(frames.len(), 1, "byte {} flip {:02X}", index, flip);
            assert_eq!(frames[0].payload(), b"next");
            assert_eq!(parser.stats().crc_errors, 1);
        }
    }
}

#[test]
fn test_comms_nesting() {
    let inner_payload = LogEntry {
        group: 1,
        signal: 2,
        timestamp: ObcDateTime::from_seconds(5),
        data: vec![0x22, 0x69, 0x01],
    }
    .encode();
    let inner = SerialFrame::with_limit(inner_payload.clone(), COMMS_MAX_PAYLOAD).unwrap();
    let stream = RelayFrame::wrap(&inner).unwrap().serialize();

    let mut relay = StreamParser::new(RelayFormat);
    let mut serial = StreamParser::new(SerialFormat::comms());
    let mut out = Vec::new();
    for chunk in stream.chunks(3) {
        for frame in relay.push(chunk) {
            out.extend(serial.push(frame.payload()));
        }
    }
    assert_eq!(out.len(), 1);
    assert_eq!(
        ObcPacket::decode(out[0].payload()).unwrap(),
        ObcPacket::Log(LogEntry::decode(&inner_payload).unwrap())
    );
}
