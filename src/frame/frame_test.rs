use super::*;
use bytes::BytesMut;

fn addr(s: &str) -> SocketAddr {
    s.parse().unwrap()
}

#[test]
fn begin_carries_both_endpoints() {
    let frame = Frame::Begin {
        stream_id: 0x11,
        reference_id: 8080,
        correlation_id: 7,
        local_addr: addr("127.0.0.1:8080"),
        remote_addr: addr("[::1]:49152"),
    };
    let mut buf = BytesMut::new();
    encode(&frame, &mut buf).unwrap();
    assert_eq!(decode(&mut buf).unwrap(), Some(frame));
    assert!(buf.is_empty());
}

#[test]
fn data_payload_is_not_copied_out_of_band() {
    let frame = Frame::Data {
        stream_id: 3,
        payload: Bytes::from_static(b"server data"),
    };
    let mut buf = BytesMut::new();
    encode(&frame, &mut buf).unwrap();
    assert_eq!(buf.len(), HEADER_SIZE + 11);
    match decode(&mut buf).unwrap() {
        Some(Frame::Data { stream_id, payload }) => {
            assert_eq!(stream_id, 3);
            assert_eq!(&payload[..], b"server data");
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn data_over_the_cap_is_rejected() {
    let frame = Frame::Data {
        stream_id: 1,
        payload: Bytes::from(vec![0u8; MAX_DATA_PAYLOAD + 1]),
    };
    let mut buf = BytesMut::new();
    assert!(encode(&frame, &mut buf).is_err());
    assert!(buf.is_empty());
}

#[test]
fn data_at_the_cap_round_trips() {
    let frame = Frame::Data {
        stream_id: 1,
        payload: Bytes::from(vec![0xa5u8; MAX_DATA_PAYLOAD]),
    };
    let mut buf = BytesMut::new();
    encode(&frame, &mut buf).unwrap();
    assert_eq!(decode(&mut buf).unwrap(), Some(frame));
}

#[test]
fn incomplete_frames_wait_for_more_bytes() {
    let frame = Frame::Window {
        stream_id: 9,
        credit: 65535,
    };
    let mut buf = BytesMut::new();
    encode(&frame, &mut buf).unwrap();

    let mut partial = BytesMut::new();
    for at in 0..buf.len() - 1 {
        partial.extend_from_slice(&buf[at..at + 1]);
        assert_eq!(decode(&mut partial).unwrap(), None, "at byte {}", at);
    }
    partial.extend_from_slice(&buf[buf.len() - 1..]);
    assert_eq!(decode(&mut partial).unwrap(), Some(frame));
}

#[test]
fn negative_credit_is_representable() {
    // The codec carries it; rejecting it is the read stream's job.
    let frame = Frame::Window {
        stream_id: 9,
        credit: -1,
    };
    let mut buf = BytesMut::new();
    encode(&frame, &mut buf).unwrap();
    assert_eq!(decode(&mut buf).unwrap(), Some(frame));
}

#[test]
fn unknown_kind_is_an_error() {
    let mut buf = BytesMut::new();
    encode(&Frame::End { stream_id: 2 }, &mut buf).unwrap();
    buf[0] = 0x7f;
    assert!(decode(&mut buf).is_err());
}

#[test]
fn frames_decode_in_order() {
    let mut buf = BytesMut::new();
    encode(&Frame::End { stream_id: 1 }, &mut buf).unwrap();
    encode(&Frame::Reset { stream_id: 2 }, &mut buf).unwrap();
    assert_eq!(decode(&mut buf).unwrap(), Some(Frame::End { stream_id: 1 }));
    assert_eq!(
        decode(&mut buf).unwrap(),
        Some(Frame::Reset { stream_id: 2 })
    );
    assert_eq!(decode(&mut buf).unwrap(), None);
}
