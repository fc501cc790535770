//! Protocol-level tests over synthetic datagrams: the wire walk is pure,
//! so the drop-monitor decoding runs without a kernel.

use std::io::Cursor;

use dropscope::domain::DropEvent;
use dropscope::dropmon::wire::{
    self, decode_datagram, DROP_POINT_SIZE, GENL_HDRLEN, NLA_HDRLEN, NLMSG_HDRLEN,
};
use dropscope::resolver::EventResolver;
use dropscope::symbols::KallsymsTable;

const FAMILY: u16 = 28;

/// Build an alert datagram; `declared_len` overrides the outer length
/// field to model the kernel's inconsistent reporting.
fn alert_msg(family: u16, points: &[(u64, u32)], declared_len: Option<u32>) -> Vec<u8> {
    let payload_len = NLA_HDRLEN + 4 + points.len() * DROP_POINT_SIZE;
    let actual = NLMSG_HDRLEN + GENL_HDRLEN + payload_len;
    let declared = declared_len.unwrap_or(u32::try_from(actual).unwrap());

    let mut buf = Vec::new();
    buf.extend_from_slice(&declared.to_ne_bytes());
    buf.extend_from_slice(&family.to_ne_bytes());
    buf.extend_from_slice(&0u16.to_ne_bytes()); // flags
    buf.extend_from_slice(&9u32.to_ne_bytes()); // seq
    buf.extend_from_slice(&0u32.to_ne_bytes()); // pid
    buf.push(wire::NET_DM_CMD_ALERT);
    buf.push(1); // genl version
    buf.extend_from_slice(&0u16.to_ne_bytes()); // reserved
    buf.extend_from_slice(&u16::try_from(payload_len).unwrap().to_ne_bytes());
    buf.extend_from_slice(&0u16.to_ne_bytes()); // NLA_UNSPEC
    buf.extend_from_slice(&u32::try_from(points.len()).unwrap().to_ne_bytes());
    for (pc, count) in points {
        buf.extend_from_slice(&pc.to_ne_bytes());
        buf.extend_from_slice(&count.to_ne_bytes());
    }
    buf
}

/// An `NLMSG_ERROR` frame; code 0 is the kernel's acknowledgment.
fn error_msg(code: i32) -> Vec<u8> {
    let len = NLMSG_HDRLEN + 4 + NLMSG_HDRLEN;
    let mut buf = Vec::new();
    buf.extend_from_slice(&u32::try_from(len).unwrap().to_ne_bytes());
    buf.extend_from_slice(&wire::NLMSG_ERROR.to_ne_bytes());
    buf.extend_from_slice(&0u16.to_ne_bytes());
    buf.extend_from_slice(&2u32.to_ne_bytes());
    buf.extend_from_slice(&0u32.to_ne_bytes());
    buf.extend_from_slice(&code.to_ne_bytes());
    buf.extend_from_slice(&[0u8; NLMSG_HDRLEN]); // echoed request header
    buf
}

#[test]
fn test_three_records_with_lying_outer_length() {
    let points = [(0xffff_ffff_8151_2345, 2), (0xffff_ffff_8162_0000, 1), (0xffff_ffff_8170_0abc, 5)];
    // declared outer length is deliberately wrong
    let buf = alert_msg(FAMILY, &points, Some(17));

    let mut events = Vec::new();
    decode_datagram(&buf, FAMILY, &mut events);

    assert_eq!(events.len(), 3);
    for (event, (pc, count)) in events.iter().zip(points.iter()) {
        assert_eq!(event, &DropEvent { address: *pc, count: *count });
    }
}

#[test]
fn test_start_ack_then_alert_resolves_one_line() {
    // The START acknowledgment arrives through the same receive path as
    // the first alert; the ack decodes to nothing and the alert to one
    // event, which resolves against the fast table.
    let mut buf = error_msg(0);
    buf.extend_from_slice(&alert_msg(FAMILY, &[(0x1005, 1)], None));

    let mut events = Vec::new();
    decode_datagram(&buf, FAMILY, &mut events);
    assert_eq!(events, vec![DropEvent { address: 0x1005, count: 1 }]);

    let table =
        KallsymsTable::from_reader(Cursor::new(b"0000000000001000 T my_function\n" as &[u8]), 32)
            .unwrap();
    let mut resolver = EventResolver::new(None, false);
    resolver.adopt_symbols(table);
    for event in events {
        resolver.print_event(event);
    }
    assert_eq!(resolver.events, 1);
    assert_eq!(resolver.symbolized, 1);
}

#[test]
fn test_nonzero_error_is_survivable() {
    let mut buf = error_msg(-1); // EPERM from a rejected START
    buf.extend_from_slice(&alert_msg(FAMILY, &[(0x2000, 3)], None));

    let mut events = Vec::new();
    decode_datagram(&buf, FAMILY, &mut events);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].count, 3);
}

#[test]
fn test_family_request_resolves_back_to_its_own_name() {
    let buf = wire::family_request(1, wire::NET_DM_FAMILY_NAME);
    // 4-byte aligned, self-consistent length, NUL-terminated family name
    assert_eq!(buf.len() % 4, 0);
    let name_start = NLMSG_HDRLEN + GENL_HDRLEN + NLA_HDRLEN;
    assert_eq!(&buf[name_start..name_start + 6], b"NET_DM");
    assert_eq!(buf[name_start + 6], 0);
}

#[test]
fn test_datagram_with_only_foreign_traffic() {
    let buf = alert_msg(FAMILY + 3, &[(0xdead, 1)], None);
    let mut events = Vec::new();
    decode_datagram(&buf, FAMILY, &mut events);
    assert!(events.is_empty());
}
