//! Generic netlink wire format for the drop monitor
//!
//! Pure encode/decode over byte slices; no sockets here, so the whole
//! protocol walk is testable with synthetic datagrams. Netlink is
//! host-endian, hence the `from_ne_bytes` reads. Every field access is
//! bounds-checked before use: these bytes come from the kernel, but the
//! drop monitor is known to declare a wrong outer length on its alert
//! messages, so declared lengths are never trusted for framing an alert.

use log::{debug, warn};

use crate::domain::DropEvent;

// linux/netlink.h
pub const NLMSG_NOOP: u16 = 1;
pub const NLMSG_ERROR: u16 = 2;
pub const NLM_F_REQUEST: u16 = 0x01;
pub const NLM_F_ACK: u16 = 0x04;
pub const NLMSG_HDRLEN: usize = 16;
const NLMSG_ALIGNTO: usize = 4;

// linux/genetlink.h
pub const GENL_ID_CTRL: u16 = 0x10;
pub const CTRL_CMD_GETFAMILY: u8 = 3;
pub const CTRL_ATTR_FAMILY_ID: u16 = 1;
pub const CTRL_ATTR_FAMILY_NAME: u16 = 2;
pub const GENL_HDRLEN: usize = 4;
pub const NLA_HDRLEN: usize = 4;
const NLA_TYPE_MASK: u16 = 0x3fff;
const GENL_VERSION: u8 = 1;

// linux/net_dropmon.h
pub const NET_DM_FAMILY_NAME: &str = "NET_DM";
pub const NET_DM_GRP_ALERT: u32 = 1;
pub const NET_DM_CMD_ALERT: u8 = 1;
pub const NET_DM_CMD_CONFIG: u8 = 2;
pub const NET_DM_CMD_START: u8 = 3;
pub const NET_DM_CMD_STOP: u8 = 4;

/// `struct net_dm_drop_point`: 8-byte raw pc + u32 count.
pub const DROP_POINT_SIZE: usize = 12;

/// Offset of the `entries` count inside an alert message.
const ALERT_ENTRIES_OFFSET: usize = NLMSG_HDRLEN + GENL_HDRLEN + NLA_HDRLEN;
/// Offset of the first drop-point record.
const ALERT_POINTS_OFFSET: usize = ALERT_ENTRIES_OFFSET + 4;
/// Shortest error message carrying a full `struct nlmsgerr`.
const ERROR_MSG_MIN_LEN: usize = NLMSG_HDRLEN + 4 + NLMSG_HDRLEN;

const fn nlmsg_align(len: usize) -> usize {
    (len + NLMSG_ALIGNTO - 1) & !(NLMSG_ALIGNTO - 1)
}

struct NlMsgHdr {
    len: usize,
    ty: u16,
}

fn parse_header(buf: &[u8]) -> Option<NlMsgHdr> {
    let len = read_u32(buf, 0)? as usize;
    let ty = read_u16(buf, 4)?;
    Some(NlMsgHdr { len, ty })
}

fn read_u16(buf: &[u8], offset: usize) -> Option<u16> {
    buf.get(offset..offset + 2)?.try_into().ok().map(u16::from_ne_bytes)
}

fn read_u32(buf: &[u8], offset: usize) -> Option<u32> {
    buf.get(offset..offset + 4)?.try_into().ok().map(u32::from_ne_bytes)
}

fn read_i32(buf: &[u8], offset: usize) -> Option<i32> {
    buf.get(offset..offset + 4)?.try_into().ok().map(i32::from_ne_bytes)
}

fn read_u64(buf: &[u8], offset: usize) -> Option<u64> {
    buf.get(offset..offset + 8)?.try_into().ok().map(u64::from_ne_bytes)
}

/// Encode a bare generic netlink request: one nlmsghdr + genlmsghdr, no
/// attributes. The kernel fills in the sender pid.
#[must_use]
pub fn genl_request(family: u16, flags: u16, seq: u32, cmd: u8) -> Vec<u8> {
    let len = NLMSG_HDRLEN + GENL_HDRLEN;
    let mut buf = Vec::with_capacity(len);
    buf.extend_from_slice(&u32::try_from(len).unwrap_or(0).to_ne_bytes());
    buf.extend_from_slice(&family.to_ne_bytes());
    buf.extend_from_slice(&flags.to_ne_bytes());
    buf.extend_from_slice(&seq.to_ne_bytes());
    buf.extend_from_slice(&0u32.to_ne_bytes()); // pid
    buf.push(cmd);
    buf.push(GENL_VERSION);
    buf.extend_from_slice(&0u16.to_ne_bytes()); // reserved
    buf
}

/// Encode a `CTRL_CMD_GETFAMILY` request resolving `name` to a family id.
#[must_use]
pub fn family_request(seq: u32, name: &str) -> Vec<u8> {
    let mut buf = genl_request(GENL_ID_CTRL, NLM_F_REQUEST, seq, CTRL_CMD_GETFAMILY);

    let nla_len = NLA_HDRLEN + name.len() + 1;
    buf.extend_from_slice(&u16::try_from(nla_len).unwrap_or(0).to_ne_bytes());
    buf.extend_from_slice(&CTRL_ATTR_FAMILY_NAME.to_ne_bytes());
    buf.extend_from_slice(name.as_bytes());
    buf.push(0); // NUL terminator
    while buf.len() % NLMSG_ALIGNTO != 0 {
        buf.push(0);
    }

    let total = u32::try_from(buf.len()).unwrap_or(0);
    buf[0..4].copy_from_slice(&total.to_ne_bytes());
    buf
}

/// Extract the numeric family id from a `GETFAMILY` reply datagram.
///
/// Returns `None` for error replies or when the attribute is missing.
#[must_use]
pub fn parse_family_id(buf: &[u8]) -> Option<u16> {
    let hdr = parse_header(buf)?;
    if hdr.ty == NLMSG_ERROR {
        let code = read_i32(buf, NLMSG_HDRLEN).unwrap_or(0);
        debug!("family resolution rejected: error {code}");
        return None;
    }
    if hdr.ty != GENL_ID_CTRL {
        return None;
    }

    // Walk the controller reply's attribute list
    let end = hdr.len.min(buf.len());
    let mut offset = NLMSG_HDRLEN + GENL_HDRLEN;
    while offset + NLA_HDRLEN <= end {
        let nla_len = read_u16(buf, offset)? as usize;
        let nla_type = read_u16(buf, offset + 2)? & NLA_TYPE_MASK;
        if nla_len < NLA_HDRLEN {
            return None;
        }
        if nla_type == CTRL_ATTR_FAMILY_ID {
            return read_u16(buf, offset + NLA_HDRLEN);
        }
        offset += nlmsg_align(nla_len);
    }
    None
}

/// Walk one received datagram, appending decoded drop events.
///
/// Processing never aborts on a malformed message: errors are surfaced as
/// diagnostics and the walk continues with the next frame where framing
/// allows, or ends quietly where it does not.
pub fn decode_datagram(buf: &[u8], family: u16, events: &mut Vec<DropEvent>) {
    let mut offset = 0;
    while offset + NLMSG_HDRLEN <= buf.len() {
        let msg = &buf[offset..];
        let Some(hdr) = parse_header(msg) else { break };

        let mut advance = hdr.len;
        if hdr.ty == NLMSG_NOOP {
            // skipped
        } else if hdr.ty == NLMSG_ERROR {
            report_error_msg(msg, hdr.len);
        } else if hdr.ty == family {
            // For alerts the recomputed length replaces the declared one,
            // so a lying header cannot desynchronize the walk
            if let Some(recomputed) = decode_family_msg(msg, events) {
                advance = recomputed;
            }
        } else {
            debug!("ignoring netlink message type {}", hdr.ty);
        }

        if advance < NLMSG_HDRLEN {
            warn!("netlink message with impossible length {advance}");
            break;
        }
        offset += nlmsg_align(advance);
    }
}

/// `NLMSG_ERROR` doubles as the acknowledgment carrier: code 0 is the ack
/// for a control request, anything else is a kernel-reported failure.
/// Neither stops the walk.
fn report_error_msg(msg: &[u8], declared: usize) {
    if declared < ERROR_MSG_MIN_LEN {
        match read_i32(msg, NLMSG_HDRLEN) {
            Some(code) => warn!(
                "error message too short ({declared} < {ERROR_MSG_MIN_LEN}), assumed code {code}"
            ),
            None => warn!("error message too short ({declared} < {ERROR_MSG_MIN_LEN})"),
        }
        return;
    }
    match read_i32(msg, NLMSG_HDRLEN) {
        Some(0) => debug!("control request acknowledged"),
        Some(code) => {
            let errno = std::io::Error::from_raw_os_error(-code);
            warn!("kernel reported error {code}: {errno}");
        }
        None => warn!("error message truncated"),
    }
}

/// Decode one message addressed to the drop-monitor family.
///
/// For `ALERT` the authoritative length is recomputed from the header
/// sizes and the record count, because the kernel's declared outer length
/// is unreliable for this message and trusting it would desynchronize the
/// framing of everything after it. Returns the recomputed length, or
/// `None` when the declared length should be used as-is.
fn decode_family_msg(msg: &[u8], events: &mut Vec<DropEvent>) -> Option<usize> {
    let cmd = *msg.get(NLMSG_HDRLEN)?;
    if cmd != NET_DM_CMD_ALERT {
        debug!("ignoring drop-monitor command {cmd}");
        return None;
    }

    let nla_type = read_u16(msg, NLMSG_HDRLEN + GENL_HDRLEN + 2)? & NLA_TYPE_MASK;
    if nla_type != 0 {
        debug!("alert attribute has unexpected type {nla_type}");
    }

    let entries = read_u32(msg, ALERT_ENTRIES_OFFSET)? as usize;
    let mut decoded = 0;
    for i in 0..entries {
        let record = ALERT_POINTS_OFFSET + i * DROP_POINT_SIZE;
        // The pc is a raw program counter copied byte-wise, never dereferenced
        let Some(address) = read_u64(msg, record) else { break };
        let Some(count) = read_u32(msg, record + 8) else { break };
        events.push(DropEvent { address, count });
        decoded += 1;
    }
    if decoded < entries {
        warn!("alert claims {entries} drop points but the datagram holds {decoded}");
    }

    Some(ALERT_POINTS_OFFSET + entries * DROP_POINT_SIZE)
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::{
        DROP_POINT_SIZE, GENL_VERSION, NET_DM_CMD_ALERT, NLMSG_ERROR, NLMSG_HDRLEN, NLMSG_NOOP,
    };

    /// Build an alert message; `declared_len` overrides the outer length
    /// field to model the kernel's inconsistent reporting.
    pub fn alert_msg(family: u16, points: &[(u64, u32)], declared_len: Option<u32>) -> Vec<u8> {
        let payload_len = 4 + 4 + points.len() * DROP_POINT_SIZE; // nlattr + entries + records
        let actual = NLMSG_HDRLEN + 4 + payload_len;
        let declared = declared_len.unwrap_or(u32::try_from(actual).unwrap());

        let mut buf = Vec::new();
        buf.extend_from_slice(&declared.to_ne_bytes());
        buf.extend_from_slice(&family.to_ne_bytes());
        buf.extend_from_slice(&0u16.to_ne_bytes()); // flags
        buf.extend_from_slice(&7u32.to_ne_bytes()); // seq
        buf.extend_from_slice(&0u32.to_ne_bytes()); // pid
        buf.push(NET_DM_CMD_ALERT);
        buf.push(GENL_VERSION);
        buf.extend_from_slice(&0u16.to_ne_bytes());
        // nlattr: NLA_UNSPEC wrapping the alert payload
        buf.extend_from_slice(&u16::try_from(4 + payload_len - 4).unwrap().to_ne_bytes());
        buf.extend_from_slice(&0u16.to_ne_bytes());
        buf.extend_from_slice(&u32::try_from(points.len()).unwrap().to_ne_bytes());
        for (pc, count) in points {
            buf.extend_from_slice(&pc.to_ne_bytes());
            buf.extend_from_slice(&count.to_ne_bytes());
        }
        buf
    }

    pub fn error_msg(code: i32) -> Vec<u8> {
        let len = NLMSG_HDRLEN + 4 + NLMSG_HDRLEN;
        let mut buf = Vec::new();
        buf.extend_from_slice(&u32::try_from(len).unwrap().to_ne_bytes());
        buf.extend_from_slice(&NLMSG_ERROR.to_ne_bytes());
        buf.extend_from_slice(&0u16.to_ne_bytes());
        buf.extend_from_slice(&3u32.to_ne_bytes());
        buf.extend_from_slice(&0u32.to_ne_bytes());
        buf.extend_from_slice(&code.to_ne_bytes());
        // echo of the offending request header
        buf.extend_from_slice(&[0u8; NLMSG_HDRLEN]);
        buf
    }

    pub fn short_error_msg() -> Vec<u8> {
        let len = NLMSG_HDRLEN + 4;
        let mut buf = Vec::new();
        buf.extend_from_slice(&u32::try_from(len).unwrap().to_ne_bytes());
        buf.extend_from_slice(&NLMSG_ERROR.to_ne_bytes());
        buf.extend_from_slice(&0u16.to_ne_bytes());
        buf.extend_from_slice(&3u32.to_ne_bytes());
        buf.extend_from_slice(&0u32.to_ne_bytes());
        buf.extend_from_slice(&(-22i32).to_ne_bytes());
        buf
    }

    pub fn noop_msg() -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&u32::try_from(NLMSG_HDRLEN).unwrap().to_ne_bytes());
        buf.extend_from_slice(&NLMSG_NOOP.to_ne_bytes());
        buf.extend_from_slice(&0u16.to_ne_bytes());
        buf.extend_from_slice(&1u32.to_ne_bytes());
        buf.extend_from_slice(&0u32.to_ne_bytes());
        buf
    }
}
