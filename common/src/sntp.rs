//! Minimal SNTP (RFC 4330) client packet codec.

use crate::error::TimeSyncError;

pub const NTP_PORT: u16 = 123;
pub const PACKET_LEN: usize = 48;

const NTP_UNIX_OFFSET: i64 = 2_208_988_800;
const ERA_LENGTH: i64 = 1 << 32;

const MODE_SERVER: u8 = 4;
const MODE_BROADCAST: u8 = 5;
const LEAP_UNSYNCHRONIZED: u8 = 3;

/// LI = 0, VN = 3, Mode = 3 (client); everything else zero.
pub fn client_request() -> [u8; PACKET_LEN] {
    let mut packet = [0_u8; PACKET_LEN];
    packet[0] = 0x1B;
    packet
}

/// Returns the server transmit timestamp as Unix epoch milliseconds.
pub fn decode_response(packet: &[u8]) -> Result<i64, TimeSyncError> {
    if packet.len() < PACKET_LEN {
        return Err(TimeSyncError::InvalidResponse(format!(
            "short packet ({} bytes)",
            packet.len()
        )));
    }

    let mode = packet[0] & 0x07;
    if mode != MODE_SERVER && mode != MODE_BROADCAST {
        return Err(TimeSyncError::InvalidResponse(format!(
            "unexpected mode {mode}"
        )));
    }
    if packet[0] >> 6 == LEAP_UNSYNCHRONIZED {
        return Err(TimeSyncError::InvalidResponse(
            "server clock is unsynchronized".to_string(),
        ));
    }
    if packet[1] == 0 {
        let code = String::from_utf8_lossy(&packet[12..16]).into_owned();
        return Err(TimeSyncError::InvalidResponse(format!(
            "kiss-o'-death `{code}`"
        )));
    }

    let secs = u32::from_be_bytes([packet[40], packet[41], packet[42], packet[43]]);
    let fraction = u32::from_be_bytes([packet[44], packet[45], packet[46], packet[47]]);
    if secs == 0 && fraction == 0 {
        return Err(TimeSyncError::InvalidResponse(
            "empty transmit timestamp".to_string(),
        ));
    }

    // Values with the top bit clear belong to era 1 (after 2036-02-07).
    let ntp_secs = if secs & 0x8000_0000 == 0 {
        i64::from(secs) + ERA_LENGTH
    } else {
        i64::from(secs)
    };
    let millis = ((u64::from(fraction) * 1000) >> 32) as i64;

    Ok((ntp_secs - NTP_UNIX_OFFSET) * 1000 + millis)
}
