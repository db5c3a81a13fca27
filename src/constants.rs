// MIT License - Copyright (c) 2026 Peter Wright
// Pertronic F100A mimic protocol constants

/// Leading bytes of an LED mimic frame.
pub const LED_MIMIC_PREFIX: [u8; 2] = [0x19, 0x24];
/// Leading bytes of an LCD mimic frame for line 1.
pub const LCD_LINE_1_PREFIX: [u8; 2] = [0x20, 0x17];
/// Leading bytes of an LCD mimic frame for line 2.
pub const LCD_LINE_2_PREFIX: [u8; 2] = [0x20, 0x18];
/// Leading bytes of the panel heartbeat.
pub const HEARTBEAT_PREFIX: [u8; 2] = [0x80, 0x22];

pub const LED_MIMIC_LEN: usize = 38;
pub const LCD_LINE_LEN: usize = 46;
pub const HEARTBEAT_LEN: usize = 2;

/// Offset of the global LED bitfield inside an LED mimic frame.
pub const LED_GLOBAL_OFFSET: usize = 2;
/// First byte of the addressable lamp bitmap (32 bytes, 8 lamps per byte).
pub const LED_LAMP_OFFSET: usize = 4;
pub const LED_LAMP_BYTES: usize = 32;

/// LCD text occupies bytes 2..42, the condition bitfield bytes 42..46.
pub const LCD_TEXT_OFFSET: usize = 2;
pub const LCD_TEXT_LEN: usize = 40;
pub const LCD_CONDITION_OFFSET: usize = 42;

/// Number of addressable lamps mirrored from the panel (consumer numbering 1..=256).
pub const LAMP_COUNT: usize = 256;
/// Lamp table size; slot 0 is reserved so lamp numbers index directly.
pub const LAMP_SLOTS: usize = LAMP_COUNT + 1;

/// Default TCP port of the RS485-to-Ethernet interface.
pub const DEFAULT_PORT: u16 = 20108;
/// Upper bound for one socket read.
pub const DEFAULT_READ_BUFFER: usize = 500;
/// Upper bound for bytes held back waiting for a frame to complete.
pub const DEFAULT_MAX_PENDING: usize = 4096;
pub const DEFAULT_READ_TIMEOUT_MS: u64 = 1000;
pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 10_000;
pub const DEFAULT_MAX_RECONNECT_DELAY_MS: u64 = 160_000;
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 3;
pub const DEFAULT_PROBE_TIMEOUT_MS: u64 = 5000;
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Format bytes as space-separated lowercase hex, e.g. `19 24 00`.
pub fn hex_bytes(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_bytes() {
        assert_eq!(hex_bytes(&[0x19, 0x24, 0x00, 0xff]), "19 24 00 ff");
        assert_eq!(hex_bytes(&[]), "");
    }

    #[test]
    fn test_frame_layout_fits() {
        assert_eq!(LED_LAMP_OFFSET + LED_LAMP_BYTES, LED_MIMIC_LEN - 2);
        assert_eq!(LED_LAMP_BYTES * 8, LAMP_COUNT);
        assert_eq!(LCD_TEXT_OFFSET + LCD_TEXT_LEN, LCD_CONDITION_OFFSET);
        assert_eq!(LCD_CONDITION_OFFSET + 4, LCD_LINE_LEN);
    }
}
