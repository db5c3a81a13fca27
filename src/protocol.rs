// MIT License - Copyright (c) 2026 Peter Wright
// Frame catalog for the F100A mimic stream

use std::fmt;

use crate::constants::{
    HEARTBEAT_LEN, HEARTBEAT_PREFIX, LCD_LINE_1_PREFIX, LCD_LINE_2_PREFIX, LCD_LINE_LEN,
    LED_MIMIC_LEN, LED_MIMIC_PREFIX,
};

/// Frame types seen on the mimic stream.
///
/// The stream carries no length prefix and no checksum; a frame is identified
/// purely by its leading bytes and always has the fixed length listed in
/// [`CATALOG`]. Only three kinds carry state; the rest are consumed and dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameKind {
    /// `19 24` - global LEDs and the 256 addressable lamps (38 bytes)
    LedMimic,
    /// `20 17` - LCD line 1 text and condition LEDs (46 bytes)
    LcdLine1,
    /// `20 18` - LCD line 2 text and condition LEDs (46 bytes)
    LcdLine2,
    /// `80 90` - LCD mimic poll (10 bytes)
    LcdPoll,
    /// `80 22` - panel heartbeat (2 bytes)
    Heartbeat,
    /// `11 41` - unidentified (6 bytes)
    Unknown1141,
    /// `A0 88` - unidentified (14 bytes)
    UnknownA088,
    /// `40 40` - LCD mimic 0 response (10 bytes)
    LcdMimicResponse,
    /// `1C 22` - unidentified (36 bytes)
    Unknown1C22,
    /// `47 31 97` - unidentified (3 bytes)
    Unknown473197,
    /// `83 31 97` - unidentified (3 bytes)
    Unknown833197,
}

impl FrameKind {
    /// Whether frames of this kind are consumed without touching panel state.
    pub fn is_discarded(&self) -> bool {
        !matches!(
            self,
            Self::LedMimic | Self::LcdLine1 | Self::LcdLine2 | Self::Heartbeat
        )
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::LedMimic => "LED mimic",
            Self::LcdLine1 => "LCD line 1",
            Self::LcdLine2 => "LCD line 2",
            Self::LcdPoll => "LCD mimic poll",
            Self::Heartbeat => "heartbeat",
            Self::Unknown1141 => "unknown 11 41",
            Self::UnknownA088 => "unknown a0 88",
            Self::LcdMimicResponse => "LCD mimic response",
            Self::Unknown1C22 => "unknown 1c 22",
            Self::Unknown473197 => "unknown 47 31 97",
            Self::Unknown833197 => "unknown 83 31 97",
        }
    }
}

impl fmt::Display for FrameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// One row of the frame catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CatalogEntry {
    pub prefix: &'static [u8],
    pub len: usize,
    pub kind: FrameKind,
}

/// Static frame catalog. Three-byte prefixes come first so the most specific
/// match wins.
pub static CATALOG: [CatalogEntry; 11] = [
    CatalogEntry {
        prefix: &[0x47, 0x31, 0x97],
        len: 3,
        kind: FrameKind::Unknown473197,
    },
    CatalogEntry {
        prefix: &[0x83, 0x31, 0x97],
        len: 3,
        kind: FrameKind::Unknown833197,
    },
    CatalogEntry {
        prefix: &LED_MIMIC_PREFIX,
        len: LED_MIMIC_LEN,
        kind: FrameKind::LedMimic,
    },
    CatalogEntry {
        prefix: &LCD_LINE_1_PREFIX,
        len: LCD_LINE_LEN,
        kind: FrameKind::LcdLine1,
    },
    CatalogEntry {
        prefix: &LCD_LINE_2_PREFIX,
        len: LCD_LINE_LEN,
        kind: FrameKind::LcdLine2,
    },
    CatalogEntry {
        prefix: &[0x80, 0x90],
        len: 10,
        kind: FrameKind::LcdPoll,
    },
    CatalogEntry {
        prefix: &HEARTBEAT_PREFIX,
        len: HEARTBEAT_LEN,
        kind: FrameKind::Heartbeat,
    },
    CatalogEntry {
        prefix: &[0x11, 0x41],
        len: 6,
        kind: FrameKind::Unknown1141,
    },
    CatalogEntry {
        prefix: &[0xA0, 0x88],
        len: 14,
        kind: FrameKind::UnknownA088,
    },
    CatalogEntry {
        prefix: &[0x40, 0x40],
        len: 10,
        kind: FrameKind::LcdMimicResponse,
    },
    CatalogEntry {
        prefix: &[0x1C, 0x22],
        len: 36,
        kind: FrameKind::Unknown1C22,
    },
];

/// Result of looking up the head of a byte buffer in the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameMatch {
    /// A full frame of `kind` is available at the head of the buffer.
    Complete { kind: FrameKind, len: usize },
    /// The head is (or may become) a known frame, but more bytes are needed.
    Incomplete,
    /// No catalog entry can start at the head of the buffer.
    Unrecognized,
}

/// Identify the frame at the head of `buf`.
pub fn match_frame(buf: &[u8]) -> FrameMatch {
    if buf.is_empty() {
        return FrameMatch::Incomplete;
    }

    let mut partial_prefix = false;
    for entry in &CATALOG {
        if buf.starts_with(entry.prefix) {
            if buf.len() < entry.len {
                return FrameMatch::Incomplete;
            }
            return FrameMatch::Complete {
                kind: entry.kind,
                len: entry.len,
            };
        }
        if buf.len() < entry.prefix.len() && entry.prefix.starts_with(buf) {
            partial_prefix = true;
        }
    }

    if partial_prefix {
        FrameMatch::Incomplete
    } else {
        FrameMatch::Unrecognized
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(prefix: &[u8], len: usize) -> Vec<u8> {
        let mut v = prefix.to_vec();
        v.resize(len, 0);
        v
    }

    #[test]
    fn test_catalog_matches_every_entry() {
        for entry in &CATALOG {
            let buf = frame(entry.prefix, entry.len);
            assert_eq!(
                match_frame(&buf),
                FrameMatch::Complete {
                    kind: entry.kind,
                    len: entry.len,
                },
                "entry {}",
                entry.kind
            );
        }
    }

    #[test]
    fn test_short_buffer_is_incomplete() {
        assert_eq!(match_frame(&[]), FrameMatch::Incomplete);
        assert_eq!(match_frame(&[0x19]), FrameMatch::Incomplete);
        assert_eq!(match_frame(&[0x19, 0x24, 0x00]), FrameMatch::Incomplete);
        assert_eq!(match_frame(&[0x47, 0x31]), FrameMatch::Incomplete);
    }

    #[test]
    fn test_three_byte_prefix_requires_third_byte() {
        assert_eq!(
            match_frame(&[0x83, 0x31, 0x97, 0x19]),
            FrameMatch::Complete {
                kind: FrameKind::Unknown833197,
                len: 3,
            }
        );
        assert_eq!(match_frame(&[0x83, 0x31, 0x98]), FrameMatch::Unrecognized);
    }

    #[test]
    fn test_unrecognized_head() {
        assert_eq!(match_frame(&[0x55]), FrameMatch::Unrecognized);
        assert_eq!(match_frame(&[0x19, 0x25, 0x00]), FrameMatch::Unrecognized);
        assert_eq!(match_frame(&[0x80, 0x23]), FrameMatch::Unrecognized);
    }

    #[test]
    fn test_discarded_kinds() {
        assert!(!FrameKind::LedMimic.is_discarded());
        assert!(!FrameKind::Heartbeat.is_discarded());
        assert!(FrameKind::LcdPoll.is_discarded());
        assert!(FrameKind::Unknown1141.is_discarded());
    }
}
