// MIT License - Copyright (c) 2026 Peter Wright
// Decoders for the LED mimic, LCD line and heartbeat frames

use bitflags::bitflags;

use crate::constants::{
    LCD_CONDITION_OFFSET, LCD_LINE_1_PREFIX, LCD_LINE_2_PREFIX, LCD_LINE_LEN, LCD_TEXT_LEN,
    LCD_TEXT_OFFSET, LED_GLOBAL_OFFSET, LED_LAMP_BYTES, LED_LAMP_OFFSET, LED_MIMIC_LEN,
    LED_MIMIC_PREFIX, hex_bytes,
};
use crate::error::{MimicError, Result};
use crate::protocol::FrameKind;
use crate::state::{Condition, TriState};

bitflags! {
    /// Global LED bitfield, byte 2 of the LED mimic frame.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct LedGlobalFlags: u8 {
        const EVACUATE       = 0x02;
        const SILENCE_ALARMS = 0x04;
        const DEFECT         = 0x40;
        const FIRE           = 0x80;
    }
}

impl LedGlobalFlags {
    pub fn is_fire(&self) -> bool {
        self.contains(Self::FIRE)
    }

    pub fn is_defect(&self) -> bool {
        self.contains(Self::DEFECT)
    }

    pub fn is_evacuate(&self) -> bool {
        self.contains(Self::EVACUATE)
    }

    pub fn is_silence_alarms(&self) -> bool {
        self.contains(Self::SILENCE_ALARMS)
    }

    /// Normal is lit exactly when neither fire nor defect is.
    pub fn is_normal(&self) -> bool {
        !self.intersects(Self::FIRE | Self::DEFECT)
    }
}

bitflags! {
    /// Condition bitfield, the last four bytes of an LCD line frame read
    /// big-endian: byte 2 lands in bits 8-15, byte 3 in bits 0-7.
    ///
    /// Sprinkler has no known bit and is never decoded.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct LcdConditionFlags: u32 {
        /// byte 3, 0x02
        const FIRE                 = 0x0000_0002;
        /// byte 3, 0x04
        const EVACUATE             = 0x0000_0004;
        /// byte 3, 0x10
        const SILENCE_ALARMS       = 0x0000_0010;
        /// byte 2, 0x01
        const DEVICE_ISOLATED      = 0x0000_0100;
        /// byte 2, 0x02
        const PSU_DEFECT           = 0x0000_0200;
        /// byte 2, 0x08
        const AUX_ISOLATED         = 0x0000_0800;
        /// byte 2, 0x10
        const DEFECT               = 0x0000_1000;
        /// byte 2, 0x20
        const WALK_TEST            = 0x0000_2000;
        /// byte 2, 0x80
        const DOOR_HOLDER_ISOLATED = 0x0000_8000;
    }
}

impl LcdConditionFlags {
    pub fn from_bytes(bytes: [u8; 4]) -> Self {
        Self::from_bits_retain(u32::from_be_bytes(bytes))
    }

    /// Value of a named condition under these flags.
    pub fn condition(&self, condition: Condition) -> TriState {
        let flag = match condition {
            Condition::Normal => {
                return Some(!self.intersects(Self::FIRE | Self::DEFECT));
            }
            Condition::Sprinkler => return None,
            Condition::Fire => Self::FIRE,
            Condition::Defect => Self::DEFECT,
            Condition::Evacuate => Self::EVACUATE,
            Condition::SilenceAlarms => Self::SILENCE_ALARMS,
            Condition::DeviceIsolated => Self::DEVICE_ISOLATED,
            Condition::PsuDefect => Self::PSU_DEFECT,
            Condition::DoorHolderIsolated => Self::DOOR_HOLDER_ISOLATED,
            Condition::AuxIsolated => Self::AUX_ISOLATED,
            Condition::WalkTest => Self::WALK_TEST,
        };
        Some(self.contains(flag))
    }
}

/// Content of an LED mimic frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedMimicUpdate {
    pub flags: LedGlobalFlags,
    /// Lamp bitmap; lamp `n` is bit `(n-1) % 8` of byte `(n-1) / 8`.
    pub lamp_bits: [u8; LED_LAMP_BYTES],
}

impl LedMimicUpdate {
    /// Every lamp as `(lamp number, lit)`, lamp numbers 1-256.
    pub fn lamps(&self) -> impl Iterator<Item = (u16, bool)> + '_ {
        self.lamp_bits.iter().enumerate().flat_map(|(offset, byte)| {
            (0..8).map(move |bit| ((offset * 8 + bit + 1) as u16, *byte & (1u8 << bit) != 0))
        })
    }
}

/// Content of an LCD line frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LcdLineUpdate {
    /// 1 or 2
    pub line: u8,
    pub text: String,
    pub conditions: LcdConditionFlags,
}

/// A decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    LedMimic(LedMimicUpdate),
    LcdLine(LcdLineUpdate),
    Heartbeat,
    /// Recognized, consumed, carries no state.
    Discarded(FrameKind),
}

/// Decode one complete frame of `kind`.
pub fn decode_frame(kind: FrameKind, frame: &[u8]) -> Result<Decoded> {
    match kind {
        FrameKind::LedMimic => decode_led_mimic(frame).map(Decoded::LedMimic),
        FrameKind::LcdLine1 | FrameKind::LcdLine2 => decode_lcd_line(frame).map(Decoded::LcdLine),
        FrameKind::Heartbeat => Ok(Decoded::Heartbeat),
        other => Ok(Decoded::Discarded(other)),
    }
}

/// Decode a `19 24` LED mimic frame.
pub fn decode_led_mimic(frame: &[u8]) -> Result<LedMimicUpdate> {
    if !frame.starts_with(&LED_MIMIC_PREFIX) || frame.len() != LED_MIMIC_LEN {
        return Err(MimicError::FrameValidation {
            kind: FrameKind::LedMimic,
            details: format!("{} bytes: {}", frame.len(), hex_bytes(frame)),
        });
    }

    let mut lamp_bits = [0u8; LED_LAMP_BYTES];
    lamp_bits.copy_from_slice(&frame[LED_LAMP_OFFSET..LED_LAMP_OFFSET + LED_LAMP_BYTES]);

    Ok(LedMimicUpdate {
        flags: LedGlobalFlags::from_bits_retain(frame[LED_GLOBAL_OFFSET]),
        lamp_bits,
    })
}

/// Decode a `20 17` / `20 18` LCD line frame.
pub fn decode_lcd_line(frame: &[u8]) -> Result<LcdLineUpdate> {
    let line = if frame.starts_with(&LCD_LINE_1_PREFIX) {
        1
    } else if frame.starts_with(&LCD_LINE_2_PREFIX) {
        2
    } else {
        0
    };
    if line == 0 || frame.len() != LCD_LINE_LEN {
        return Err(MimicError::FrameValidation {
            kind: if line == 2 { FrameKind::LcdLine2 } else { FrameKind::LcdLine1 },
            details: format!("{} bytes: {}", frame.len(), hex_bytes(frame)),
        });
    }

    let text = decode_text(&frame[LCD_TEXT_OFFSET..LCD_TEXT_OFFSET + LCD_TEXT_LEN]);
    let mut condition_bytes = [0u8; 4];
    condition_bytes.copy_from_slice(&frame[LCD_CONDITION_OFFSET..LCD_LINE_LEN]);

    Ok(LcdLineUpdate {
        line,
        text,
        conditions: LcdConditionFlags::from_bytes(condition_bytes),
    })
}

/// The display uses a single-byte character set; map each byte to the
/// Latin-1 code point and strip padding spaces from both ends.
fn decode_text(bytes: &[u8]) -> String {
    let text: String = bytes.iter().map(|&b| b as char).collect();
    text.trim_matches(' ').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn led_frame(global: u8, lamps: &[(usize, u8)]) -> Vec<u8> {
        let mut frame = vec![0u8; LED_MIMIC_LEN];
        frame[..2].copy_from_slice(&LED_MIMIC_PREFIX);
        frame[LED_GLOBAL_OFFSET] = global;
        for (offset, byte) in lamps {
            frame[LED_LAMP_OFFSET + offset] = *byte;
        }
        frame
    }

    fn lcd_frame(line: u8, text: &str, byte2: u8, byte3: u8) -> Vec<u8> {
        let mut frame = vec![b' '; LCD_LINE_LEN];
        frame[0] = 0x20;
        frame[1] = if line == 1 { 0x17 } else { 0x18 };
        for (i, b) in text.bytes().take(LCD_TEXT_LEN).enumerate() {
            frame[LCD_TEXT_OFFSET + i] = b;
        }
        frame[LCD_CONDITION_OFFSET..].copy_from_slice(&[0, 0, byte2, byte3]);
        frame
    }

    #[test]
    fn test_led_global_flags() {
        let update = decode_led_mimic(&led_frame(0x80 | 0x04, &[])).unwrap();
        assert!(update.flags.is_fire());
        assert!(update.flags.is_silence_alarms());
        assert!(!update.flags.is_evacuate());
        assert!(!update.flags.is_defect());
        assert!(!update.flags.is_normal());

        let update = decode_led_mimic(&led_frame(0x02, &[])).unwrap();
        assert!(update.flags.is_evacuate());
        assert!(update.flags.is_normal());
    }

    #[test]
    fn test_normal_is_not_fire_or_defect() {
        for bits in 0..=u8::MAX {
            let flags = LedGlobalFlags::from_bits_retain(bits);
            assert_eq!(flags.is_normal(), !(flags.is_fire() || flags.is_defect()));
        }
        for byte2 in 0..=u8::MAX {
            for byte3 in [0x00, 0x02, 0x10, 0xff] {
                let flags = LcdConditionFlags::from_bytes([0, 0, byte2, byte3]);
                let fire = flags.condition(Condition::Fire).unwrap();
                let defect = flags.condition(Condition::Defect).unwrap();
                assert_eq!(flags.condition(Condition::Normal), Some(!(fire || defect)));
            }
        }
    }

    #[test]
    fn test_lamp_numbering() {
        // byte 0 bit 0 -> lamp 1, byte 3 bit 7 -> lamp 32, byte 31 bit 7 -> lamp 256
        let update = decode_led_mimic(&led_frame(0, &[(0, 0x01), (3, 0x80), (31, 0x80)])).unwrap();
        let lit: Vec<u16> = update.lamps().filter(|(_, on)| *on).map(|(n, _)| n).collect();
        assert_eq!(lit, vec![1, 32, 256]);
        assert_eq!(update.lamps().count(), 256);
    }

    #[test]
    fn test_led_mimic_rejects_bad_frames() {
        let mut frame = led_frame(0, &[]);
        frame.pop();
        assert!(matches!(
            decode_led_mimic(&frame),
            Err(MimicError::FrameValidation {
                kind: FrameKind::LedMimic,
                ..
            })
        ));
        let mut frame = led_frame(0, &[]);
        frame[1] = 0x25;
        assert!(decode_led_mimic(&frame).is_err());
    }

    #[test]
    fn test_lcd_text_is_trimmed() {
        let update = decode_lcd_line(&lcd_frame(1, "  HELLO WORLD  ", 0, 0)).unwrap();
        assert_eq!(update.line, 1);
        assert_eq!(update.text, "HELLO WORLD");

        let update = decode_lcd_line(&lcd_frame(2, "", 0, 0)).unwrap();
        assert_eq!(update.line, 2);
        assert_eq!(update.text, "");
    }

    #[test]
    fn test_lcd_text_single_byte_charset() {
        let mut frame = lcd_frame(1, "TEMP 20", 0, 0);
        frame[LCD_TEXT_OFFSET + 7] = 0xB0; // degree sign
        let update = decode_lcd_line(&frame).unwrap();
        assert_eq!(update.text, "TEMP 20\u{b0}");
    }

    #[test]
    fn test_lcd_condition_bits() {
        let byte2 = 0x01 | 0x02 | 0x08 | 0x20 | 0x80;
        let update = decode_lcd_line(&lcd_frame(1, "X", byte2, 0x04 | 0x10)).unwrap();
        let c = update.conditions;
        assert_eq!(c.condition(Condition::DeviceIsolated), Some(true));
        assert_eq!(c.condition(Condition::PsuDefect), Some(true));
        assert_eq!(c.condition(Condition::AuxIsolated), Some(true));
        assert_eq!(c.condition(Condition::WalkTest), Some(true));
        assert_eq!(c.condition(Condition::DoorHolderIsolated), Some(true));
        assert_eq!(c.condition(Condition::Evacuate), Some(true));
        assert_eq!(c.condition(Condition::SilenceAlarms), Some(true));
        assert_eq!(c.condition(Condition::Fire), Some(false));
        assert_eq!(c.condition(Condition::Defect), Some(false));
        assert_eq!(c.condition(Condition::Normal), Some(true));
        assert_eq!(c.condition(Condition::Sprinkler), None);

        let update = decode_lcd_line(&lcd_frame(2, "X", 0x10, 0x02)).unwrap();
        assert_eq!(update.conditions.condition(Condition::Fire), Some(true));
        assert_eq!(update.conditions.condition(Condition::Defect), Some(true));
        assert_eq!(update.conditions.condition(Condition::Normal), Some(false));
    }

    #[test]
    fn test_lcd_line_rejects_bad_frames() {
        let mut frame = lcd_frame(2, "X", 0, 0);
        frame.truncate(40);
        assert!(matches!(
            decode_lcd_line(&frame),
            Err(MimicError::FrameValidation {
                kind: FrameKind::LcdLine2,
                ..
            })
        ));
        let mut frame = lcd_frame(1, "X", 0, 0);
        frame[1] = 0x19;
        assert!(decode_lcd_line(&frame).is_err());
    }

    #[test]
    fn test_decode_frame_dispatch() {
        assert_eq!(decode_frame(FrameKind::Heartbeat, &[0x80, 0x22]).unwrap(), Decoded::Heartbeat);
        assert_eq!(
            decode_frame(FrameKind::LcdPoll, &[0x80, 0x90, 0, 0, 0, 0, 0, 0, 0, 0]).unwrap(),
            Decoded::Discarded(FrameKind::LcdPoll)
        );
        assert!(matches!(
            decode_frame(FrameKind::LedMimic, &led_frame(0, &[])).unwrap(),
            Decoded::LedMimic(_)
        ));
    }
}
