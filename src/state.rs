// MIT License - Copyright (c) 2026 Peter Wright
// Canonical in-memory model of the panel

use std::fmt;

use chrono::{DateTime, Utc};

use crate::constants::{LAMP_COUNT, LAMP_SLOTS};
use crate::decoder::{LcdLineUpdate, LedMimicUpdate};

/// `Some(true)`, `Some(false)`, or `None` while no frame has reported the value.
pub type TriState = Option<bool>;

/// Named alarm/status conditions reported on the LCD condition bitfield.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Condition {
    Normal,
    Fire,
    Defect,
    Evacuate,
    SilenceAlarms,
    DeviceIsolated,
    PsuDefect,
    /// Present on the panel but not decoded; always unknown.
    Sprinkler,
    DoorHolderIsolated,
    AuxIsolated,
    WalkTest,
}

impl Condition {
    pub const ALL: [Condition; 11] = [
        Condition::Normal,
        Condition::Fire,
        Condition::Defect,
        Condition::Evacuate,
        Condition::SilenceAlarms,
        Condition::DeviceIsolated,
        Condition::PsuDefect,
        Condition::Sprinkler,
        Condition::DoorHolderIsolated,
        Condition::AuxIsolated,
        Condition::WalkTest,
    ];

    /// Parse a condition name (e.g., "fire", "door_holder_isolate").
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_str() == name)
    }

    /// The name consumers subscribe with.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Fire => "fire",
            Self::Defect => "defect",
            Self::Evacuate => "evacuate",
            Self::SilenceAlarms => "silence_alarms",
            Self::DeviceIsolated => "device_isolated",
            Self::PsuDefect => "psu_defect",
            Self::Sprinkler => "sprinkler",
            Self::DoorHolderIsolated => "door_holder_isolate",
            Self::AuxIsolated => "aux_isolate",
            Self::WalkTest => "walk_test",
        }
    }

    /// Human-readable label.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Normal => "Normal",
            Self::Fire => "Fire",
            Self::Defect => "Defect",
            Self::Evacuate => "Evacuate",
            Self::SilenceAlarms => "Silence Alarms",
            Self::DeviceIsolated => "Device Isolated",
            Self::PsuDefect => "PSU Defect",
            Self::Sprinkler => "Sprinkler",
            Self::DoorHolderIsolated => "Door Holder Isolated",
            Self::AuxIsolated => "AUX Isolated",
            Self::WalkTest => "Walk Test",
        }
    }

    pub(crate) fn index(&self) -> usize {
        *self as usize
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Global LEDs carried in the LED mimic frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LedGlobal {
    pub normal: TriState,
    pub fire: TriState,
    pub defect: TriState,
    pub evacuate: TriState,
    pub silence_alarms: TriState,
    /// Time of the last LED mimic frame; also stamps the addressable lamps.
    pub timestamp: Option<DateTime<Utc>>,
}

/// One line of the panel LCD.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LcdLine {
    pub display_text: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
}

/// Condition LEDs carried in every LCD line frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LcdConditions {
    values: [TriState; 11],
    pub timestamp: Option<DateTime<Utc>>,
}

impl LcdConditions {
    pub fn get(&self, condition: Condition) -> TriState {
        self.values[condition.index()]
    }

    fn set(&mut self, condition: Condition, value: TriState) {
        self.values[condition.index()] = value;
    }

    /// All conditions with their current values, in [`Condition::ALL`] order.
    pub fn iter(&self) -> impl Iterator<Item = (Condition, TriState)> + '_ {
        Condition::ALL.into_iter().map(|c| (c, self.get(c)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Heartbeat {
    pub status: Option<bool>,
    pub timestamp: Option<DateTime<Utc>>,
}

/// A lamp whose value differs from the previous LED mimic frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LampChange {
    pub lamp: u16,
    pub previous: TriState,
    pub state: bool,
}

/// Everything mirrored from the panel. Every field starts unknown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PanelState {
    pub led_global: LedGlobal,
    /// Indexed by lamp number; slot 0 is reserved and never written.
    addressable_lamps: Vec<TriState>,
    lcd_lines: [LcdLine; 2],
    pub lcd_conditions: LcdConditions,
    pub heartbeat: Heartbeat,
}

impl Default for PanelState {
    fn default() -> Self {
        Self {
            led_global: LedGlobal::default(),
            addressable_lamps: vec![None; LAMP_SLOTS],
            lcd_lines: [LcdLine::default(), LcdLine::default()],
            lcd_conditions: LcdConditions::default(),
            heartbeat: Heartbeat::default(),
        }
    }
}

impl PanelState {
    /// State of a lamp (1-256). Out-of-range lamps are unknown.
    pub fn led_state(&self, lamp: u32) -> TriState {
        if lamp == 0 || lamp as usize > LAMP_COUNT {
            return None;
        }
        self.addressable_lamps[lamp as usize]
    }

    /// State of a named condition. Unrecognized names are unknown.
    pub fn condition_state(&self, name: &str) -> TriState {
        Condition::from_name(name).and_then(|c| self.lcd_conditions.get(c))
    }

    /// Text of LCD line 1 or 2.
    pub fn lcd_text(&self, line: u8) -> Option<&str> {
        self.lcd_line(line).and_then(|l| l.display_text.as_deref())
    }

    pub fn lcd_line(&self, line: u8) -> Option<&LcdLine> {
        match line {
            1 | 2 => Some(&self.lcd_lines[(line - 1) as usize]),
            _ => None,
        }
    }

    /// Apply a decoded LED mimic frame. Returns the lamps whose value changed.
    pub fn apply_led_mimic(
        &mut self,
        update: &LedMimicUpdate,
        now: DateTime<Utc>,
    ) -> Vec<LampChange> {
        let flags = update.flags;
        self.led_global = LedGlobal {
            normal: Some(flags.is_normal()),
            fire: Some(flags.is_fire()),
            defect: Some(flags.is_defect()),
            evacuate: Some(flags.is_evacuate()),
            silence_alarms: Some(flags.is_silence_alarms()),
            timestamp: Some(now),
        };

        let mut changes = Vec::new();
        for (lamp, state) in update.lamps() {
            let slot = &mut self.addressable_lamps[lamp as usize];
            if *slot != Some(state) {
                changes.push(LampChange {
                    lamp,
                    previous: *slot,
                    state,
                });
            }
            *slot = Some(state);
        }
        changes
    }

    /// Apply a decoded LCD line frame. Returns the conditions whose value changed.
    pub fn apply_lcd_line(&mut self, update: &LcdLineUpdate, now: DateTime<Utc>) -> Vec<Condition> {
        self.lcd_lines[(update.line - 1) as usize] = LcdLine {
            display_text: Some(update.text.clone()),
            timestamp: Some(now),
        };

        let mut changed = Vec::new();
        for condition in Condition::ALL {
            let value = update.conditions.condition(condition);
            if self.lcd_conditions.get(condition) != value {
                changed.push(condition);
            }
            self.lcd_conditions.set(condition, value);
        }
        self.lcd_conditions.timestamp = Some(now);
        changed
    }

    /// Record a heartbeat. Returns true if this is the first one seen.
    pub fn apply_heartbeat(&mut self, now: DateTime<Utc>) -> bool {
        let first = self.heartbeat.status.is_none();
        self.heartbeat = Heartbeat {
            status: Some(true),
            timestamp: Some(now),
        };
        first
    }
}
