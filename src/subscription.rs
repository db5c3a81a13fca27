// MIT License - Copyright (c) 2026 Peter Wright
// Callback registry for lamps, named conditions and the LCD

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use tracing::error;

use crate::constants::{LAMP_COUNT, LAMP_SLOTS};
use crate::error::{MimicError, Result};
use crate::state::{Condition, TriState};

/// Called with the lamp's new value on every LED mimic frame.
pub type LampCallback = Arc<dyn Fn(bool) + Send + Sync>;
/// Called with the condition's new value on every LCD line frame.
pub type ConditionCallback = Arc<dyn Fn(TriState) + Send + Sync>;
/// Called with the text of line 1 and line 2 on every LCD line frame.
pub type LcdCallback = Arc<dyn Fn(Option<&str>, Option<&str>) + Send + Sync>;

/// Append-only callback lists.
///
/// Lamps and named conditions live in separate typed tables so the two key
/// spaces can never collide. There is no unregister: subscribers live as long
/// as the panel client.
pub struct SubscriptionRegistry {
    lamps: Vec<Vec<LampCallback>>,
    conditions: Vec<Vec<ConditionCallback>>,
    lcd: Vec<LcdCallback>,
}

impl Default for SubscriptionRegistry {
    fn default() -> Self {
        Self {
            lamps: vec![Vec::new(); LAMP_SLOTS],
            conditions: vec![Vec::new(); Condition::ALL.len()],
            lcd: Vec::new(),
        }
    }
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback for lamp 1-256.
    pub fn add_lamp(&mut self, lamp: u32, callback: LampCallback) -> Result<()> {
        if lamp == 0 || lamp as usize > LAMP_COUNT {
            return Err(MimicError::InvalidLamp {
                index: lamp,
                max: LAMP_COUNT as u32,
            });
        }
        self.lamps[lamp as usize].push(callback);
        Ok(())
    }

    pub fn add_condition(&mut self, condition: Condition, callback: ConditionCallback) {
        self.conditions[condition.index()].push(callback);
    }

    pub fn add_lcd(&mut self, callback: LcdCallback) {
        self.lcd.push(callback);
    }

    pub fn lamp_callbacks(&self, lamp: u16) -> &[LampCallback] {
        self.lamps
            .get(lamp as usize)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn condition_callbacks(&self, condition: Condition) -> &[ConditionCallback] {
        &self.conditions[condition.index()]
    }

    pub fn lcd_callbacks(&self) -> &[LcdCallback] {
        &self.lcd
    }

    /// Total number of registered callbacks.
    pub fn len(&self) -> usize {
        self.lamps.iter().map(Vec::len).sum::<usize>()
            + self.conditions.iter().map(Vec::len).sum::<usize>()
            + self.lcd.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Run one consumer callback, containing a panic so it cannot take down the
/// I/O loop or skip the remaining callbacks.
pub fn invoke_guarded(observable: &str, callback: impl FnOnce()) -> Result<()> {
    catch_unwind(AssertUnwindSafe(callback)).map_err(|payload| {
        let err = MimicError::Callback {
            observable: observable.to_string(),
            message: panic_message(payload.as_ref()),
        };
        error!("{}", err);
        err
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_lamp_range_enforced() {
        let mut registry = SubscriptionRegistry::new();
        assert!(registry.add_lamp(1, Arc::new(|_| {})).is_ok());
        assert!(registry.add_lamp(256, Arc::new(|_| {})).is_ok());
        assert!(matches!(
            registry.add_lamp(0, Arc::new(|_| {})),
            Err(MimicError::InvalidLamp {
                index: 0,
                max: 256,
            })
        ));
        assert!(matches!(
            registry.add_lamp(300, Arc::new(|_| {})),
            Err(MimicError::InvalidLamp { index: 300, .. })
        ));
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.lamp_callbacks(1).len(), 1);
        assert_eq!(registry.lamp_callbacks(256).len(), 1);
        assert!(registry.lamp_callbacks(0).is_empty());
    }

    #[test]
    fn test_callbacks_append_without_dedup() {
        let mut registry = SubscriptionRegistry::new();
        let cb: ConditionCallback = Arc::new(|_| {});
        registry.add_condition(Condition::Fire, cb.clone());
        registry.add_condition(Condition::Fire, cb);
        registry.add_lcd(Arc::new(|_, _| {}));
        assert_eq!(registry.condition_callbacks(Condition::Fire).len(), 2);
        assert!(registry.condition_callbacks(Condition::Defect).is_empty());
        assert_eq!(registry.lcd_callbacks().len(), 1);
        assert!(registry.lamp_callbacks(999).is_empty());
    }

    #[test]
    fn test_invoke_guarded_contains_panic() {
        let calls = AtomicUsize::new(0);
        let result = invoke_guarded("lamp 7", || panic!("boom"));
        match result {
            Err(MimicError::Callback { observable, message }) => {
                assert_eq!(observable, "lamp 7");
                assert_eq!(message, "boom");
            }
            other => panic!("unexpected: {:?}", other),
        }

        assert!(invoke_guarded("lamp 7", || {
            calls.fetch_add(1, Ordering::SeqCst);
        })
        .is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
