// MIT License - Copyright (c) 2026 Peter Wright
//
//! # pertronic-mimic
//!
//! Read-only client for the mimic stream of a Pertronic F100A fire panel,
//! reached through an RS485-to-Ethernet interface.
//!
//! The panel pushes fixed-length binary frames describing its front panel:
//! global LEDs, 256 addressable lamps, two LCD lines and the LCD condition
//! LEDs. This crate reassembles those frames, keeps the latest state in
//! memory and pushes changes to subscribers.
//!
//! ## Quick Start
//!
//! ```no_run
//! use pertronic_mimic::{MimicPanel, PanelConfig, PanelEvent};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = PanelConfig::builder().host("192.168.1.50").port(20108).build();
//!     let mut panel = MimicPanel::new(config);
//!
//!     panel.subscribe_lcd(|l1, l2| println!("{:?} / {:?}", l1, l2)).await;
//!
//!     let mut events = panel.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             if let PanelEvent::ConditionChanged { condition, state } = event {
//!                 println!("{} = {:?}", condition, state);
//!             }
//!         }
//!     });
//!
//!     panel.start().await?;
//!     tokio::signal::ctrl_c().await?;
//!     panel.stop().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod constants;
pub mod decoder;
pub mod error;
pub mod event;
pub mod panel;
pub mod protocol;
pub mod state;
pub mod subscription;
pub mod transport;

// Re-exports for convenience
pub use config::{PanelConfig, PanelConfigBuilder, ResyncPolicy};
pub use error::{MimicError, Result};
pub use event::{EventReceiver, LinkHealth, PanelEvent};
pub use panel::MimicPanel;
pub use protocol::FrameKind;
pub use state::{Condition, Heartbeat, LcdConditions, LcdLine, LedGlobal, PanelState, TriState};
pub use transport::{FrameStats, RetryPolicy};
