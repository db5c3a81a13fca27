// MIT License - Copyright (c) 2026 Peter Wright
// Socket handling and frame reassembly

pub mod connection;
pub mod reader;

pub use connection::{ConnectionManager, Recovery, RetryPolicy, probe};
pub use reader::{FrameReader, FrameStats};
