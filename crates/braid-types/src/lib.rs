//! Shared types for the Braid streaming chat core.
//!
//! Everything that crosses a crate boundary more than once lives here:
//! stream events and their wire framing, per-thread generation settings,
//! trigger kinds, and usage/timing statistics.

pub mod events;
pub mod settings;

pub use events::{Frame, FrameError, StreamEvent};
pub use settings::{GenerationSettings, TimingStats, TokenUsage, TriggerKind};
