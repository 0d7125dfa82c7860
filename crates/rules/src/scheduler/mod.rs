//! Digest batching on wall-clock aligned windows.
//!
//! Realtime matches bypass batching and are released immediately. Daily and
//! weekly matches accumulate in one open [`Batch`] per (rule, frequency,
//! window); [`BatchScheduler::tick`] seals every batch whose window has
//! closed, exactly once, and hands it back for dispatch.
//!
//! Windows are aligned to the reporting UTC offset: daily windows start at
//! local midnight, weekly windows at local midnight of the configured first
//! weekday. They never depend on when the first match arrived, so all rules
//! of a frequency share one cadence.

mod batch;
mod core;
mod window;


pub use self::batch::{Batch, BatchState, Release};
pub use self::core::{BatchScheduler, Enqueued};
pub use self::window::{Window, WindowClock};
