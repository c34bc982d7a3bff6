//! Market-signal detectors.
//!
//! Both detectors are pure functions over quote sets that already passed the
//! feed's freshness gate; the additional hard-cutoff filter here is the last
//! line of defense, not the primary one.

pub mod discrepancy;
pub mod sharp;

pub use discrepancy::{detect_discrepancies, DiscrepancyConfig};
pub use sharp::{
    detect_sharp_signals, PublicSplit, SharpConfig, SharpSignal, SignalKind, SignalStrength,
};
