pub mod config;
pub mod history;
pub mod lifecycle;
pub mod peer;
pub mod prober;
pub mod report;
pub mod scroll;
pub mod wire;

#[cfg(test)]
mod prober_tests;

pub use config::ProberConfig;
pub use history::PingHistory;
pub use lifecycle::{mount, ProberHandle};
pub use peer::{LatencyNotice, LatencyPeer, PeerError};
pub use prober::{next_cadence, next_interval, ProbeOutcome, Prober, SkipReason};
pub use report::{Cadence, ProbeReport};
pub use scroll::{
    Document, ElementMetrics, IndicatorElement, IndicatorHost, Overflow, ScrollAffordance,
    ViewportEvent,
};
pub use wire::{serve_connection, LinePeer, PeerMessage, ServeStats, TcpPeer};
