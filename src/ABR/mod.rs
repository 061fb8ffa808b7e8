pub mod client;
pub mod command;
pub mod config;
pub mod decider;
pub mod report;
pub mod server;

pub use client::{AbrClient, TickSummary};
pub use command::{decode_rate, encode_rate, RateCommandSink, RecordingSink, UdpRateSender};
pub use config::{AbrConfig, AbrConfigBuilder, DEFAULT_TIERS_BPS};
pub use decider::{ExchangeDecider, HoldTier, ThroughputRule, TierDecider};
pub use report::AbrReport;
pub use server::{RateController, TrafficSource};
