//! Tun Client library.
//!
//! Traffic mediation in front of a local service: the magic auth gate,
//! request classification plugins, and the request log they feed.

pub mod config;
pub mod gate;
pub mod logger;
pub mod plugins;
pub mod proxy;
