//! QUIC transport layer for CSI messages.
//!
//! [`client::CsiClient`] and [`server::CsiServer`] exchange [`CsiMessage`]
//! values over QUIC bi-directional streams using `quinn`, one request and
//! one response per stream.
//!
//! [`CsiMessage`]: crate::message::CsiMessage

pub mod client;
pub mod server;

pub use client::CsiClient;
pub use server::CsiServer;
