//! Messaging channel boundary - inbound events, debouncing, single-flight
//!
//! This crate provides the channel-facing plumbing for nurture:
//! - **Events** (`events`) - inbound payload normalization, reset-sentinel
//!   detection, the outbound sender trait
//! - **Debounce** (`debounce`) - per-sender sliding-window batching of
//!   bursty inbound messages
//! - **Single-flight** (`single_flight`) - non-blocking per-key execution
//!   claims with a crash-recovery TTL
//! - **Runner** (`runner`) - transport event pump with reconnection logic
//!
//! # Architecture
//!
//! ```text
//! Transport → ChannelRunner → IngressHandler → MessageDebouncer
//!                                                   ↓ (window elapses)
//!                                          BatchFlushHandler → engagement pipeline
//! ```
//!
//! # Key Types
//!
//! - `ChannelRunner` - transport event loop with reconnect policy
//! - `MessageDebouncer` - keyed timer registry; a steady stream of messages
//!   postpones the flush until the sender goes quiet
//! - `SingleFlight` - at most one in-flight batch per lead
//! - `MessageSender` - outbound delivery trait (noop when no gateway is
//!   configured)

pub mod debounce;
pub mod events;
pub mod runner;
pub mod single_flight;
