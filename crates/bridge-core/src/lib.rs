//! Conference registry and lifecycle core for a selective-forwarding media
//! bridge.
//!
//! This crate is the control plane's central synchronization hub. It
//! ingests conference control requests in two signaling dialects, creates
//! and indexes conference instances, serializes per-conference mutations,
//! drives graceful shutdown, and continuously samples bridge load to steer
//! admission and capacity decisions.
//!
//! # Architecture
//!
//! ```text
//! Bridge (composition root, request router, debug surface)
//! ├── ConferenceRegistry   two indices (by id / by meeting id), one mutex
//! │   └── Conference       opaque actor: FIFO ingress queue + worker task
//! ├── ShutdownCoordinator  Running → GracefulRequested → ForcingExit
//! ├── BridgeLoadManager    packet-rate hysteresis → last-N reducer
//! ├── SyncEventEmitter     conference created/expired fan-out
//! └── Statistics           lock-free counter/gauge surface
//! ```
//!
//! Requests are handed off, never processed inline: the router resolves the
//! target conference under the registry mutex and enqueues the request on
//! that conference's own queue, so one busy conference cannot delay
//! another's traffic.
//!
//! # Modules
//!
//! - [`bridge`] - Composition root and request router
//! - [`buffer_pool`] - Process-wide packet buffer hooks
//! - [`clock`] - Injected wall-clock capability
//! - [`conference`] - The per-conference actor
//! - [`config`] - Service configuration from environment
//! - [`errors`] - Error taxonomy with per-dialect protocol mapping
//! - [`events`] - Lifecycle event fan-out
//! - [`expiry`] - Conference expiration sweeper
//! - [`load`] - Load sampling, hysteresis and the last-N reducer
//! - [`queues`] - Process-wide queue statistics
//! - [`registry`] - The two-index conference registry
//! - [`shutdown`] - Shutdown state machine
//! - [`stats`] - Bridge-wide statistics

#![warn(clippy::pedantic)]

pub mod bridge;
pub mod buffer_pool;
pub mod clock;
pub mod conference;
pub mod config;
pub mod errors;
pub mod events;
pub mod expiry;
pub mod load;
pub mod queues;
pub mod registry;
pub mod shutdown;
pub mod stats;

pub use bridge::Bridge;
pub use config::BridgeConfig;
