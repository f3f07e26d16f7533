//! # Loragate - Mailbox Gateway for LoStik LoRa Radios
//!
//! Loragate bridges a persistent message mailbox to a single RN2903
//! "LoStik" USB radio. It speaks the radio's line-oriented serial
//! command protocol, arbitrates the half-duplex channel between
//! listening and transmitting, and records everything that crosses the
//! air in an embedded sled database.
//!
//! ## Features
//!
//! - **Radio Session Management**: Firmware-verified startup sequence
//!   configuring frequency, modulation, spreading factor, and the rest
//!   of the LoRa parameter set before any traffic flows.
//! - **Half-Duplex Arbitration**: Continuous receive with transmit
//!   preemption, so queued messages never wait behind an idle listen.
//! - **Persistent Mailbox**: Outbound queue with attempt-counted
//!   retries and an inbound log with duplicate detection, both durable
//!   across restarts.
//! - **Signal Quality Capture**: RSSI and SNR sampled per received
//!   frame and stored with the message.
//! - **Async Design**: Built with Tokio; cooperative shutdown tears
//!   the radio down cleanly on ctrl-c and on fatal errors alike.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use loragate::config::Config;
//! use loragate::gateway::{Gateway, GatewayLock};
//! use loragate::radio::{Arbiter, RadioSession, SerialTransport};
//! use loragate::storage::MailboxStore;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml").await?;
//!     let _lock = GatewayLock::acquire(&config.gateway.lock_file)?;
//!     let store = MailboxStore::open(MailboxStore::path_under(&config.storage.data_dir))?;
//!     let transport = SerialTransport::open(
//!         &config.radio.port,
//!         config.radio.baud_rate,
//!         Duration::from_millis(config.radio.read_timeout_ms),
//!     )?;
//!     let mut session = RadioSession::new(transport, config.radio.clone());
//!     session.initialize()?;
//!     let mut gateway = Gateway::new(Arbiter::new(session), store, config.gateway.clone());
//!     gateway.run().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! - [`gateway`] - The poll-and-preempt control loop and its outbound
//!   and inbound halves
//! - [`radio`] - Serial transport, session initialization, and
//!   half-duplex arbitration for the LoStik
//! - [`storage`] - The sled-backed mailbox
//! - [`config`] - Configuration management and validation
//! - [`validation`] - Message text rules and the over-the-air payload
//!   codec

pub mod config;
pub mod gateway;
pub mod logutil;
pub mod radio;
pub mod storage;
pub mod validation;
