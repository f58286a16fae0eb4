//! # WiZ Pilot Library
//!
//! `wiz-pilot-lib` discovers WiZ-style smart bulbs on a local network, maps
//! them to a static table of named devices and groups, and sends each one the
//! lighting state it should have.
//!
//! The state a bulb receives is folded from three layers: the installation
//! defaults, an optional override for the bulb's group, and an optional
//! override for the bulb itself. The device layer always wins.
//!
//! ## Features
//!
//! - Device discovery from the ARP table or from a broadcast `getPilot`
//! - Group and device overrides that can be staged without being enabled
//! - One bounded UDP attempt per device, with a per-device outcome
//! - Grouped, column-aligned reports
//!
//! ## Example
//!
//! ```no_run
//! use wiz_pilot_lib::config::{Configuration, Installation};
//! use wiz_pilot_lib::control_interface::Dispatcher;
//! use wiz_pilot_lib::util::discovery::Discovery;
//! use wiz_pilot_lib::util::report::DispatchReport;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let installation = Installation::new(Configuration::builtin()?)?;
//!     let pass = Discovery::from_neighbor_table(&installation.registry).await?;
//!
//!     let results = Dispatcher::new(&installation).dispatch_all(&pass.resolved).await;
//!     print!("{}", DispatchReport::new(&results).render());
//!     Ok(())
//! }
//! ```
//!
//! ## License
//!
//! This project is dual-licensed under the MIT License and the Apache License, Version 2.0.
//! You may choose to use either license, depending on your project needs.

// The `config` module holds the static configuration: the identity table,
// default parameters, override rules and the skip list. A configuration is
// validated once into an `Installation` and never changes afterwards.
pub mod config;

// The `control_interface` module encodes commands for the bulbs and sends
// them, one bounded attempt per device.
//
// Example usage:
//
// ```
// use wiz_pilot_lib::config::ParameterSet;
// use wiz_pilot_lib::control_interface::codec::{encode, Command};
//
// let payload = encode(&Command::SetPilot(ParameterSet::rgb(255, 70, 10)));
// assert_eq!(&payload[..], br#"{"method":"setPilot","params":{"r":255,"g":70,"b":10}}"#);
// ```
pub mod control_interface;

pub mod error;

pub mod identity;

// The `resolver` module computes the parameters a device receives, and
// explicit fade sequences built on top of them.
pub mod resolver;

// The `util` module contains discovery (ARP parsing and broadcast queries),
// the transport seam and report rendering.
pub mod util;
