//! VANTAGE Bus - Wire Schema and Message-Bus Abstraction
//!
//! This crate is the shared edge of the fusion network: the typed records
//! that travel between L1 edge nodes and the L2 fusion controller, the
//! length-prefixed frame codec, and the [`BusClient`] trait both sides speak.
//!
//! Production deployments back the trait with an external broker; the
//! in-process [`InProcBus`] ships here so controllers, simulators, and tests
//! can run self-contained.

mod client;
mod error;
mod memory;
pub mod messages;

pub use client::{BusClient, FrameHandler};
pub use error::BusError;
pub use memory::InProcBus;
