//! # fluxnova-cdc
//!
//! Change data capture and external task work for a Fluxnova (Camunda 7
//! compatible) workflow engine.
//!
//! Two independent loops share nothing but the engine they talk to:
//!
//! - the **pipeline** polls process history past a persisted watermark and
//!   publishes process and activity records to broker streams (pgmq);
//! - the **dispatcher** leases external tasks by topic, runs the registered
//!   handler, and reports completion or failure back to the engine.

pub mod cdc;
pub mod client;
pub mod config;
pub mod db;
pub mod error;
pub mod model;
pub mod shutdown;
pub mod sink;
pub mod telemetry;
pub mod worker;
