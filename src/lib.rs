
#[macro_use]
extern crate lazy_static;

// Error types for every stage of the acquisition pipeline
pub mod error;

// env_logger setup shared by the binaries
pub mod logging;

// External data representation, a protocol for serializing data to be sent over the network
pub mod xdr;

// Remote procedure call, a protocol build on top of XDR to provide something like C-style function calls over the network
pub mod rpc;

// A protocol using RPC that's meant to communicate with instruments like oscilloscopes, power supplies, waveform generators, etc
pub mod vxi11;

// The synchronous write/query/clear boundary the instrument drivers are written against
pub mod transport;

// IEEE 488.2 definite-length binary blocks
pub mod block;

// Helpers for parsing and comparing SCPI replies
pub mod scpi;

// Module for devices driven through a Transport
pub mod devices;

// A simulated DSOX3000 that speaks the same command set, for tests and dry runs
pub mod sim;

pub use error::{AcquisitionError, ConfigError, DecodeError, Error, ReadoutError, Result, TransportError};
