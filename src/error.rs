//! Error types for the segmented acquisition pipeline.
//!
//! Each stage has its own enum so a caller can tell a transport glitch from a
//! configuration or logic error. `Error` collects them for `Dsox3000::acquire`.

use std::io;
use std::time::Duration;

use thiserror::Error;

/// Failures of the command/response channel underneath the driver.
#[derive(Debug, Error)]
pub enum TransportError {
	#[error("transport timed out after {0:?}")]
	Timeout(Duration),

	#[error("io error: {0}")]
	Io(#[from] io::Error),

	#[error("device error: {0}")]
	Device(String),

	#[error("protocol error: {0}")]
	Protocol(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
	#[error("invalid parameter {name}: {reason}")]
	InvalidParameter { name: &'static str, reason: String },

	#[error("setting not applied by '{command}': requested {requested}, instrument reports {observed}")]
	NotApplied { command: String, requested: String, observed: String },

	#[error("instrument rejected configuration: {}", .0.join("; "))]
	Rejected(Vec<String>),

	#[error(transparent)]
	Transport(#[from] TransportError),
}

#[derive(Debug, Error)]
pub enum AcquisitionError {
	#[error("acquisition timed out after {timeout:?} with {acquired} of {requested} segments")]
	Timeout { timeout: Duration, acquired: u32, requested: u32 },

	#[error("acquisition timeout {0:?} cannot be represented as a deadline")]
	InvalidTimeout(Duration),

	#[error("instrument fault: {0}")]
	InstrumentFault(String),

	#[error(transparent)]
	Transport(#[from] TransportError),
}

#[derive(Debug, Error)]
pub enum ReadoutError {
	#[error("malformed block header: {0}")]
	MalformedHeader(String),

	#[error("block length mismatch: header declared {declared} bytes, received {received}")]
	LengthMismatch { declared: usize, received: usize },

	#[error("block of {declared} bytes has no terminator")]
	Unterminated { declared: usize },

	#[error("block declares {declared} bytes but the acquisition requires {expected}")]
	UnexpectedLength { expected: usize, declared: usize },

	#[error("malformed preamble: {0}")]
	MalformedPreamble(String),

	#[error("malformed segment timestamp table: {0}")]
	MalformedTimestamps(String),

	#[error("acquisition still in progress, refusing to read out")]
	AcquisitionInProgress,

	#[error("transfer timed out after {0:?}")]
	TransportTimeout(Duration),

	#[error(transparent)]
	Transport(TransportError),
}

impl From<TransportError> for ReadoutError {
	fn from(e: TransportError) -> Self {
		match e {
			TransportError::Timeout(d) => ReadoutError::TransportTimeout(d),
			other                      => ReadoutError::Transport(other),
		}
	}
}

#[derive(Debug, Error)]
pub enum DecodeError {
	#[error("payload of {actual} bytes cannot be split into segments of the expected {expected} bytes total")]
	ChunkSizeMismatch { expected: usize, actual: usize },

	#[error("timestamp table has {actual} entries for {expected} segments")]
	TimestampCountMismatch { expected: usize, actual: usize },
}

/// Any failure of the full configure, arm, read, decode cycle.
#[derive(Debug, Error)]
pub enum Error {
	#[error("configuration failed: {0}")]
	Config(#[from] ConfigError),

	#[error("acquisition failed: {0}")]
	Acquisition(#[from] AcquisitionError),

	#[error("readout failed: {0}")]
	Readout(#[from] ReadoutError),

	#[error("decode failed: {0}")]
	Decode(#[from] DecodeError),

	#[error(transparent)]
	Transport(#[from] TransportError),

	#[error("settings error: {0}")]
	Settings(String),

	#[error("io error: {0}")]
	Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
