//! The command/response boundary the instrument drivers are written against.
//!
//! A `Transport` carries one command or query at a time; the driver owns it exclusively and
//! borrows it mutably for each stage, so there is never more than one request in flight.

use std::str;
use std::time::Duration;

use log::trace;

use crate::error::TransportError;
use crate::vxi11::CoreClient;

pub const DEFAULT_COMMAND_TIMEOUT:Duration = Duration::from_secs(5);

pub trait Transport {
	/// Send a command that produces no response.
	fn write(&mut self, command:&str) -> Result<(), TransportError>;

	/// Send a query and return the raw response, waiting at most `timeout` for it.
	fn query(&mut self, command:&str, timeout:Duration) -> Result<Vec<u8>, TransportError>;

	/// Recover from a malformed or partial response by flushing the instrument's buffers.
	fn clear(&mut self) -> Result<(), TransportError>;

	/// Query and decode the reply as text, without the trailing newline.
	fn query_str(&mut self, command:&str, timeout:Duration) -> Result<String, TransportError> {
		let raw = self.query(command, timeout)?;
		let s = str::from_utf8(&raw)
			.map_err(|_| TransportError::Protocol(format!("Reply to '{}' is not UTF-8", command)))?;
		Ok(s.trim_end_matches(|c| c == '\n' || c == '\r').to_owned())
	}
}

impl<T: Transport + ?Sized> Transport for Box<T> {
	fn write(&mut self, command:&str) -> Result<(), TransportError> { (**self).write(command) }
	fn query(&mut self, command:&str, timeout:Duration) -> Result<Vec<u8>, TransportError> { (**self).query(command, timeout) }
	fn clear(&mut self) -> Result<(), TransportError> { (**self).clear() }
}

/// A VXI-11 link to a LAN instrument.
pub struct Vxi11Transport {
	core: CoreClient,
	timeout: Duration,
}

impl Vxi11Transport {

	pub fn open(host:&str) -> Result<Self, TransportError> {
		let mut core = CoreClient::new(host)?;
		core.create_link("inst0")?;
		Ok(Self{ core, timeout: DEFAULT_COMMAND_TIMEOUT })
	}

	pub fn with_timeout(mut self, timeout:Duration) -> Self {
		self.timeout = timeout;
		self
	}

}

impl Transport for Vxi11Transport {

	fn write(&mut self, command:&str) -> Result<(), TransportError> {
		trace!("vxi11 write {}", command);
		self.core.write(command.as_bytes(), self.timeout)
	}

	fn query(&mut self, command:&str, timeout:Duration) -> Result<Vec<u8>, TransportError> {
		trace!("vxi11 query {} (timeout {:?})", command, timeout);
		self.core.write(command.as_bytes(), self.timeout)?;
		self.core.read(timeout)
	}

	fn clear(&mut self) -> Result<(), TransportError> {
		self.core.clear(self.timeout)
	}

}
