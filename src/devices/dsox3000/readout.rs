//! Bulk readout of segmented memory and the metadata that goes with it.

use std::time::Instant;

use log::{debug, info};

use crate::block;
use crate::error::ReadoutError;
use crate::scpi;
use crate::transport::Transport;

use super::Dsox3000;
use super::acquire::SessionState;
use super::demux::Preamble;

/// Payload of a definite-length block, with its framing checked.
#[derive(Debug, Clone, PartialEq)]
pub struct RawBlock {
	pub data: Vec<u8>,
	pub declared_len: usize,
	pub received_len: usize,
}

impl RawBlock {

	/// Wrap bytes that were not framed by the instrument.
	pub fn from_payload(data:Vec<u8>) -> Self {
		let len = data.len();
		Self{ data, declared_len: len, received_len: len }
	}

	/// Strip the header and terminator from a complete block response.
	pub fn from_response(mut response:Vec<u8>) -> Result<Self, ReadoutError> {
		let header = block::parse_header(&response)?;
		let declared_len = block::parse_block(&response)?.len();
		response.truncate(header.header_len + declared_len);
		response.drain(..header.header_len);
		Ok(Self{ data: response, declared_len, received_len: declared_len })
	}

	pub fn len(&self) -> usize { self.data.len() }
	pub fn is_empty(&self) -> bool { self.data.is_empty() }

}

impl<T: Transport> Dsox3000<T> {

	/// Read the whole of segmented memory with one `:WAVeform:DATA?`.
	///
	/// The block must declare exactly `expected_len` bytes and deliver all of them. The read is
	/// refused while an acquisition is still armed or capturing.
	pub fn read_waveform_block(&mut self, expected_len:usize) -> Result<RawBlock, ReadoutError> {
		let busy = self.session.as_ref()
			.map(|s| s.state() == SessionState::Armed || s.state() == SessionState::Capturing)
			.unwrap_or(false);
		if busy {
			return Err(ReadoutError::AcquisitionInProgress);
		}

		let timeout = self.timing.transfer_timeout(expected_len);
		info!("Reading {} byte waveform block (timeout {:?})", expected_len, timeout);

		let start = Instant::now();
		let response = self.transport.query(":WAVeform:DATA?", timeout)?;
		let elapsed = start.elapsed();

		let header = block::parse_header(&response)?;
		if header.declared_len != expected_len {
			return Err(ReadoutError::UnexpectedLength{ expected: expected_len, declared: header.declared_len });
		}

		let raw = RawBlock::from_response(response)?;
		let rate = raw.len() as f64 / elapsed.as_secs_f64().max(1e-9);
		info!("Received {} bytes in {:.3?} ({:.0} kB/s)", raw.len(), elapsed, rate / 1e3);
		Ok(raw)
	}

	pub fn read_preamble(&mut self) -> Result<Preamble, ReadoutError> {
		let reply = self.ask_str(":WAVeform:PREamble?")?;
		Preamble::parse(&reply)
	}

	/// Trigger time of each segment in seconds, relative to the first.
	pub fn read_segment_timestamps(&mut self) -> Result<Vec<f64>, ReadoutError> {
		let reply = self.ask_str(":WAVeform:SEGMented:XLISt? TTAGs")?;
		let tags = scpi::parse_number_list(&reply).map_err(ReadoutError::MalformedTimestamps)?;
		debug!("{} segment time tags", tags.len());
		Ok(tags)
	}

}
