//! Keysight InfiniiVision DSOX3000 in segmented memory mode.
//!
//! One acquisition runs through four stages, each a method taking `&mut self` so the
//! transport is never shared between them:
//!
//! 1. `configure` writes every setting, reads it back and drains the error queue
//! 2. `arm_and_wait` issues `:SINGle` and polls until all segments are captured
//! 3. `read_waveform_block` pulls the whole of segmented memory as one IEEE 488.2 block
//! 4. `demux::decode_with` splits the block into scaled segments
//!
//! `acquire` chains them and cleans up when any of them fails.

pub mod acquire;
pub mod config;
pub mod configure;
pub mod demux;
pub mod readout;

use std::time::Duration;

use log::{debug, info, warn};

use crate::error::{Error, ReadoutError, TransportError};
use crate::scpi::{self, Identity};
use crate::transport::Transport;

pub use acquire::{AcquisitionSession, AcquisitionStatus, SessionState};
pub use config::{AcquisitionConfig, BlockLayout, Coupling, Impedance, InstrumentLimits, SampleFormat,
	ScopeSettings, Timing, TriggerSlope, TriggerSource};
pub use configure::{configuration_plan, Setting, SettingValue};
pub use demux::{decode, decode_with, DecodedAcquisition, Preamble, Scaling, WaveformSegment};
pub use readout::RawBlock;

/// Model numbers of the family all contain this (DSOX3034T, MSOX3104T, ...)
pub const MODEL_FAMILY:&str = "SOX3";

// The instrument reports at most this many queued errors
pub const MAX_ERROR_QUEUE:usize = 30;

pub struct Dsox3000<T: Transport> {
	transport: T,
	identity: Identity,
	limits: InstrumentLimits,
	timing: Timing,
	session: Option<AcquisitionSession>,
}

impl<T: Transport> Dsox3000<T> {

	/// Identify the instrument on the other end of `transport` and clear its status registers.
	pub fn new(mut transport:T) -> Result<Self, TransportError> {
		let timing = Timing::default();
		let idn = transport.query_str("*IDN?", timing.command_timeout)?;
		let identity = scpi::parse_identity(&idn)
			.ok_or_else(|| TransportError::Protocol(format!("Unable to interpret *IDN? reply '{}'", idn)))?;

		if !identity.model.contains(MODEL_FAMILY) {
			return Err(TransportError::Device(format!(
				"Successfully connected to a {} {} but it doesn't appear to be a DSOX3000", identity.manufacturer, identity.model)));
		}

		info!("Connected to {} {} (serial {}, firmware {})", identity.manufacturer, identity.model, identity.serial_num, identity.fw_version);
		transport.write("*CLS")?;

		Ok(Self{ transport, identity, limits: InstrumentLimits::DSOX3000, timing, session: None })
	}

	pub fn with_timing(mut self, timing:Timing) -> Self {
		self.timing = timing;
		self
	}

	pub fn with_limits(mut self, limits:InstrumentLimits) -> Self {
		self.limits = limits;
		self
	}

	pub fn identity(&self) -> &Identity { &self.identity }
	pub fn limits(&self) -> &InstrumentLimits { &self.limits }
	pub fn timing(&self) -> &Timing { &self.timing }

	/// The current or most recent acquisition session.
	pub fn session(&self) -> Option<&AcquisitionSession> { self.session.as_ref() }

	pub fn transport(&self) -> &T { &self.transport }
	pub fn transport_mut(&mut self) -> &mut T { &mut self.transport }
	pub fn into_transport(self) -> T { self.transport }

	pub(crate) fn send(&mut self, command:&str) -> Result<(), TransportError> {
		debug!("> {}", command);
		self.transport.write(command)
	}

	pub(crate) fn ask_str(&mut self, command:&str) -> Result<String, TransportError> {
		let reply = self.transport.query_str(command, self.timing.command_timeout)?;
		debug!("> {} < {}", command, reply);
		Ok(reply)
	}

	/// Restore factory defaults. `*OPC?` blocks until the reset has finished.
	pub fn reset(&mut self) -> Result<(), TransportError> {
		info!("Resetting instrument");
		self.send("*RST")?;
		self.ask_str("*OPC?")?;
		Ok(())
	}

	/// Drain the instrument's error queue, oldest entry first.
	pub fn error_queue(&mut self) -> Result<Vec<String>, TransportError> {
		let mut errors:Vec<String> = vec![];
		for _ in 0..MAX_ERROR_QUEUE {
			let reply = self.ask_str(":SYSTem:ERRor?")?;
			match scpi::parse_error_entry(&reply) {
				Some((0, _))      => break,
				Some((code, msg)) => {
					warn!("Instrument error {}: {}", code, msg);
					errors.push(format!("{},\"{}\"", code, msg));
				},
				None => {
					warn!("Unrecognized error queue entry '{}'", reply);
					errors.push(reply);
				},
			}
		}
		Ok(errors)
	}

	pub fn stop(&mut self) -> Result<(), TransportError> { self.send(":STOP") }
	pub fn run(&mut self) -> Result<(), TransportError> { self.send(":RUN") }

	/// Configure, capture, read out and decode one segmented acquisition.
	///
	/// On success the instrument is put back into continuous acquisition. On failure after
	/// arming it is stopped, the session is marked aborted and, if the data block came back
	/// malformed or partial, the transport is cleared before the error is returned.
	pub fn acquire(&mut self, cfg:&AcquisitionConfig, arm_timeout:Duration, read_timestamps:bool) -> Result<DecodedAcquisition, Error> {
		self.configure(cfg)?;
		self.arm_and_wait(cfg, arm_timeout)?;

		match self.read_out(cfg, read_timestamps) {
			Ok(decoded) => {
				self.session = None;
				self.run()?;
				Ok(decoded)
			},
			Err(e) => {
				self.abandon(&e);
				Err(e)
			},
		}
	}

	fn read_out(&mut self, cfg:&AcquisitionConfig, read_timestamps:bool) -> Result<DecodedAcquisition, Error> {
		let preamble = self.read_preamble()?;
		if preamble.points != cfg.points_per_segment || preamble.format != cfg.sample_format {
			return Err(ReadoutError::MalformedPreamble(format!(
				"preamble describes {} {:?} points per segment, expected {} {:?}",
				preamble.points, preamble.format, cfg.points_per_segment, cfg.sample_format)).into());
		}

		let layout = cfg.layout(&self.limits);
		let raw = self.read_waveform_block(layout.expected_len())?;

		let timestamps = if read_timestamps { Some(self.read_segment_timestamps()?) } else { None };

		let decoded = demux::decode_with(raw, &layout, &Scaling::from_preamble(&preamble), timestamps.as_deref())?;
		info!("Decoded {} segments of {} points", decoded.len(), cfg.points_per_segment);
		Ok(decoded)
	}

	fn abandon(&mut self, e:&Error) {
		warn!("Abandoning acquisition: {}", e);

		if let Err(stop_err) = self.stop() {
			warn!("Unable to stop instrument after failure: {}", stop_err);
		}

		let partial_block = match e {
			Error::Readout(ReadoutError::MalformedHeader(_))     => true,
			Error::Readout(ReadoutError::LengthMismatch{ .. })   => true,
			Error::Readout(ReadoutError::Unterminated{ .. })     => true,
			Error::Readout(ReadoutError::UnexpectedLength{ .. }) => true,
			Error::Readout(ReadoutError::TransportTimeout(_))    => true,
			_ => false,
		};
		if partial_block {
			if let Err(clear_err) = self.transport.clear() {
				warn!("Unable to clear transport: {}", clear_err);
			}
		}

		if let Some(session) = self.session.as_mut() {
			session.advance(SessionState::Aborted);
		}
	}

}
