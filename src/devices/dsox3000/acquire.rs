//! Arming the trigger system and waiting for segmented memory to fill.

use std::thread;
use std::time::{Duration, Instant};

use log::{info, trace, warn};

use crate::error::AcquisitionError;
use crate::scpi;
use crate::transport::Transport;

use super::Dsox3000;
use super::config::AcquisitionConfig;

// Bits of :OPERegister:CONDition?
pub const OPER_RUN_BIT:u32 = 1 << 3;
pub const OPER_OVERLOAD_BIT:u32 = 1 << 11;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SessionState {
	Idle,
	Armed,
	Capturing,
	Complete,
	TimedOut,
	Aborted,
}

impl SessionState {
	fn can_advance_to(self, next:SessionState) -> bool {
		use SessionState::*;
		match (self, next) {
			(Idle, Armed)                    => true,
			(Armed, Capturing)               => true,
			(Capturing, Complete)            => true,
			(Armed, TimedOut)                => true,
			(Capturing, TimedOut)            => true,
			(Idle, Aborted)                  => true,
			(Armed, Aborted)                 => true,
			(Capturing, Aborted)             => true,
			// Readout of a complete capture can still be abandoned
			(Complete, Aborted)              => true,
			_ => false,
		}
	}
}

/// Progress of one arming of the instrument.
#[derive(Debug, Clone)]
pub struct AcquisitionSession {
	config: AcquisitionConfig,
	state: SessionState,
	acquired: u32,
	armed_at: Option<Instant>,
}

impl AcquisitionSession {

	pub fn new(config:AcquisitionConfig) -> Self {
		Self{ config, state: SessionState::Idle, acquired: 0, armed_at: None }
	}

	pub fn config(&self) -> &AcquisitionConfig { &self.config }
	pub fn state(&self) -> SessionState { self.state }
	pub fn acquired(&self) -> u32 { self.acquired }
	pub fn requested(&self) -> u32 { self.config.segment_count }

	/// Time since the trigger was armed.
	pub fn elapsed(&self) -> Option<Duration> { self.armed_at.map(|t| t.elapsed()) }

	/// Move to `next` if that is forward progress; returns whether the state changed.
	pub fn advance(&mut self, next:SessionState) -> bool {
		if !self.state.can_advance_to(next) {
			warn!("Ignoring session transition {:?} -> {:?}", self.state, next);
			return false;
		}
		if next == SessionState::Armed {
			self.armed_at = Some(Instant::now());
		}
		self.state = next;
		true
	}

	fn record_progress(&mut self, acquired:u32) {
		if acquired > 0 && self.state == SessionState::Armed {
			self.advance(SessionState::Capturing);
		}
		self.acquired = acquired;
	}

}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcquisitionStatus {
	/// Segments captured since the last `:SINGle`
	pub acquired: u32,
	pub running: bool,
	pub overloaded: bool,
}

fn unreadable(what:&str, reply:&str) -> AcquisitionError {
	AcquisitionError::InstrumentFault(format!("unreadable {} '{}'", what, reply))
}

impl<T: Transport> Dsox3000<T> {

	pub fn acquisition_status(&mut self) -> Result<AcquisitionStatus, AcquisitionError> {
		let reply = self.ask_str(":WAVeform:SEGMented:COUNt?")?;
		let acquired = scpi::parse_number(&reply)
			.filter(|n| *n >= 0.0)
			.ok_or_else(|| unreadable("segment count", &reply))? as u32;

		let reply = self.ask_str(":OPERegister:CONDition?")?;
		let cond = scpi::parse_number(&reply)
			.filter(|n| *n >= 0.0)
			.ok_or_else(|| unreadable("operation condition", &reply))? as u32;

		Ok(AcquisitionStatus{
			acquired,
			running: cond & OPER_RUN_BIT != 0,
			overloaded: cond & OPER_OVERLOAD_BIT != 0,
		})
	}

	/// Arm a single segmented acquisition and block until `cfg.segment_count` segments are in
	/// memory or `timeout` has passed. The instrument is stopped before any error is returned.
	/// A `timeout` too large to add to the current time is refused before anything is sent.
	pub fn arm_and_wait(&mut self, cfg:&AcquisitionConfig, timeout:Duration) -> Result<(), AcquisitionError> {
		let deadline = match Instant::now().checked_add(timeout) {
			Some(deadline) => deadline,
			None           => return Err(AcquisitionError::InvalidTimeout(timeout)),
		};

		let mut session = AcquisitionSession::new(cfg.clone());
		self.session = None;

		let result = self.wait_for_segments(&mut session, timeout, deadline);

		if let Err(e) = &result {
			let next = match e {
				AcquisitionError::Timeout{ .. } => SessionState::TimedOut,
				_                               => SessionState::Aborted,
			};
			session.advance(next);
			warn!("Acquisition ended {:?} after {} of {} segments: {}", next, session.acquired(), session.requested(), e);
			if let Err(stop_err) = self.stop() {
				warn!("Unable to stop instrument: {}", stop_err);
			}
		}

		self.session = Some(session);
		result
	}

	fn wait_for_segments(&mut self, session:&mut AcquisitionSession, timeout:Duration, deadline:Instant) -> Result<(), AcquisitionError> {
		let requested = session.requested();

		self.send(":SINGle")?;
		session.advance(SessionState::Armed);
		info!("Armed for {} segments (timeout {:?})", requested, timeout);

		loop {
			let status = self.acquisition_status()?;
			trace!("{}/{} segments, running={} overloaded={}", status.acquired, requested, status.running, status.overloaded);

			if status.overloaded {
				return Err(AcquisitionError::InstrumentFault(format!("channel {} overloaded", session.config().channel)));
			}

			session.record_progress(status.acquired);

			if status.acquired >= requested {
				if session.state() == SessionState::Armed {
					session.advance(SessionState::Capturing);
				}
				session.advance(SessionState::Complete);
				info!("Captured {} segments in {:.3?}", status.acquired, session.elapsed().unwrap_or_default());
				return Ok(());
			}

			if !status.running {
				return Err(AcquisitionError::InstrumentFault(format!(
					"acquisition stopped after {} of {} segments", status.acquired, requested)));
			}

			let now = Instant::now();
			if now >= deadline {
				return Err(AcquisitionError::Timeout{ timeout, acquired: status.acquired, requested });
			}

			thread::sleep(self.timing.poll_interval.min(deadline - now));
		}
	}

}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::devices::dsox3000::config::{Timing, tests::config};
	use crate::sim::SimulatedDsox;

	fn small_config() -> AcquisitionConfig {
		let mut cfg = config();
		cfg.segment_count = 10;
		cfg.points_per_segment = 100;
		cfg
	}

	fn scope(sim:SimulatedDsox) -> Dsox3000<SimulatedDsox> {
		let timing = Timing{ poll_interval: Duration::from_millis(1), ..Timing::default() };
		let mut scope = Dsox3000::new(sim).unwrap().with_timing(timing);
		scope.configure(&small_config()).unwrap();
		scope
	}

	#[test]
	fn states_only_move_forward() {
		let mut session = AcquisitionSession::new(small_config());
		assert!(!session.advance(SessionState::Complete));
		assert!(session.advance(SessionState::Armed));
		assert!(session.elapsed().is_some());
		assert!(session.advance(SessionState::Capturing));
		assert!(!session.advance(SessionState::Armed));
		assert!(session.advance(SessionState::Complete));
		assert!(!session.advance(SessionState::TimedOut));
		assert_eq!(session.state(), SessionState::Complete);
	}

	#[test]
	fn waits_for_every_segment() {
		let mut scope = scope(SimulatedDsox::new().with_triggers_per_poll(3));
		scope.arm_and_wait(&small_config(), Duration::from_secs(5)).unwrap();

		let session = scope.session().unwrap();
		assert_eq!(session.state(), SessionState::Complete);
		assert_eq!(session.acquired(), 10);
		// 3, 6, 9, 10
		let polls = scope.transport().queries(":WAVeform:SEGMented:COUNt?");
		assert_eq!(polls, 4);
	}

	#[test]
	fn unrepresentable_timeout_is_refused_before_arming() {
		let mut scope = scope(SimulatedDsox::new().with_triggers_per_poll(3));
		match scope.arm_and_wait(&small_config(), Duration::MAX) {
			Err(AcquisitionError::InvalidTimeout(d)) => assert_eq!(d, Duration::MAX),
			other => panic!("unexpected {:?}", other),
		}
		assert!(scope.session().is_none());
		assert!(!scope.transport().writes().iter().any(|w| w == ":SINGle"));
		assert!(!scope.transport().is_armed());
	}

	#[test]
	fn timeout_leaves_instrument_stopped() {
		let mut scope = scope(SimulatedDsox::new().with_triggers_per_poll(0));
		match scope.arm_and_wait(&small_config(), Duration::from_millis(20)) {
			Err(AcquisitionError::Timeout{ acquired: 0, requested: 10, .. }) => { },
			other => panic!("unexpected {:?}", other),
		}
		assert_eq!(scope.session().unwrap().state(), SessionState::TimedOut);

		let status = scope.acquisition_status().unwrap();
		assert!(!status.running);
		assert!(!scope.transport().is_armed());
	}

	#[test]
	fn external_stop_is_a_fault() {
		let mut scope = scope(SimulatedDsox::new().with_triggers_per_poll(2).stop_after(4));
		match scope.arm_and_wait(&small_config(), Duration::from_secs(5)) {
			Err(AcquisitionError::InstrumentFault(msg)) => assert!(msg.contains("4 of 10"), "{}", msg),
			other => panic!("unexpected {:?}", other),
		}
		assert_eq!(scope.session().unwrap().state(), SessionState::Aborted);
	}

	#[test]
	fn overload_is_a_fault() {
		let mut scope = scope(SimulatedDsox::new().with_triggers_per_poll(1).overload_after(2));
		match scope.arm_and_wait(&small_config(), Duration::from_secs(5)) {
			Err(AcquisitionError::InstrumentFault(msg)) => assert!(msg.contains("overload")),
			other => panic!("unexpected {:?}", other),
		}
		assert!(!scope.transport().is_armed());
	}
}
