//! An InfiniiVision DSOX3000 that lives in memory.
//!
//! Settings are stored as the instrument would report them back (short mnemonics, `+1.00000E-6`
//! style numbers, `1`/`0` switches). Segmented acquisitions advance by `triggers_per_poll`
//! segments every time progress is polled, and the sample codes come from a seeded generator
//! so a run can be reproduced exactly. Faults are injected with the builder methods.

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;

use byteorder::{BigEndian, WriteBytesExt};
use log::trace;
use rand::{Rng, SeedableRng};
use rand::rngs::StdRng;

use crate::block;
use crate::devices::dsox3000::acquire::{OPER_OVERLOAD_BIT, OPER_RUN_BIT};
use crate::devices::dsox3000::config::VERTICAL_DIVISIONS;
use crate::error::TransportError;
use crate::scpi;
use crate::transport::Transport;

pub const SIM_IDN:&str = "KEYSIGHT TECHNOLOGIES,DSOX3034T,MY00000000,07.50.2021102830";
pub const DEFAULT_SEED:u64 = 0x5e65_c0de;
pub const DEFAULT_TRIGGERS_PER_POLL:u32 = 250;

// Time between simulated triggers, in seconds
const TRIGGER_PERIOD:f64 = 1e-3;

fn key(header:&str) -> String { header.trim().to_ascii_uppercase() }

/// The form in which the instrument reports a value it was given.
fn stored_reply(value:&str) -> String {
	let value = value.trim();
	if let Some(x) = scpi::parse_number(value) {
		if value.contains(|c| c == '.' || c == 'e' || c == 'E') { format!("{:+.5E}", x) }
		else { format!("{:+}", x as i64) }
	} else {
		match value.to_ascii_uppercase().as_str() {
			"ON"  => "1".to_owned(),
			"OFF" => "0".to_owned(),
			_     => {
				let short = scpi::short_form(value);
				if short.is_empty() { value.to_ascii_uppercase() } else { short }
			},
		}
	}
}

fn default_settings() -> HashMap<String, String> {
	let mut s:HashMap<String, String> = HashMap::new();
	let mut set = |k:&str, v:&str| { s.insert(k.to_owned(), v.to_owned()); };

	set(":ACQUIRE:MODE", "RTIM");
	set(":ACQUIRE:SEGMENTED:COUNT", "+2");
	set(":ACQUIRE:TYPE", "NORM");
	set(":TIMEBASE:SCALE", "+1.00000E-4");
	for n in 1..=4 {
		set(&format!(":CHANNEL{}:DISPLAY", n), if n == 1 { "1" } else { "0" });
		set(&format!(":CHANNEL{}:COUPLING", n), "DC");
		set(&format!(":CHANNEL{}:IMPEDANCE", n), "ONEM");
		set(&format!(":CHANNEL{}:SCALE", n), "+1.00000E0");
		set(&format!(":CHANNEL{}:OFFSET", n), "+0.00000E0");
	}
	set(":TRIGGER:MODE", "EDGE");
	set(":TRIGGER:SWEEP", "AUTO");
	set(":TRIGGER:EDGE:SOURCE", "CHAN1");
	set(":TRIGGER:EDGE:SLOPE", "POS");
	set(":TRIGGER:EDGE:LEVEL", "+0.00000E0");
	set(":WAVEFORM:SOURCE", "CHAN1");
	set(":WAVEFORM:FORMAT", "BYTE");
	set(":WAVEFORM:BYTEORDER", "MSBF");
	set(":WAVEFORM:UNSIGNED", "1");
	set(":WAVEFORM:POINTS:MODE", "NORM");
	set(":WAVEFORM:POINTS", "+1000");
	set(":WAVEFORM:SEGMENTED:ALL", "0");
	s
}

pub struct SimulatedDsox {
	settings: HashMap<String, String>,
	errors: VecDeque<String>,
	log: Vec<String>,
	rng: StdRng,
	armed: bool,
	running: bool,
	overloaded: bool,
	acquired: u32,
	last_codes: Vec<i32>,
	last_data_timeout: Option<Duration>,
	clears: usize,

	// Fault injection
	ignored: HashSet<String>,
	triggers_per_poll: u32,
	stop_after: Option<u32>,
	overload_after: Option<u32>,
	truncate_block: usize,
	short_block: usize,
	misdeclare_block: Option<usize>,
	missing_timestamps: usize,
}

impl Default for SimulatedDsox {
	fn default() -> Self { Self::new() }
}

impl SimulatedDsox {

	pub fn new() -> Self {
		Self{
			settings: default_settings(),
			errors: VecDeque::new(),
			log: vec![],
			rng: StdRng::seed_from_u64(DEFAULT_SEED),
			armed: false,
			running: true,
			overloaded: false,
			acquired: 0,
			last_codes: vec![],
			last_data_timeout: None,
			clears: 0,
			ignored: HashSet::new(),
			triggers_per_poll: DEFAULT_TRIGGERS_PER_POLL,
			stop_after: None,
			overload_after: None,
			truncate_block: 0,
			short_block: 0,
			misdeclare_block: None,
			missing_timestamps: 0,
		}
	}

	pub fn with_seed(mut self, seed:u64) -> Self { self.rng = StdRng::seed_from_u64(seed); self }

	/// Segments captured per progress poll; zero means the trigger never fires.
	pub fn with_triggers_per_poll(mut self, n:u32) -> Self { self.triggers_per_poll = n; self }

	/// Accept writes to `header` without changing anything.
	pub fn ignore_command(mut self, header:&str) -> Self { self.ignored.insert(key(header)); self }

	/// Stop acquiring, as if someone pressed Stop, once `n` segments are in.
	pub fn stop_after(mut self, n:u32) -> Self { self.stop_after = Some(n); self }

	pub fn overload_after(mut self, n:u32) -> Self { self.overload_after = Some(n); self }

	/// Drop the last `n` payload bytes and the terminator from data blocks.
	pub fn truncate_block(mut self, n:usize) -> Self { self.truncate_block = n; self }

	/// Drop the last `n` payload bytes but still end the block with the terminator.
	pub fn short_block(mut self, n:usize) -> Self { self.short_block = n; self }

	/// Declare `len` bytes in the data block header regardless of the payload.
	pub fn misdeclare_block(mut self, len:usize) -> Self { self.misdeclare_block = Some(len); self }

	/// Report `n` fewer time tags than captured segments.
	pub fn drop_timestamps(mut self, n:usize) -> Self { self.missing_timestamps = n; self }

	pub fn push_error(&mut self, code:i32, msg:&str) {
		self.errors.push_back(format!("{:+},\"{}\"", code, msg));
	}

	/// Every command and query received, in order.
	pub fn log(&self) -> &[String] { &self.log }

	pub fn writes(&self) -> Vec<String> {
		self.log.iter().filter(|c| !c.contains('?')).cloned().collect()
	}

	/// How many times `query` was sent verbatim.
	pub fn queries(&self, query:&str) -> usize {
		self.log.iter().filter(|c| c.as_str() == query).count()
	}

	pub fn is_armed(&self) -> bool { self.armed }
	pub fn is_running(&self) -> bool { self.running }
	pub fn acquired(&self) -> u32 { self.acquired }
	pub fn clears(&self) -> usize { self.clears }

	/// Sample codes of the last data block, segment after segment.
	pub fn last_codes(&self) -> &[i32] { &self.last_codes }

	pub fn last_data_timeout(&self) -> Option<Duration> { self.last_data_timeout }

	pub fn setting(&self, header:&str) -> Option<&str> { self.settings.get(&key(header)).map(|s| s.as_str()) }

	fn number(&self, header:&str) -> f64 {
		self.setting(header).and_then(scpi::parse_number).unwrap_or(0.0)
	}

	fn requested(&self) -> u32 { self.number(":ACQuire:SEGMented:COUNt").max(0.0) as u32 }
	fn points(&self) -> usize { self.number(":WAVeform:POINts").max(0.0) as usize }
	fn word_format(&self) -> bool { self.setting(":WAVeform:FORMat") == Some("WORD") }

	fn source_channel(&self) -> String {
		let src = self.setting(":WAVeform:SOURce").unwrap_or("CHAN1");
		format!(":CHANnel{}", src.trim_start_matches(|c:char| !c.is_ascii_digit()))
	}

	fn reset(&mut self) {
		self.settings = default_settings();
		self.armed = false;
		self.running = true;
		self.overloaded = false;
		self.acquired = 0;
	}

	fn handle_write(&mut self, command:&str) {
		let mut parts = command.trim().splitn(2, char::is_whitespace);
		let header = key(parts.next().unwrap_or(""));
		let value = parts.next();

		match (header.as_str(), value) {
			("*RST", None)    => self.reset(),
			("*CLS", None)    => self.errors.clear(),
			(":SINGLE", None) => {
				self.armed = true;
				self.running = true;
				self.overloaded = false;
				self.acquired = 0;
			},
			(":STOP", None)   => { self.armed = false; self.running = false; },
			(":RUN", None)    => { self.armed = false; self.running = true; },
			(h, Some(v)) if h.starts_with(':') => {
				if self.ignored.contains(h) {
					trace!("sim ignoring {}", command);
				} else {
					self.settings.insert(h.to_owned(), stored_reply(v));
				}
			},
			_ => self.push_error(-113, "Undefined header"),
		}
	}

	fn poll_progress(&mut self) -> u32 {
		if self.armed {
			let requested = self.requested();
			self.acquired = (self.acquired + self.triggers_per_poll).min(requested);

			if let Some(n) = self.overload_after {
				if self.acquired >= n { self.overloaded = true; }
			}
			if let Some(n) = self.stop_after {
				if self.acquired >= n {
					self.acquired = n;
					self.armed = false;
					self.running = false;
				}
			}
			if self.acquired >= requested {
				self.armed = false;
				self.running = false;
			}
		}
		self.acquired
	}

	fn condition(&self) -> u32 {
		let mut cond = 0;
		if self.running    { cond |= OPER_RUN_BIT; }
		if self.overloaded { cond |= OPER_OVERLOAD_BIT; }
		cond
	}

	fn y_increment(&self) -> f64 {
		let span = if self.word_format() { 65536.0 } else { 256.0 };
		self.number(&format!("{}:SCALe", self.source_channel())) * VERTICAL_DIVISIONS / span
	}

	fn preamble(&self) -> String {
		let points = self.points();
		let timebase = self.number(":TIMebase:SCALe");
		let x_increment = timebase * 10.0 / points.max(1) as f64;
		let y_origin = self.number(&format!("{}:OFFSet", self.source_channel()));
		format!("{:+},{:+},{:+},{:+},{:+E},{:+E},{:+},{:+E},{:+E},{:+}",
			if self.word_format() { 1 } else { 0 }, 0, points, 1,
			x_increment, -5.0 * timebase, 0,
			self.y_increment(), y_origin, 0)
	}

	/// A noisy baseline with one pulse per segment.
	fn data_block(&mut self) -> Vec<u8> {
		let points = self.points();
		let word = self.word_format();
		let (noise, pulse) = if word { (64, 12_000) } else { (2, 48) };

		let mut codes:Vec<i32> = Vec::with_capacity(self.acquired as usize * points);
		for _ in 0..self.acquired {
			for i in 0..points {
				let base:i32 = self.rng.gen_range(-noise..=noise);
				let in_pulse = i >= points / 4 && i < points / 2;
				codes.push(if in_pulse { base + pulse } else { base });
			}
		}

		let mut payload:Vec<u8> = Vec::with_capacity(codes.len() * 2);
		for code in codes.iter() {
			if word { payload.write_i16::<BigEndian>(*code as i16).ok(); }
			else    { payload.push(*code as i8 as u8); }
		}
		self.last_codes = codes;

		if let Some(declared) = self.misdeclare_block {
			let digits = declared.to_string();
			let mut ans = format!("#{}{}", digits.len(), digits).into_bytes();
			ans.extend_from_slice(&payload);
			ans.push(block::TERMINATOR);
			return ans;
		}

		let mut ans = block::encode_block(&payload);
		if self.short_block > 0 {
			let end = ans.len() - 1;
			ans.drain(end.saturating_sub(self.short_block)..end);
		}
		if self.truncate_block > 0 {
			let keep = ans.len().saturating_sub(self.truncate_block + 1);
			ans.truncate(keep);
		}
		ans
	}

	fn time_tags(&self) -> String {
		let n = (self.acquired as usize).saturating_sub(self.missing_timestamps);
		(0..n).map(|i| format!("{:+E}", i as f64 * TRIGGER_PERIOD)).collect::<Vec<String>>().join(",")
	}

	fn handle_query(&mut self, command:&str, timeout:Duration) -> Result<Vec<u8>, TransportError> {
		let q = key(command);
		let text = match q.as_str() {
			"*IDN?"                            => SIM_IDN.to_owned(),
			"*OPC?"                            => "1".to_owned(),
			":SYSTEM:ERROR?"                   => self.errors.pop_front().unwrap_or_else(|| "+0,\"No error\"".to_owned()),
			":WAVEFORM:SEGMENTED:COUNT?"       => format!("{:+}", self.poll_progress()),
			":OPEREGISTER:CONDITION?"          => format!("{:+}", self.condition()),
			":WAVEFORM:PREAMBLE?"              => self.preamble(),
			":WAVEFORM:SEGMENTED:XLIST? TTAGS" => self.time_tags(),
			":WAVEFORM:DATA?"                  => {
				self.last_data_timeout = Some(timeout);
				return Ok(self.data_block());
			},
			other => match other.strip_suffix('?').and_then(|h| self.settings.get(h)).cloned() {
				Some(reply) => reply,
				None => {
					// A real instrument has nothing to send back and the read times out
					self.push_error(-113, "Undefined header");
					return Err(TransportError::Timeout(timeout));
				},
			},
		};

		let mut ans = text.into_bytes();
		ans.push(b'\n');
		Ok(ans)
	}

}

impl Transport for SimulatedDsox {

	fn write(&mut self, command:&str) -> Result<(), TransportError> {
		self.log.push(command.to_owned());
		self.handle_write(command);
		Ok(())
	}

	fn query(&mut self, command:&str, timeout:Duration) -> Result<Vec<u8>, TransportError> {
		self.log.push(command.to_owned());
		self.handle_query(command, timeout)
	}

	fn clear(&mut self) -> Result<(), TransportError> {
		self.clears += 1;
		Ok(())
	}

}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn reports_settings_in_short_form() {
		let mut sim = SimulatedDsox::new();
		sim.write(":ACQuire:MODE SEGMented").unwrap();
		sim.write(":ACQuire:SEGMented:COUNt 1000").unwrap();
		sim.write(":TIMebase:SCALe 1E-6").unwrap();
		sim.write(":WAVeform:UNSigned OFF").unwrap();

		let t = Duration::from_secs(1);
		assert_eq!(sim.query_str(":ACQuire:MODE?", t).unwrap(), "SEGM");
		assert_eq!(sim.query_str(":ACQuire:SEGMented:COUNt?", t).unwrap(), "+1000");
		assert_eq!(sim.query_str(":TIMebase:SCALe?", t).unwrap(), "+1.00000E-6");
		assert_eq!(sim.query_str(":WAVeform:UNSigned?", t).unwrap(), "0");
	}

	#[test]
	fn unknown_query_times_out_and_queues_error() {
		let mut sim = SimulatedDsox::new();
		match sim.query(":BOGus?", Duration::from_millis(5)) {
			Err(TransportError::Timeout(_)) => { },
			other => panic!("unexpected {:?}", other),
		}
		let reply = sim.query_str(":SYSTem:ERRor?", Duration::from_secs(1)).unwrap();
		assert_eq!(scpi::parse_error_entry(&reply), Some((-113, "Undefined header".to_owned())));
	}

	#[test]
	fn same_seed_same_samples() {
		let capture = |seed:u64| {
			let mut sim = SimulatedDsox::new().with_seed(seed).with_triggers_per_poll(5);
			sim.write(":ACQuire:SEGMented:COUNt 5").unwrap();
			sim.write(":WAVeform:POINts 20").unwrap();
			sim.write(":SINGle").unwrap();
			sim.query(":WAVeform:SEGMented:COUNt?", Duration::from_secs(1)).unwrap();
			sim.query(":WAVeform:DATA?", Duration::from_secs(1)).unwrap()
		};
		assert_eq!(capture(1), capture(1));
		assert_ne!(capture(1), capture(2));
	}
}
