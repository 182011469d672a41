//! What to acquire, what the instrument can hold, and the settings file that carries both.
//!
//! `AcquisitionConfig` is checked against `InstrumentLimits` before any command is sent.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::time::Duration;

use log::warn;
use serde::{Serialize, Deserialize};

use crate::error::{ConfigError, Error};
use crate::transport::DEFAULT_COMMAND_TIMEOUT;

// Vertical codes span eight divisions on InfiniiVision scopes
pub const VERTICAL_DIVISIONS:f64 = 8.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerSource {
	Channel(u8),
	External,
	Line,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerSlope { Positive, Negative, Either }

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Coupling { Dc, Ac }

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Impedance { OneMeg, Fifty }

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleFormat {
	/// One signed byte per sample
	Byte,
	/// Two bytes per sample, signed, most significant byte first
	Word,
}

impl SampleFormat {
	pub fn sample_width(self) -> usize {
		match self {
			SampleFormat::Byte => 1,
			SampleFormat::Word => 2,
		}
	}

	/// Number of distinct codes, used to derive volts per code from volts per division.
	pub fn code_span(self) -> f64 {
		match self {
			SampleFormat::Byte => 256.0,
			SampleFormat::Word => 65536.0,
		}
	}
}

impl Default for Coupling     { fn default() -> Self { Coupling::Dc } }
impl Default for Impedance    { fn default() -> Self { Impedance::OneMeg } }
impl Default for SampleFormat { fn default() -> Self { SampleFormat::Word } }

/// One segmented acquisition: which channel, how it is scaled, how it is triggered, and how much of it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcquisitionConfig {
	pub channel: u8,
	/// Volts per division
	pub vertical_scale: f64,
	/// Volts
	pub vertical_offset: f64,
	#[serde(default)]
	pub coupling: Coupling,
	#[serde(default)]
	pub impedance: Impedance,
	/// Seconds per division
	pub timebase: f64,
	pub points_per_segment: u32,
	pub segment_count: u32,
	pub trigger_source: TriggerSource,
	pub trigger_slope: TriggerSlope,
	/// Volts
	pub trigger_level: f64,
	/// Samples per second; the instrument picks one when absent
	#[serde(default)]
	pub sample_rate: Option<f64>,
	#[serde(default)]
	pub sample_format: SampleFormat,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InstrumentLimits {
	/// Segmented memory, in points
	pub memory_depth: u64,
	pub max_segment_count: u32,
	pub max_points_per_segment: u32,
	pub channels: u8,
	/// Bytes the instrument prefixes to every segment in the data block
	pub segment_header_bytes: usize,
	pub min_timebase: f64,
	pub max_timebase: f64,
	pub min_vertical_scale: f64,
	pub max_vertical_scale: f64,
}

impl InstrumentLimits {
	/// DSOX3034T: 2.5 Mpts of segmented memory in WORD format, up to 1000 segments.
	pub const DSOX3000: InstrumentLimits = InstrumentLimits{
		memory_depth: 2_500_000,
		max_segment_count: 1000,
		max_points_per_segment: 2_500_000,
		channels: 4,
		segment_header_bytes: 0,
		min_timebase: 1e-9,
		max_timebase: 50.0,
		min_vertical_scale: 1e-3,
		max_vertical_scale: 5.0,
	};
}

/// Shape of the bulk data block for one acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockLayout {
	pub segment_count: usize,
	pub points_per_segment: usize,
	pub format: SampleFormat,
	pub segment_header_bytes: usize,
}

impl BlockLayout {
	pub fn sample_width(&self) -> usize { self.format.sample_width() }

	pub fn segment_len(&self) -> usize {
		self.segment_header_bytes + self.points_per_segment * self.sample_width()
	}

	/// The only payload length a well-formed block may declare.
	pub fn expected_len(&self) -> usize {
		self.segment_count * self.segment_len()
	}
}

fn invalid(name:&'static str, reason:String) -> ConfigError {
	ConfigError::InvalidParameter{ name, reason }
}

fn finite(name:&'static str, x:f64) -> Result<(), ConfigError> {
	if x.is_finite() { Ok(()) } else { Err(invalid(name, format!("{} is not a finite number", x))) }
}

fn within(name:&'static str, x:f64, lo:f64, hi:f64) -> Result<(), ConfigError> {
	finite(name, x)?;
	if x < lo || x > hi {
		return Err(invalid(name, format!("{} is outside {}..={}", x, lo, hi)));
	}
	Ok(())
}

impl AcquisitionConfig {

	pub fn validate(&self, limits:&InstrumentLimits) -> Result<(), ConfigError> {
		if self.channel < 1 || self.channel > limits.channels {
			return Err(invalid("channel", format!("channel {} does not exist, valid channels are 1..={}", self.channel, limits.channels)));
		}

		within("vertical_scale", self.vertical_scale, limits.min_vertical_scale, limits.max_vertical_scale)?;
		finite("vertical_offset", self.vertical_offset)?;
		within("timebase", self.timebase, limits.min_timebase, limits.max_timebase)?;
		finite("trigger_level", self.trigger_level)?;

		if let Some(rate) = self.sample_rate {
			if !(rate.is_finite() && rate > 0.0) {
				return Err(invalid("sample_rate", format!("{} is not a positive sample rate", rate)));
			}
		}

		match self.trigger_source {
			TriggerSource::Channel(n) if n < 1 || n > limits.channels => {
				return Err(invalid("trigger_source", format!("channel {} does not exist", n)));
			},
			TriggerSource::Channel(n) if n == self.channel => {
				return Err(invalid("trigger_source", format!("trigger channel {} is the capture channel", n)));
			},
			_ => { },
		}

		if self.segment_count < 1 || self.segment_count > limits.max_segment_count {
			return Err(invalid("segment_count", format!("{} is outside 1..={}", self.segment_count, limits.max_segment_count)));
		}

		if self.points_per_segment < 1 || self.points_per_segment > limits.max_points_per_segment {
			return Err(invalid("points_per_segment", format!("{} is outside 1..={}", self.points_per_segment, limits.max_points_per_segment)));
		}

		let total = self.segment_count as u64 * self.points_per_segment as u64;
		if total > limits.memory_depth {
			return Err(invalid("points_per_segment", format!(
				"{} segments of {} points need {} points but memory holds {}",
				self.segment_count, self.points_per_segment, total, limits.memory_depth)));
		}

		Ok(())
	}

	pub fn layout(&self, limits:&InstrumentLimits) -> BlockLayout {
		BlockLayout{
			segment_count: self.segment_count as usize,
			points_per_segment: self.points_per_segment as usize,
			format: self.sample_format,
			segment_header_bytes: limits.segment_header_bytes,
		}
	}

}

/// Timeouts and pacing for talking to the instrument.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Timing {
	pub command_timeout: Duration,
	pub poll_interval: Duration,
	/// Slowest transfer rate we are willing to wait for, in bytes per second
	pub min_throughput: u64,
}

impl Default for Timing {
	fn default() -> Self {
		Timing{
			command_timeout: DEFAULT_COMMAND_TIMEOUT,
			poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
			min_throughput: DEFAULT_MIN_THROUGHPUT,
		}
	}
}

impl Timing {
	/// Timeout for a block of `len` bytes: the command timeout plus the time the slowest
	/// acceptable link needs to move the payload.
	pub fn transfer_timeout(&self, len:usize) -> Duration {
		let secs = len as f64 / self.min_throughput.max(1) as f64;
		self.command_timeout + Duration::from_secs_f64(secs)
	}
}

pub const DEFAULT_POLL_INTERVAL_MS:u64 = 200;
pub const DEFAULT_MIN_THROUGHPUT:u64 = 500_000;

fn default_timeout_ms() -> u64 { DEFAULT_COMMAND_TIMEOUT.as_millis() as u64 }
fn default_poll_interval_ms() -> u64 { DEFAULT_POLL_INTERVAL_MS }
fn default_arm_timeout_ms() -> u64 { 60_000 }
fn default_min_throughput() -> u64 { DEFAULT_MIN_THROUGHPUT }
fn default_true() -> bool { true }

/// Contents of the JSON settings file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScopeSettings {
	/// Host name or IP address of the instrument
	pub address: String,
	#[serde(default = "default_timeout_ms")]
	pub timeout_ms: u64,
	#[serde(default = "default_poll_interval_ms")]
	pub poll_interval_ms: u64,
	#[serde(default = "default_arm_timeout_ms")]
	pub arm_timeout_ms: u64,
	#[serde(default = "default_min_throughput")]
	pub min_throughput_bytes_per_sec: u64,
	#[serde(default)]
	pub read_timestamps: bool,
	#[serde(default = "default_true")]
	pub reset_on_connect: bool,
	pub acquisition: AcquisitionConfig,
}

impl ScopeSettings {

	pub fn load<P: AsRef<Path>>(path:P) -> Result<Self, Error> {
		let path = path.as_ref();
		let file = File::open(path).map_err(|e| Error::Settings(format!("{}: {}", path.display(), e)))?;
		let settings:ScopeSettings = serde_json::from_reader(BufReader::new(file))
			.map_err(|e| Error::Settings(format!("{}: {}", path.display(), e)))?;
		settings.check()?;
		Ok(settings)
	}

	fn check(&self) -> Result<(), Error> {
		if self.poll_interval_ms == 0 {
			return Err(Error::Settings("poll_interval_ms must be positive".to_owned()));
		}
		if self.poll_interval_ms < 100 || self.poll_interval_ms > 500 {
			warn!("poll_interval_ms={} is outside the usual 100..=500 ms", self.poll_interval_ms);
		}
		if self.timeout_ms == 0 || self.arm_timeout_ms == 0 || self.min_throughput_bytes_per_sec == 0 {
			return Err(Error::Settings("timeouts and throughput must be positive".to_owned()));
		}
		Ok(())
	}

	pub fn timing(&self) -> Timing {
		Timing{
			command_timeout: Duration::from_millis(self.timeout_ms),
			poll_interval: Duration::from_millis(self.poll_interval_ms),
			min_throughput: self.min_throughput_bytes_per_sec,
		}
	}

	pub fn arm_timeout(&self) -> Duration { Duration::from_millis(self.arm_timeout_ms) }

}

#[cfg(test)]
pub(crate) mod tests {
	use super::*;
	use std::io::Write;

	pub(crate) fn config() -> AcquisitionConfig {
		AcquisitionConfig{
			channel: 1,
			vertical_scale: 0.1,
			vertical_offset: 0.0,
			coupling: Coupling::Dc,
			impedance: Impedance::Fifty,
			timebase: 1e-6,
			points_per_segment: 2500,
			segment_count: 1000,
			trigger_source: TriggerSource::Channel(3),
			trigger_slope: TriggerSlope::Positive,
			trigger_level: 2.0,
			sample_rate: None,
			sample_format: SampleFormat::Word,
		}
	}

	fn rejected(cfg:&AcquisitionConfig) -> &'static str {
		match cfg.validate(&InstrumentLimits::DSOX3000) {
			Err(ConfigError::InvalidParameter{ name, .. }) => name,
			other => panic!("expected InvalidParameter, got {:?}", other),
		}
	}

	#[test]
	fn full_memory_is_accepted() {
		assert!(config().validate(&InstrumentLimits::DSOX3000).is_ok());
	}

	#[test]
	fn five_megabyte_block_for_1000_by_2500_words() {
		let layout = config().layout(&InstrumentLimits::DSOX3000);
		assert_eq!(layout.expected_len(), 5_000_000);
	}

	#[test]
	fn memory_depth_is_enforced() {
		let mut cfg = config();
		cfg.points_per_segment = 2501;
		assert_eq!(rejected(&cfg), "points_per_segment");
	}

	#[test]
	fn trigger_cannot_be_the_capture_channel() {
		let mut cfg = config();
		cfg.trigger_source = TriggerSource::Channel(1);
		assert_eq!(rejected(&cfg), "trigger_source");
		cfg.trigger_source = TriggerSource::Channel(5);
		assert_eq!(rejected(&cfg), "trigger_source");
		cfg.trigger_source = TriggerSource::External;
		assert!(cfg.validate(&InstrumentLimits::DSOX3000).is_ok());
	}

	#[test]
	fn out_of_range_values() {
		let mut cfg = config();
		cfg.channel = 0;
		assert_eq!(rejected(&cfg), "channel");

		let mut cfg = config();
		cfg.segment_count = 1001;
		cfg.points_per_segment = 10;
		assert_eq!(rejected(&cfg), "segment_count");

		let mut cfg = config();
		cfg.timebase = f64::NAN;
		assert_eq!(rejected(&cfg), "timebase");

		let mut cfg = config();
		cfg.sample_rate = Some(-1.0);
		assert_eq!(rejected(&cfg), "sample_rate");
	}

	#[test]
	fn transfer_timeout_grows_with_payload() {
		let timing = Timing{ command_timeout: Duration::from_secs(5), poll_interval: Duration::from_millis(200), min_throughput: 1_000_000 };
		assert_eq!(timing.transfer_timeout(5_000_000), Duration::from_secs(10));
		assert!(timing.transfer_timeout(10) < Duration::from_secs(6));
	}

	#[test]
	fn settings_file_with_defaults() {
		let mut file = tempfile::NamedTempFile::new().unwrap();
		write!(file, r#"{{
			"address": "192.168.1.50",
			"read_timestamps": true,
			"acquisition": {{
				"channel": 1,
				"vertical_scale": 0.05,
				"vertical_offset": 0.0,
				"timebase": 2e-7,
				"points_per_segment": 2500,
				"segment_count": 1000,
				"trigger_source": {{ "channel": 3 }},
				"trigger_slope": "positive",
				"trigger_level": 2.0
			}}
		}}"#).unwrap();

		let settings = ScopeSettings::load(file.path()).unwrap();
		assert_eq!(settings.poll_interval_ms, DEFAULT_POLL_INTERVAL_MS);
		assert!(settings.read_timestamps);
		assert!(settings.reset_on_connect);
		assert_eq!(settings.acquisition.trigger_source, TriggerSource::Channel(3));
		assert_eq!(settings.acquisition.sample_format, SampleFormat::Word);
		assert_eq!(settings.acquisition.coupling, Coupling::Dc);
	}

	#[test]
	fn unreadable_settings_are_reported() {
		let mut file = tempfile::NamedTempFile::new().unwrap();
		write!(file, "{{ \"address\": 12 }}").unwrap();
		match ScopeSettings::load(file.path()) {
			Err(Error::Settings(_)) => { },
			other => panic!("unexpected {:?}", other),
		}
	}
}
