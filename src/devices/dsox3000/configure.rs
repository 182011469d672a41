//! Turning an `AcquisitionConfig` into SCPI settings and making sure the instrument took them.

use std::fmt;

use log::info;

use crate::error::ConfigError;
use crate::scpi;
use crate::transport::Transport;

use super::Dsox3000;
use super::config::{AcquisitionConfig, Coupling, Impedance, SampleFormat, TriggerSlope, TriggerSource};

#[derive(Debug, Clone, PartialEq)]
pub enum SettingValue {
	Mnemonic(String),
	Number(f64),
	Integer(u64),
	Switch(bool),
}

impl fmt::Display for SettingValue {
	fn fmt(&self, f:&mut fmt::Formatter) -> fmt::Result {
		match self {
			SettingValue::Mnemonic(s) => write!(f, "{}", s),
			SettingValue::Number(x)   => write!(f, "{:E}", x),
			SettingValue::Integer(n)  => write!(f, "{}", n),
			SettingValue::Switch(on)  => write!(f, "{}", if *on { "ON" } else { "OFF" }),
		}
	}
}

impl SettingValue {
	/// Whether `reply` to the setting's query reports this value.
	pub fn matches(&self, reply:&str) -> bool {
		match self {
			SettingValue::Mnemonic(s) => scpi::mnemonic_matches(s, reply),
			SettingValue::Number(x)   => scpi::parse_number(reply).map(|y| scpi::numbers_match(*x, y)).unwrap_or(false),
			SettingValue::Integer(n)  => scpi::parse_number(reply).map(|y| (y - *n as f64).abs() < 0.5).unwrap_or(false),
			SettingValue::Switch(on)  => match reply.trim().to_ascii_uppercase().as_str() {
				"1" | "ON"  => *on,
				"0" | "OFF" => !*on,
				_           => false,
			},
		}
	}
}

/// One command of the configuration sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct Setting {
	pub header: String,
	pub value: SettingValue,
	/// False for write-only settings that have no query form
	pub verify: bool,
}

impl Setting {
	fn new<H: Into<String>>(header:H, value:SettingValue) -> Self {
		Self{ header: header.into(), value, verify: true }
	}

	fn mnemonic<H: Into<String>>(header:H, value:&str) -> Self {
		Self::new(header, SettingValue::Mnemonic(value.to_owned()))
	}

	pub fn command(&self) -> String { format!("{} {}", self.header, self.value) }

	pub fn query(&self) -> Option<String> {
		if self.verify { Some(format!("{}?", self.header)) } else { None }
	}
}

fn trigger_source(src:TriggerSource) -> String {
	match src {
		TriggerSource::Channel(n) => format!("CHANnel{}", n),
		TriggerSource::External   => "EXTernal".to_owned(),
		TriggerSource::Line       => "LINE".to_owned(),
	}
}

fn trigger_slope(slope:TriggerSlope) -> &'static str {
	match slope {
		TriggerSlope::Positive => "POSitive",
		TriggerSlope::Negative => "NEGative",
		TriggerSlope::Either   => "EITHer",
	}
}

fn coupling(c:Coupling) -> &'static str {
	match c {
		Coupling::Dc => "DC",
		Coupling::Ac => "AC",
	}
}

fn impedance(z:Impedance) -> &'static str {
	match z {
		Impedance::OneMeg => "ONEMeg",
		Impedance::Fifty  => "FIFTy",
	}
}

fn sample_format(fmt:SampleFormat) -> &'static str {
	match fmt {
		SampleFormat::Byte => "BYTE",
		SampleFormat::Word => "WORD",
	}
}

/// Every setting `configure` applies, in the order it applies them.
pub fn configuration_plan(cfg:&AcquisitionConfig) -> Vec<Setting> {
	let ch = format!(":CHANnel{}", cfg.channel);
	let mut plan:Vec<Setting> = vec![
		Setting::mnemonic(":ACQuire:MODE", "SEGMented"),
		Setting::new(":ACQuire:SEGMented:COUNt", SettingValue::Integer(cfg.segment_count as u64)),
		Setting::mnemonic(":ACQuire:TYPE", "NORMal"),
	];

	if let Some(rate) = cfg.sample_rate {
		plan.push(Setting{ header: ":ACQuire:SRATe:ANALog".to_owned(), value: SettingValue::Number(rate), verify: false });
	}

	plan.extend(vec![
		Setting::new(":TIMebase:SCALe", SettingValue::Number(cfg.timebase)),

		Setting::new(format!("{}:DISPlay", ch), SettingValue::Switch(true)),
		Setting::mnemonic(format!("{}:COUPling", ch), coupling(cfg.coupling)),
		Setting::mnemonic(format!("{}:IMPedance", ch), impedance(cfg.impedance)),
		Setting::new(format!("{}:SCALe", ch), SettingValue::Number(cfg.vertical_scale)),
		Setting::new(format!("{}:OFFSet", ch), SettingValue::Number(cfg.vertical_offset)),

		Setting::mnemonic(":TRIGger:MODE", "EDGE"),
		Setting::mnemonic(":TRIGger:SWEep", "NORMal"),
		Setting::mnemonic(":TRIGger:EDGE:SOURce", &trigger_source(cfg.trigger_source)),
		Setting::mnemonic(":TRIGger:EDGE:SLOPe", trigger_slope(cfg.trigger_slope)),
		Setting::new(":TRIGger:EDGE:LEVel", SettingValue::Number(cfg.trigger_level)),

		Setting::mnemonic(":WAVeform:SOURce", &format!("CHANnel{}", cfg.channel)),
		Setting::mnemonic(":WAVeform:FORMat", sample_format(cfg.sample_format)),
		Setting::mnemonic(":WAVeform:BYTeorder", "MSBFirst"),
		Setting::new(":WAVeform:UNSigned", SettingValue::Switch(false)),
		Setting::mnemonic(":WAVeform:POINts:MODE", "RAW"),
		Setting::new(":WAVeform:POINts", SettingValue::Integer(cfg.points_per_segment as u64)),
		Setting::new(":WAVeform:SEGMented:ALL", SettingValue::Switch(true)),
	]);

	plan
}

impl<T: Transport> Dsox3000<T> {

	/// Apply `cfg`, verifying each setting by reading it back.
	///
	/// Nothing is sent if `cfg` fails validation. Stops at the first setting the instrument
	/// did not take; a configuration that leaves entries in the error queue is rejected as a whole.
	pub fn configure(&mut self, cfg:&AcquisitionConfig) -> Result<(), ConfigError> {
		cfg.validate(&self.limits)?;

		let plan = configuration_plan(cfg);
		info!("Configuring channel {} for {} segments of {} points", cfg.channel, cfg.segment_count, cfg.points_per_segment);

		for setting in plan.iter() {
			self.apply(setting)?;
		}

		let errors = self.error_queue()?;
		if !errors.is_empty() {
			return Err(ConfigError::Rejected(errors));
		}

		info!("Applied {} settings", plan.len());
		Ok(())
	}

	fn apply(&mut self, setting:&Setting) -> Result<(), ConfigError> {
		let command = setting.command();
		self.send(&command)?;

		if let Some(query) = setting.query() {
			let observed = self.ask_str(&query)?;
			if !setting.value.matches(&observed) {
				return Err(ConfigError::NotApplied{ command, requested: setting.value.to_string(), observed });
			}
		}

		Ok(())
	}

}
