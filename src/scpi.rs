
use regex::Regex;

lazy_static! {
	static ref IDN_RE: Regex    = Regex::new("([^,]+),([^,]+),([^,]+),([^,\\s]+)").unwrap();
	static ref NUMBER_RE: Regex = Regex::new("^[+-]?(\\d+\\.?\\d*|\\.\\d+)([eE][+-]?\\d+)?$").unwrap();
	static ref ERROR_RE: Regex  = Regex::new("^([+-]?\\d+),\"(.*)\"$").unwrap();
}

// Instruments round settings to their own resolution, so readbacks are compared loosely
pub const NUMERIC_RELATIVE_TOLERANCE:f64 = 1e-3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
	pub manufacturer: String,
	pub model: String,
	pub serial_num: String,
	pub fw_version: String,
}

pub fn parse_identity(reply:&str) -> Option<Identity> {
	let caps = IDN_RE.captures(reply.trim())?;
	let field = |i:usize| caps.get(i).map(|m| m.as_str().trim().to_owned());
	Some(Identity{
		manufacturer: field(1)?,
		model:        field(2)?,
		serial_num:   field(3)?,
		fw_version:   field(4)?,
	})
}

/// The abbreviated form of a mnemonic: its upper-case letters and digits (`CHANnel3` -> `CHAN3`).
pub fn short_form(long:&str) -> String {
	long.chars().filter(|c| c.is_ascii_uppercase() || c.is_ascii_digit()).collect()
}

pub fn mnemonic_matches(requested:&str, reply:&str) -> bool {
	let reply = reply.trim();
	reply.eq_ignore_ascii_case(requested) || reply.eq_ignore_ascii_case(&short_form(requested))
}

pub fn parse_number(reply:&str) -> Option<f64> {
	let reply = reply.trim();
	if NUMBER_RE.is_match(reply) { reply.parse::<f64>().ok() } else { None }
}

pub fn numbers_match(requested:f64, observed:f64) -> bool {
	let scale = requested.abs().max(observed.abs()).max(1e-12);
	(requested - observed).abs() <= NUMERIC_RELATIVE_TOLERANCE * scale
}

/// Parse a comma separated list of numbers, e.g. a time tag table. An empty reply is an empty list.
pub fn parse_number_list(reply:&str) -> Result<Vec<f64>, String> {
	let reply = reply.trim();
	if reply.is_empty() {
		return Ok(vec![]);
	}
	reply.split(',')
		.map(|field| parse_number(field).ok_or_else(|| format!("'{}' is not a number", field.trim())))
		.collect()
}

/// An entry from the error queue, e.g. `-113,"Undefined header"`. Code 0 means the queue is empty.
pub fn parse_error_entry(reply:&str) -> Option<(i32, String)> {
	let caps = ERROR_RE.captures(reply.trim())?;
	let code = caps.get(1)?.as_str().trim_start_matches('+').parse::<i32>().ok()?;
	Some((code, caps.get(2)?.as_str().to_owned()))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn short_forms() {
		assert_eq!(short_form("SEGMented"), "SEGM");
		assert_eq!(short_form("CHANnel3"), "CHAN3");
		assert!(mnemonic_matches("POSitive", "POS\n"));
		assert!(mnemonic_matches("EDGE", "EDGE"));
		assert!(!mnemonic_matches("NEGative", "POS"));
	}

	#[test]
	fn keysight_number_formats() {
		assert_eq!(parse_number("+1000"), Some(1000.0));
		assert_eq!(parse_number("+1.00000E-06"), Some(1e-6));
		assert_eq!(parse_number("-5.00E-01\n"), Some(-0.5));
		assert_eq!(parse_number("POS"), None);
		assert!(numbers_match(0.1, 0.1000004));
		assert!(!numbers_match(0.1, 0.2));
	}

	#[test]
	fn error_queue_entries() {
		assert_eq!(parse_error_entry("+0,\"No error\""), Some((0, "No error".to_owned())));
		assert_eq!(parse_error_entry("-222,\"Data out of range\""), Some((-222, "Data out of range".to_owned())));
		assert_eq!(parse_error_entry("garbage"), None);
	}

	#[test]
	fn identity_fields() {
		let idn = parse_identity("KEYSIGHT TECHNOLOGIES,DSOX3034T,MY12345678,07.50.2021102830\n").unwrap();
		assert_eq!(idn.model, "DSOX3034T");
		assert_eq!(idn.fw_version, "07.50.2021102830");
	}

	#[test]
	fn number_lists() {
		assert_eq!(parse_number_list("+0.0E+00,+1.5E-03,+3.0E-03").unwrap(), vec![0.0, 1.5e-3, 3.0e-3]);
		assert!(parse_number_list("").unwrap().is_empty());
		assert!(parse_number_list("1,,2").is_err());
	}
}
