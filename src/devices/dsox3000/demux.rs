//! Splitting the bulk block into segments and converting codes to volts.

use byteorder::{BigEndian, ByteOrder};
use serde::{Serialize, Deserialize};

use crate::error::{DecodeError, ReadoutError};
use crate::scpi;

use super::config::{AcquisitionConfig, BlockLayout, InstrumentLimits, SampleFormat, VERTICAL_DIVISIONS};
use super::readout::RawBlock;

// Horizontal divisions on screen, centred on the trigger
const HORIZONTAL_DIVISIONS:f64 = 10.0;

/// Reply to `:WAVeform:PREamble?`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preamble {
	pub format: SampleFormat,
	/// 0 normal, 1 peak detect, 2 average, 3 high resolution
	pub acquisition_type: u32,
	pub points: u32,
	pub count: u32,
	pub x_increment: f64,
	pub x_origin: f64,
	pub x_reference: f64,
	pub y_increment: f64,
	pub y_origin: f64,
	pub y_reference: f64,
}

fn malformed(msg:String) -> ReadoutError { ReadoutError::MalformedPreamble(msg) }

impl Preamble {

	pub fn parse(reply:&str) -> Result<Self, ReadoutError> {
		let fields:Vec<&str> = reply.trim().split(',').collect();
		if fields.len() != 10 {
			return Err(malformed(format!("expected 10 fields, found {} in '{}'", fields.len(), reply.trim())));
		}

		let number = |i:usize| scpi::parse_number(fields[i])
			.ok_or_else(|| malformed(format!("field {} '{}' is not a number", i, fields[i].trim())));
		let count = |i:usize| number(i).and_then(|x| {
			if x >= 0.0 && x.fract() == 0.0 && x <= u32::MAX as f64 { Ok(x as u32) }
			else { Err(malformed(format!("field {} '{}' is not a count", i, fields[i].trim()))) }
		});

		let format = match count(0)? {
			0 => SampleFormat::Byte,
			1 => SampleFormat::Word,
			n => return Err(malformed(format!("unsupported waveform format code {}", n))),
		};

		Ok(Self{
			format,
			acquisition_type: count(1)?,
			points:           count(2)?,
			count:            count(3)?,
			x_increment:      number(4)?,
			x_origin:         number(5)?,
			x_reference:      number(6)?,
			y_increment:      number(7)?,
			y_origin:         number(8)?,
			y_reference:      number(9)?,
		})
	}

}

/// Code to physical value: `(code - y_reference) * y_increment + y_origin`, plus the x axis.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Scaling {
	pub y_increment: f64,
	pub y_origin: f64,
	pub y_reference: f64,
	pub x_increment: f64,
	pub x_origin: f64,
	pub x_reference: f64,
}

impl Scaling {

	/// Plain `code * scale + offset` with a sample-index x axis.
	pub fn new(scale:f64, offset:f64) -> Self {
		Self{ y_increment: scale, y_origin: offset, y_reference: 0.0, x_increment: 1.0, x_origin: 0.0, x_reference: 0.0 }
	}

	pub fn from_preamble(p:&Preamble) -> Self {
		Self{
			y_increment: p.y_increment,
			y_origin:    p.y_origin,
			y_reference: p.y_reference,
			x_increment: p.x_increment,
			x_origin:    p.x_origin,
			x_reference: p.x_reference,
		}
	}

	/// Nominal scaling from the requested volts/div and offset, for when no preamble is at hand.
	pub fn from_config(cfg:&AcquisitionConfig) -> Self {
		let points = cfg.points_per_segment.max(1) as f64;
		Self{
			y_increment: cfg.vertical_scale * VERTICAL_DIVISIONS / cfg.sample_format.code_span(),
			y_origin:    cfg.vertical_offset,
			y_reference: 0.0,
			x_increment: cfg.timebase * HORIZONTAL_DIVISIONS / points,
			x_origin:    -cfg.timebase * HORIZONTAL_DIVISIONS / 2.0,
			x_reference: 0.0,
		}
	}

	#[inline]
	pub fn to_physical(&self, code:i32) -> f64 {
		(code as f64 - self.y_reference) * self.y_increment + self.y_origin
	}

}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WaveformSegment {
	/// Position in the acquisition, zero based
	pub index: usize,
	pub samples: Vec<f64>,
	/// Trigger time in seconds relative to the first segment, when time tags were read
	pub timestamp: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecodedAcquisition {
	pub segments: Vec<WaveformSegment>,
	pub x_increment: f64,
	pub x_origin: f64,
	pub x_reference: f64,
}

impl DecodedAcquisition {

	pub fn len(&self) -> usize { self.segments.len() }
	pub fn is_empty(&self) -> bool { self.segments.is_empty() }

	pub fn segment(&self, index:usize) -> Option<&WaveformSegment> { self.segments.get(index) }

	/// Sample times within a segment, relative to its trigger.
	pub fn time_axis(&self) -> Vec<f64> {
		let n = self.segments.first().map(|s| s.samples.len()).unwrap_or(0);
		(0..n).map(|i| (i as f64 - self.x_reference) * self.x_increment + self.x_origin).collect()
	}

	pub fn into_segments(self) -> Vec<WaveformSegment> { self.segments }

}

fn decode_samples(body:&[u8], format:SampleFormat, scaling:&Scaling) -> Vec<f64> {
	match format {
		SampleFormat::Byte => body.iter().map(|b| scaling.to_physical(*b as i8 as i32)).collect(),
		SampleFormat::Word => body.chunks_exact(2).map(|w| scaling.to_physical(BigEndian::read_i16(w) as i32)).collect(),
	}
}

/// Decode with the nominal scaling of `cfg` and no timestamps.
pub fn decode(raw:RawBlock, cfg:&AcquisitionConfig) -> Result<DecodedAcquisition, DecodeError> {
	decode_with(raw, &cfg.layout(&InstrumentLimits::DSOX3000), &Scaling::from_config(cfg), None)
}

/// Split `raw` into `layout.segment_count` segments in memory order.
///
/// Either every segment decodes or none does: a payload that is not exactly
/// `layout.expected_len()` bytes, or a timestamp table that does not have one entry per
/// segment, fails before any sample is converted.
pub fn decode_with(raw:RawBlock, layout:&BlockLayout, scaling:&Scaling, timestamps:Option<&[f64]>) -> Result<DecodedAcquisition, DecodeError> {
	let expected = layout.expected_len();
	let segment_len = layout.segment_len();

	if raw.data.len() != expected || segment_len == 0 {
		return Err(DecodeError::ChunkSizeMismatch{ expected, actual: raw.data.len() });
	}

	if let Some(ts) = timestamps {
		if ts.len() != layout.segment_count {
			return Err(DecodeError::TimestampCountMismatch{ expected: layout.segment_count, actual: ts.len() });
		}
	}

	let segments:Vec<WaveformSegment> = raw.data.chunks_exact(segment_len)
		.enumerate()
		.map(|(index, chunk)| WaveformSegment{
			index,
			samples: decode_samples(&chunk[layout.segment_header_bytes..], layout.format, scaling),
			timestamp: timestamps.map(|ts| ts[index]),
		})
		.collect();

	Ok(DecodedAcquisition{
		segments,
		x_increment: scaling.x_increment,
		x_origin:    scaling.x_origin,
		x_reference: scaling.x_reference,
	})
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::devices::dsox3000::config::tests::config;

	fn byte_layout(segment_count:usize, points_per_segment:usize) -> BlockLayout {
		BlockLayout{ segment_count, points_per_segment, format: SampleFormat::Byte, segment_header_bytes: 0 }
	}

	#[test]
	fn three_segments_of_four() {
		let raw = RawBlock::from_payload((1..=12).collect());
		let decoded = decode_with(raw, &byte_layout(3, 4), &Scaling::new(1.0, 0.0), None).unwrap();

		assert_eq!(decoded.len(), 3);
		assert_eq!(decoded.segments[0].samples, vec![1.0, 2.0, 3.0, 4.0]);
		assert_eq!(decoded.segments[1].samples, vec![5.0, 6.0, 7.0, 8.0]);
		assert_eq!(decoded.segments[2].samples, vec![9.0, 10.0, 11.0, 12.0]);
		assert_eq!(decoded.segments[2].index, 2);
		assert_eq!(decoded.segments[0].timestamp, None);
	}

	#[test]
	fn timestamps_are_attached_in_order() {
		let raw = RawBlock::from_payload(vec![0; 6]);
		let decoded = decode_with(raw, &byte_layout(3, 2), &Scaling::new(1.0, 0.0), Some(&[0.0, 1e-3, 2e-3])).unwrap();
		let ts:Vec<Option<f64>> = decoded.segments.iter().map(|s| s.timestamp).collect();
		assert_eq!(ts, vec![Some(0.0), Some(1e-3), Some(2e-3)]);
	}

	#[test]
	fn timestamp_count_must_match() {
		let raw = RawBlock::from_payload(vec![0; 6]);
		match decode_with(raw, &byte_layout(3, 2), &Scaling::new(1.0, 0.0), Some(&[0.0, 1e-3])) {
			Err(DecodeError::TimestampCountMismatch{ expected: 3, actual: 2 }) => { },
			other => panic!("unexpected {:?}", other),
		}
	}

	#[test]
	fn payload_must_fill_every_segment() {
		let raw = RawBlock::from_payload(vec![0; 11]);
		match decode_with(raw, &byte_layout(3, 4), &Scaling::new(1.0, 0.0), None) {
			Err(DecodeError::ChunkSizeMismatch{ expected: 12, actual: 11 }) => { },
			other => panic!("unexpected {:?}", other),
		}
	}

	#[test]
	fn words_are_signed_msb_first() {
		let raw = RawBlock::from_payload(vec![0x00, 0x02, 0xff, 0xfe, 0x7f, 0xff]);
		let layout = BlockLayout{ segment_count: 1, points_per_segment: 3, format: SampleFormat::Word, segment_header_bytes: 0 };
		let scaling = Scaling{ y_reference: 2.0, ..Scaling::new(0.5, 1.0) };
		let decoded = decode_with(raw, &layout, &scaling, None).unwrap();
		assert_eq!(decoded.segments[0].samples, vec![1.0, -1.0, (32767.0 - 2.0) * 0.5 + 1.0]);
	}

	#[test]
	fn segment_headers_are_skipped() {
		let raw = RawBlock::from_payload(vec![0xaa, 1, 2, 0xbb, 3, 4]);
		let layout = BlockLayout{ segment_header_bytes: 1, ..byte_layout(2, 2) };
		let decoded = decode_with(raw, &layout, &Scaling::new(1.0, 0.0), None).unwrap();
		assert_eq!(decoded.segments[1].samples, vec![3.0, 4.0]);
	}

	#[test]
	fn full_memory_shape() {
		let cfg = config();
		let raw = RawBlock::from_payload(vec![0; 5_000_000]);
		let decoded = decode(raw, &cfg).unwrap();
		assert_eq!(decoded.len(), 1000);
		assert!(decoded.segments.iter().all(|s| s.samples.len() == 2500));
		assert_eq!(decoded.segments[0].samples[0], cfg.vertical_offset);

		let t = decoded.time_axis();
		assert_eq!(t.len(), 2500);
		assert!((t[0] + 5e-6).abs() < 1e-15);
	}

	#[test]
	fn preamble_fields() {
		let p = Preamble::parse("+1,+0,+2500,+1,+4.00000E-09,-5.00000E-06,+0,+1.22070E-05,+0.00000E+00,+0\n").unwrap();
		assert_eq!(p.format, SampleFormat::Word);
		assert_eq!(p.points, 2500);
		assert_eq!(p.x_origin, -5e-6);
		assert_eq!(Scaling::from_preamble(&p).to_physical(100), 100.0 * 1.2207e-5);
	}

	#[test]
	fn malformed_preambles() {
		for bad in ["+1,+0,+2500", "+1,+0,+2500,+1,x,+0,+0,+1,+0,+0", "+4,+0,+10,+1,+1,+0,+0,+1,+0,+0", "+1,+0,-3,+1,+1,+0,+0,+1,+0,+0"].iter() {
			match Preamble::parse(bad) {
				Err(ReadoutError::MalformedPreamble(_)) => { },
				other => panic!("{} gave {:?}", bad, other),
			}
		}
	}
}
