//! IEEE 488.2 definite-length arbitrary blocks: `#<n><n length digits><payload><terminator>`.

use std::str;

use crate::error::ReadoutError;

pub const BLOCK_MARKER:u8 = b'#';
pub const TERMINATOR:u8 = b'\n';

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
	/// Bytes taken by `#`, the digit count and the length digits.
	pub header_len: usize,
	pub declared_len: usize,
}

/// Parse the `#<n><digits>` prefix. The indefinite form `#0` is rejected.
pub fn parse_header(buf:&[u8]) -> Result<BlockHeader, ReadoutError> {
	match buf.first() {
		Some(&BLOCK_MARKER) => { },
		Some(b)             => return Err(ReadoutError::MalformedHeader(format!("expected '#' but found byte {:#04x}", b))),
		None                => return Err(ReadoutError::MalformedHeader("empty response".to_owned())),
	}

	let n_digits = match buf.get(1) {
		Some(b @ b'1'..=b'9') => (b - b'0') as usize,
		Some(b'0')            => return Err(ReadoutError::MalformedHeader("indefinite-length block (#0) not supported".to_owned())),
		Some(b)               => return Err(ReadoutError::MalformedHeader(format!("invalid digit count byte {:#04x}", b))),
		None                  => return Err(ReadoutError::MalformedHeader("response ends after '#'".to_owned())),
	};

	let digits = buf.get(2..2 + n_digits)
		.ok_or_else(|| ReadoutError::MalformedHeader(format!("response ends inside the {} length digits", n_digits)))?;

	if !digits.iter().all(u8::is_ascii_digit) {
		return Err(ReadoutError::MalformedHeader(format!("non-digit in length field {:?}", String::from_utf8_lossy(digits))));
	}

	// All ASCII digits, so both conversions only fail on overflow
	let declared_len = str::from_utf8(digits).ok()
		.and_then(|s| s.parse::<usize>().ok())
		.ok_or_else(|| ReadoutError::MalformedHeader("length field overflows".to_owned()))?;

	Ok(BlockHeader{ header_len: 2 + n_digits, declared_len })
}

/// Validate a complete block response and return its payload.
///
/// Whatever follows the header must be exactly the declared number of bytes followed by
/// `\n` or `\r\n`. A short payload that still ends in the terminator is a `LengthMismatch`,
/// never a payload padded with the newline; a full payload with no terminator is `Unterminated`.
pub fn parse_block(buf:&[u8]) -> Result<&[u8], ReadoutError> {
	let header = parse_header(buf)?;
	let body = &buf[header.header_len..];
	let declared = header.declared_len;

	if body.len() > declared {
		return match &body[declared..] {
			b"\n" | b"\r\n" => Ok(&body[..declared]),
			_               => Err(ReadoutError::LengthMismatch{ declared, received: body.len() }),
		};
	}

	// Exactly `declared` bytes with no room for a terminator: either the terminator is missing or
	// it was the last byte of a payload one byte short
	if body.len() == declared {
		if body.last() == Some(&TERMINATOR) {
			return Err(ReadoutError::LengthMismatch{ declared, received: declared - 1 });
		}
		return Err(ReadoutError::Unterminated{ declared });
	}

	Err(ReadoutError::LengthMismatch{ declared, received: body.len() })
}

/// Frame `payload` as a definite-length block with a trailing newline.
pub fn encode_block(payload:&[u8]) -> Vec<u8> {
	let len = payload.len().to_string();
	let mut ans:Vec<u8> = Vec::with_capacity(payload.len() + len.len() + 3);
	ans.push(BLOCK_MARKER);
	ans.extend_from_slice(len.len().to_string().as_bytes());
	ans.extend_from_slice(len.as_bytes());
	ans.extend_from_slice(payload);
	ans.push(TERMINATOR);
	ans
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn header_for_five_megabyte_transfer() {
		let h = parse_header(b"#75000000").unwrap();
		assert_eq!(h, BlockHeader{ header_len: 9, declared_len: 5_000_000 });
	}

	#[test]
	fn payload_may_contain_newlines() {
		let block = encode_block(b"\n\n\x00\n");
		assert_eq!(&block[..3], b"#14");
		assert_eq!(parse_block(&block).unwrap(), b"\n\n\x00\n");
	}

	#[test]
	fn terminator_is_required() {
		assert_eq!(parse_block(b"#15hello\n").unwrap(), b"hello");
		assert_eq!(parse_block(b"#15hello\r\n").unwrap(), b"hello");
		match parse_block(b"#15hello") {
			Err(ReadoutError::Unterminated{ declared: 5 }) => { },
			other => panic!("unexpected {:?}", other),
		}
	}

	#[test]
	fn terminator_never_pads_a_short_payload() {
		match parse_block(b"#15hell\n") {
			Err(ReadoutError::LengthMismatch{ declared: 5, received: 4 }) => { },
			other => panic!("unexpected {:?}", other),
		}
	}

	#[test]
	fn short_payload_is_a_length_mismatch() {
		match parse_block(b"#210short\n") {
			Err(ReadoutError::LengthMismatch{ declared, received }) => {
				assert_eq!(declared, 10);
				assert_eq!(received, 6);
			},
			other => panic!("unexpected {:?}", other),
		}
	}

	#[test]
	fn trailing_garbage_is_a_length_mismatch() {
		match parse_block(b"#13abcdef\n") {
			Err(ReadoutError::LengthMismatch{ declared: 3, received: 7 }) => { },
			other => panic!("unexpected {:?}", other),
		}
	}

	#[test]
	fn malformed_headers() {
		let bad_headers:[&[u8]; 7] = [b"", b"7abc", b"#", b"#0abc", b"#x12", b"#4123", b"#3a12xyz"];
		for bad in bad_headers.iter() {
			match parse_header(bad) {
				Err(ReadoutError::MalformedHeader(_)) => { },
				other => panic!("{:?} gave {:?}", String::from_utf8_lossy(bad), other),
			}
		}
	}
}
