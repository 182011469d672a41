
use std::io::{self, Read, Write, Error, ErrorKind};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use byteorder::{BigEndian, WriteBytesExt, ReadBytesExt};
use log::trace;

use crate::xdr;
use super::{xdr_pack, xdr_unpack, LAST_FRAGMENT};

// Far beyond any reply the instruments send; a larger fragment header means the stream is out of sync
pub const MAX_RECORD_LEN:usize = 64 << 20;

/// Read one record-marked message, joining fragments until the last-fragment bit.
pub fn read_record<R: Read>(rdr:&mut R) -> io::Result<Vec<u8>> {
	let mut record:Vec<u8> = vec![];

	let mut last:bool = false;
	while !last {
		let x:u32 = rdr.read_u32::<BigEndian>()?;

		last = (x & LAST_FRAGMENT) != 0;
		let n = (x & !LAST_FRAGMENT) as usize;

		let start = record.len();
		if start + n > MAX_RECORD_LEN {
			return Err(Error::new(ErrorKind::InvalidData, format!("Record of {} bytes exceeds {} byte limit", start + n, MAX_RECORD_LEN)));
		}
		record.resize(start + n, 0);
		rdr.read_exact(&mut record[start..])?;
	}

	Ok(record)
}

/// Send `data` as a single-fragment record.
pub fn write_record<W: Write>(wtr:&mut W, data:&[u8]) -> io::Result<()> {
	if data.len() as u64 >= LAST_FRAGMENT as u64 {
		return Err(Error::new(ErrorKind::InvalidInput, "Record too long for a single fragment"));
	}
	let mut send_bytes:Vec<u8> = Vec::with_capacity(data.len() + 4);
	send_bytes.write_u32::<BigEndian>(data.len() as u32 | LAST_FRAGMENT)?;
	send_bytes.extend_from_slice(data);
	wtr.write_all(&send_bytes)?;
	wtr.flush()
}

pub struct TcpClient {
	pub stream: TcpStream,
	pub peer: SocketAddr,
	pub prog: u32,
	pub vers: u32,
	pub lastxid: u32,
	pub packer: xdr::Packer,
	pub unpacker: xdr::Unpacker,
}

impl TcpClient {

	pub fn connect<A: ToSocketAddrs>(addr: A, prog: u32, vers: u32) -> io::Result<Self> {
		let stream = TcpStream::connect(addr)?;
		stream.set_nodelay(true)?;
		let peer = stream.peer_addr()?;
		Ok(Self{ stream, peer, prog, vers, lastxid: 0, packer: xdr::Packer::new(), unpacker: xdr::Unpacker::new() })
	}

	/// Replace the stream with a fresh connection to the same peer, dropping anything still in flight.
	pub fn reconnect(&mut self) -> io::Result<()> {
		let stream = TcpStream::connect(self.peer)?;
		stream.set_nodelay(true)?;
		self.stream = stream;
		Ok(())
	}

	// None blocks forever, which is what the socket does by default
	pub fn set_timeout(&mut self, timeout:Option<Duration>) -> io::Result<()> {
		self.stream.set_read_timeout(timeout)?;
		self.stream.set_write_timeout(timeout)
	}

	/// Bump the xid and pack a fresh call header; procedure arguments are packed after this.
	pub fn start_call(&mut self, prc:u32) -> io::Result<()> {
		self.lastxid = self.lastxid.wrapping_add(1);
		self.packer.reset();
		xdr_pack::pack_callheader_no_auth(&mut self.packer, self.lastxid, self.prog, self.vers, prc)
	}

	/// Send the packed call and leave the reply body in the unpacker.
	pub fn do_call(&mut self) -> io::Result<()> {
		write_record(&mut self.stream, self.packer.get_buf())?;

		loop {
			let reply:Vec<u8> = read_record(&mut self.stream)?;
			trace!("rpc reply of {} bytes for xid {}", reply.len(), self.lastxid);

			// Load the response into the unpacker and make sure the xid matches
			self.unpacker.reset(reply);
			let xid = xdr_unpack::unpack_replyheader(&mut self.unpacker)?;

			if xid == self.lastxid {
				return Ok(());
			} else if xid < self.lastxid {
				// Stale reply to a call that already timed out on our side
				continue;
			} else {
				return Err(Error::new(ErrorKind::InvalidData, "Reply xid is newer than any call we made"));
			}
		}
	}

}
