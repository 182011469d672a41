
// Device core
pub const DEVICE_CORE_PROG:u32  = 0x0607af;
pub const DEVICE_CORE_VERS:u32  = 1;
pub const CREATE_LINK:u32       = 10;
pub const DEVICE_WRITE:u32      = 11;
pub const DEVICE_READ:u32       = 12;
pub const DEVICE_CLEAR:u32      = 15;
pub const DESTROY_LINK:u32      = 23;

pub const CLIENT_ID:i32 = 3333;
pub const DEFAULT_LOCK_TIMEOUT_MS:u32 = 10000;

pub const OPERATION_FLAGS_END_ONLY:i32 = 8;

// Reason bits of a device_read reply
pub const REASON_REQCNT:i32 = 1;
pub const REASON_CHR:i32    = 2;
pub const REASON_END:i32    = 4;

// Device_ErrorCode values we react to
pub const ERR_IO_TIMEOUT:i32 = 15;

// Extra time on the socket so the instrument's own io_timeout fires first
const SOCKET_TIMEOUT_MARGIN:Duration = Duration::from_secs(2);

use std::io::{self, ErrorKind};
use std::net::ToSocketAddrs;
use std::time::Duration;

use log::{debug, warn};

use crate::error::TransportError;
use crate::rpc::port_mapping::{TcpPortMapperClient, Mapping};
use crate::rpc::tcp_clients::TcpClient;

pub mod xdr_pack;

fn device_error(code:i32) -> String {
	match code {
		1  => "Syntax error".to_owned(),
		3  => "Device not accessible".to_owned(),
		4  => "Invalid link identifier".to_owned(),
		5  => "Parameter error".to_owned(),
		6  => "Channel not established".to_owned(),
		8  => "Operation not supported".to_owned(),
		9  => "Out of resources".to_owned(),
		11 => "Device locked by another link".to_owned(),
		12 => "No lock held by this link".to_owned(),
		17 => "I/O error".to_owned(),
		21 => "Invalid address".to_owned(),
		23 => "Abort".to_owned(),
		29 => "Channel already established".to_owned(),
		x  => format!("Unknown device error {}", x),
	}
}

fn check(code:i32, timeout:Duration) -> Result<(), TransportError> {
	match code {
		0              => Ok(()),
		ERR_IO_TIMEOUT => Err(TransportError::Timeout(timeout)),
		x              => Err(TransportError::Device(device_error(x))),
	}
}

// A socket read that runs out of time surfaces as WouldBlock or TimedOut depending on the platform
fn map_io(e:io::Error, timeout:Duration) -> TransportError {
	match e.kind() {
		ErrorKind::WouldBlock | ErrorKind::TimedOut => TransportError::Timeout(timeout),
		_                                           => TransportError::Io(e),
	}
}

fn millis(d:Duration) -> u32 { d.as_millis().min(u32::MAX as u128) as u32 }

pub struct CoreClient {
	client: TcpClient,
	opt_link: Option<Link>,
	// Device name of the current link, so it can be recreated on a new stream
	device: Option<String>,
	// Set when a call failed partway through; the stream may be inside a reply
	poisoned: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct Link {
	pub link_id: i32,
	pub max_recv_size: u32,
}

impl CoreClient {

	fn get_link(&self) -> Result<Link, TransportError> {
		self.opt_link.ok_or_else(|| TransportError::Protocol("No link".to_owned()))
	}

	/// Look up the core channel through the host's port mapper and connect to it.
	pub fn new(host:&str) -> Result<Self, TransportError> {
		let mut pmap_client = TcpPortMapperClient::new(host)?;
		let port = pmap_client.get_port(&Mapping::tcp(DEVICE_CORE_PROG, DEVICE_CORE_VERS))?;
		debug!("vxi11 core channel for {} is on port {}", host, port);
		Self::connect((host, port))
	}

	/// Connect to a core channel whose address is already known.
	pub fn connect<A: ToSocketAddrs>(addr:A) -> Result<Self, TransportError> {
		let client = TcpClient::connect(addr, DEVICE_CORE_PROG, DEVICE_CORE_VERS)?;
		Ok(CoreClient{ client, opt_link: None, device: None, poisoned: false })
	}

	pub fn link(&self) -> Option<Link> { self.opt_link }

	pub fn is_poisoned(&self) -> bool { self.poisoned }

	fn call(&mut self, timeout:Duration) -> Result<(), TransportError> {
		self.client.set_timeout(Some(timeout.saturating_add(SOCKET_TIMEOUT_MARGIN)))?;
		match self.client.do_call() {
			Ok(()) => Ok(()),
			Err(e) => {
				self.poisoned = true;
				Err(map_io(e, timeout))
			},
		}
	}

	fn reconnect(&mut self) -> Result<(), TransportError> {
		warn!("vxi11 stream to {} is out of sync, reconnecting", self.client.peer);
		self.client.reconnect()?;
		self.poisoned = false;
		// The old link died with the old connection
		self.opt_link = None;
		Ok(())
	}

	/// After a failed call, reconnect and recreate the link before anything else goes over the wire.
	fn recover(&mut self) -> Result<(), TransportError> {
		if !self.poisoned {
			return Ok(());
		}

		self.reconnect()?;
		if let Some(device) = self.device.clone() {
			self.create_link(&device)?;
		}
		Ok(())
	}

	pub fn create_link(&mut self, device:&str) -> Result<(), TransportError> {
		if self.poisoned {
			self.reconnect()?;
		}
		if self.opt_link.is_some() {
			return Err(TransportError::Protocol("Already connected to a link".to_owned()));
		}

		self.client.start_call(CREATE_LINK)?;
		xdr_pack::pack_create_link_parms(&mut self.client.packer, CLIENT_ID, false, DEFAULT_LOCK_TIMEOUT_MS, device)?;
		self.call(Duration::from_millis(DEFAULT_LOCK_TIMEOUT_MS as u64))?;

		let error:i32         = self.client.unpacker.unpack_i32()?;
		let link_id:i32       = self.client.unpacker.unpack_i32()?;
		let _abort_port:u32   = self.client.unpacker.unpack_u32()?;
		let max_recv_size:u32 = self.client.unpacker.unpack_u32()?;

		check(error, Duration::from_millis(DEFAULT_LOCK_TIMEOUT_MS as u64))?;

		debug!("vxi11 link {} to {} created, max_recv_size={}", link_id, device, max_recv_size);
		self.opt_link = Some(Link{ link_id, max_recv_size });
		self.device = Some(device.to_owned());
		Ok(())
	}

	pub fn ask(&mut self, data:&[u8], timeout:Duration) -> Result<Vec<u8>, TransportError> {
		self.write(data, timeout)?;
		self.read(timeout)
	}

	/// Write `data`, split to the link's max_recv_size, with END set on the last piece only.
	pub fn write(&mut self, data:&[u8], timeout:Duration) -> Result<(), TransportError> {
		self.recover()?;
		let link = self.get_link()?;
		let chunk_size = (link.max_recv_size as usize).max(1);

		let mut chunks = data.chunks(chunk_size).peekable();
		while let Some(chunk) = chunks.next() {
			let flags = if chunks.peek().is_none() { OPERATION_FLAGS_END_ONLY } else { 0 };

			self.client.start_call(DEVICE_WRITE)?;
			xdr_pack::pack_device_write_parms(&mut self.client.packer, link.link_id, millis(timeout), DEFAULT_LOCK_TIMEOUT_MS, flags, chunk)?;
			self.call(timeout)?;

			let error:i32 = self.client.unpacker.unpack_i32()?;
			let size:u32  = self.client.unpacker.unpack_u32()?;
			check(error, timeout)?;

			if size as usize != chunk.len() {
				return Err(TransportError::Protocol(format!("Device accepted {} of {} bytes", size, chunk.len())));
			}
		}

		Ok(())
	}

	/// Read one complete response, issuing device_read calls until the END reason bit is set.
	pub fn read(&mut self, timeout:Duration) -> Result<Vec<u8>, TransportError> {
		self.recover()?;
		let link = self.get_link()?;
		let mut ans:Vec<u8> = vec![];

		loop {
			self.client.start_call(DEVICE_READ)?;
			xdr_pack::pack_device_read_parms(&mut self.client.packer, link.link_id, link.max_recv_size.max(1), millis(timeout), DEFAULT_LOCK_TIMEOUT_MS, 0, 0)?;
			self.call(timeout)?;

			let error:i32    = self.client.unpacker.unpack_i32()?;
			let reason:i32   = self.client.unpacker.unpack_i32()?;
			let data:Vec<u8> = self.client.unpacker.unpack_variable_len_opaque()?;
			check(error, timeout)?;

			ans.extend_from_slice(&data);

			if reason & REASON_END != 0 || reason & REASON_CHR != 0 {
				return Ok(ans);
			} else if reason & REASON_REQCNT == 0 {
				return Err(TransportError::Protocol(format!("Unexpected device_read reason bits {:#x}", reason)));
			}
		}
	}

	/// device_clear: flush the instrument's input and output buffers.
	pub fn clear(&mut self, timeout:Duration) -> Result<(), TransportError> {
		self.recover()?;
		let link = self.get_link()?;

		self.client.start_call(DEVICE_CLEAR)?;
		xdr_pack::pack_device_generic_parms(&mut self.client.packer, link.link_id, 0, DEFAULT_LOCK_TIMEOUT_MS, millis(timeout))?;
		self.call(timeout)?;

		let error:i32 = self.client.unpacker.unpack_i32()?;
		check(error, timeout)
	}

	pub fn destroy_link(&mut self) -> Result<(), TransportError> {
		self.device = None;
		if self.poisoned {
			// The link belongs to a stream we can no longer talk on
			self.opt_link = None;
			return Ok(());
		}
		let link = self.get_link()?;

		self.client.start_call(DESTROY_LINK)?;
		xdr_pack::pack_device_link(&mut self.client.packer, link.link_id)?;
		self.call(Duration::from_millis(DEFAULT_LOCK_TIMEOUT_MS as u64))?;

		self.opt_link = None;
		let error:i32 = self.client.unpacker.unpack_i32()?;
		check(error, Duration::from_millis(DEFAULT_LOCK_TIMEOUT_MS as u64))
	}

}

impl Drop for CoreClient {

	fn drop(&mut self) {
		if self.opt_link.is_some() {
			if let Err(e) = self.destroy_link() {
				warn!("Unable to destroy vxi11 link: {}", e);
			}
		}
	}

}
