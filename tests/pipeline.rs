
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use segscope::devices::dsox3000::*;
use segscope::sim::SimulatedDsox;
use segscope::{AcquisitionError, ConfigError, DecodeError, Error, ReadoutError};

fn config(segment_count:u32, points_per_segment:u32) -> AcquisitionConfig {
	AcquisitionConfig{
		channel: 1,
		vertical_scale: 0.1,
		vertical_offset: -0.05,
		coupling: Coupling::Dc,
		impedance: Impedance::Fifty,
		timebase: 1e-6,
		points_per_segment,
		segment_count,
		trigger_source: TriggerSource::Channel(3),
		trigger_slope: TriggerSlope::Positive,
		trigger_level: 2.0,
		sample_rate: None,
		sample_format: SampleFormat::Word,
	}
}

fn scope(sim:SimulatedDsox) -> Dsox3000<SimulatedDsox> {
	let timing = Timing{ poll_interval: Duration::from_millis(1), ..Timing::default() };
	Dsox3000::new(sim).unwrap().with_timing(timing)
}

const ARM_TIMEOUT:Duration = Duration::from_secs(10);

#[test]
fn thousand_segments_in_one_transfer() {
	let cfg = config(1000, 2500);
	let mut scope = scope(SimulatedDsox::new());

	let acq = scope.acquire(&cfg, ARM_TIMEOUT, true).unwrap();
	assert_eq!(acq.len(), 1000);
	assert!(acq.segments.iter().all(|s| s.samples.len() == 2500));
	assert!(acq.segments.iter().enumerate().all(|(i, s)| s.index == i && s.timestamp.is_some()));
	assert!(scope.session().is_none());
	assert_eq!(scope.transport().log().last().map(|s| s.as_str()), Some(":RUN"));

	let scaling = Scaling::from_preamble(&scope.read_preamble().unwrap());
	let sim = scope.transport();
	let codes = sim.last_codes();
	assert_eq!(codes.len(), 2_500_000);
	for (seg, chunk) in acq.segments.iter().zip(codes.chunks(2500)) {
		let expected:Vec<f64> = chunk.iter().map(|c| scaling.to_physical(*c)).collect();
		assert_eq!(seg.samples, expected);
	}

	assert_eq!(sim.queries(":WAVeform:DATA?"), 1);
	assert_eq!(sim.last_data_timeout(), Some(Timing::default().transfer_timeout(5_000_000)));
}

#[test]
fn byte_format_halves_the_transfer() {
	let mut cfg = config(20, 100);
	cfg.sample_format = SampleFormat::Byte;
	let mut scope = scope(SimulatedDsox::new());

	let acq = scope.acquire(&cfg, ARM_TIMEOUT, false).unwrap();
	assert_eq!(acq.len(), 20);
	assert!(acq.segments.iter().all(|s| s.timestamp.is_none()));
	assert_eq!(scope.transport().last_codes().len(), 2000);
	assert_eq!(acq.time_axis().len(), 100);
}

#[test]
fn missing_time_tags_abort_the_readout() {
	let mut scope = scope(SimulatedDsox::new().drop_timestamps(1));

	match scope.acquire(&config(10, 100), ARM_TIMEOUT, true) {
		Err(Error::Decode(DecodeError::TimestampCountMismatch{ expected: 10, actual: 9 })) => { },
		other => panic!("unexpected {:?}", other),
	}
	assert_eq!(scope.session().map(|s| s.state()), Some(SessionState::Aborted));
	assert_eq!(scope.transport().clears(), 0);
	assert_eq!(scope.transport().log().last().map(|s| s.as_str()), Some(":STOP"));
}

#[test]
fn partial_block_clears_the_link() {
	let mut scope = scope(SimulatedDsox::new().truncate_block(7));

	match scope.acquire(&config(10, 100), ARM_TIMEOUT, false) {
		Err(Error::Readout(ReadoutError::LengthMismatch{ declared: 2000, received: 1993 })) => { },
		other => panic!("unexpected {:?}", other),
	}

	// Hand the instrument back and check it was left idle
	let sim = scope.into_transport();
	assert_eq!(sim.clears(), 1);
	assert!(!sim.is_armed());
	assert!(!sim.is_running());
}

#[test]
fn terminator_does_not_stand_in_for_a_missing_sample_byte() {
	let mut scope = scope(SimulatedDsox::new().short_block(1));

	match scope.acquire(&config(10, 100), ARM_TIMEOUT, false) {
		Err(Error::Readout(ReadoutError::LengthMismatch{ declared: 2000, received: 1999 })) => { },
		other => panic!("unexpected {:?}", other),
	}
	assert_eq!(scope.transport().clears(), 1);
	assert_eq!(scope.session().map(|s| s.state()), Some(SessionState::Aborted));
}

#[test]
fn no_trigger_times_out_without_readout() {
	let mut scope = scope(SimulatedDsox::new().with_triggers_per_poll(0));

	match scope.acquire(&config(10, 100), Duration::from_millis(30), false) {
		Err(Error::Acquisition(AcquisitionError::Timeout{ acquired: 0, requested: 10, .. })) => { },
		other => panic!("unexpected {:?}", other),
	}
	assert_eq!(scope.session().map(|s| s.state()), Some(SessionState::TimedOut));
	assert_eq!(scope.transport().queries(":WAVeform:DATA?"), 0);
	assert!(!scope.transport().is_running());
}

#[test]
fn rejected_configuration_never_arms() {
	let mut scope = scope(SimulatedDsox::new().ignore_command(":WAVeform:FORMat"));

	match scope.acquire(&config(10, 100), ARM_TIMEOUT, false) {
		Err(Error::Config(ConfigError::NotApplied{ observed, .. })) => assert_eq!(observed, "BYTE"),
		other => panic!("unexpected {:?}", other),
	}
	assert!(!scope.transport().log().iter().any(|c| c == ":SINGle"));
}

#[test]
fn wrong_model_is_refused() {
	struct OtherScope;
	impl segscope::transport::Transport for OtherScope {
		fn write(&mut self, _:&str) -> Result<(), segscope::TransportError> { Ok(()) }
		fn query(&mut self, _:&str, _:Duration) -> Result<Vec<u8>, segscope::TransportError> {
			Ok(b"Siglent Technologies,SDS1202X-E,SDS1EDEX5R1234,1.3.27\n".to_vec())
		}
		fn clear(&mut self) -> Result<(), segscope::TransportError> { Ok(()) }
	}

	assert!(Dsox3000::new(OtherScope).is_err());
}

#[test]
fn shared_instrument_serializes_acquisitions() {
	let scope = Arc::new(Mutex::new(scope(SimulatedDsox::new().with_triggers_per_poll(5))));

	let handles:Vec<thread::JoinHandle<usize>> = (0..3).map(|_| {
		let scope = scope.clone();
		thread::spawn(move || {
			let mut scope = scope.lock().unwrap();
			scope.acquire(&config(10, 50), ARM_TIMEOUT, true).unwrap().len()
		})
	}).collect();

	for h in handles {
		assert_eq!(h.join().unwrap(), 10);
	}
	assert_eq!(scope.lock().unwrap().transport().queries(":WAVeform:DATA?"), 3);
}
