use std::sync::Once;

use env_logger::Env;
use log::LevelFilter;

static LOG_ONCE: Once = Once::new();

fn env_level() -> LevelFilter {
	std::env::var("SEGSCOPE_LOG")
		.or_else(|_| std::env::var("RUST_LOG"))
		.ok()
		.as_deref()
		.and_then(|v| v.parse::<LevelFilter>().ok())
		.unwrap_or(LevelFilter::Info)
}

/// Raise the default level by one step per `-v`, starting from the environment's level.
pub fn level_with_verbosity(verbose: u8) -> LevelFilter {
	let mut level = env_level();
	for _ in 0..verbose {
		level = match level {
			LevelFilter::Off   => LevelFilter::Error,
			LevelFilter::Error => LevelFilter::Warn,
			LevelFilter::Warn  => LevelFilter::Info,
			LevelFilter::Info  => LevelFilter::Debug,
			_                  => LevelFilter::Trace,
		};
	}
	level
}

/// Initialize stderr logging from `SEGSCOPE_LOG`/`RUST_LOG`. Later calls are no-ops.
pub fn init_logging(level: LevelFilter) {
	LOG_ONCE.call_once(|| {
		let env = Env::default().default_filter_or(level.as_str().to_ascii_lowercase());
		env_logger::Builder::from_env(env)
			.filter_module("segscope", level)
			.format_timestamp_millis()
			.format_target(true)
			.init();
	});
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn verbosity_saturates_at_trace() {
		assert_eq!(level_with_verbosity(9), LevelFilter::Trace);
	}
}
