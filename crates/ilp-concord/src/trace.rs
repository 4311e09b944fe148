//! Module that contains the construction of the [`tracing::Subscriber`] used by
//! `ilp-concord`.

use tracing::{Level, Subscriber};
use tracing_subscriber::fmt::{time::uptime, MakeWriter};

/// Create a [`tracing_subscriber::Subscriber`] specialized for `ilp-concord`.
///
/// The number of times the verbose flag was given selects the most detailed
/// level of messages that is shown. Every message is prefixed with the time
/// since the start of the program.
pub(crate) fn create_subscriber<W>(verbose: u8, make_writer: W, ansi: bool) -> impl Subscriber
where
	W: for<'writer> MakeWriter<'writer> + Send + Sync + 'static,
{
	tracing_subscriber::fmt()
		.with_max_level(match verbose {
			0 => Level::INFO,
			1 => Level::DEBUG,
			_ => Level::TRACE, // 2 or more
		})
		.with_writer(make_writer)
		.with_ansi(ansi)
		.with_timer(uptime())
		.finish()
}
