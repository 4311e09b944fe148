//! Binary entry point of `ilp-concord`.

#![expect(
	unused_crate_dependencies,
	reason = "only the library target uses most dependencies"
)]

use std::process::ExitCode;

use ilp_concord::Cli;
use pico_args::Arguments;

fn main() -> ExitCode {
	// Parse commandline arguments
	let args = Arguments::from_env();
	let cli: Result<Cli<_, _>, _> = args.try_into();
	let mut cli = match cli {
		Ok(cli) => cli,
		Err(e) => {
			eprintln!("Error: {e}");
			return ExitCode::FAILURE;
		}
	};

	// Run the solver
	match cli.run() {
		Ok(()) => ExitCode::SUCCESS,
		Err(e) => {
			eprintln!("Error: {e}");
			ExitCode::FAILURE
		}
	}
}
