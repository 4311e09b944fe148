//! # ilp-concord - A command line solver for 0-1 integer linear programs
//!
//! `ilp-concord` reads a 0-1 integer linear program in the textual format of
//! [`concord::ZeroOneIlpProblem`], solves it using one of the solvers of the
//! `concord` library, and prints the solution.

mod trace;

use std::{
	fmt::{self, Display},
	fs,
	io::{self, Write},
	path::PathBuf,
	str::FromStr,
	sync::{
		atomic::{AtomicBool, Ordering},
		Once,
	},
	time::{Duration, Instant},
};

#[cfg(test)]
use codspeed_criterion_compat as _;
use concord::{IlpSolver, IlpVar, SearchStatistics, SolverConfig, TermSignal, ZeroOneIlpProblem};
use pico_args::Arguments;
use tracing::{info, warn};
use tracing_subscriber::fmt::MakeWriter;

use crate::trace::create_subscriber;

/// Help message printed by the `-h` or `--help` flag.
const CLI_HELP: &str = r#"USAGE
  $ ilp-concord [-s] [-f] [-t <value>] [--solver <value>] [-v] FILE

ARGUMENTS
  FILE                A 0-1 integer linear program in concord's text format.

FLAGS
  -s, --statistics     Print statistics about the search.
  -f, --first-feasible Stop at the first feasible solution.
  -t, --time-limit     Stop the search after the given duration (e.g., 10s, 1m).
  --solver             The solver to use: `balas' (default) or `exhaustive'.
  -v, --verbose        Increase the amount of log messages (repeatable).
  -h, --help           Print this message."#;

/// Flag set when the user interrupts the program (e.g., using Ctrl-C).
pub static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// Ensures the interrupt handler is installed only once.
static INSTALL_HANDLER: Once = Once::new();

#[derive(Clone, Debug)]
/// Configuration and output streams of a run of `ilp-concord`.
pub struct Cli<Stdout, Stderr> {
	/// Path to the problem file.
	path: PathBuf,
	/// Whether to print statistics about the search.
	statistics: bool,
	/// Whether to stop at the first feasible solution.
	first_feasible: bool,
	/// Duration after which the search is stopped.
	time_limit: Option<Duration>,
	/// The solver used to solve the problem.
	solver: SolverKind,
	/// Level of verbosity of the log messages.
	verbose: u8,
	/// Output stream for the solution and statistics.
	stdout: Stdout,
	/// Output stream for log messages.
	stderr: Stderr,
	/// Whether log messages can use ANSI colour codes.
	ansi_color: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
/// The solvers that can be selected using the `--solver` option.
pub enum SolverKind {
	#[default]
	/// Balas' additive branch and bound algorithm.
	Balas,
	/// Enumeration of all assignments of the variables.
	Exhaustive,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
/// The outcome of the search.
enum Status {
	/// A solution was found, and it is proven to be optimal.
	Optimal,
	/// A solution was found, but it is not known to be optimal.
	Feasible,
	/// The problem is proven to have no solutions.
	Infeasible,
	/// The search was stopped before a solution was found.
	Unknown,
}

impl<Stdout, Stderr> Cli<Stdout, Stderr>
where
	Stdout: Write,
	Stderr: for<'writer> MakeWriter<'writer> + Clone + Send + Sync + 'static,
{
	/// Read, solve and report on the problem file.
	pub fn run(&mut self) -> Result<(), String> {
		let subscriber = create_subscriber(self.verbose, self.stderr.clone(), self.ansi_color);
		let _guard = tracing::subscriber::set_default(subscriber);
		let start = Instant::now();

		INTERRUPTED.store(false, Ordering::SeqCst);
		INSTALL_HANDLER.call_once(|| {
			if let Err(err) = ctrlc::set_handler(|| INTERRUPTED.store(true, Ordering::SeqCst)) {
				warn!(%err, "unable to install the interrupt handler");
			}
		});

		let text = fs::read_to_string(&self.path)
			.map_err(|e| format!("Unable to read file {}: {e}", self.path.display()))?;
		let problem: ZeroOneIlpProblem = text
			.parse()
			.map_err(|e| format!("Error parsing {}: {e}", self.path.display()))?;
		info!(
			variables = problem.columns(),
			constraints = problem.rows(),
			maximize = problem.maximize(),
			"parsed problem"
		);

		let config = SolverConfig::default().with_first_feasible(self.first_feasible);
		let mut slv = config.build(problem, self.solver == SolverKind::Exhaustive);
		let deadline = self.time_limit.map(|limit| start + limit);
		slv.set_terminate_callback(Some(Box::new(move || {
			if INTERRUPTED.load(Ordering::SeqCst) || deadline.is_some_and(|d| Instant::now() >= d) {
				TermSignal::Terminate
			} else {
				TermSignal::Continue
			}
		})));

		let found = slv.solve();
		let stats = slv.statistics();
		let status = match (found, stats.interrupted()) {
			(true, false) if !self.first_feasible => Status::Optimal,
			(true, _) => Status::Feasible,
			(false, false) => Status::Infeasible,
			(false, true) => Status::Unknown,
		};
		info!(%status, solve_time = ?start.elapsed(), "search finished");

		self.print_solution(&*slv, status)
			.map_err(|e| format!("Unable to write the solution: {e}"))?;
		if self.statistics {
			self.print_statistics(&stats, start.elapsed())
				.map_err(|e| format!("Unable to write the statistics: {e}"))?;
		}
		Ok(())
	}
}

impl<Stdout: Write, Stderr> Cli<Stdout, Stderr> {
	/// Print the status of the search and, if available, the solution.
	fn print_solution(&mut self, slv: &dyn IlpSolver, status: Status) -> io::Result<()> {
		writeln!(self.stdout, "status: {status}")?;
		if matches!(status, Status::Optimal | Status::Feasible) {
			writeln!(self.stdout, "objective: {:?}", slv.objective_value())?;
			let chosen: Vec<String> = (0..slv.problem().columns())
				.map(IlpVar::from)
				.filter(|&x| slv.boolean_value(x))
				.map(|x| x.to_string())
				.collect();
			writeln!(self.stdout, "solution: {}", chosen.join(" "))?;
		}
		Ok(())
	}

	/// Print the statistics of the search, one per line.
	fn print_statistics(&mut self, stats: &SearchStatistics, solve_time: Duration) -> io::Result<()> {
		writeln!(self.stdout, "% nodes: {}", stats.nodes())?;
		writeln!(self.stdout, "% incumbents: {}", stats.incumbents())?;
		writeln!(self.stdout, "% peak depth: {}", stats.peak_depth())?;
		writeln!(self.stdout, "% interrupted: {}", stats.interrupted())?;
		writeln!(
			self.stdout,
			"% solve time: {}",
			humantime::format_duration(solve_time)
		)
	}
}

impl<Stdout, Stderr> Cli<Stdout, Stderr> {
	/// Replace the output stream of log messages, and set whether they can
	/// contain ANSI colour codes.
	pub fn with_stderr<W>(self, stderr: W, ansi_color: bool) -> Cli<Stdout, W>
	where
		W: for<'writer> MakeWriter<'writer> + Clone + Send + Sync + 'static,
	{
		Cli {
			stderr,
			ansi_color,
			path: self.path,
			statistics: self.statistics,
			first_feasible: self.first_feasible,
			time_limit: self.time_limit,
			solver: self.solver,
			verbose: self.verbose,
			stdout: self.stdout,
		}
	}

	/// Replace the output stream of the solution and statistics.
	pub fn with_stdout<W: Write>(self, stdout: W) -> Cli<W, Stderr> {
		Cli {
			stdout,
			path: self.path,
			statistics: self.statistics,
			first_feasible: self.first_feasible,
			time_limit: self.time_limit,
			solver: self.solver,
			verbose: self.verbose,
			stderr: self.stderr,
			ansi_color: self.ansi_color,
		}
	}
}

impl TryFrom<Arguments> for Cli<io::Stdout, fn() -> io::Stderr> {
	type Error = String;

	fn try_from(mut args: Arguments) -> Result<Self, Self::Error> {
		if args.contains(["-h", "--help"]) {
			print!("{}", CLI_HELP);
			std::process::exit(0);
		}

		let mut verbose = 0;
		while args.contains(["-v", "--verbose"]) {
			verbose += 1;
		}

		let mut cli = Cli {
			statistics: args.contains(["-s", "--statistics"]),
			first_feasible: args.contains(["-f", "--first-feasible"]),
			time_limit: args
				.opt_value_from_fn(["-t", "--time-limit"], humantime::parse_duration)
				.map_err(|e| e.to_string())?,
			solver: args
				.opt_value_from_str("--solver")
				.map_err(|e| e.to_string())?
				.unwrap_or_default(),
			verbose,
			path: PathBuf::new(),
			stdout: io::stdout(),
			stderr: io::stderr as fn() -> io::Stderr,
			ansi_color: true,
		};

		cli.path = args
			.free_from_str()
			.map_err(|e| format!("Missing problem file: {e}"))?;

		let remaining = args.finish();
		match remaining.len() {
			0 => Ok(cli),
			1 => Err(format!("Unexpected argument: {:?}", remaining[0])),
			_ => Err(format!("Unexpected arguments: {:?}", remaining)),
		}
	}
}

impl FromStr for SolverKind {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"balas" => Ok(SolverKind::Balas),
			"exhaustive" => Ok(SolverKind::Exhaustive),
			_ => Err(format!(
				"unknown solver `{s}', expected `balas' or `exhaustive'"
			)),
		}
	}
}

impl Display for Status {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(match self {
			Status::Optimal => "optimal",
			Status::Feasible => "feasible",
			Status::Infeasible => "infeasible",
			Status::Unknown => "unknown",
		})
	}
}
