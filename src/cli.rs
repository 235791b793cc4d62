use std::env;
use std::process;

/// Prints usage instructions for the program.
pub fn print_usage() {
    println!(
        "Usage: {} [-h] [-v] [-1] [-l logfile] config_file",
        crate::PROGRAM_NAME
    );
}

/// Options given on the command line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CliOptions {
    /// Append log lines here instead of stdout
    pub log_file: Option<String>,
    /// JSON configuration file
    pub config_file: String,
    /// Run a single cycle, wait for it to drain, then exit
    pub run_once: bool,
}

/// What the command line asks for
#[derive(Debug, PartialEq, Eq)]
pub enum Command {
    Run(CliOptions),
    Help,
    Version,
}

/// Parses command line arguments (without the program name)
///
/// # Errors
/// Returns a message suitable for stderr on missing or unexpected arguments.
pub fn parse_from<I>(args: I) -> Result<Command, String>
where
    I: IntoIterator<Item = String>,
{
    let mut log_file = None;
    let mut config_file = None;
    let mut run_once = false;

    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-h" => return Ok(Command::Help),
            "-v" => return Ok(Command::Version),
            "-1" => run_once = true,
            "-l" => {
                log_file = Some(
                    args.next()
                        .ok_or_else(|| "Missing log file argument".to_string())?,
                )
            }
            _ => {
                if config_file.is_none() {
                    config_file = Some(arg);
                } else {
                    return Err(format!("Unexpected argument: {}", arg));
                }
            }
        }
    }

    let config_file = config_file.ok_or_else(|| "Missing config file argument".to_string())?;
    Ok(Command::Run(CliOptions {
        log_file,
        config_file,
        run_once,
    }))
}

/// Parses the process arguments, exiting on help, version or usage errors
pub fn parse_args() -> CliOptions {
    match parse_from(env::args().skip(1)) {
        Ok(Command::Run(options)) => options,
        Ok(Command::Help) => {
            print_usage();
            process::exit(0);
        }
        Ok(Command::Version) => {
            println!("{} version {}", crate::PROGRAM_NAME, crate::PROGRAM_VERSION);
            process::exit(0);
        }
        Err(message) => {
            eprintln!("Error: {}", message);
            print_usage();
            process::exit(1);
        }
    }
}
