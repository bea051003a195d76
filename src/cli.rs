// src/cli.rs

//! Command-line parsing for `dtexec`.
//!
//! The supervisor's options are single-dash words (`-open`, `-ttprocid`,
//! `-tmp`) and parsing must stop at the first token that is not one of them,
//! handing the rest of the vector to the child untouched. That shape does not
//! fit `clap`, so this module scans the vector by hand. The companion
//! `dtaction-cache` binary uses `clap` as usual.

use std::ffi::{OsStr, OsString};
use std::os::unix::ffi::OsStrExt;
use std::path::PathBuf;

use crate::errors::{DtexecError, Result};
use crate::types::{atoi, CallerIdentity, OpenPolicy};

/// Everything the parser extracted from the command line.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LaunchRequest {
    pub policy: OpenPolicy,
    /// `None` when no `-ttprocid` was given or the token was malformed.
    pub caller: Option<CallerIdentity>,
    /// Files to scrub when the run is cut short.
    pub temp_files: Vec<PathBuf>,
    /// The command to execute. `None` means the options consumed the whole
    /// vector; the run then behaves as if the child already finished.
    pub command: Option<Vec<OsString>>,
}

impl LaunchRequest {
    /// Name of the executed command, used to tag captured stderr.
    pub fn command_name(&self) -> Option<String> {
        self.command
            .as_ref()
            .and_then(|argv| argv.first())
            .map(|arg0| arg0.to_string_lossy().into_owned())
    }
}

/// Parse `args` (without the program name).
///
/// Returns `DtexecError::Usage` for `-h...` (exit code 0) and for an option
/// missing its argument (exit code 1); the caller prints [`usage`] and exits.
pub fn parse_args<I, S>(args: I) -> Result<LaunchRequest>
where
    I: IntoIterator<Item = S>,
    S: Into<OsString>,
{
    let mut request = LaunchRequest::default();
    let mut args = args.into_iter().map(Into::into);

    while let Some(arg) = args.next() {
        match arg.as_bytes() {
            b"-open" => {
                let value = required_value(&mut args)?;
                request.policy = OpenPolicy::from_open_arg(atoi(&value.to_string_lossy()));
            }
            b"-ttprocid" => {
                let value = required_value(&mut args)?;
                // A malformed token degrades to standalone operation.
                request.caller = value.to_string_lossy().parse::<CallerIdentity>().ok();
            }
            b"-tmp" => {
                let value = required_value(&mut args)?;
                request.temp_files.push(PathBuf::from(value));
            }
            bytes if bytes.starts_with(b"-h") => {
                return Err(DtexecError::Usage { exit_code: 0 });
            }
            _ => {
                let mut command = vec![arg];
                command.extend(args);
                request.command = Some(command);
                return Ok(request);
            }
        }
    }

    Ok(request)
}

fn required_value(args: &mut impl Iterator<Item = OsString>) -> Result<OsString> {
    args.next().ok_or(DtexecError::Usage { exit_code: 1 })
}

/// Usage text printed to stderr for `-h` and bad invocations.
pub fn usage(program: &OsStr) -> String {
    let program = program.to_string_lossy();
    format!(
        "Usage:\n\
         \t{program} [-options ...] cmd [cmd arg ...]\n\
         \n\
         where options include:\n\
         \t-open open-option\n\
         \t\t-1 continue to execute after cmd terminates,\n\
         \t\t   thus keeping the terminal window open.\n\
         \t\t 0 exit as soon as cmd terminates, thus allowing\n\
         \t\t   the terminal window to close.\n\
         \t\t n continue to execute if cmd terminates within n\n\
         \t\t   seconds of starting.\n\
         \t-ttprocid procid\n\
         \t-tmp tmpfile [-tmp tmpfile ...]\n\n"
    )
}
