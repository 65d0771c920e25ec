// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 sbaudit Authors

use crate::error::{Error, Result};
use log::*;
use std::io::ErrorKind;
use std::process::Command;
use std::time::Instant;

/*
 * Input:
 *     program: external tool to be executed (efibootmgr, mokutil, ...)
 *     args: arguments passed verbatim
 * Return:
 *     standard output of the tool as a String
 *     Error::Execution with the exit code and standard error on failure
 *
 * The tools consumed by the audit only print text; no stdin is provided
 * and nothing is retried.
 */
pub(crate) fn run(program: &str, args: &[&str]) -> Result<String> {
    debug!("Executing: {} {}", program, args.join(" "));
    let t0 = Instant::now();

    let output = Command::new(program).args(args).output().map_err(|e| {
        if e.kind() == ErrorKind::NotFound {
            Error::Other(format!("{program} not found in PATH"))
        } else {
            Error::Io(e)
        }
    })?;

    debug!(
        "{} finished in {} ms",
        program,
        t0.elapsed().as_millis()
    );

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        return Err(Error::Execution(
            output.status.code(),
            format!("{} {}: {}", program, args.join(" "), stderr.trim()),
        ));
    }

    Ok(String::from_utf8(output.stdout)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_captures_stdout() {
        let out = run("sh", &["-c", "echo Hello World!"]).unwrap(); //#[allow_ci]
        assert_eq!(out, "Hello World!\n");
    }

    #[test]
    fn test_run_reports_exit_code() {
        match run("sh", &["-c", "echo oops >&2; exit 3"]) {
            Err(Error::Execution(code, message)) => {
                assert_eq!(code, Some(3));
                assert!(message.contains("oops"));
            }
            other => panic!("unexpected result: {other:?}"), //#[allow_ci]
        }
    }

    #[test]
    fn test_run_missing_program() {
        match run("sbaudit-definitely-not-installed", &[]) {
            Err(Error::Other(message)) => {
                assert!(message.contains("not found in PATH"))
            }
            other => panic!("unexpected result: {other:?}"), //#[allow_ci]
        }
    }
}
