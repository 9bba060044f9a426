use std::ffi::OsString;
use std::process::{Command, Output};

use crate::error::ConversionError;

/// Runs `program` to completion, capturing both streams. A non-zero exit
/// becomes [`ConversionError::ToolFailed`] carrying the tool's stderr.
pub fn run_tool(program: &str, args: &[OsString]) -> Result<String, ConversionError> {
    log::debug!("Running {} with {} argument(s)", program, args.len());

    let output = Command::new(program)
        .args(args)
        .output()
        .map_err(|e| ConversionError::Spawn {
            program: program.to_string(),
            source: e,
        })?;

    if !output.status.success() {
        let message = format_tool_error(program, args, &output);
        log::warn!(
            "{} exited with {}",
            program,
            output
                .status
                .code()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "a signal".to_string())
        );
        return Err(ConversionError::ToolFailed {
            program: program.to_string(),
            status: output.status.code(),
            message,
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// The tool's trimmed stderr, or `Command failed: <argv>` when it wrote none.
fn format_tool_error(program: &str, args: &[OsString], output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    if !stderr.is_empty() {
        return stderr;
    }

    let argv: Vec<String> = std::iter::once(program.to_string())
        .chain(args.iter().map(|a| a.to_string_lossy().into_owned()))
        .collect();
    format!("Command failed: {}", argv.join(" "))
}
