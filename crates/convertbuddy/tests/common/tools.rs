//! Shell scripts standing in for the external converters.
//!
//! Each script writes recognizable content so tests can check which
//! arguments reached the tool. Unix only.

#![allow(dead_code)]

use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use convertbuddy::config::ToolsConfig;

pub fn fake_tool(dir: &Path, name: &str, script: &str) -> String {
    std::fs::create_dir_all(dir).expect("Failed to create tools directory");
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", script)).expect("Failed to write tool");
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
        .expect("Failed to make tool executable");
    path.to_string_lossy().into_owned()
}

/// Converters that succeed.
///
/// - `ffmpeg` writes its argument list into the output file (last argument).
/// - `pdftoppm` writes three pages `p<n>@<dpi>` next to the output prefix.
/// - `magick` writes its argument list into the output file.
/// - `soffice` writes one PDF named after the input into the output directory.
pub fn working_tools(dir: &Path) -> ToolsConfig {
    ToolsConfig {
        ffmpeg: fake_tool(dir, "ffmpeg", r#"for a; do out="$a"; done; echo "$@" > "$out""#),
        pdftoppm: fake_tool(
            dir,
            "pdftoppm",
            r#"for n in 1 2 3; do printf "p$n@$3" > "$5-$n.jpg"; done"#,
        ),
        magick: fake_tool(dir, "magick", r#"for a; do out="$a"; done; echo "$@" > "$out""#),
        soffice: fake_tool(
            dir,
            "soffice",
            r#"base=$(basename "$6" .docx); printf '%%PDF' > "$5/$base.pdf""#,
        ),
    }
}

/// Same as [`working_tools`] except `ffmpeg`, which fails with `stderr`.
pub fn failing_ffmpeg(dir: &Path, stderr: &str) -> ToolsConfig {
    let mut tools = working_tools(dir);
    tools.ffmpeg = fake_tool(
        dir,
        "ffmpeg-broken",
        &format!("echo '{}' >&2; exit 1", stderr),
    );
    tools
}

/// Same as [`working_tools`] except `ffmpeg`, which sleeps `secs` first.
pub fn slow_ffmpeg(dir: &Path, secs: u32) -> ToolsConfig {
    let mut tools = working_tools(dir);
    tools.ffmpeg = fake_tool(
        dir,
        "ffmpeg-slow",
        &format!(r#"sleep {}; for a; do out="$a"; done; echo "$@" > "$out""#, secs),
    );
    tools
}
