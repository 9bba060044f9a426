//! External converter detection.

use std::path::PathBuf;

use crate::config::ToolsConfig;

/// Information about one external converter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolInfo {
    /// Configured program name or path.
    pub name: String,
    pub available: bool,
    /// Resolved executable, when found.
    pub path: Option<PathBuf>,
}

pub fn check_tool(name: &str) -> ToolInfo {
    match which::which(name) {
        Ok(path) => ToolInfo {
            name: name.to_string(),
            available: true,
            path: Some(path),
        },
        Err(_) => ToolInfo {
            name: name.to_string(),
            available: false,
            path: None,
        },
    }
}

/// Checks every converter the dispatch table may invoke.
pub fn check_tools(tools: &ToolsConfig) -> Vec<ToolInfo> {
    vec![
        check_tool(&tools.ffmpeg),
        check_tool(&tools.pdftoppm),
        check_tool(&tools.magick),
        check_tool(&tools.soffice),
    ]
}

/// Logs a warning for each missing converter and returns how many are missing.
pub fn warn_missing_tools(tools: &ToolsConfig) -> usize {
    let missing: Vec<ToolInfo> = check_tools(tools)
        .into_iter()
        .filter(|t| !t.available)
        .collect();
    for tool in &missing {
        log::warn!(
            "Converter '{}' not found; jobs that need it will fail",
            tool.name
        );
    }
    missing.len()
}
