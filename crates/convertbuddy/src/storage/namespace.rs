//! Object-name rules shared by every backend.

use crate::error::StorageError;
use crate::sanitize;

const MAX_NAME_LEN: usize = 255;

/// Accepts only a single, plain path component.
///
/// Anything that could resolve outside the job's namespace (separators,
/// `.`/`..`, drive prefixes, NUL) is rejected rather than rewritten.
pub fn validate_object_name(name: &str) -> Result<(), StorageError> {
    let reject = |reason: &str| {
        Err(StorageError::InvalidObjectName {
            name: name.to_string(),
            reason: reason.to_string(),
        })
    };

    if name.is_empty() {
        return reject("name is empty");
    }
    if name.len() > MAX_NAME_LEN {
        return reject("name is too long");
    }
    if name == "." || name == ".." {
        return reject("relative path components are not allowed");
    }
    if name.contains(['/', '\\']) {
        return reject("path separators are not allowed");
    }
    if name.contains(':') {
        return reject("drive or stream prefixes are not allowed");
    }
    if name.chars().any(|c| c == '\0' || c.is_control()) {
        return reject("control characters are not allowed");
    }

    Ok(())
}

/// Largest batch whose sequenced names still sort in submission order.
pub const MAX_BATCH_LEN: usize = 999;

/// Name for the `index`-th (1-based) file of a batch: `007_<name>`.
///
/// The three-digit prefix only sorts correctly up to [`MAX_BATCH_LEN`].
pub fn sequenced_name(index: usize, name: &str) -> String {
    format!("{:03}_{}", index, name)
}

/// Name for a lone upload: `input_<safe-name>`.
pub fn input_name(filename: &str) -> String {
    format!("input_{}", sanitize::safe_filename(filename))
}
