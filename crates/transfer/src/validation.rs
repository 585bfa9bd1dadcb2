use std::path::{Component, Path, PathBuf};

use crate::TransferError;

/// Validates that a requested file name stays inside the serve root.
///
/// Rejects:
/// - Empty names
/// - Absolute paths (Unix `/` or Windows `C:\`)
/// - Parent directory traversal (`..`)
/// - Windows drive and UNC prefixes, on every platform
pub fn validate_request_path(file_name: &str) -> Result<(), TransferError> {
    if file_name.is_empty() {
        return Err(TransferError::InvalidPath("empty path".into()));
    }

    // Checked textually so a Unix server rejects them too.
    if file_name.len() >= 2 && file_name.as_bytes()[1] == b':' {
        return Err(TransferError::InvalidPath(format!(
            "drive prefix not allowed: {file_name}"
        )));
    }
    if file_name.starts_with("\\\\") {
        return Err(TransferError::InvalidPath(format!(
            "UNC path not allowed: {file_name}"
        )));
    }

    let path = Path::new(file_name);
    if path.is_absolute() {
        return Err(TransferError::InvalidPath(format!(
            "absolute path not allowed: {file_name}"
        )));
    }

    for component in path.components() {
        match component {
            Component::ParentDir => {
                return Err(TransferError::InvalidPath(format!(
                    "parent directory traversal not allowed: {file_name}"
                )));
            }
            Component::Prefix(_) | Component::RootDir => {
                return Err(TransferError::InvalidPath(format!(
                    "absolute path not allowed: {file_name}"
                )));
            }
            Component::CurDir | Component::Normal(_) => {}
        }
    }

    Ok(())
}

/// Validates `file_name` and joins it onto `root`.
pub fn resolve_request_path(root: &Path, file_name: &str) -> Result<PathBuf, TransferError> {
    validate_request_path(file_name)?;
    Ok(root.join(file_name))
}
