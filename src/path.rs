//! 路径层：合法性检查与组件拆分。
//!
//! Absolute paths are rooted at `/`; everything else resolves against the
//! current working directory. `.` and `..` are ordinary component names
//! here, served by the literal self/parent entries every directory keeps.

use crate::error::{FsError, FsResult};

/// Splits `path` into its components, rejecting repeated separators.
/// A single trailing separator is tolerated, as in `mkdir a/b/`.
pub(crate) fn components(path: &str) -> FsResult<Vec<&str>> {
    if path.contains("//") {
        return Err(FsError::InvalidPath);
    }

    Ok(path.split('/').filter(|cmp| !cmp.is_empty()).collect())
}

#[inline]
pub(crate) fn is_absolute(path: &str) -> bool {
    path.starts_with('/')
}
