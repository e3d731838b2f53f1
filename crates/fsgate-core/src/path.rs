// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Path splitting helpers.
//!
//! These are pure string operations; nothing here touches the naming graph.

use crate::abi::PATH_MAX;
use crate::error::{FsError, FsResult};

/// Trims trailing slashes, except for a lone root slash.
///
/// Returns the trimmed path and whether anything was removed.
pub fn trim_trailing_slashes(path: &str) -> (&str, bool) {
    let mut trimmed = path;
    let mut changed = false;
    while trimmed.len() > 1 && trimmed.ends_with('/') {
        trimmed = &trimmed[..trimmed.len() - 1];
        changed = true;
    }
    (trimmed, changed)
}

/// Splits a path into its directory and final component.
///
/// The directory keeps a leading slash when the path is absolute and is
/// otherwise stripped of trailing slashes.
///
/// ```text
/// split_last("/")        == ("/", "")
/// split_last("foo")      == (".", "foo")
/// split_last("/foo")     == ("/", "foo")
/// split_last("a//b/c/")  == ("a//b", "c")
/// split_last("")         == (".", ".")
/// ```
pub fn split_last(path: &str) -> (&str, &str) {
    let (path, _) = trim_trailing_slashes(path);
    if path.is_empty() {
        return (".", ".");
    }
    if path == "/" {
        return ("/", "");
    }
    match path.rfind('/') {
        None => (".", path),
        Some(0) => ("/", &path[1..]),
        Some(slash) => {
            let (dir, _) = trim_trailing_slashes(&path[..slash]);
            (dir, &path[slash + 1..])
        }
    }
}

/// Iterates the non-empty components of a path.
pub fn components(path: &str) -> impl DoubleEndedIterator<Item = &str> {
    path.split('/').filter(|c| !c.is_empty())
}

pub fn is_absolute(path: &str) -> bool {
    path.starts_with('/')
}

/// A path argument after copy-in validation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PathArg {
    path: String,
    dir_path: bool,
}

impl PathArg {
    /// Validates a raw path argument.
    ///
    /// Empty paths fail with `NotFound` unless `allow_empty` is set. The
    /// trailing-slash flag is recorded but the path itself is kept verbatim.
    pub fn parse(raw: &str, allow_empty: bool) -> FsResult<Self> {
        Self::parse_with_limit(raw, allow_empty, PATH_MAX)
    }

    pub fn parse_with_limit(raw: &str, allow_empty: bool, path_max: usize) -> FsResult<Self> {
        if raw.len() >= path_max {
            return Err(FsError::NameTooLong);
        }
        if raw.is_empty() && !allow_empty {
            return Err(FsError::NotFound);
        }
        if raw.contains('\0') {
            return Err(FsError::InvalidArgument);
        }
        let (_, dir_path) = trim_trailing_slashes(raw);
        Ok(Self {
            path: raw.to_string(),
            dir_path,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.path
    }

    pub fn is_empty(&self) -> bool {
        self.path.is_empty()
    }

    /// True when the path carried directory syntax (a trailing slash).
    pub fn dir_path(&self) -> bool {
        self.dir_path
    }

    pub fn components(&self) -> PathComponents {
        PathComponents::new(&self.path, self.dir_path)
    }
}

/// `(parent, name, trailing_slash)` for operations that act on a name.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PathComponents {
    pub parent: String,
    pub name: String,
    pub trailing_slash: bool,
}

impl PathComponents {
    fn new(path: &str, trailing_slash: bool) -> Self {
        let (parent, name) = split_last(path);
        Self {
            parent: parent.to_string(),
            name: name.to_string(),
            trailing_slash,
        }
    }
}
