// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Component-by-component path walk.
//!
//! The walk is a loop over a queue of pending components. Following a
//! symlink through its text splices the text's components in front of the
//! queue, so a nested resolution never recurses.

use crate::creds::Credentials;
use crate::error::{FsError, FsResult};
use crate::node::{DirentRef, SymlinkResolution};
use crate::path::{components, is_absolute};
use crate::types::PermMask;
use std::collections::VecDeque;

/// Symlink hops still allowed for the current syscall.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SymlinkBudget {
    remaining: u32,
}

impl SymlinkBudget {
    pub fn new(max: u32) -> Self {
        Self { remaining: max }
    }

    pub fn remaining(self) -> u32 {
        self.remaining
    }

    /// Spends one hop, failing once the budget is exhausted.
    pub fn consume(&mut self) -> FsResult<()> {
        if self.remaining == 0 {
            return Err(FsError::TooManySymlinks);
        }
        self.remaining -= 1;
        Ok(())
    }
}

/// Walks paths for one task. `..` never climbs above `root`.
pub(crate) struct Walker<'a> {
    creds: &'a Credentials,
    root: &'a DirentRef,
    name_max: usize,
}

impl<'a> Walker<'a> {
    pub(crate) fn new(creds: &'a Credentials, root: &'a DirentRef, name_max: usize) -> Self {
        Self {
            creds,
            root,
            name_max,
        }
    }

    /// Resolves `path` from `start` without following a final symlink.
    pub(crate) fn find_link(
        &self,
        start: &DirentRef,
        path: &str,
        budget: &mut SymlinkBudget,
    ) -> FsResult<DirentRef> {
        self.walk(start, path, false, budget)
    }

    /// Resolves `path` from `start`, following a final symlink.
    pub(crate) fn find_inode(
        &self,
        start: &DirentRef,
        path: &str,
        budget: &mut SymlinkBudget,
    ) -> FsResult<DirentRef> {
        self.walk(start, path, true, budget)
    }

    fn walk(
        &self,
        start: &DirentRef,
        path: &str,
        follow_final: bool,
        budget: &mut SymlinkBudget,
    ) -> FsResult<DirentRef> {
        if path.is_empty() {
            return Err(FsError::NotFound);
        }
        let mut current = if is_absolute(path) {
            self.root.clone()
        } else {
            start.clone()
        };
        let mut pending: VecDeque<String> = components(path).map(str::to_owned).collect();

        while let Some(name) = pending.pop_front() {
            if !current.is_dir() {
                return Err(FsError::NotADirectory);
            }
            current.inode().check_permission(self.creds, PermMask::EXECUTE)?;
            let next = self.step(&current, &name)?;
            tracing::trace!(component = %name, id = %next.id(), "walk step");

            let is_last = pending.is_empty();
            if !next.is_symlink() || (is_last && !follow_final) {
                current = next;
                continue;
            }

            if let Err(err) = budget.consume() {
                tracing::debug!(path, "symlink budget exhausted");
                return Err(err);
            }
            match next.inode().getlink()? {
                SymlinkResolution::Direct(target) => current = target,
                SymlinkResolution::ViaReadlink => {
                    let target = next.inode().readlink()?;
                    if target.is_empty() {
                        return Err(FsError::NotFound);
                    }
                    // Relative text resolves from the directory holding the
                    // link, which is still `current`.
                    if is_absolute(&target) {
                        current = self.root.clone();
                    }
                    for component in components(&target).rev() {
                        pending.push_front(component.to_owned());
                    }
                }
            }
        }
        Ok(current)
    }

    fn step(&self, dir: &DirentRef, name: &str) -> FsResult<DirentRef> {
        match name {
            "." => Ok(dir.clone()),
            ".." => {
                if dir.same_node(self.root) {
                    return Ok(dir.clone());
                }
                Ok(dir.parent().unwrap_or_else(|| dir.clone()))
            }
            _ => {
                if name.len() > self.name_max {
                    return Err(FsError::NameTooLong);
                }
                dir.inode().lookup(dir, name)
            }
        }
    }
}
