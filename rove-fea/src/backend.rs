//
// Copyright (c) The Rove Project Developers
//
// SPDX-License-Identifier: MIT
//

pub mod dummy;
pub mod netlink;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::backend::dummy::DummyBackend;
use crate::backend::netlink::NetlinkBackend;
use crate::error::Error;
use crate::iftree::IfTree;

// Identifies a data plane backend implementation.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum BackendKind {
    Dummy,
    Netlink,
}

// Backend selection policy: probe in compiled-in order with the last
// supporting backend winning the primary slot, or force a specific one.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BackendSelection {
    Auto,
    Fixed(BackendKind),
}

// Accumulates configuration push errors, preserving the first error message
// and the total count.
#[derive(Debug, Default)]
pub struct ConfigErrorReporter {
    first_error: Option<String>,
    error_count: u32,
}

// A concrete data plane backend.
//
// The observer side renders kernel state into an `IfTree`; the mutator side
// applies tree diffs back. Platform event parsing is buffer-in/tree-out:
// no platform message types leak past this boundary.
#[derive(Debug)]
pub enum DataPlane {
    Dummy(DummyBackend),
    Netlink(NetlinkBackend),
}

// Probe-ordered backend registry. The primary backend is the authoritative
// observer; secondary backends receive configuration pushes in parallel.
#[derive(Debug)]
pub struct BackendRegistry {
    pub primary: DataPlane,
    pub secondary: Vec<DataPlane>,
}

// ===== impl ConfigErrorReporter =====

impl ConfigErrorReporter {
    pub fn log_error(&mut self, error: String) {
        if self.first_error.is_none() {
            self.first_error = Some(error);
        }
        self.error_count += 1;
    }

    pub fn has_errors(&self) -> bool {
        self.error_count > 0
    }

    pub fn first_error(&self) -> Option<&str> {
        self.first_error.as_deref()
    }

    pub fn error_count(&self) -> u32 {
        self.error_count
    }
}

// ===== impl DataPlane =====

impl DataPlane {
    pub fn kind(&self) -> BackendKind {
        match self {
            DataPlane::Dummy(_) => BackendKind::Dummy,
            DataPlane::Netlink(_) => BackendKind::Netlink,
        }
    }

    // Checks whether the backend can operate on this host.
    pub fn probe(&self) -> bool {
        match self {
            DataPlane::Dummy(backend) => backend.probe(),
            DataPlane::Netlink(backend) => backend.probe(),
        }
    }

    // Performs a full re-read of the platform's interface state into the
    // given tree. Interfaces present in the tree but absent from the
    // platform are marked deleted, covering descriptors invalidated while
    // the observer wasn't listening.
    pub async fn pull_config(
        &mut self,
        tree: &mut IfTree,
    ) -> Result<(), Error> {
        match self {
            DataPlane::Dummy(backend) => backend.pull_config(tree),
            DataPlane::Netlink(backend) => backend.pull_config(tree).await,
        }
    }

    // Computes the diff between the pulled and desired trees and applies it
    // to the platform. Errors accumulate on the reporter; the push continues
    // past individual failures.
    pub async fn push_config(
        &mut self,
        pulled: &IfTree,
        desired: &IfTree,
        reporter: &mut ConfigErrorReporter,
    ) {
        let diff = pulled.diff(desired);
        match self {
            DataPlane::Dummy(backend) => backend.push_config(&diff, reporter),
            DataPlane::Netlink(backend) => {
                backend.push_config(&diff, reporter).await
            }
        }
    }
}

// ===== impl BackendRegistry =====

impl BackendRegistry {
    // Probes the candidate backends and splits them into primary and
    // secondary slots. Candidates are given in compiled-in order; the last
    // one that probes successfully becomes primary.
    pub fn select(
        candidates: Vec<DataPlane>,
        selection: BackendSelection,
    ) -> Result<BackendRegistry, Error> {
        let mut supported = candidates
            .into_iter()
            .filter(|backend| match selection {
                BackendSelection::Auto => backend.probe(),
                BackendSelection::Fixed(kind) => {
                    backend.kind() == kind && backend.probe()
                }
            })
            .collect::<Vec<_>>();

        let primary = supported.pop().ok_or(Error::NoUsableBackend)?;
        debug!(kind = ?primary.kind(), "selected primary data plane backend");

        Ok(BackendRegistry {
            primary,
            secondary: supported,
        })
    }
}
