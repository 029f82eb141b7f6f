//
// Copyright (c) The Rove Project Developers
//
// SPDX-License-Identifier: MIT
//

use crate::backend::ConfigErrorReporter;
use crate::error::Error;
use crate::iftree::IfTree;

// Test data plane backend.
//
// The backend owns a private "kernel twin" tree. The observer side renders
// the twin into the caller's tree; the mutator side applies diffs into the
// twin. The backend always probes successfully, so it is available on every
// platform and serves as the secondary applier in kernel deployments.
#[derive(Debug, Default)]
pub struct DummyBackend {
    kernel: IfTree,
}

// ===== impl DummyBackend =====

impl DummyBackend {
    pub fn new() -> DummyBackend {
        Default::default()
    }

    pub fn probe(&self) -> bool {
        true
    }

    pub fn pull_config(&mut self, tree: &mut IfTree) -> Result<(), Error> {
        // Rewrite the caller's tree as the transition to the twin's state,
        // leaving the lifecycle tags in place for the report pass.
        *tree = tree.diff(&self.kernel);
        Ok(())
    }

    pub fn push_config(
        &mut self,
        diff: &IfTree,
        _reporter: &mut ConfigErrorReporter,
    ) {
        self.kernel.apply(diff);
    }

    // Grants tests direct access to the kernel twin so platform events can
    // be simulated.
    pub fn kernel_mut(&mut self) -> &mut IfTree {
        &mut self.kernel
    }

    pub fn kernel(&self) -> &IfTree {
        &self.kernel
    }
}
