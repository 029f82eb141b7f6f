//
// Copyright (c) The Rove Project Developers
//
// SPDX-License-Identifier: MIT
//

use capctl::caps::CapState;
use tracing::error;

// Scope guard holding the effective capability set raised to everything
// the process is permitted. Dropping the guard clears the effective set
// again, so the elevated window is bounded by the guard's scope even when
// the wrapped code returns early.
struct RaisedCaps {
    caps: CapState,
}

// ===== impl RaisedCaps =====

impl RaisedCaps {
    fn acquire() -> Option<RaisedCaps> {
        let mut caps = match CapState::get_current() {
            Ok(caps) => caps,
            Err(error) => {
                error!(%error, "failed to read current capabilities");
                return None;
            }
        };

        caps.effective = caps.permitted;
        if let Err(error) = caps.set_current() {
            error!(%error, "failed to raise capabilities");
            return None;
        }

        Some(RaisedCaps { caps })
    }
}

impl Drop for RaisedCaps {
    fn drop(&mut self) {
        self.caps.effective.clear();
        if let Err(error) = self.caps.set_current() {
            error!(%error, "failed to drop capabilities");
        }
    }
}

// ===== global functions =====

/// Runs the provided closure with elevated capabilities.
///
/// Privileged socket setup (binding port 520/521, binding to a device) is
/// the only code that should run under this wrapper.
pub fn raise<F, R>(cb: F) -> R
where
    F: FnOnce() -> R,
{
    let _caps = RaisedCaps::acquire();
    cb()
}
