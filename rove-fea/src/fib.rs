//
// Copyright (c) The Rove Project Developers
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeSet;
use std::net::IpAddr;

use bitflags::bitflags;
use derive_new::new;
use ipnetwork::IpNetwork;
use prefix_trie::joint::map::JointPrefixMap;
use rove_utils::ip::{IpAddrExt, IpNetworkExt};
use rove_utils::protocol::Protocol;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tracing::warn;

use crate::error::Error;
use crate::iftree::IfTree;

// Upper bound on the number of operations a single transaction may hold.
const MAX_TRANSACTION_OPS: usize = 200;

bitflags! {
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    #[derive(Deserialize, Serialize)]
    #[serde(transparent)]
    pub struct FteFlags: u8 {
        // Entry was installed by this process.
        const INSTALLED = 0x01;
        // Entry describes a directly connected subnet.
        const CONNECTED = 0x02;
        // Entry drops matching traffic instead of forwarding it.
        const DISCARD = 0x04;
        // Entry's nexthop is not currently resolvable.
        const UNRESOLVED = 0x08;
    }
}

// One forwarding table entry.
#[derive(Clone, Debug, Eq, PartialEq, new)]
#[derive(Deserialize, Serialize)]
pub struct Fte {
    pub net: IpNetwork,
    pub nexthop: Option<IpAddr>,
    pub ifname: String,
    pub vifname: String,
    pub metric: u32,
    pub admin_distance: u32,
    pub protocol: Protocol,
    pub flags: FteFlags,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FibChange {
    Added,
    Removed,
    Changed,
}

// Entry-level change notification, delivered to observers in apply order.
#[derive(Clone, Debug)]
pub struct FibUpdate {
    pub change: FibChange,
    pub fte: Fte,
}

#[derive(Debug)]
enum FibOp {
    Add(Fte),
    Delete(IpNetwork),
}

// The forwarding table engine.
//
// A prefix trie backs all lookups and feeds per-entry observers. In kernel
// deployments the RIB additionally mirrors committed changes to the
// platform; the trie remains the authoritative in-process view.
#[derive(Debug, Default)]
pub struct Fib {
    table: JointPrefixMap<IpNetwork, Fte>,
    // Interfaces configured to blackhole their traffic.
    discard_interfaces: BTreeSet<String>,
    observers: Vec<UnboundedSender<FibUpdate>>,
    transaction: Option<Vec<FibOp>>,
    multipart_in_progress: bool,
}

// ===== impl Fib =====

impl Fib {
    pub fn new() -> Fib {
        Default::default()
    }

    // Marks an interface as a discard interface. Entries routed through it
    // are installed as blackholes and skip nexthop resolution.
    pub fn add_discard_interface(&mut self, ifname: &str) {
        self.discard_interfaces.insert(ifname.to_owned());
    }

    pub fn remove_discard_interface(&mut self, ifname: &str) {
        self.discard_interfaces.remove(ifname);
    }

    // Longest-prefix-match lookup for a destination address.
    pub fn lookup_by_dest(&self, addr: &IpAddr) -> Option<&Fte> {
        let (_, fte) = self.table.get_lpm(&addr.to_host_prefix())?;
        Some(fte)
    }

    // Exact-match lookup for a prefix.
    pub fn lookup_by_net(&self, net: &IpNetwork) -> Option<&Fte> {
        self.table
            .get_lpm(net)
            .filter(|(found, _)| found == net)
            .map(|(_, fte)| fte)
    }

    // Adds an entry to the forwarding table.
    //
    // Within a transaction the operation is only recorded; it takes effect
    // at commit time. The operation is idempotent at the prefix key.
    pub fn add_entry(
        &mut self,
        fte: Fte,
        tree: &IfTree,
    ) -> Result<(), Error> {
        if let Some(ops) = &mut self.transaction {
            if ops.len() >= MAX_TRANSACTION_OPS {
                return Err(Error::TransactionTooBig(ops.len()));
            }
            ops.push(FibOp::Add(fte));
            return Ok(());
        }

        self.apply_add(fte, tree)
    }

    // Deletes the entry at the given prefix. Deleting an absent prefix is a
    // success.
    pub fn delete_entry(&mut self, net: IpNetwork) -> Result<(), Error> {
        if let Some(ops) = &mut self.transaction {
            if ops.len() >= MAX_TRANSACTION_OPS {
                return Err(Error::TransactionTooBig(ops.len()));
            }
            ops.push(FibOp::Delete(net));
            return Ok(());
        }

        self.apply_delete(net);
        Ok(())
    }

    // Returns a consistent snapshot of the table, together with a flag
    // telling whether a multipart kernel dump is still in progress.
    pub fn get_table(&self) -> (Vec<Fte>, bool) {
        let mut entries = vec![];
        for (_, fte) in &self.table {
            entries.push(fte.clone());
        }
        (entries, self.multipart_in_progress)
    }

    // Replaces the set of installed entries: entries installed by this
    // process but missing from the list are deleted, then missing entries
    // are added.
    pub fn set_table(
        &mut self,
        entries: Vec<Fte>,
        tree: &IfTree,
    ) -> Result<(), Error> {
        let keep = entries
            .iter()
            .map(|fte| fte.net)
            .collect::<BTreeSet<_>>();
        let mut stale = vec![];
        for (net, fte) in &self.table {
            if fte.flags.contains(FteFlags::INSTALLED) && !keep.contains(&net)
            {
                stale.push(net);
            }
        }
        for net in stale {
            self.apply_delete(net);
        }

        for fte in entries {
            self.apply_add(fte, tree)?;
        }

        Ok(())
    }

    // Opens a transaction. All entry operations until commit or abort are
    // staged and appear atomically with respect to other event-loop tasks.
    pub fn start_transaction(&mut self) -> Result<(), Error> {
        if self.transaction.is_some() {
            return Err(Error::TransactionInProgress);
        }
        self.transaction = Some(Vec::new());
        Ok(())
    }

    // Commits the open transaction. Deletes are applied before adds, so
    // replacement sequences do not transiently shadow unrelated entries.
    pub fn commit_transaction(&mut self, tree: &IfTree) -> Result<(), Error> {
        let ops = self
            .transaction
            .take()
            .ok_or(Error::NoTransactionInProgress)?;

        let (deletes, adds): (Vec<_>, Vec<_>) =
            ops.into_iter().partition(|op| matches!(op, FibOp::Delete(_)));
        for op in deletes {
            if let FibOp::Delete(net) = op {
                self.apply_delete(net);
            }
        }
        for op in adds {
            if let FibOp::Add(fte) = op
                && let Err(error) = self.apply_add(fte, tree)
            {
                error.log();
            }
        }

        Ok(())
    }

    pub fn abort_transaction(&mut self) -> Result<(), Error> {
        self.transaction
            .take()
            .map(|_| ())
            .ok_or(Error::NoTransactionInProgress)
    }

    // Registers a per-entry observer. Updates are delivered in apply order.
    pub fn subscribe(&mut self) -> UnboundedReceiver<FibUpdate> {
        let (tx, rx) = unbounded_channel();
        self.observers.push(tx);
        rx
    }

    // Flags the start/end of a multipart kernel dump.
    pub fn set_multipart_in_progress(&mut self, in_progress: bool) {
        self.multipart_in_progress = in_progress;
    }

    // Folds an asynchronous kernel table change into the engine.
    //
    // Entries installed by this process are left alone when the kernel
    // echoes them back; the change is still fanned out to observers so FIB
    // clients see the churn in kernel order.
    pub fn external_update(&mut self, update: FibUpdate) {
        let ours = self
            .table
            .get_lpm(&update.fte.net)
            .filter(|(net, _)| *net == update.fte.net)
            .is_some_and(|(_, fte)| fte.flags.contains(FteFlags::INSTALLED));

        if !ours {
            match update.change {
                FibChange::Added | FibChange::Changed => {
                    self.table.insert(update.fte.net, update.fte.clone());
                }
                FibChange::Removed => {
                    self.table.remove(&update.fte.net);
                }
            }
        }

        self.notify(update.change, update.fte);
    }

    fn apply_add(&mut self, mut fte: Fte, tree: &IfTree) -> Result<(), Error> {
        // Directly connected routes are owned by the platform; never
        // reinstall them from here.
        if fte.flags.contains(FteFlags::CONNECTED) {
            return Ok(());
        }

        // Refuse prefixes that can never be forwarded to.
        if !fte.net.is_routable() {
            return Err(Error::UnroutablePrefix(fte.net));
        }

        if fte.flags.contains(FteFlags::DISCARD)
            || self.discard_interfaces.contains(&fte.ifname)
        {
            // Blackhole entries carry no nexthop interface.
            fte.flags.insert(FteFlags::DISCARD);
        } else {
            // The outgoing interface must resolve to a live ifindex.
            let resolved = tree
                .interface(&fte.ifname)
                .and_then(|iface| iface.ifindex)
                .is_some();
            if !resolved {
                return Err(Error::UnresolvedNexthop(fte.net));
            }
        }

        fte.flags.insert(FteFlags::INSTALLED);
        let change = match self.table.get(&fte.net) {
            Some(old) if *old == fte => return Ok(()),
            Some(_) => FibChange::Changed,
            None => FibChange::Added,
        };
        self.table.insert(fte.net, fte.clone());
        self.notify(change, fte);

        Ok(())
    }

    fn apply_delete(&mut self, net: IpNetwork) {
        if let Some(fte) = self.table.remove(&net) {
            self.notify(FibChange::Removed, fte);
        }
    }

    fn notify(&mut self, change: FibChange, fte: Fte) {
        self.observers.retain(|observer| {
            let update = FibUpdate {
                change,
                fte: fte.clone(),
            };
            if observer.send(update).is_err() {
                warn!("dropping disconnected FIB observer");
                return false;
            }
            true
        });
    }
}
