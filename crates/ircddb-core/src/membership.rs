//! Membership: the table of peers currently seen in the coordination channel.
//!
//! Written by the session driver, read by the sync engine. Keyed by nick in an
//! ordered map so that scans (election, dumps) are deterministic.

use std::collections::BTreeMap;
use std::io::{self, Write};
use std::sync::RwLock;

/// Nick prefix marking a sync-source candidate.
pub const SOURCE_PREFIX: &str = "s-";

/// Nick prefix marking a remote administrator.
pub const ADMIN_PREFIX: &str = "u-";

/// One peer in the coordination channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peer {
    pub nick: String,
    pub name: String,
    pub host: String,
    pub op: bool,
}

impl Peer {
    pub fn new(nick: &str, name: &str, host: &str) -> Self {
        Self {
            nick: nick.to_string(),
            name: name.to_string(),
            host: host.to_string(),
            op: false,
        }
    }

    /// Nick follows the sync-source naming convention.
    pub fn is_source_candidate(&self) -> bool {
        is_source_nick(&self.nick)
    }
}

pub fn is_source_nick(nick: &str) -> bool {
    nick.starts_with(SOURCE_PREFIX)
}

pub fn is_admin_nick(nick: &str) -> bool {
    nick.starts_with(ADMIN_PREFIX)
}

/// Concurrent nick → peer table.
#[derive(Debug, Default)]
pub struct Membership {
    peers: RwLock<BTreeMap<String, Peer>>,
}

impl Membership {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a peer. The operator flag starts cleared.
    pub fn join(&self, nick: &str, name: &str, host: &str) {
        self.peers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(nick.to_string(), Peer::new(nick, name, host));
    }

    /// Remove a peer. Returns the removed entry.
    pub fn leave(&self, nick: &str) -> Option<Peer> {
        self.peers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(nick)
    }

    /// Update the operator bit of a known peer.
    ///
    /// Returns `true` only when the flag actually changed.
    pub fn set_operator(&self, nick: &str, op: bool) -> bool {
        let mut peers = self.peers.write().unwrap_or_else(|e| e.into_inner());
        match peers.get_mut(nick) {
            Some(peer) if peer.op != op => {
                peer.op = op;
                true
            }
            _ => false,
        }
    }

    /// Drop every peer.
    pub fn reset(&self) {
        self.peers.write().unwrap_or_else(|e| e.into_inner()).clear();
    }

    pub fn get(&self, nick: &str) -> Option<Peer> {
        self.peers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(nick)
            .cloned()
    }

    pub fn contains(&self, nick: &str) -> bool {
        self.peers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(nick)
    }

    pub fn is_operator(&self, nick: &str) -> bool {
        self.get(nick).is_some_and(|p| p.op)
    }

    pub fn len(&self) -> usize {
        self.peers.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of all peers in nick order.
    pub fn snapshot(&self) -> Vec<Peer> {
        self.peers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect()
    }

    /// First operator peer following the source convention, excluding `own_nick`.
    pub fn find_source(&self, own_nick: &str) -> Option<Peer> {
        self.peers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .find(|p| p.op && p.is_source_candidate() && p.nick != own_nick)
            .cloned()
    }

    /// Write one `nick name host op` line per peer.
    pub fn dump<W: Write>(&self, out: &mut W) -> io::Result<()> {
        for peer in self.snapshot() {
            writeln!(out, "{} {} {} {}", peer.nick, peer.name, peer.host, peer.op)?;
        }
        Ok(())
    }
}
