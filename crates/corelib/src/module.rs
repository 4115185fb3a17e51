//! Verb table served by the rendezvous server.
//!
//! [`ServerModule`] has one method per coordination verb. Every
//! asynchronous verb receives a [`Completion`] and must report through it;
//! the module may do so before returning (all verbs of [`HarnessModule`]
//! except waited lookups) or later, from another verb.
//!
//! [`HarnessModule`] is the single-server implementation:
//!
//! - **fence** answers immediately with the data it was given; there is no
//!   second server to wait for.
//! - **modex** is a local object store keyed by `ProcId`.
//! - **publish/lookup/unpublish** run against a [`PublishStore`].
//! - **spawn/connect/disconnect** always succeed without side effects.

use serde::Deserialize;
use std::fmt;

use crate::completion::Completion;
use crate::modex::ModexStore;
use crate::peers::{FinalizeOutcome, PeerTable};
use crate::proc::ProcId;
use crate::status::Status;
use crate::store::PublishStore;
use crate::value::{AppSpec, Info, Persistence, PublishedData, Scope};

/// Name of every verb, used for dispatch diagnostics.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum Verb {
    Finalize,
    Abort,
    Fence,
    StoreModex,
    DirectModex,
    JobInfo,
    Publish,
    Lookup,
    Unpublish,
    Spawn,
    Connect,
    Disconnect,
}

impl Verb {
    pub const fn name(self) -> &'static str {
        match self {
            Verb::Finalize => "finalize",
            Verb::Abort => "abort",
            Verb::Fence => "fence",
            Verb::StoreModex => "store_modex",
            Verb::DirectModex => "direct_modex",
            Verb::JobInfo => "job_info",
            Verb::Publish => "publish",
            Verb::Lookup => "lookup",
            Verb::Unpublish => "unpublish",
            Verb::Spawn => "spawn",
            Verb::Connect => "connect",
            Verb::Disconnect => "disconnect",
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Slots returned by a lookup, in request order.
pub type LookupData = Vec<Option<PublishedData>>;

/// Handlers for the coordination verbs.
///
/// `requester` / `proc` arguments are the identity of the connected peer as
/// learned during the handshake, except where a verb carries explicit
/// targets (`fence`, `connect`, `direct_modex`, ...).
pub trait ServerModule {
    /// The peer finished. Called at most once per peer by a well-behaved
    /// client; repeats are reported but still acknowledged.
    fn finalized(&mut self, proc: &ProcId, done: Completion<()>);

    fn abort(
        &mut self,
        proc: &ProcId,
        status: i32,
        message: &str,
        procs: &[ProcId],
        done: Completion<()>,
    );

    /// Barrier over `procs`, optionally collecting `data`.
    fn fence(
        &mut self,
        procs: &[ProcId],
        barrier: bool,
        collect: bool,
        data: Vec<u8>,
        done: Completion<Vec<u8>>,
    );

    fn store_modex(&mut self, proc: &ProcId, scope: Scope, blob: Vec<u8>) -> Status;

    /// Point-to-point fetch of the blob stored for `target`.
    fn direct_modex(&mut self, target: &ProcId, done: Completion<Vec<u8>>);

    fn job_info(&mut self, proc: &ProcId) -> Vec<Info>;

    fn publish(
        &mut self,
        owner: &ProcId,
        scope: Scope,
        persistence: Persistence,
        infos: Vec<Info>,
        done: Completion<()>,
    );

    fn lookup(
        &mut self,
        requester: &ProcId,
        scope: Scope,
        wait: bool,
        keys: Vec<String>,
        done: Completion<LookupData>,
    );

    /// `keys == None` removes everything the requester published.
    fn unpublish(
        &mut self,
        requester: &ProcId,
        scope: Scope,
        keys: Option<Vec<String>>,
        done: Completion<()>,
    );

    /// Completes with the namespace assigned to the new job.
    fn spawn(&mut self, requester: &ProcId, apps: Vec<AppSpec>, done: Completion<String>);

    fn connect(&mut self, procs: &[ProcId], done: Completion<()>);

    fn disconnect(&mut self, procs: &[ProcId], done: Completion<()>);

    /// The connection of `proc` went away.
    fn peer_disconnected(&mut self, _proc: &ProcId) {}
}

/// Tunables of [`HarnessModule`].
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ModuleConfig {
    /// Number of local peers whose finalize tears the publish store down.
    pub expected_peers: usize,
    /// Make `connect` answer `Exists` so clients can exercise their error
    /// path.
    pub simulate_already_connected: bool,
    /// Namespace reported by `spawn`.
    pub spawn_namespace: String,
}

impl Default for ModuleConfig {
    fn default() -> Self {
        Self {
            expected_peers: 1,
            simulate_already_connected: false,
            spawn_namespace: "foobar".to_owned(),
        }
    }
}

/// Recorded call to `abort`.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct AbortRecord {
    pub proc: ProcId,
    pub status: i32,
    pub message: String,
}

struct PendingLookup {
    requester: ProcId,
    keys: Vec<String>,
    done: Completion<LookupData>,
}

/// Single-server verb implementation.
pub struct HarnessModule {
    config: ModuleConfig,
    published: PublishStore,
    modex: ModexStore,
    peers: PeerTable,
    aborted: Option<AbortRecord>,
    waiting: Vec<PendingLookup>,
}

impl HarnessModule {
    pub fn new(config: ModuleConfig) -> Self {
        let peers = PeerTable::new(config.expected_peers);
        Self {
            config,
            published: PublishStore::new(),
            modex: ModexStore::new(),
            peers,
            aborted: None,
            waiting: Vec::new(),
        }
    }

    pub fn published(&self) -> &PublishStore {
        &self.published
    }

    pub fn modex(&self) -> &ModexStore {
        &self.modex
    }

    pub fn peers(&self) -> &PeerTable {
        &self.peers
    }

    pub fn aborted(&self) -> Option<&AbortRecord> {
        self.aborted.as_ref()
    }

    /// Lookups parked until their keys are published.
    pub fn waiting_lookups(&self) -> usize {
        self.waiting.len()
    }

    fn teardown(&mut self) {
        let removed = self.published.clear();
        self.modex.clear();
        tracing::info!(removed, "all local peers finalized, stores torn down");
        for pending in self.waiting.drain(..) {
            let slots = vec![None; pending.keys.len()];
            pending.done.complete(Status::NotFound, slots);
        }
    }

    /// Complete every parked lookup whose keys are now all present.
    fn wake_waiters(&mut self) {
        let waiting = std::mem::take(&mut self.waiting);
        for pending in waiting {
            if self.published.contains_all(&pending.keys) {
                let result = self.published.lookup(&pending.keys);
                tracing::debug!(
                    requester = %pending.requester,
                    keys = pending.keys.len(),
                    "waited lookup satisfied"
                );
                pending.done.complete(result.status, result.data);
            } else {
                self.waiting.push(pending);
            }
        }
    }
}

impl Default for HarnessModule {
    fn default() -> Self {
        Self::new(ModuleConfig::default())
    }
}

impl ServerModule for HarnessModule {
    fn finalized(&mut self, proc: &ProcId, done: Completion<()>) {
        match self.peers.mark_finalized(proc) {
            FinalizeOutcome::Duplicate => {
                tracing::error!(proc = %proc, "double termination");
            }
            FinalizeOutcome::Recorded { last } => {
                tracing::debug!(proc = %proc, "peer finalized");
                self.published.release_process(proc);
                if last {
                    self.teardown();
                }
            }
        }
        done.succeed(());
    }

    fn abort(
        &mut self,
        proc: &ProcId,
        status: i32,
        message: &str,
        procs: &[ProcId],
        done: Completion<()>,
    ) {
        tracing::warn!(proc = %proc, status, message, targets = procs.len(), "abort requested");
        self.aborted = Some(AbortRecord {
            proc: proc.clone(),
            status,
            message: message.to_owned(),
        });
        done.succeed(());
    }

    fn fence(
        &mut self,
        procs: &[ProcId],
        barrier: bool,
        collect: bool,
        data: Vec<u8>,
        done: Completion<Vec<u8>>,
    ) {
        // Only one server: every participant is already here.
        tracing::debug!(procs = procs.len(), barrier, collect, bytes = data.len(), "fence");
        done.succeed(data);
    }

    fn store_modex(&mut self, proc: &ProcId, scope: Scope, blob: Vec<u8>) -> Status {
        tracing::debug!(proc = %proc, bytes = blob.len(), "storing modex data");
        self.modex.store(proc.clone(), scope, blob);
        Status::Success
    }

    fn direct_modex(&mut self, target: &ProcId, done: Completion<Vec<u8>>) {
        match self.modex.get(target) {
            Some(entry) => done.succeed(entry.blob.clone()),
            None => {
                tracing::debug!(target = %target, "no modex data for process");
                done.fail(Status::NotFound);
            }
        }
    }

    fn job_info(&mut self, _proc: &ProcId) -> Vec<Info> {
        Vec::new()
    }

    fn publish(
        &mut self,
        owner: &ProcId,
        scope: Scope,
        persistence: Persistence,
        infos: Vec<Info>,
        done: Completion<()>,
    ) {
        let admitted = self.published.publish(owner, scope, persistence, infos);
        tracing::debug!(owner = %owner, admitted, "publish");
        if admitted > 0 {
            self.wake_waiters();
        }
        done.succeed(());
    }

    fn lookup(
        &mut self,
        requester: &ProcId,
        _scope: Scope,
        wait: bool,
        keys: Vec<String>,
        done: Completion<LookupData>,
    ) {
        if wait && !self.published.contains_all(&keys) {
            tracing::debug!(
                requester = %requester,
                keys = keys.len(),
                "lookup parked until keys are published"
            );
            self.waiting.push(PendingLookup {
                requester: requester.clone(),
                keys,
                done,
            });
            return;
        }
        let result = self.published.lookup(&keys);
        done.complete(result.status, result.data);
    }

    fn unpublish(
        &mut self,
        requester: &ProcId,
        _scope: Scope,
        keys: Option<Vec<String>>,
        done: Completion<()>,
    ) {
        let removed = self.published.unpublish(requester, keys.as_deref());
        tracing::debug!(requester = %requester, removed, "unpublish");
        done.succeed(());
    }

    fn spawn(&mut self, requester: &ProcId, apps: Vec<AppSpec>, done: Completion<String>) {
        tracing::debug!(requester = %requester, apps = apps.len(), "spawn");
        done.succeed(self.config.spawn_namespace.clone());
    }

    fn connect(&mut self, procs: &[ProcId], done: Completion<()>) {
        tracing::debug!(procs = procs.len(), "connect");
        if self.config.simulate_already_connected {
            done.fail(Status::Exists);
        } else {
            done.succeed(());
        }
    }

    fn disconnect(&mut self, procs: &[ProcId], done: Completion<()>) {
        tracing::debug!(procs = procs.len(), "disconnect");
        done.succeed(());
    }

    fn peer_disconnected(&mut self, proc: &ProcId) {
        let before = self.waiting.len();
        let waiting = std::mem::take(&mut self.waiting);
        for pending in waiting {
            if pending.requester == *proc {
                pending.done.fail(Status::Unreachable);
            } else {
                self.waiting.push(pending);
            }
        }
        let dropped = before - self.waiting.len();
        if dropped > 0 {
            tracing::debug!(proc = %proc, dropped, "dropped parked lookups of departed peer");
        }
    }
}
