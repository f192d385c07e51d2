//! Capability catalog and call dispatch
//!
//! The router merges the capability listings of every connected backend
//! into one catalog keyed by `(kind, qualified name)`. The first backend to
//! register a name keeps it; later claimants are rejected and reported.
//! The router never owns a session: it keeps weak references and refuses to
//! dispatch once the owner has left `Connected`.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use relay_core::{CapabilityEntry, CapabilityKind, GatewayError, GatewayResult};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::session::BackendSession;

/// A registration rejected because the name was already taken
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Collision {
    pub kind: CapabilityKind,
    pub qualified_name: String,
    /// Backend that already owns the name
    pub owner: String,
    /// Backend whose entry was rejected
    pub rejected: String,
}

/// Outcome of registering one backend
#[derive(Debug, Default)]
pub struct Registration {
    pub added: usize,
    pub collisions: Vec<Collision>,
    /// Kinds whose listing failed; nothing of that kind was registered
    pub failed_kinds: Vec<CapabilityKind>,
    /// Names the backend listed more than once; only the first was kept
    pub duplicates: Vec<(CapabilityKind, String)>,
}

#[derive(Default)]
struct Catalog {
    /// Entries in registration order
    entries: Vec<CapabilityEntry>,
    /// `(kind, qualified name)` -> position in `entries`
    index: HashMap<(CapabilityKind, String), usize>,
    sessions: HashMap<String, Weak<BackendSession>>,
}

impl Catalog {
    fn reindex(&mut self) {
        self.index = self
            .entries
            .iter()
            .enumerate()
            .map(|(i, e)| ((e.kind, e.qualified_name.clone()), i))
            .collect();
    }
}

/// Aggregated catalog plus dispatch to the owning backend
#[derive(Default)]
pub struct CapabilityRouter {
    catalog: RwLock<Catalog>,
}

impl CapabilityRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch the session's listings and merge them into the catalog.
    ///
    /// Listing happens before the catalog lock is taken; the merge itself
    /// has no suspension point, so readers see either none or all of this
    /// backend's entries.
    pub async fn on_connected(&self, session: &Arc<BackendSession>) -> Registration {
        let (entries, failures) = session.refresh_capabilities().await;

        let mut registration = Registration {
            failed_kinds: failures.into_iter().map(|(kind, _)| kind).collect(),
            ..Default::default()
        };

        if !session.is_connected() {
            warn!(backend = %session.name(), "Backend left Connected during listing, not registering");
            return registration;
        }

        {
            let mut catalog = self.catalog.write();
            catalog
                .sessions
                .insert(session.name().to_string(), Arc::downgrade(session));

            for entry in entries {
                let key = (entry.kind, entry.qualified_name.clone());
                if let Some(&existing) = catalog.index.get(&key) {
                    if catalog.entries[existing].owner == entry.owner {
                        registration.duplicates.push(key);
                        continue;
                    }
                    registration.collisions.push(Collision {
                        kind: entry.kind,
                        qualified_name: entry.qualified_name,
                        owner: catalog.entries[existing].owner.clone(),
                        rejected: entry.owner,
                    });
                    continue;
                }
                let position = catalog.entries.len();
                catalog.index.insert(key, position);
                catalog.entries.push(entry);
                registration.added += 1;
            }
        }

        for (kind, name) in &registration.duplicates {
            warn!(
                backend = %session.name(),
                kind = %kind,
                name = %name,
                "Backend listed the same name twice, keeping the first"
            );
        }
        for collision in &registration.collisions {
            warn!(
                kind = %collision.kind,
                name = %collision.qualified_name,
                owner = %collision.owner,
                rejected = %collision.rejected,
                "Capability name collision, keeping first registration"
            );
        }
        info!(
            backend = %session.name(),
            added = registration.added,
            collisions = registration.collisions.len(),
            "Registered backend capabilities"
        );

        registration
    }

    /// Drop every entry owned by `backend`. Returns how many were removed.
    pub fn on_disconnected(&self, backend: &str) -> usize {
        let removed = {
            let mut catalog = self.catalog.write();
            let before = catalog.entries.len();
            catalog.entries.retain(|e| e.owner != backend);
            catalog.sessions.remove(backend);
            let removed = before - catalog.entries.len();
            if removed > 0 {
                catalog.reindex();
            }
            removed
        };

        info!(backend = %backend, removed, "Removed backend capabilities");
        removed
    }

    /// Current entries of one kind, in registration order
    pub fn list_capabilities(&self, kind: CapabilityKind) -> Vec<CapabilityEntry> {
        self.catalog
            .read()
            .entries
            .iter()
            .filter(|e| e.kind == kind)
            .cloned()
            .collect()
    }

    pub fn lookup(&self, kind: CapabilityKind, qualified_name: &str) -> Option<CapabilityEntry> {
        let catalog = self.catalog.read();
        catalog
            .index
            .get(&(kind, qualified_name.to_string()))
            .map(|&i| catalog.entries[i].clone())
    }

    /// Total number of catalog entries
    pub fn len(&self) -> usize {
        self.catalog.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forward an invocation to the backend owning `qualified_name`.
    ///
    /// The backend receives its own (local) name. Errors it reports come
    /// back with the owner attached; nothing is retried.
    pub async fn invoke(
        &self,
        qualified_name: &str,
        kind: CapabilityKind,
        args: Value,
    ) -> GatewayResult<Value> {
        let (entry, owner) = {
            let catalog = self.catalog.read();
            let entry = catalog
                .index
                .get(&(kind, qualified_name.to_string()))
                .map(|&i| catalog.entries[i].clone())
                .ok_or_else(|| GatewayError::NotFound(format!("{} '{}'", kind, qualified_name)))?;
            let owner = catalog.sessions.get(&entry.owner).cloned();
            (entry, owner)
        };

        let session = owner
            .and_then(|weak| weak.upgrade())
            .filter(|session| session.is_connected())
            .ok_or_else(|| GatewayError::BackendUnavailable(entry.owner.clone()))?;

        debug!(backend = %entry.owner, kind = %kind, name = %entry.local_name, "Dispatching");

        session
            .client()
            .invoke(kind, &entry.local_name, args)
            .await
            .map_err(|e| {
                let e = e.with_owner(&entry.owner);
                debug!(backend = %entry.owner, error = %e, "Invocation failed");
                e
            })
    }

    /// Forget everything
    pub fn clear(&self) {
        let mut catalog = self.catalog.write();
        *catalog = Catalog::default();
    }
}
