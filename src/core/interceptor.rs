// src/core/interceptor.rs

//! Role-stamping interceptors for the peer RPC surface.
//!
//! Every outbound replication RPC carries this server's `(role, epoch)` in
//! its headers and inspects the reply's headers; every inbound replication
//! RPC is inspected symmetrically. A peer asserting primary at a strictly
//! higher epoch demotes this server to standby; a peer asserting primary at
//! the same epoch while we are primary means the pair is misconfigured and
//! this server enters `detected_broken_config`.
//!
//! The interceptors hold only a cached `(role, epoch)` snapshot and a
//! `force_role` callback installed by the controller, never the controller
//! itself. An interceptor never holds its own lock while invoking the
//! callback.

use crate::core::ClusterError;
use crate::core::role::{Epoch, Role};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, warn};

/// Forces a non-graceful local role change. Installed by the controller.
pub type ForceRoleFn = Arc<dyn Fn(Role, Epoch) + Send + Sync>;

/// Decides the forced demotion, if any, for a reply observed by the client
/// interceptor.
pub fn client_demotion(
    our: (Role, Epoch),
    peer: (Role, Epoch),
) -> Option<(Role, Epoch)> {
    let (our_role, our_epoch) = our;
    let (peer_role, peer_epoch) = peer;
    if peer_role == Role::Primary && peer_epoch == our_epoch && our_role == Role::Primary {
        // Both servers claim primary at the same epoch.
        Some((Role::DetectedBrokenConfig, our_epoch))
    } else if peer_role == Role::Primary && peer_epoch > our_epoch {
        // The peer is the rightful primary; adopt its epoch whatever our
        // current role is, so a stale epoch never lingers here.
        Some((Role::Standby, peer_epoch))
    } else if peer_role == Role::DetectedBrokenConfig && peer_epoch >= our_epoch {
        Some((Role::DetectedBrokenConfig, peer_epoch))
    } else {
        None
    }
}

/// Decides the forced demotion, if any, for a request observed by the server
/// interceptor.
pub fn server_demotion(
    our: (Role, Epoch),
    peer: (Role, Epoch),
) -> Option<(Role, Epoch)> {
    let (our_role, our_epoch) = our;
    let (peer_role, peer_epoch) = peer;
    if peer_role != Role::Primary {
        return None;
    }
    if peer_epoch == our_epoch && our_role == Role::Primary {
        Some((Role::DetectedBrokenConfig, our_epoch))
    } else if peer_epoch > our_epoch
        && matches!(our_role, Role::Primary | Role::DetectedBrokenConfig)
    {
        Some((Role::Standby, peer_epoch))
    } else {
        None
    }
}

/// Shared snapshot + callback plumbing for both interceptor sides.
struct InterceptorCore {
    state: Mutex<(Role, Epoch)>,
    force_role: Mutex<Option<ForceRoleFn>>,
}

impl InterceptorCore {
    fn new(role: Role, epoch: Epoch) -> Self {
        Self {
            state: Mutex::new((role, epoch)),
            force_role: Mutex::new(None),
        }
    }

    fn snapshot(&self) -> (Role, Epoch) {
        *self.state.lock()
    }

    fn set(&self, role: Role, epoch: Epoch) {
        *self.state.lock() = (role, epoch);
    }

    fn install(&self, f: ForceRoleFn) {
        *self.force_role.lock() = Some(f);
    }

    /// Invokes the installed callback with no interceptor lock held.
    fn force(&self, role: Role, epoch: Epoch) {
        let cb = self.force_role.lock().clone();
        if let Some(cb) = cb {
            cb(role, epoch);
        }
    }
}

/// Interceptor applied to every outbound replication RPC.
pub struct ClientInterceptor {
    core: InterceptorCore,
}

impl ClientInterceptor {
    pub fn new(role: Role, epoch: Epoch) -> Self {
        Self {
            core: InterceptorCore::new(role, epoch),
        }
    }

    /// Installs the controller's demotion callback.
    pub fn install_force_role(&self, f: ForceRoleFn) {
        self.core.install(f);
    }

    /// Updated by the controller on every transition.
    pub fn set_role_and_epoch(&self, role: Role, epoch: Epoch) {
        self.core.set(role, epoch);
    }

    pub fn role_and_epoch(&self) -> (Role, Epoch) {
        self.core.snapshot()
    }

    /// Gates an outbound replication call: only a primary replicates
    /// outward. Returns the `(role, epoch)` to stamp onto the request.
    pub fn begin_call(&self) -> Result<(Role, Epoch), ClusterError> {
        let (role, epoch) = self.core.snapshot();
        if role != Role::Primary {
            return Err(ClusterError::FailedPrecondition(format!(
                "cannot replicate while role is {role}"
            )));
        }
        Ok((role, epoch))
    }

    /// Inspects a reply's role headers and forces a local demotion when the
    /// peer's assertion wins. `peer` is `None` when the reply carried no
    /// cluster headers; `transport_error` marks failures that say nothing
    /// about the peer's state (no demotion, no logging beyond debug).
    pub fn observe_response(&self, peer: Option<(Role, Epoch)>, transport_error: bool) {
        if transport_error {
            debug!("replication RPC failed in transport; leaving role untouched");
            return;
        }
        let Some(peer) = peer else {
            warn!("replication RPC reply carried no cluster role headers");
            return;
        };
        if let Some((role, epoch)) = client_demotion(self.core.snapshot(), peer) {
            warn!(
                peer_role = %peer.0,
                peer_epoch = peer.1,
                new_role = %role,
                new_epoch = epoch,
                "peer response forces a local role change"
            );
            self.core.force(role, epoch);
        }
    }
}

/// Interceptor applied to every inbound replication RPC.
pub struct ServerInterceptor {
    core: InterceptorCore,
}

impl ServerInterceptor {
    pub fn new(role: Role, epoch: Epoch) -> Self {
        Self {
            core: InterceptorCore::new(role, epoch),
        }
    }

    pub fn install_force_role(&self, f: ForceRoleFn) {
        self.core.install(f);
    }

    pub fn set_role_and_epoch(&self, role: Role, epoch: Epoch) {
        self.core.set(role, epoch);
    }

    /// The `(role, epoch)` to stamp onto every reply, read after any forced
    /// demotion from the request's headers has been applied.
    pub fn role_and_epoch(&self) -> (Role, Epoch) {
        self.core.snapshot()
    }

    /// Inspects a cluster peer's request headers and forces a local
    /// demotion when the peer's assertion wins.
    pub fn observe_request(&self, peer: (Role, Epoch)) {
        if let Some((role, epoch)) = server_demotion(self.core.snapshot(), peer) {
            warn!(
                peer_role = %peer.0,
                peer_epoch = peer.1,
                new_role = %role,
                new_epoch = epoch,
                "peer request forces a local role change"
            );
            self.core.force(role, epoch);
        }
    }

    /// Inbound replication writes are only served while this server is a
    /// standby; a primary or a broken pair refuses them.
    pub fn refuses_inbound(&self) -> bool {
        let (role, _) = self.core.snapshot();
        matches!(role, Role::Primary | Role::DetectedBrokenConfig)
    }
}
