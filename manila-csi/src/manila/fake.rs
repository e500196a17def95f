//! In-memory backend used by unit tests.
//!
//! Status transitions are scripted: every newly created (or extended) resource
//! is given a queue of statuses, and each lookup by ID pops the next one.  An
//! empty queue leaves the resource where it is, which is how tests model a
//! resource stuck in a transient state.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::*;

/// Number of backend calls made, per operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Calls {
    pub create_share: usize,
    pub delete_share: usize,
    pub extend_share: usize,
    pub get_access_rights: usize,
    pub grant_access: usize,
    pub get_export_locations: usize,
    pub create_snapshot: usize,
    pub delete_snapshot: usize,
}

struct State {
    next_id: u64,
    shares: HashMap<String, Share>,
    share_scripts: HashMap<String, VecDeque<ShareStatus>>,
    snapshots: HashMap<String, Snapshot>,
    snapshot_scripts: HashMap<String, VecDeque<SnapshotStatus>>,
    access: HashMap<String, Vec<AccessRight>>,
    pending_keys: HashMap<String, usize>,
    export_locations: HashMap<String, Vec<ExportLocation>>,
    messages: HashMap<String, UserMessage>,
    create_script: Vec<ShareStatus>,
    extend_script: Vec<ShareStatus>,
    snapshot_script: Vec<SnapshotStatus>,
    error_detail: Option<String>,
    key_delay: usize,
    calls: Calls,
}

pub(crate) struct FakeManila {
    state: Mutex<State>,
}

impl FakeManila {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(State {
                next_id: 0,
                shares: HashMap::new(),
                share_scripts: HashMap::new(),
                snapshots: HashMap::new(),
                snapshot_scripts: HashMap::new(),
                access: HashMap::new(),
                pending_keys: HashMap::new(),
                export_locations: HashMap::new(),
                messages: HashMap::new(),
                create_script: vec![ShareStatus::Available],
                extend_script: vec![ShareStatus::Available],
                snapshot_script: vec![SnapshotStatus::Available],
                error_detail: None,
                key_delay: 0,
                calls: Calls::default(),
            }),
        }
    }

    /// Statuses a new share walks through on successive lookups.
    pub(crate) fn set_create_script(&self, script: Vec<ShareStatus>) {
        self.state.lock().create_script = script;
    }

    pub(crate) fn set_extend_script(&self, script: Vec<ShareStatus>) {
        self.state.lock().extend_script = script;
    }

    pub(crate) fn set_snapshot_script(&self, script: Vec<SnapshotStatus>) {
        self.state.lock().snapshot_script = script;
    }

    /// Record a user message with `detail_id` whenever a resource enters an
    /// error state.
    pub(crate) fn set_error_detail(&self, detail_id: &str) {
        self.state.lock().error_detail = Some(detail_id.to_owned());
    }

    /// Number of access-rule listings before a keyed credential gets its key.
    pub(crate) fn set_key_delay(&self, listings: usize) {
        self.state.lock().key_delay = listings;
    }

    pub(crate) fn set_export_locations(&self, share_id: &str, locations: Vec<ExportLocation>) {
        self.state
            .lock()
            .export_locations
            .insert(share_id.to_owned(), locations);
    }

    pub(crate) fn insert_share(&self, share: Share) {
        let mut state = self.state.lock();
        let locations = default_export_locations(&share);
        state
            .export_locations
            .entry(share.id.clone())
            .or_insert(locations);
        state.shares.insert(share.id.clone(), share);
    }

    pub(crate) fn insert_snapshot(&self, snapshot: Snapshot) {
        self.state
            .lock()
            .snapshots
            .insert(snapshot.id.clone(), snapshot);
    }

    pub(crate) fn insert_access_right(&self, right: AccessRight) {
        self.state
            .lock()
            .access
            .entry(right.share_id.clone())
            .or_default()
            .push(right);
    }

    pub(crate) fn share(&self, share_id: &str) -> Option<Share> {
        self.state.lock().shares.get(share_id).cloned()
    }

    pub(crate) fn share_count(&self) -> usize {
        self.state.lock().shares.len()
    }

    pub(crate) fn snapshot(&self, snapshot_id: &str) -> Option<Snapshot> {
        self.state.lock().snapshots.get(snapshot_id).cloned()
    }

    pub(crate) fn calls(&self) -> Calls {
        self.state.lock().calls
    }
}

impl State {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}-{}", self.next_id)
    }

    fn record_error(&mut self, resource_id: &str) {
        if let Some(detail_id) = self.error_detail.clone() {
            let id = self.next_id("message");
            self.messages.insert(
                resource_id.to_owned(),
                UserMessage {
                    id,
                    resource_id: resource_id.to_owned(),
                    detail_id,
                    user_message: format!("allocate host: no valid host for {resource_id}"),
                    created_at: None,
                },
            );
        }
    }
}

fn default_export_locations(share: &Share) -> Vec<ExportLocation> {
    let path = if share.share_proto.eq_ignore_ascii_case("CEPHFS") {
        format!(
            "192.168.1.1:6789,192.168.1.2:6789:/volumes/_nogroup/{}",
            share.id
        )
    } else {
        format!("10.0.0.1:/shares/{}", share.id)
    };
    vec![ExportLocation {
        id: format!("{}-el", share.id),
        path,
        share_instance_id: share.id.clone(),
        is_admin_only: false,
        preferred: false,
    }]
}

#[async_trait]
impl ManilaClient for FakeManila {
    async fn get_share_by_id(&self, share_id: &str) -> Result<Share, ClientError> {
        let mut state = self.state.lock();
        let next = state
            .share_scripts
            .get_mut(share_id)
            .and_then(VecDeque::pop_front);
        let Some(share) = state.shares.get_mut(share_id) else {
            return Err(ClientError::NotFound(format!("share {share_id}")));
        };
        if let Some(status) = next {
            share.status = status;
        }
        let share = share.clone();
        if next.is_some_and(|s| s.is_error()) {
            state.record_error(share_id);
        }
        Ok(share)
    }

    async fn get_share_by_name(&self, name: &str) -> Result<Share, ClientError> {
        self.state
            .lock()
            .shares
            .values()
            .find(|s| s.name == name)
            .cloned()
            .ok_or_else(|| ClientError::NotFound(format!("share named {name}")))
    }

    async fn create_share(&self, opts: &CreateShareOpts) -> Result<Share, ClientError> {
        let mut state = self.state.lock();
        state.calls.create_share += 1;
        let id = state.next_id("share");
        let share = Share {
            id: id.clone(),
            name: opts.name.clone(),
            status: if opts.snapshot_id.is_some() {
                ShareStatus::CreatingFromSnapshot
            } else {
                ShareStatus::Creating
            },
            size: opts.size,
            share_proto: opts.share_proto.clone(),
            share_type_name: opts.share_type.clone(),
            share_network_id: opts.share_network_id.clone(),
            availability_zone: opts.availability_zone.clone(),
            metadata: opts.metadata.clone(),
            snapshot_id: opts.snapshot_id.clone(),
            snapshot_support: true,
            create_share_from_snapshot_support: true,
        };
        let script = state.create_script.iter().copied().collect();
        state.share_scripts.insert(id.clone(), script);
        state
            .export_locations
            .insert(id.clone(), default_export_locations(&share));
        state.shares.insert(id, share.clone());
        Ok(share)
    }

    async fn delete_share(&self, share_id: &str) -> Result<(), ClientError> {
        let mut state = self.state.lock();
        state.calls.delete_share += 1;
        state.share_scripts.remove(share_id);
        state.access.remove(share_id);
        state
            .shares
            .remove(share_id)
            .map(|_| ())
            .ok_or_else(|| ClientError::NotFound(format!("share {share_id}")))
    }

    async fn extend_share(&self, share_id: &str, new_size: i64) -> Result<(), ClientError> {
        let mut state = self.state.lock();
        state.calls.extend_share += 1;
        let script: VecDeque<ShareStatus> = state.extend_script.iter().copied().collect();
        let Some(share) = state.shares.get_mut(share_id) else {
            return Err(ClientError::NotFound(format!("share {share_id}")));
        };
        share.status = ShareStatus::Extending;
        share.size = new_size;
        state.share_scripts.insert(share_id.to_owned(), script);
        Ok(())
    }

    async fn get_export_locations(
        &self,
        share_id: &str,
    ) -> Result<Vec<ExportLocation>, ClientError> {
        let mut state = self.state.lock();
        state.calls.get_export_locations += 1;
        Ok(state
            .export_locations
            .get(share_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn get_access_rights(&self, share_id: &str) -> Result<Vec<AccessRight>, ClientError> {
        let mut state = self.state.lock();
        state.calls.get_access_rights += 1;

        let mut ready = Vec::new();
        for (id, remaining) in state.pending_keys.iter_mut() {
            if *remaining == 0 {
                ready.push(id.clone());
            } else {
                *remaining -= 1;
            }
        }
        for id in ready {
            state.pending_keys.remove(&id);
            for right in state.access.values_mut().flatten() {
                if right.id == id {
                    right.access_key = Some(format!("AQD-key-{id}"));
                }
            }
        }

        Ok(state.access.get(share_id).cloned().unwrap_or_default())
    }

    async fn grant_access(
        &self,
        share_id: &str,
        opts: &GrantAccessOpts,
    ) -> Result<AccessRight, ClientError> {
        let mut state = self.state.lock();
        state.calls.grant_access += 1;
        if !state.shares.contains_key(share_id) {
            return Err(ClientError::NotFound(format!("share {share_id}")));
        }
        let id = state.next_id("access");
        let right = AccessRight {
            id: id.clone(),
            share_id: share_id.to_owned(),
            access_type: opts.access_type,
            access_to: opts.access_to.clone(),
            access_level: opts.access_level,
            access_key: None,
        };
        if opts.access_type == AccessType::Cephx {
            let delay = state.key_delay;
            state.pending_keys.insert(id, delay);
        }
        state
            .access
            .entry(share_id.to_owned())
            .or_default()
            .push(right.clone());
        Ok(right)
    }

    async fn get_snapshot_by_id(&self, snapshot_id: &str) -> Result<Snapshot, ClientError> {
        let mut state = self.state.lock();
        let next = state
            .snapshot_scripts
            .get_mut(snapshot_id)
            .and_then(VecDeque::pop_front);
        let Some(snapshot) = state.snapshots.get_mut(snapshot_id) else {
            return Err(ClientError::NotFound(format!("snapshot {snapshot_id}")));
        };
        if let Some(status) = next {
            snapshot.status = status;
        }
        let snapshot = snapshot.clone();
        if next.is_some_and(|s| s.is_error()) {
            state.record_error(snapshot_id);
        }
        Ok(snapshot)
    }

    async fn get_snapshot_by_name(&self, name: &str) -> Result<Snapshot, ClientError> {
        self.state
            .lock()
            .snapshots
            .values()
            .find(|s| s.name == name)
            .cloned()
            .ok_or_else(|| ClientError::NotFound(format!("snapshot named {name}")))
    }

    async fn create_snapshot(&self, opts: &CreateSnapshotOpts) -> Result<Snapshot, ClientError> {
        let mut state = self.state.lock();
        state.calls.create_snapshot += 1;
        let Some(share) = state.shares.get(&opts.share_id).cloned() else {
            return Err(ClientError::NotFound(format!("share {}", opts.share_id)));
        };
        let id = state.next_id("snapshot");
        let snapshot = Snapshot {
            id: id.clone(),
            name: opts.name.clone(),
            share_id: share.id,
            share_proto: share.share_proto,
            status: SnapshotStatus::Creating,
            size: share.size,
            created_at: Some("2024-05-01T10:00:00.000000".to_owned()),
        };
        let script = state.snapshot_script.iter().copied().collect();
        state.snapshot_scripts.insert(id.clone(), script);
        state.snapshots.insert(id, snapshot.clone());
        Ok(snapshot)
    }

    async fn delete_snapshot(&self, snapshot_id: &str) -> Result<(), ClientError> {
        let mut state = self.state.lock();
        state.calls.delete_snapshot += 1;
        state.snapshot_scripts.remove(snapshot_id);
        state
            .snapshots
            .remove(snapshot_id)
            .map(|_| ())
            .ok_or_else(|| ClientError::NotFound(format!("snapshot {snapshot_id}")))
    }

    async fn get_last_error_message(
        &self,
        resource_id: &str,
    ) -> Result<Option<UserMessage>, ClientError> {
        Ok(self.state.lock().messages.get(resource_id).cloned())
    }
}

/// Hands out the same fake backend regardless of secrets.
pub(crate) struct FakeBuilder(pub Arc<FakeManila>);

#[async_trait]
impl ClientBuilder for FakeBuilder {
    async fn build(
        &self,
        secrets: &HashMap<String, String>,
    ) -> Result<Arc<dyn ManilaClient>, ClientError> {
        if secrets.get("os-password").is_some_and(|p| p == "wrong") {
            return Err(ClientError::Request("authentication failed".into()));
        }
        Ok(self.0.clone())
    }
}

/// A share in the `available` state, for tests that start from an existing
/// resource.
pub(crate) fn available_share(id: &str, name: &str, proto: &str) -> Share {
    Share {
        id: id.to_owned(),
        name: name.to_owned(),
        status: ShareStatus::Available,
        size: 1,
        share_proto: proto.to_owned(),
        share_type_name: "default".to_owned(),
        share_network_id: None,
        availability_zone: Some("nova".to_owned()),
        metadata: HashMap::new(),
        snapshot_id: None,
        snapshot_support: true,
        create_share_from_snapshot_support: true,
    }
}
