/*
    ForceSyncEngine - local-first force persistence with cloud replication

    Wiring:

        connector ──> TransportChannel ──> CallCorrelator ──┬─> SessionRegistrar
                                                            ├─> ReplicationCoordinator ──> ForceStore
                                                            └─> updatedForce topics

    Writes always hit the local store first; the network copy follows
    through the replication coordinator. Reads race the local store
    against a `getForce` call and keep whichever copy is newer.

    Topic subscriptions are re-sent on every fresh channel epoch, since the
    service forgets them with the connection. A force re-keyed after an
    ownership conflict has its subscription moved to the new id.
*/

use super::errors::{SyncError, SyncResult};
use super::summary::ForceSummary;
use crate::config::SyncConfig;
use crate::metrics::Timer;
use crate::model::{ChangeFeed, Force, ForceHandle, ForceId, ForceSnapshot, WeakForceHandle};
use crate::reconcile::{is_newer, pick_latest, Winner};
use crate::replication::{RekeyEvent, ReplicationCoordinator, ReplicationSettings, SaveTicket};
use crate::rpc::{
    CallCorrelator, InboundMessage, ACTION_DEL_FORCE, ACTION_GET_FORCE, ACTION_LIST_FORCES,
    ACTION_SUBSCRIBE_UPDATES, ACTION_UNSUBSCRIBE_UPDATES, ACTION_UPDATED_FORCE,
};
use crate::session::SessionRegistrar;
use crate::shutdown::LifecycleSignal;
use crate::store::{FileForceStore, ForceStore, MemoryForceStore};
use crate::transport::{
    Backoff, ChannelState, Connector, DisconnectKind, NetworkMonitor, TcpConnector, TransportChannel,
};
use anyhow::Context;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, info, warn};

/// Result of asking the service for one force
enum RemoteLookup {
    Found(ForceSnapshot),
    Missing,
    Unavailable,
}

struct EngineInner {
    config: SyncConfig,
    correlator: Arc<CallCorrelator>,
    registrar: SessionRegistrar,
    store: Arc<dyn ForceStore>,
    replication: ReplicationCoordinator,
    network: NetworkMonitor,
    inbound: Mutex<Option<mpsc::UnboundedReceiver<String>>>,
    tasks: Mutex<Vec<AbortHandle>>,
}

#[derive(Clone)]
pub struct ForceSyncEngine {
    inner: Arc<EngineInner>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ForceSyncEngine {
    pub fn new(
        config: SyncConfig,
        connector: Arc<dyn Connector>,
        store: Arc<dyn ForceStore>,
        network: NetworkMonitor,
    ) -> Self {
        let backoff = Backoff::from_config(&config.reconnect);
        let (channel, inbound) =
            TransportChannel::new(config.server.endpoint.clone(), connector, backoff, network.clone());
        let correlator = Arc::new(CallCorrelator::new(channel, config.rpc.error_action.clone()));
        correlator.set_error_callback(Some(Arc::new(|msg: &InboundMessage| {
            warn!(
                message = msg.str_field("message").unwrap_or("-"),
                "sync service reported an error"
            );
        })));
        let replication = ReplicationCoordinator::new(
            correlator.clone(),
            store.clone(),
            ReplicationSettings::from_config(&config),
        );

        ForceSyncEngine {
            inner: Arc::new(EngineInner {
                config,
                correlator,
                registrar: SessionRegistrar::new(),
                store,
                replication,
                network,
                inbound: Mutex::new(Some(inbound)),
                tasks: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Engine over TCP, with a file store when `store.data_dir` is set
    pub async fn from_config(config: SyncConfig) -> SyncResult<Self> {
        config.validate()?;
        let connector = Arc::new(TcpConnector::new(config.server.connect_timeout));
        let store: Arc<dyn ForceStore> = match &config.store.data_dir {
            Some(dir) => Arc::new(FileForceStore::open(dir.clone()).await?),
            None => Arc::new(MemoryForceStore::new()),
        };
        Ok(Self::new(config, connector, store, NetworkMonitor::default()))
    }

    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    pub fn channel(&self) -> &TransportChannel {
        self.inner.correlator.channel()
    }

    pub fn correlator(&self) -> &Arc<CallCorrelator> {
        &self.inner.correlator
    }

    pub fn replication(&self) -> &ReplicationCoordinator {
        &self.inner.replication
    }

    pub fn store(&self) -> &Arc<dyn ForceStore> {
        &self.inner.store
    }

    pub fn network(&self) -> &NetworkMonitor {
        &self.inner.network
    }

    fn weak(&self) -> Weak<EngineInner> {
        Arc::downgrade(&self.inner)
    }

    /// Remember a background task so teardown can stop it
    fn keep(&self, task: AbortHandle) {
        let mut tasks = lock(&self.inner.tasks);
        tasks.retain(|t| !t.is_finished());
        tasks.push(task);
    }

    /// Open the channel and start the background tasks. Only the first call
    /// has an effect.
    pub fn start(&self) {
        let Some(inbound) = lock(&self.inner.inbound).take() else {
            debug!("engine already started");
            return;
        };

        info!(endpoint = %self.inner.config.server.endpoint, "starting force sync");
        let tasks = [
            self.inner.correlator.spawn_dispatch(inbound),
            self.inner.registrar.spawn(self.inner.correlator.clone()),
            self.channel().watch_network(),
            self.spawn_resubscriber(),
            self.spawn_rekey_follower(),
        ];
        for task in tasks {
            self.keep(task.abort_handle());
        }
        self.channel().connect();
    }

    fn spawn_resubscriber(&self) -> JoinHandle<()> {
        let mut state_rx = self.channel().subscribe_state();
        let correlator = Arc::downgrade(&self.inner.correlator);
        tokio::spawn(async move {
            let mut last_epoch = None;
            loop {
                let state = *state_rx.borrow_and_update();
                if let ChannelState::Open { epoch } = state {
                    let Some(correlator) = correlator.upgrade() else {
                        break;
                    };
                    if last_epoch != Some(epoch) {
                        for topic in correlator.topics() {
                            debug!(instance_id = %topic, epoch, "re-subscribing to force updates");
                            correlator.send(json!({ "action": ACTION_SUBSCRIBE_UPDATES, "instanceId": topic }));
                        }
                    }
                    last_epoch = Some(epoch);
                }
                if state_rx.changed().await.is_err() {
                    break;
                }
            }
        })
    }

    fn spawn_rekey_follower(&self) -> JoinHandle<()> {
        let mut rekeys = self.inner.replication.subscribe_rekeys();
        let engine = self.weak();
        tokio::spawn(async move {
            loop {
                let event = match rekeys.recv().await {
                    Ok(event) => event,
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(missed, "re-key events lagged");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                let Some(inner) = engine.upgrade() else {
                    break;
                };
                ForceSyncEngine { inner }.follow_rekey(event).await;
            }
        })
    }

    /// Move an update subscription from the old instance id to the new one
    async fn follow_rekey(&self, event: RekeyEvent) {
        if !self.unsubscribe_from_updates(&event.previous) {
            return;
        }
        match self.subscribe_to_updates(&event.force).await {
            Ok(()) => info!(
                previous = %event.previous,
                current = %event.current,
                "moved update subscription to re-keyed force"
            ),
            Err(e) => warn!(instance_id = %event.current, error = %e, "failed to re-subscribe re-keyed force"),
        }
    }

    /// Identity announced to the service on every open
    pub fn set_identity(&self, uuid: impl Into<String>) {
        self.inner.registrar.set_identity(Some(uuid.into()));
    }

    pub fn clear_identity(&self) {
        self.inner.registrar.set_identity(None);
    }

    pub fn identity(&self) -> Option<String> {
        self.inner.registrar.identity()
    }

    /// Persist `force` locally, then schedule its remote save.
    /// Assigns the force an instance id if it has none.
    pub async fn save_force(&self, force: &ForceHandle) -> SyncResult<SaveTicket> {
        let snapshot = force.to_snapshot().await;
        self.inner.store.save_force(&snapshot).await?;
        self.inner
            .replication
            .schedule_save(force)
            .await
            .ok_or(SyncError::MissingInstanceId)
    }

    /// Save `force` whenever its edits settle. The task ends when the force
    /// is dropped.
    pub async fn track(&self, force: &ForceHandle) -> JoinHandle<()> {
        let mut feed = {
            let live = force.lock().await;
            ChangeFeed::new(&live, self.inner.config.replication.change_debounce)
        };
        let weak_force = force.downgrade();
        let engine = self.weak();

        let task = tokio::spawn(async move {
            while let Some(revision) = feed.next_debounced().await {
                let (Some(force), Some(inner)) = (weak_force.upgrade(), engine.upgrade()) else {
                    break;
                };
                let engine = ForceSyncEngine { inner };
                match engine.save_force(&force).await {
                    Ok(_) => debug!(revision, "tracked force saved"),
                    Err(e) => warn!(revision, error = %e, "failed to save tracked force"),
                }
            }
        });
        self.keep(task.abort_handle());
        task
    }

    async fn fetch_remote(&self, id: &ForceId) -> RemoteLookup {
        let request = json!({ "action": ACTION_GET_FORCE, "instanceId": id });
        let Some(reply) = self
            .inner
            .correlator
            .send_and_wait(request, self.inner.config.rpc.call_timeout)
            .await
        else {
            return RemoteLookup::Unavailable;
        };

        match reply.data() {
            None => RemoteLookup::Missing,
            Some(data) => match serde_json::from_value::<ForceSnapshot>(data.clone()) {
                Ok(snapshot) => RemoteLookup::Found(snapshot),
                Err(e) => {
                    warn!(instance_id = %id, error = %e, "discarding unreadable remote force");
                    RemoteLookup::Unavailable
                }
            },
        }
    }

    /// Load a force, keeping the newer of the local and remote copies.
    ///
    /// A remote winner replaces the local copy; a local copy newer than the
    /// service's (or one the service lacks) is scheduled for upload if owned.
    pub async fn load_force(&self, id: &ForceId) -> SyncResult<Option<ForceHandle>> {
        let timer = Timer::new("forcesync_load_duration_ms");
        let (local, remote) = tokio::join!(self.inner.store.get_force(id), self.fetch_remote(id));

        let local = local.unwrap_or_else(|e| {
            warn!(instance_id = %id, error = %e, "local copy unreadable");
            None
        });
        let (remote, remote_known) = match remote {
            RemoteLookup::Found(mut snapshot) => {
                snapshot.instance_id.get_or_insert_with(|| id.clone());
                (Some(snapshot), true)
            }
            RemoteLookup::Missing => (None, true),
            RemoteLookup::Unavailable => (None, false),
        };

        let winner = pick_latest(local.as_ref(), remote.as_ref());
        let handle = match (winner, local, remote) {
            (None, _, _) => None,
            (Some(Winner::Remote), _, Some(remote)) => {
                debug!(instance_id = %id, "remote copy is newer");
                self.inner.store.save_force(&remote).await?;
                Some(ForceHandle::new(Force::from_snapshot(remote)?))
            }
            (Some(_), Some(local), remote) => {
                let upload = remote_known
                    && local.owned.unwrap_or(true)
                    && remote.as_ref().map_or(true, |r| is_newer(&local, r));
                let handle = ForceHandle::new(Force::from_snapshot(local)?);
                if upload {
                    debug!(instance_id = %id, "local copy is newer, uploading");
                    self.inner.replication.schedule_save(&handle).await;
                }
                Some(handle)
            }
            (Some(_), None, _) => None,
        };

        timer.stop();
        Ok(handle)
    }

    /// Every known force, local and remote, newest first.
    /// Where both sides hold a force the newer copy describes it.
    pub async fn list_forces(&self) -> SyncResult<Vec<ForceSummary>> {
        let (local, remote) = tokio::join!(self.inner.store.list_forces(), self.fetch_remote_list());
        let local = local?;

        let mut merged: HashMap<ForceId, (ForceSnapshot, bool, bool)> = HashMap::new();
        for snapshot in local {
            if let Some(id) = snapshot.instance_id.clone() {
                merged.insert(id, (snapshot, true, false));
            }
        }
        for snapshot in remote {
            let Some(id) = snapshot.instance_id.clone() else {
                continue;
            };
            match merged.get_mut(&id) {
                Some(entry) => {
                    entry.2 = true;
                    if is_newer(&snapshot, &entry.0) {
                        entry.0 = snapshot;
                    }
                }
                None => {
                    merged.insert(id, (snapshot, false, true));
                }
            }
        }

        let mut summaries: Vec<ForceSummary> = merged
            .values()
            .filter_map(|(snapshot, local, remote)| ForceSummary::from_snapshot(snapshot, *local, *remote))
            .collect();
        summaries.sort_by(|a, b| {
            b.timestamp_millis()
                .cmp(&a.timestamp_millis())
                .then_with(|| a.instance_id.cmp(&b.instance_id))
        });
        Ok(summaries)
    }

    async fn fetch_remote_list(&self) -> Vec<ForceSnapshot> {
        let request = json!({ "action": ACTION_LIST_FORCES });
        let reply = self
            .inner
            .correlator
            .send_and_wait(request, self.inner.config.rpc.call_timeout)
            .await;
        let Some(Value::Array(items)) = reply.as_ref().and_then(InboundMessage::data) else {
            return Vec::new();
        };

        items
            .iter()
            .filter_map(|item| match serde_json::from_value::<ForceSnapshot>(item.clone()) {
                Ok(snapshot) => Some(snapshot),
                Err(e) => {
                    warn!(error = %e, "skipping unreadable entry in remote force list");
                    None
                }
            })
            .collect()
    }

    /// Forget a force everywhere. Returns whether a local copy existed.
    pub async fn delete_force(&self, id: &ForceId) -> SyncResult<bool> {
        self.inner.replication.cancel(id);
        self.unsubscribe_from_updates(id);
        let existed = self.inner.store.delete_force(id).await?;
        self.inner
            .correlator
            .send(json!({ "action": ACTION_DEL_FORCE, "instanceId": id }));
        info!(instance_id = %id, existed, "force deleted");
        Ok(existed)
    }

    /// Merge newer `updatedForce` pushes for this force into the live copy
    pub async fn subscribe_to_updates(&self, force: &ForceHandle) -> SyncResult<()> {
        let id = force.instance_id().await.ok_or(SyncError::MissingInstanceId)?;
        let weak_force = force.downgrade();
        let engine = self.weak();
        let topic = id.clone();

        self.inner
            .correlator
            .subscribe_topic(id.as_str(), ACTION_UPDATED_FORCE, move |msg: &InboundMessage| {
                if msg.str_field("instanceId") != Some(topic.as_str()) {
                    return Ok(());
                }
                let data = msg.data().context("updatedForce without data")?;
                let mut snapshot: ForceSnapshot =
                    serde_json::from_value(data.clone()).context("unreadable updatedForce payload")?;
                snapshot.instance_id.get_or_insert_with(|| topic.clone());

                let (engine, weak_force, topic) = (engine.clone(), weak_force.clone(), topic.clone());
                tokio::spawn(async move {
                    if let Some(inner) = engine.upgrade() {
                        ForceSyncEngine { inner }
                            .apply_remote_update(&topic, weak_force, snapshot)
                            .await;
                    }
                });
                Ok(())
            });

        self.inner
            .correlator
            .send(json!({ "action": ACTION_SUBSCRIBE_UPDATES, "instanceId": id }));
        debug!(instance_id = %id, "subscribed to force updates");
        Ok(())
    }

    async fn apply_remote_update(&self, topic: &ForceId, force: WeakForceHandle, snapshot: ForceSnapshot) {
        let Some(force) = force.upgrade() else {
            self.unsubscribe_from_updates(topic);
            return;
        };

        let merged = {
            let mut live = force.lock().await;
            if live.instance_id() != Some(topic) {
                debug!(instance_id = %topic, "ignoring update for a re-keyed force");
                return;
            }
            if !is_newer(&snapshot, &live.build_snapshot()) {
                debug!(instance_id = %topic, "ignoring stale remote update");
                return;
            }
            if let Err(e) = live.update_from_snapshot(&snapshot) {
                warn!(instance_id = %topic, error = %e, "failed to merge remote update");
                return;
            }
            live.build_snapshot()
        };

        info!(instance_id = %topic, "merged remote update");
        if let Err(e) = self.inner.store.save_force(&merged).await {
            warn!(instance_id = %topic, error = %e, "failed to persist remote update");
        }
    }

    /// Returns whether a subscription existed
    pub fn unsubscribe_from_updates(&self, id: &ForceId) -> bool {
        let existed = self.inner.correlator.unsubscribe_topic(id.as_str());
        if existed {
            self.inner
                .correlator
                .send(json!({ "action": ACTION_UNSUBSCRIBE_UPDATES, "instanceId": id }));
        }
        existed
    }

    /// Copy `force` under fresh identities, then save and replicate the copy
    pub async fn clone_force(&self, force: &ForceHandle) -> SyncResult<(ForceHandle, SaveTicket)> {
        let copy = force.lock().await.clone_with_new_identity()?;
        let handle = ForceHandle::new(copy);
        let ticket = self.save_force(&handle).await?;
        Ok((handle, ticket))
    }

    /// Resolve every pending save now. Returns the number of jobs flushed.
    pub fn flush(&self) -> usize {
        self.inner.replication.flush_all()
    }

    /// Flush, close the channel for good and stop background tasks
    pub async fn teardown(&self) {
        let flushed = self.flush();
        // give the final frames a chance to reach the writer
        tokio::task::yield_now().await;
        self.channel().disconnect(DisconnectKind::Permanent);
        self.inner.correlator.cancel_pending().await;
        for task in lock(&self.inner.tasks).drain(..) {
            task.abort();
        }
        info!(flushed, "force sync stopped");
    }

    /// React to lifecycle signals until teardown
    pub fn watch_lifecycle(&self, mut signals: broadcast::Receiver<LifecycleSignal>) -> JoinHandle<()> {
        let engine = self.weak();
        tokio::spawn(async move {
            loop {
                let signal = match signals.recv().await {
                    Ok(signal) => signal,
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(missed, "lifecycle signals lagged");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                let Some(inner) = engine.upgrade() else {
                    break;
                };
                let engine = ForceSyncEngine { inner };
                match signal {
                    LifecycleSignal::VisibilityHidden => {
                        let flushed = engine.flush();
                        debug!(flushed, "flushed on visibility change");
                    }
                    LifecycleSignal::Teardown => {
                        engine.teardown().await;
                        break;
                    }
                }
            }
        })
    }

    /// Idle wait for tests and the CLI: true once the channel opens
    pub async fn wait_ready(&self, timeout: Duration) -> bool {
        self.channel().wait_ready(timeout).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::replication::SaveOutcome;
    use crate::rpc::{ACTION_REGISTER, ACTION_SAVE_FORCE, CODE_NOT_OWNER};
    use crate::shutdown::LifecycleCoordinator;
    use crate::store::MemoryForceStore;
    use crate::test_utils::{
        assert_completes_within, sample_force, sample_snapshot, FakeServer, DEFAULT_TEST_TIMEOUT,
    };

    fn test_config() -> SyncConfig {
        let mut config = SyncConfig::default();
        config.server.endpoint = "memory://sync".to_string();
        config.reconnect.jitter = 0.0;
        config.replication.save_debounce = Duration::from_millis(200);
        config.replication.change_debounce = Duration::from_millis(100);
        config.rpc.call_timeout = Duration::from_secs(1);
        config.rpc.ready_timeout = Duration::from_millis(500);
        config
    }

    async fn started(server: &FakeServer) -> (ForceSyncEngine, Arc<MemoryForceStore>) {
        let store = Arc::new(MemoryForceStore::new());
        let engine = ForceSyncEngine::new(test_config(), server.connector(), store.clone(), NetworkMonitor::default());
        engine.start();
        assert!(engine.wait_ready(DEFAULT_TEST_TIMEOUT).await);
        (engine, store)
    }

    /// Acknowledge saves, answer getForce/listForces from fixed data
    fn serve(server: &FakeServer, forces: Vec<ForceSnapshot>) {
        server.set_responder(move |msg| {
            let body = match msg["action"].as_str() {
                Some(ACTION_SAVE_FORCE) => json!({}),
                Some(ACTION_GET_FORCE) => {
                    let found = forces
                        .iter()
                        .find(|f| f.instance_id.as_ref().map(ForceId::as_str) == msg["instanceId"].as_str());
                    json!({ "data": found })
                }
                Some(ACTION_LIST_FORCES) => json!({ "data": forces }),
                _ => return vec![],
            };
            vec![FakeServer::reply_to(msg, body)]
        });
    }

    #[tokio::test(start_paused = true)]
    async fn test_registers_identity() {
        let server = FakeServer::start();
        let (engine, _) = started(&server).await;
        engine.set_identity("user-7");

        let registered = server.wait_for_messages(ACTION_REGISTER, 1, DEFAULT_TEST_TIMEOUT).await;
        assert_eq!(registered[0]["uuid"], "user-7");
        assert_eq!(engine.identity().as_deref(), Some("user-7"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_save_is_local_first() {
        let server = FakeServer::start();
        serve(&server, vec![]);
        let (engine, store) = started(&server).await;
        let handle = ForceHandle::new(sample_force("Assault Lance"));

        let ticket = engine.save_force(&handle).await.unwrap();
        let id = handle.instance_id().await.unwrap();
        assert!(store.get_force(&id).await.unwrap().is_some());
        assert!(server.received_action(ACTION_SAVE_FORCE).is_empty());

        assert_eq!(ticket.wait().await, SaveOutcome::Replicated);
        assert_eq!(server.received_action(ACTION_SAVE_FORCE).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_load_prefers_newer_remote() {
        let server = FakeServer::start();
        let mut remote = sample_snapshot("f1", "2024-06-01T00:00:00.000Z");
        remote.name = "Remote".to_string();
        serve(&server, vec![remote]);
        let (engine, store) = started(&server).await;
        store.save_force(&sample_snapshot("f1", "2024-01-01T00:00:00.000Z")).await.unwrap();

        let id = ForceId::new("f1");
        let handle = engine.load_force(&id).await.unwrap().unwrap();
        assert_eq!(handle.lock().await.name(), "Remote");
        assert_eq!(store.get_force(&id).await.unwrap().unwrap().name, "Remote");
    }

    #[tokio::test(start_paused = true)]
    async fn test_load_uploads_newer_local() {
        let server = FakeServer::start();
        serve(&server, vec![sample_snapshot("f1", "2024-01-01T00:00:00.000Z")]);
        let (engine, store) = started(&server).await;
        store.save_force(&sample_snapshot("f1", "2024-06-01T00:00:00.000Z")).await.unwrap();

        let handle = engine.load_force(&ForceId::new("f1")).await.unwrap().unwrap();
        assert_eq!(handle.lock().await.timestamp_millis(), 1_717_200_000_000);

        let saves = server.wait_for_messages(ACTION_SAVE_FORCE, 1, DEFAULT_TEST_TIMEOUT).await;
        assert_eq!(saves.len(), 1);
        assert_eq!(saves[0]["data"]["instanceId"], "f1");
    }

    #[tokio::test(start_paused = true)]
    async fn test_load_offline_keeps_local_without_upload() {
        let server = FakeServer::start();
        let (engine, store) = started(&server).await;
        store.save_force(&sample_snapshot("f1", "2024-06-01T00:00:00.000Z")).await.unwrap();

        let handle = engine.load_force(&ForceId::new("f1")).await.unwrap();
        assert!(handle.is_some());
        assert!(engine.replication().pending_jobs().is_empty());
        assert!(engine.load_force(&ForceId::new("nope")).await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_list_merges_newest_first() {
        let server = FakeServer::start();
        serve(
            &server,
            vec![
                sample_snapshot("a", "2024-02-01T00:00:00.000Z"),
                sample_snapshot("c", "2023-01-01T00:00:00.000Z"),
            ],
        );
        let (engine, store) = started(&server).await;
        store.save_force(&sample_snapshot("a", "2024-01-01T00:00:00.000Z")).await.unwrap();
        store.save_force(&sample_snapshot("b", "2024-03-01T00:00:00.000Z")).await.unwrap();

        let list = engine.list_forces().await.unwrap();
        let ids: Vec<&str> = list.iter().map(|s| s.instance_id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a", "c"]);

        let a = &list[1];
        assert!(a.local && a.remote);
        assert_eq!(a.timestamp.as_deref(), Some("2024-02-01T00:00:00.000Z"));
        assert!(list[0].local && !list[0].remote);
        assert!(!list[2].local && list[2].remote);
    }

    #[tokio::test(start_paused = true)]
    async fn test_remote_updates_merge_when_newer() {
        let server = FakeServer::start();
        serve(&server, vec![]);
        let (engine, store) = started(&server).await;
        let handle = ForceHandle::new(sample_force("Live"));
        engine.save_force(&handle).await.unwrap().wait().await;
        engine.subscribe_to_updates(&handle).await.unwrap();
        let id = handle.instance_id().await.unwrap();

        let subscribed = server
            .wait_for_messages(ACTION_SUBSCRIBE_UPDATES, 1, DEFAULT_TEST_TIMEOUT)
            .await;
        assert_eq!(subscribed[0]["instanceId"], id.as_str());

        let mut stale = handle.lock().await.build_snapshot();
        stale.name = "Stale".to_string();
        stale.timestamp = Some("2000-01-01T00:00:00.000Z".to_string());
        server.push(json!({ "action": ACTION_UPDATED_FORCE, "instanceId": id, "data": stale }));

        let mut fresh = handle.lock().await.build_snapshot();
        fresh.name = "Renamed elsewhere".to_string();
        fresh.timestamp = Some("2099-01-01T00:00:00.000Z".to_string());
        server.push(json!({ "action": ACTION_UPDATED_FORCE, "instanceId": "other", "data": fresh }));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(handle.lock().await.name(), "Live");

        server.push(json!({ "action": ACTION_UPDATED_FORCE, "instanceId": id, "data": fresh }));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(handle.lock().await.name(), "Renamed elsewhere");
        assert_eq!(store.get_force(&id).await.unwrap().unwrap().name, "Renamed elsewhere");

        assert!(engine.unsubscribe_from_updates(&id));
        assert!(!engine.unsubscribe_from_updates(&id));
        let unsubscribed = server
            .wait_for_messages(ACTION_UNSUBSCRIBE_UPDATES, 1, DEFAULT_TEST_TIMEOUT)
            .await;
        assert_eq!(unsubscribed.len(), 1);
        assert_eq!(unsubscribed[0]["instanceId"], json!(id));
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscription_follows_rekeyed_force() {
        let server = FakeServer::start();
        let (engine, store) = started(&server).await;
        let handle = ForceHandle::new(sample_force("Forked"));
        engine.save_force(&handle).await.unwrap();
        let original = handle.instance_id().await.unwrap();
        engine.replication().cancel(&original);
        tokio::time::sleep(Duration::from_millis(10)).await;
        engine.subscribe_to_updates(&handle).await.unwrap();

        let conflicting = original.as_str().to_string();
        server.set_responder(move |msg| {
            if msg["action"] != ACTION_SAVE_FORCE {
                return vec![];
            }
            let body = if msg["data"]["instanceId"] == Value::String(conflicting.clone()) {
                json!({ "code": CODE_NOT_OWNER })
            } else {
                json!({})
            };
            vec![FakeServer::reply_to(msg, body)]
        });

        let outcome = engine.save_force(&handle).await.unwrap().wait().await;
        let current = handle.instance_id().await.unwrap();
        assert!(matches!(outcome, SaveOutcome::Rekeyed { .. }));
        assert_ne!(current, original);

        let unsubscribed = server
            .wait_for_messages(ACTION_UNSUBSCRIBE_UPDATES, 1, DEFAULT_TEST_TIMEOUT)
            .await;
        assert_eq!(unsubscribed[0]["instanceId"], original.as_str());
        let subscribed = server
            .wait_for_messages(ACTION_SUBSCRIBE_UPDATES, 2, DEFAULT_TEST_TIMEOUT)
            .await;
        assert_eq!(subscribed.last().unwrap()["instanceId"], current.as_str());
        let mut topics = engine.correlator().topics();
        topics.sort();
        assert_eq!(topics, vec![current.as_str().to_string()]);

        let mut fresh = handle.lock().await.build_snapshot();
        fresh.name = "Renamed by the new owner".to_string();
        fresh.timestamp = Some("2099-01-01T00:00:00.000Z".to_string());
        server.push(json!({ "action": ACTION_UPDATED_FORCE, "instanceId": current, "data": fresh }));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(handle.lock().await.name(), "Renamed by the new owner");
        assert_eq!(store.get_force(&current).await.unwrap().unwrap().name, "Renamed by the new owner");
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscriptions_survive_reconnect() {
        let server = FakeServer::start();
        serve(&server, vec![]);
        let (engine, _) = started(&server).await;
        let handle = ForceHandle::new(sample_force("Sticky"));
        engine.save_force(&handle).await.unwrap();
        // let the re-subscriber observe the first epoch
        tokio::time::sleep(Duration::from_millis(10)).await;
        engine.subscribe_to_updates(&handle).await.unwrap();
        server
            .wait_for_messages(ACTION_SUBSCRIBE_UPDATES, 1, DEFAULT_TEST_TIMEOUT)
            .await;

        server.drop_connection();
        let resent = server
            .wait_for_messages(ACTION_SUBSCRIBE_UPDATES, 2, DEFAULT_TEST_TIMEOUT)
            .await;
        assert_eq!(resent.len(), 2);
        assert_eq!(server.connection_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_force() {
        let server = FakeServer::start();
        serve(&server, vec![]);
        let (engine, store) = started(&server).await;
        let handle = ForceHandle::new(sample_force("Doomed"));
        let ticket = engine.save_force(&handle).await.unwrap();
        engine.subscribe_to_updates(&handle).await.unwrap();
        let id = handle.instance_id().await.unwrap();

        assert!(engine.delete_force(&id).await.unwrap());
        assert_eq!(ticket.wait().await, SaveOutcome::LocalOnly);
        assert!(store.get_force(&id).await.unwrap().is_none());
        assert!(engine.correlator().topics().is_empty());

        let deleted = server.wait_for_messages(ACTION_DEL_FORCE, 1, DEFAULT_TEST_TIMEOUT).await;
        assert_eq!(deleted[0]["instanceId"], id.as_str());
        assert!(!engine.delete_force(&id).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_clone_force() {
        let server = FakeServer::start();
        serve(&server, vec![]);
        let (engine, store) = started(&server).await;
        let source = ForceHandle::new(sample_force("Original"));
        engine.save_force(&source).await.unwrap();

        let (copy, ticket) = engine.clone_force(&source).await.unwrap();
        assert_eq!(ticket.wait().await, SaveOutcome::Replicated);

        let source_id = source.instance_id().await.unwrap();
        let copy_id = copy.instance_id().await.unwrap();
        assert_ne!(source_id, copy_id);
        assert_eq!(store.len(), 2);
        assert_eq!(copy.lock().await.name(), "Original");
    }

    #[tokio::test(start_paused = true)]
    async fn test_tracked_edits_are_saved() {
        let server = FakeServer::start();
        serve(&server, vec![]);
        let (engine, store) = started(&server).await;
        let handle = ForceHandle::new(sample_force("Tracked"));
        let tracker = engine.track(&handle).await;

        for i in 0..3 {
            handle.lock().await.set_name(format!("Tracked {}", i));
        }
        let saves = server.wait_for_messages(ACTION_SAVE_FORCE, 1, DEFAULT_TEST_TIMEOUT).await;
        assert_eq!(saves.len(), 1);
        assert_eq!(saves[0]["data"]["name"], "Tracked 2");
        let id = handle.instance_id().await.unwrap();
        assert!(store.get_force(&id).await.unwrap().is_some());

        drop(handle);
        assert_completes_within(DEFAULT_TEST_TIMEOUT, tracker).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_lifecycle_teardown_flushes() {
        let server = FakeServer::start();
        let (engine, _) = started(&server).await;
        let lifecycle = LifecycleCoordinator::new();
        let watcher = engine.watch_lifecycle(lifecycle.subscribe());

        let handle = ForceHandle::new(sample_force("Last Stand"));
        let ticket = engine.save_force(&handle).await.unwrap();

        lifecycle.teardown().await;
        assert_completes_within(DEFAULT_TEST_TIMEOUT, watcher).await.unwrap();
        assert_eq!(ticket.wait().await, SaveOutcome::Flushed);
        assert_eq!(engine.channel().state(), ChannelState::Closed);
        assert!(engine.replication().pending_jobs().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_visibility_hidden_flushes_but_keeps_running() {
        let server = FakeServer::start();
        let (engine, _) = started(&server).await;
        let lifecycle = LifecycleCoordinator::new();
        let _watcher = engine.watch_lifecycle(lifecycle.subscribe());

        let ticket = engine
            .save_force(&ForceHandle::new(sample_force("Backgrounded")))
            .await
            .unwrap();
        lifecycle.notify_hidden().await;
        assert_eq!(ticket.wait().await, SaveOutcome::Flushed);
        assert!(engine.channel().is_open());
        server.wait_for_messages(ACTION_SAVE_FORCE, 1, DEFAULT_TEST_TIMEOUT).await;
    }
}
