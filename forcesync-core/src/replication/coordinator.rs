/*
    ReplicationCoordinator - debounced, coalesced remote saves

    At most one job exists per instance id. A job holds the latest force
    handle, its debounce timer and everyone waiting for the outcome.

    schedule_save(force):
        - no instance id yet: nothing to do, returns None
        - job exists: swap in the new handle, append the waiter, re-arm timer
        - otherwise: new job with a fresh timer

    flush (timer fired):
        1. remove the job first, so a mutation arriving mid-flush starts a
           new job instead of being absorbed by the one in flight
        2. bounded wait for the channel; not ready -> LocalOnly
        3. duplicate group/unit ids -> Rejected, nothing is sent
        4. saveForce round trip; no reply -> LocalOnly
        5. `not_owner` reply -> re-key and re-issue (see recover_ownership)
        6. otherwise -> Replicated (Rekeyed for waiters of a re-keyed save)

    Every re-key is announced on a broadcast channel (subscribe_rekeys) so
    listeners keyed by the old id can follow the force.

    flush_all (teardown): cancel every timer, write each job's final state
    only if the channel is open right now, resolve every waiter with Flushed.

    Every waiter is resolved exactly once on every path.
*/

use crate::config::SyncConfig;
use crate::model::{ForceHandle, ForceId, ForceSnapshot};
use crate::reconcile::find_duplicate_ids;
use crate::rpc::{CallCorrelator, ACTION_SAVE_FORCE};
use crate::store::ForceStore;
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, oneshot};
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

/// How a scheduled save ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    /// The service acknowledged the write
    Replicated,
    /// Service unreachable or silent; the local copy stands
    LocalOnly,
    /// Written under a new instance id after an ownership conflict
    Rekeyed { previous: ForceId, current: ForceId },
    /// Not sent because the snapshot failed validation
    Rejected(String),
    /// Resolved by a teardown flush
    Flushed,
}

impl SaveOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            SaveOutcome::Replicated => "replicated",
            SaveOutcome::LocalOnly => "local_only",
            SaveOutcome::Rekeyed { .. } => "rekeyed",
            SaveOutcome::Rejected(_) => "rejected",
            SaveOutcome::Flushed => "flushed",
        }
    }
}

/// A force took a new instance id after an ownership conflict
#[derive(Debug, Clone)]
pub struct RekeyEvent {
    pub previous: ForceId,
    pub current: ForceId,
    pub force: ForceHandle,
}

const REKEY_CHANNEL_CAPACITY: usize = 64;

/// Completion handle for one `schedule_save` call
#[derive(Debug)]
pub struct SaveTicket {
    rx: oneshot::Receiver<SaveOutcome>,
}

impl SaveTicket {
    pub async fn wait(self) -> SaveOutcome {
        self.rx.await.unwrap_or(SaveOutcome::LocalOnly)
    }
}

#[derive(Debug, Clone)]
pub struct ReplicationSettings {
    pub debounce: Duration,
    pub ready_timeout: Duration,
    pub call_timeout: Duration,
}

impl ReplicationSettings {
    pub fn from_config(config: &SyncConfig) -> Self {
        ReplicationSettings {
            debounce: config.replication.save_debounce,
            ready_timeout: config.rpc.ready_timeout,
            call_timeout: config.rpc.call_timeout,
        }
    }
}

impl Default for ReplicationSettings {
    fn default() -> Self {
        ReplicationSettings::from_config(&SyncConfig::default())
    }
}

struct Waiter {
    tx: oneshot::Sender<SaveOutcome>,
    rekeyed_from: Option<ForceId>,
}

struct ReplicationJob {
    force: ForceHandle,
    token: u64,
    timer: AbortHandle,
    waiters: Vec<Waiter>,
    rekey_attempted: bool,
}

struct CoordinatorInner {
    correlator: Arc<CallCorrelator>,
    store: Arc<dyn ForceStore>,
    settings: ReplicationSettings,
    jobs: Mutex<HashMap<ForceId, ReplicationJob>>,
    next_token: AtomicU64,
    rekeys: broadcast::Sender<RekeyEvent>,
}

#[derive(Clone)]
pub struct ReplicationCoordinator {
    inner: Arc<CoordinatorInner>,
}

fn resolve(waiters: Vec<Waiter>, outcome: SaveOutcome) {
    crate::metrics::record_save_outcome(outcome.label(), waiters.len());
    for waiter in waiters {
        let _ = waiter.tx.send(outcome.clone());
    }
}

fn resolve_replicated(waiters: Vec<Waiter>, current: &ForceId) {
    crate::metrics::record_save_outcome(SaveOutcome::Replicated.label(), waiters.len());
    for waiter in waiters {
        let outcome = match waiter.rekeyed_from {
            Some(previous) => SaveOutcome::Rekeyed {
                previous,
                current: current.clone(),
            },
            None => SaveOutcome::Replicated,
        };
        let _ = waiter.tx.send(outcome);
    }
}

impl ReplicationCoordinator {
    pub fn new(
        correlator: Arc<CallCorrelator>,
        store: Arc<dyn ForceStore>,
        settings: ReplicationSettings,
    ) -> Self {
        let (rekeys, _) = broadcast::channel(REKEY_CHANNEL_CAPACITY);
        ReplicationCoordinator {
            inner: Arc::new(CoordinatorInner {
                correlator,
                store,
                settings,
                jobs: Mutex::new(HashMap::new()),
                next_token: AtomicU64::new(1),
                rekeys,
            }),
        }
    }

    /// Receive every re-key performed from now on
    pub fn subscribe_rekeys(&self) -> broadcast::Receiver<RekeyEvent> {
        self.inner.rekeys.subscribe()
    }

    fn jobs(&self) -> MutexGuard<'_, HashMap<ForceId, ReplicationJob>> {
        self.inner.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Schedule a remote save of `force`. Returns `None` when the force
    /// has no instance id yet.
    pub async fn schedule_save(&self, force: &ForceHandle) -> Option<SaveTicket> {
        let id = force.instance_id().await?;
        let (tx, rx) = oneshot::channel();
        let waiter = Waiter {
            tx,
            rekeyed_from: None,
        };
        self.enqueue(id, force.clone(), vec![waiter], false, self.inner.settings.debounce);
        Some(SaveTicket { rx })
    }

    fn enqueue(
        &self,
        id: ForceId,
        force: ForceHandle,
        waiters: Vec<Waiter>,
        rekey_attempted: bool,
        delay: Duration,
    ) {
        let token = self.inner.next_token.fetch_add(1, Ordering::SeqCst);
        let mut jobs = self.jobs();
        let timer = self.arm_timer(id.clone(), token, delay);

        match jobs.get_mut(&id) {
            Some(job) => {
                job.timer.abort();
                job.timer = timer;
                job.token = token;
                job.force = force;
                job.waiters.extend(waiters);
                job.rekey_attempted |= rekey_attempted;
                debug!(instance_id = %id, waiters = job.waiters.len(), "save coalesced");
                crate::metrics::record_coalesced_save();
            }
            None => {
                debug!(instance_id = %id, delay_ms = delay.as_millis() as u64, "save scheduled");
                jobs.insert(
                    id,
                    ReplicationJob {
                        force,
                        token,
                        timer,
                        waiters,
                        rekey_attempted,
                    },
                );
            }
        }
    }

    fn arm_timer(&self, id: ForceId, token: u64, delay: Duration) -> AbortHandle {
        let this = self.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            this.flush_job(id, token).await;
        });
        task.abort_handle()
    }

    async fn flush_job(&self, id: ForceId, token: u64) {
        let job = {
            let mut jobs = self.jobs();
            // a newer schedule re-armed the timer; that one will flush
            if jobs.get(&id).is_some_and(|job| job.token == token) {
                jobs.remove(&id)
            } else {
                None
            }
        };
        let Some(job) = job else {
            return;
        };

        let started = Instant::now();
        self.replicate(id, job).await;
        crate::metrics::record_flush_duration(started.elapsed());
    }

    async fn replicate(&self, id: ForceId, job: ReplicationJob) {
        let ReplicationJob {
            force,
            waiters,
            rekey_attempted,
            ..
        } = job;

        let channel = self.inner.correlator.channel();
        if !channel.wait_ready(self.inner.settings.ready_timeout).await {
            debug!(instance_id = %id, "channel not ready, keeping local copy only");
            resolve(waiters, SaveOutcome::LocalOnly);
            return;
        }

        let snapshot = force.lock().await.build_snapshot();
        let Some(current_id) = snapshot.instance_id.clone() else {
            resolve(waiters, SaveOutcome::LocalOnly);
            return;
        };

        if let Err(reason) = validate(&snapshot) {
            warn!(instance_id = %current_id, %reason, "refusing to replicate force");
            resolve(waiters, SaveOutcome::Rejected(reason));
            return;
        }

        let payload = json!({ "action": ACTION_SAVE_FORCE, "data": snapshot });
        let reply = self
            .inner
            .correlator
            .send_and_wait(payload, self.inner.settings.call_timeout)
            .await;

        match reply {
            None => {
                debug!(instance_id = %current_id, "no reply to saveForce");
                resolve(waiters, SaveOutcome::LocalOnly);
            }
            Some(reply) if reply.is_not_owner() => {
                if rekey_attempted {
                    warn!(instance_id = %current_id, "ownership conflict persists after re-key");
                    resolve(waiters, SaveOutcome::Rejected("not owner".to_string()));
                } else {
                    self.recover_ownership(current_id, force, waiters).await;
                }
            }
            Some(reply) => match reply.code() {
                Some(code) => {
                    warn!(instance_id = %current_id, code, "saveForce refused");
                    resolve(waiters, SaveOutcome::LocalOnly);
                }
                None => {
                    debug!(instance_id = %current_id, "force replicated");
                    resolve_replicated(waiters, &current_id);
                }
            },
        }
    }

    /// Give the force a fresh identity and save it again under that id.
    /// The id only changes if the force still carries the conflicting id,
    /// so a second conflict report for the same id does not re-key twice.
    async fn recover_ownership(&self, conflicting: ForceId, force: ForceHandle, waiters: Vec<Waiter>) {
        let (new_id, snapshot) = {
            let mut live = force.lock().await;
            let rekeyed = live.instance_id() == Some(&conflicting);
            if rekeyed {
                live.rekey(ForceId::generate());
            }
            let snapshot = live.build_snapshot();
            match snapshot.instance_id.clone() {
                Some(id) => {
                    if rekeyed {
                        // no receivers is fine
                        let _ = self.inner.rekeys.send(RekeyEvent {
                            previous: conflicting.clone(),
                            current: id.clone(),
                            force: force.clone(),
                        });
                    }
                    (id, snapshot)
                }
                None => {
                    drop(live);
                    resolve(waiters, SaveOutcome::LocalOnly);
                    return;
                }
            }
        };

        info!(previous = %conflicting, current = %new_id, "ownership conflict, re-keyed force");
        crate::metrics::record_ownership_conflict();

        if let Err(e) = self.inner.store.save_force(&snapshot).await {
            warn!(instance_id = %new_id, error = %e, "failed to persist re-keyed force");
        }
        let store = self.inner.store.clone();
        let old_id = conflicting.clone();
        tokio::spawn(async move {
            if let Err(e) = store.delete_force(&old_id).await {
                warn!(instance_id = %old_id, error = %e, "failed to delete superseded local copy");
            }
        });

        let waiters = waiters
            .into_iter()
            .map(|w| Waiter {
                rekeyed_from: w.rekeyed_from.or_else(|| Some(conflicting.clone())),
                tx: w.tx,
            })
            .collect();
        self.enqueue(new_id, force, waiters, true, Duration::ZERO);
    }

    /// Best-effort teardown flush. Never waits for the network; every
    /// waiter is resolved before this returns. Returns the number of jobs.
    pub fn flush_all(&self) -> usize {
        let jobs: Vec<(ForceId, ReplicationJob)> = self.jobs().drain().collect();
        let open = self.inner.correlator.channel().is_open();
        let count = jobs.len();

        for (id, job) in jobs {
            job.timer.abort();
            if open {
                match job.force.try_lock() {
                    Ok(live) => {
                        let snapshot = live.build_snapshot();
                        drop(live);
                        if validate(&snapshot).is_ok() {
                            self.inner
                                .correlator
                                .send(json!({ "action": ACTION_SAVE_FORCE, "data": snapshot }));
                        }
                    }
                    Err(_) => warn!(instance_id = %id, "force busy, skipping final write"),
                }
            }
            resolve(job.waiters, SaveOutcome::Flushed);
        }

        if count > 0 {
            info!(jobs = count, channel_open = open, "flushed pending saves");
        }
        count
    }

    /// Drop the pending job for `id`, resolving its waiters with LocalOnly
    pub fn cancel(&self, id: &ForceId) -> bool {
        let job = self.jobs().remove(id);
        match job {
            Some(job) => {
                job.timer.abort();
                resolve(job.waiters, SaveOutcome::LocalOnly);
                true
            }
            None => false,
        }
    }

    pub fn pending_jobs(&self) -> Vec<ForceId> {
        let mut ids: Vec<ForceId> = self.jobs().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn is_pending(&self, id: &ForceId) -> bool {
        self.jobs().contains_key(id)
    }
}

fn validate(snapshot: &ForceSnapshot) -> Result<(), String> {
    let duplicates = find_duplicate_ids(snapshot);
    if duplicates.is_empty() {
        return Ok(());
    }
    Err(duplicates
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", "))
}
