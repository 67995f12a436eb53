use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::{error, info, warn};

/// Callback a link invokes when it drops. The argument is a human-readable reason.
pub type LinkLost = Arc<dyn Fn(String) + Send + Sync>;

/// Opens one broker link and declares the topology on it
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Link: Clone + Send + Sync + 'static;

    /// `on_lost` must be invoked if the link later fails or is closed by the peer.
    async fn open(&self, on_lost: LinkLost) -> Result<Self::Link>;

    /// Releases a link the manager no longer hands out. The link may already be dead.
    async fn close(&self, _link: Self::Link) {}
}

#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    /// Attempts per connect before giving up
    pub max_attempts: u32,
    /// Pause between two failed attempts
    pub attempt_delay: Duration,
    /// Pause between losing an established link and reconnecting
    pub reconnect_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        ReconnectPolicy {
            max_attempts: 5,
            attempt_delay: Duration::from_secs(5),
            reconnect_delay: Duration::from_secs(5),
        }
    }
}

/// An established link tagged with the connect generation it belongs to
#[derive(Clone, Debug)]
pub struct Session<L> {
    pub link: L,
    pub generation: u64,
}

type PendingConnect<L> = Shared<BoxFuture<'static, Result<Session<L>, Arc<anyhow::Error>>>>;

enum State<L> {
    Idle,
    Connecting(PendingConnect<L>),
    Connected(Session<L>),
}

/// Owns the broker link of one service.
///
/// `connect` is safe to call from any number of tasks: while an attempt is in
/// flight every caller awaits that same attempt, and once connected the cached
/// session is handed out. A lost link is dropped from the cache and a
/// reconnect-and-redeclare is scheduled after `reconnect_delay`.
pub struct BrokerManager<C: Connector> {
    connector: Arc<C>,
    policy: ReconnectPolicy,
    state: Mutex<State<C::Link>>,
    generation: AtomicU64,
    runtime: Handle,
}

impl<C: Connector> BrokerManager<C> {
    /// Must be called from within a Tokio runtime; reconnects are spawned on it.
    pub fn new(connector: C, policy: ReconnectPolicy) -> Result<Arc<Self>> {
        let runtime =
            Handle::try_current().context("BrokerManager must be created inside a Tokio runtime")?;

        Ok(Arc::new(BrokerManager {
            connector: Arc::new(connector),
            policy,
            state: Mutex::new(State::Idle),
            generation: AtomicU64::new(0),
            runtime,
        }))
    }

    pub fn policy(&self) -> &ReconnectPolicy {
        &self.policy
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    pub fn is_connected(&self) -> bool {
        matches!(*self.lock_state(), State::Connected(_))
    }

    /// Returns the current session, connecting first if needed
    pub async fn connect(self: &Arc<Self>) -> Result<Session<C::Link>> {
        let pending = {
            let mut state = self.lock_state();
            match &*state {
                State::Connected(session) => return Ok(session.clone()),
                State::Connecting(pending) => pending.clone(),
                State::Idle => {
                    let manager = Arc::clone(self);
                    let pending = async move { manager.establish().await.map_err(Arc::new) }
                        .boxed()
                        .shared();
                    *state = State::Connecting(pending.clone());
                    pending
                }
            }
        };

        pending
            .await
            .map_err(|err| anyhow!("Broker connection failed: {err:#}"))
    }

    /// Reports that the link of `generation` is unusable.
    ///
    /// Reports about an older generation are ignored, so a consumer noticing a dead
    /// stream late cannot tear down a link that was already replaced.
    pub fn mark_lost(self: &Arc<Self>, generation: u64, reason: &str) {
        let lost = {
            let mut state = self.lock_state();
            match &*state {
                State::Connected(session) if session.generation == generation => {
                    std::mem::replace(&mut *state, State::Idle)
                }
                _ => return,
            }
        };

        warn!(
            generation,
            reason,
            delay_ms = self.policy.reconnect_delay.as_millis() as u64,
            "Broker link lost, scheduling reconnect"
        );

        // A consumer may report the loss while the peer still holds the link open
        if let State::Connected(session) = lost {
            let connector = Arc::clone(&self.connector);
            self.runtime.spawn(async move {
                connector.close(session.link).await;
            });
        }
        self.schedule_reconnect();
    }

    async fn establish(self: Arc<Self>) -> Result<Session<C::Link>> {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let mut attempt = 0;

        loop {
            attempt += 1;

            let manager: Weak<Self> = Arc::downgrade(&self);
            let on_lost: LinkLost = Arc::new(move |reason: String| {
                if let Some(manager) = manager.upgrade() {
                    manager.mark_lost(generation, &reason);
                }
            });

            match self.connector.open(on_lost).await {
                Ok(link) => {
                    let session = Session { link, generation };
                    *self.lock_state() = State::Connected(session.clone());
                    info!(generation, attempt, "Broker link established");
                    return Ok(session);
                }
                Err(err) if attempt < self.policy.max_attempts => {
                    warn!(
                        attempt,
                        max_attempts = self.policy.max_attempts,
                        error = %format!("{err:#}"),
                        "Broker connection attempt failed, retrying"
                    );
                    tokio::time::sleep(self.policy.attempt_delay).await;
                }
                Err(err) => {
                    *self.lock_state() = State::Idle;
                    error!(attempts = attempt, error = %format!("{err:#}"), "Giving up on broker connection");
                    return Err(err.context(format!("no broker connection after {attempt} attempts")));
                }
            }
        }
    }

    fn schedule_reconnect(self: &Arc<Self>) {
        let manager = Arc::clone(self);
        self.runtime.spawn(async move {
            tokio::time::sleep(manager.policy.reconnect_delay).await;
            if let Err(err) = manager.connect().await {
                error!(error = %format!("{err:#}"), "Reconnect failed, trying again later");
                manager.schedule_reconnect();
            }
        });
    }

    fn lock_state(&self) -> MutexGuard<'_, State<C::Link>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
