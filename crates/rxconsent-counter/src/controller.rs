//! Counter session controller.
//!
//! Drives one consent cycle per PRN: open a request, poll for the
//! patient's decision in the background while accepting an OTP typed in
//! at the counter, then fetch the prescription once access is granted.
//! Every transition is published as a [`CounterSnapshot`] on a watch
//! channel.
//!
//! Each session carries an epoch. Responses are applied only if the
//! epoch they were started under is still current, so a late reply for a
//! session that was closed or replaced is dropped.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rxconsent_core::error::RxError;
use rxconsent_core::models::consent::ConsentState;
use rxconsent_core::models::operator::OperatorContext;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::gateway::ConsentGateway;
use crate::session::{CounterSnapshot, CounterStatus, Notice};

/// Polling behaviour of the counter client.
#[derive(Debug, Clone)]
pub struct CounterConfig {
    /// Delay between status polls while awaiting approval.
    pub poll_interval: Duration,
    /// Optional cap on how long a single request is polled, on top of
    /// the request's own expiry.
    pub max_poll_duration: Option<Duration>,
}

impl Default for CounterConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            max_poll_duration: None,
        }
    }
}

/// Which side of the controller is applying a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Caller {
    /// The background poll task; it finishes on its own.
    Poller,
    /// An operator action; a running poll task must be aborted.
    Operator,
}

struct Inner {
    epoch: u64,
    session: CounterSnapshot,
    poller: Option<JoinHandle<()>>,
}

impl Inner {
    fn is_current(&self, epoch: u64) -> bool {
        self.epoch == epoch
    }

    fn release_poller(&mut self, caller: Caller) {
        if let Some(handle) = self.poller.take() {
            if caller == Caller::Operator {
                handle.abort();
            }
        }
    }

    /// Start a new epoch, cancelling whatever the previous one left
    /// running.
    fn begin(&mut self, session: CounterSnapshot) -> u64 {
        self.release_poller(Caller::Operator);
        self.epoch = self.epoch.wrapping_add(1);
        self.session = session;
        self.epoch
    }
}

struct Shared<G> {
    gateway: Arc<G>,
    operator: OperatorContext,
    config: CounterConfig,
    inner: Mutex<Inner>,
    updates: watch::Sender<CounterSnapshot>,
}

impl<G: ConsentGateway + 'static> Shared<G> {
    fn publish(&self, inner: &Inner) -> CounterSnapshot {
        let snapshot = inner.session.clone();
        self.updates.send_replace(snapshot.clone());
        snapshot
    }

    /// Enter `Granted` and fetch the prescription.
    async fn enter_granted(
        &self,
        epoch: u64,
        access_token: String,
        token_expires_at: Option<DateTime<Utc>>,
        caller: Caller,
    ) {
        {
            let mut inner = self.inner.lock().await;
            if !inner.is_current(epoch) || !inner.session.status.is_pending() {
                return;
            }
            inner.release_poller(caller);

            let session = &mut inner.session;
            session.status = CounterStatus::Granted;
            session.access_token = Some(access_token);
            session.token_expires_at = token_expires_at;
            session.notice = None;
            info!(
                request_id = ?session.request_id,
                prn = ?session.patient_prn,
                "Counter session granted"
            );
            self.publish(&inner);
        }

        self.load_prescription(epoch).await;
    }

    /// Leave a pending session for `Idle` with `notice`.
    async fn settle_idle(&self, epoch: u64, notice: Notice, caller: Caller) {
        let mut inner = self.inner.lock().await;
        if !inner.is_current(epoch) || !inner.session.status.is_pending() {
            return;
        }
        inner.release_poller(caller);
        warn!(
            request_id = ?inner.session.request_id,
            prn = ?inner.session.patient_prn,
            notice = %notice,
            "Counter session returned to idle"
        );
        inner.session.reset_to_idle(notice);
        self.publish(&inner);
    }

    /// An OTP attempt failed without ending the request.
    async fn resume_waiting(&self, epoch: u64, notice: Notice) {
        let mut inner = self.inner.lock().await;
        if !inner.is_current(epoch) || inner.session.status != CounterStatus::Verifying {
            return;
        }
        inner.session.status = CounterStatus::AwaitingApproval;
        inner.session.notice = Some(notice);
        self.publish(&inner);
    }

    /// Attach a notice without changing state.
    async fn note(&self, epoch: u64, notice: Notice) {
        let mut inner = self.inner.lock().await;
        if !inner.is_current(epoch) {
            return;
        }
        inner.session.notice = Some(notice);
        self.publish(&inner);
    }

    /// The OTP lost the race: pick up whatever the patient decided.
    async fn adopt_resolution(&self, epoch: u64, request_id: Uuid) {
        match self.gateway.check_status(request_id).await {
            Ok(status) if status.granted => match status.access_token {
                Some(token) => {
                    self.enter_granted(epoch, token, status.token_expires_at, Caller::Operator)
                        .await
                }
                None => {
                    self.resume_waiting(epoch, Notice::Error("granted without a token".into()))
                        .await
                }
            },
            Ok(status) if status.state == ConsentState::Denied => {
                self.settle_idle(epoch, Notice::for_denial(status.resolved_via), Caller::Operator)
                    .await
            }
            Ok(status) => {
                debug!(request_id = %request_id, state = status.state.as_str(), "Request not yet settled");
                self.resume_waiting(epoch, Notice::Error("request is still pending".into()))
                    .await
            }
            Err(e) => self.fail(epoch, &e, Caller::Operator).await,
        }
    }

    /// Apply an error that arrived while a request was pending.
    async fn fail(&self, epoch: u64, err: &RxError, caller: Caller) {
        if ends_request(err) {
            self.settle_idle(epoch, Notice::from(err), caller).await;
        } else if caller == Caller::Operator {
            self.resume_waiting(epoch, Notice::from(err)).await;
        } else {
            self.note(epoch, Notice::from(err)).await;
        }
    }

    async fn load_prescription(&self, epoch: u64) {
        let (prn, token) = {
            let inner = self.inner.lock().await;
            if !inner.is_current(epoch) || inner.session.status != CounterStatus::Granted {
                return;
            }
            match (&inner.session.patient_prn, &inner.session.access_token) {
                (Some(prn), Some(token)) => (prn.clone(), token.clone()),
                _ => return,
            }
        };

        let result = self
            .gateway
            .fetch_prescription(&self.operator, &prn, &token)
            .await;

        let mut inner = self.inner.lock().await;
        if !inner.is_current(epoch) || inner.session.status != CounterStatus::Granted {
            debug!(prn = %prn, "Dropping prescription for a closed session");
            return;
        }
        match result {
            Ok(prescription) => {
                info!(prn = %prn, prescription_id = %prescription.id, "Prescription loaded");
                inner.session.prescription = Some(prescription);
                inner.session.notice = None;
            }
            Err(e) => {
                warn!(prn = %prn, error = %e, "Prescription fetch failed");
                inner.session.notice = Some(Notice::PrescriptionUnavailable(e.to_string()));
            }
        }
        self.publish(&inner);
    }
}

/// Errors after which the request can never produce access again.
fn ends_request(err: &RxError) -> bool {
    err.resets_session()
        || matches!(err, RxError::RequestNotFound { .. } | RxError::TokenExpired)
}

/// Background poll for one request, until it resolves or its deadline
/// passes.
async fn poll_until_resolved<G: ConsentGateway + 'static>(
    shared: Arc<Shared<G>>,
    epoch: u64,
    request_id: Uuid,
    expires_at: DateTime<Utc>,
) {
    let remaining = (expires_at - Utc::now())
        .to_std()
        .unwrap_or(Duration::ZERO);
    let budget = match shared.config.max_poll_duration {
        Some(max) => remaining.min(max),
        None => remaining,
    };
    let deadline = Instant::now() + budget;

    let mut ticker = tokio::time::interval(shared.config.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = tokio::time::sleep_until(deadline) => {
                debug!(request_id = %request_id, "Polling deadline reached");
                shared
                    .settle_idle(epoch, Notice::RequestExpired, Caller::Poller)
                    .await;
                return;
            }
            _ = ticker.tick() => {}
        }

        match shared.gateway.check_status(request_id).await {
            Ok(status) if status.granted => match status.access_token {
                Some(token) => {
                    shared
                        .enter_granted(epoch, token, status.token_expires_at, Caller::Poller)
                        .await;
                    return;
                }
                None => warn!(request_id = %request_id, "Granted status without a token"),
            },
            Ok(status) if status.state == ConsentState::Denied => {
                shared
                    .settle_idle(epoch, Notice::for_denial(status.resolved_via), Caller::Poller)
                    .await;
                return;
            }
            Ok(status) => {
                debug!(request_id = %request_id, state = status.state.as_str(), "Consent still pending");
            }
            Err(e) => {
                let terminal = ends_request(&e);
                shared.fail(epoch, &e, Caller::Poller).await;
                if terminal {
                    return;
                }
            }
        }
    }
}

/// State machine behind one counter terminal.
pub struct CounterController<G: ConsentGateway + 'static> {
    shared: Arc<Shared<G>>,
}

impl<G: ConsentGateway + 'static> CounterController<G> {
    pub fn new(gateway: Arc<G>, operator: OperatorContext, config: CounterConfig) -> Self {
        let (updates, _) = watch::channel(CounterSnapshot::default());
        Self {
            shared: Arc::new(Shared {
                gateway,
                operator,
                config,
                inner: Mutex::new(Inner {
                    epoch: 0,
                    session: CounterSnapshot::default(),
                    poller: None,
                }),
                updates,
            }),
        }
    }

    /// Watch every published snapshot.
    pub fn subscribe(&self) -> watch::Receiver<CounterSnapshot> {
        self.shared.updates.subscribe()
    }

    /// The most recently published snapshot.
    pub fn snapshot(&self) -> CounterSnapshot {
        self.shared.updates.borrow().clone()
    }

    /// Start a consent cycle for `patient_prn`.
    ///
    /// Any active session is closed first; sessions are never reused
    /// across PRNs.
    pub async fn submit(&self, patient_prn: &str) -> CounterSnapshot {
        let prn = patient_prn.trim().to_string();

        let epoch = {
            let mut inner = self.shared.inner.lock().await;
            if inner.session.status.is_pending() || inner.session.status == CounterStatus::Granted {
                info!(
                    prn = ?inner.session.patient_prn,
                    "Closing active counter session for a new PRN"
                );
            }
            let epoch = inner.begin(CounterSnapshot::requesting(prn.clone()));
            self.shared.publish(&inner);
            epoch
        };

        let result = self
            .shared
            .gateway
            .request_access(&self.shared.operator, &prn)
            .await;

        let mut inner = self.shared.inner.lock().await;
        if !inner.is_current(epoch) {
            debug!(prn = %prn, "Dropping consent request for a closed session");
            return inner.session.clone();
        }

        match result {
            Ok(output) => {
                let session = &mut inner.session;
                session.status = CounterStatus::AwaitingApproval;
                session.request_id = Some(output.request_id);
                session.request_expires_at = Some(output.expires_at);
                session.notice = (!output.otp_delivered).then_some(Notice::OtpNotDelivered);
                info!(
                    request_id = %output.request_id,
                    prn = %prn,
                    otp_delivered = output.otp_delivered,
                    "Awaiting patient approval"
                );

                let shared = Arc::clone(&self.shared);
                inner.poller = Some(tokio::spawn(poll_until_resolved(
                    shared,
                    epoch,
                    output.request_id,
                    output.expires_at,
                )));
            }
            Err(e) => {
                warn!(prn = %prn, error = %e, "Consent request refused");
                inner.session.reset_to_idle(Notice::from(&e));
            }
        }
        self.shared.publish(&inner)
    }

    /// Submit the OTP the patient read out at the counter.
    pub async fn submit_otp(&self, otp: &str) -> CounterSnapshot {
        let (epoch, request_id) = {
            let mut inner = self.shared.inner.lock().await;
            let request_id = match (inner.session.status, inner.session.request_id) {
                (CounterStatus::AwaitingApproval, Some(id)) => id,
                (status, _) => {
                    debug!(status = status.as_str(), "No request awaiting an OTP");
                    return inner.session.clone();
                }
            };
            inner.session.status = CounterStatus::Verifying;
            inner.session.notice = None;
            self.shared.publish(&inner);
            (inner.epoch, request_id)
        };

        match self.shared.gateway.verify_otp(request_id, otp).await {
            Ok(grant) => {
                self.shared
                    .enter_granted(
                        epoch,
                        grant.access_token,
                        Some(grant.expires_at),
                        Caller::Operator,
                    )
                    .await
            }
            Err(RxError::AlreadyResolved) => self.shared.adopt_resolution(epoch, request_id).await,
            Err(e) => self.shared.fail(epoch, &e, Caller::Operator).await,
        }

        self.snapshot()
    }

    /// Retry the prescription fetch for a granted session.
    pub async fn refresh_prescription(&self) -> CounterSnapshot {
        let epoch = self.shared.inner.lock().await.epoch;
        self.shared.load_prescription(epoch).await;
        self.snapshot()
    }

    /// Close the session: stop polling and clear every identifier.
    pub async fn close(&self) -> CounterSnapshot {
        let mut inner = self.shared.inner.lock().await;
        if inner.session.status != CounterStatus::Closed {
            info!(prn = ?inner.session.patient_prn, "Counter session closed");
        }
        inner.begin(CounterSnapshot::closed());
        self.shared.publish(&inner)
    }
}

impl<G: ConsentGateway + 'static> Drop for CounterController<G> {
    fn drop(&mut self) {
        if let Ok(mut inner) = self.shared.inner.try_lock() {
            inner.release_poller(Caller::Operator);
        }
    }
}
