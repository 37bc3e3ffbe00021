use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::protocol::AcmeDirectory;
use crate::state::StateMachine;
use crate::{
    CertificateProvider, ChallengeRecord, CurrentCertificate, PersistenceService, RenewalConfig,
    RenewalError, RenewalFailMode, RenewalResult, RenewalStatus, ServiceState, SiteCertificate,
    Trigger,
};

/// Callbacks around the service lifecycle. Every method defaults to a no-op.
#[async_trait]
pub trait RenewalLifecycleHook: Send + Sync {
    async fn on_start(&self) {}
    async fn on_stop(&self) {}
    async fn on_renewal_succeeded(&self) {}
    async fn on_exception(&self, _error: &RenewalError) {}
}

/// Background renewal of the site certificate.
///
/// Once started, a timer fires every renewal period and runs one renewal
/// attempt through the [CertificateProvider]. At most one attempt is in flight
/// at any time: a firing that finds an attempt running is dropped. The result
/// becomes the current certificate, readable through
/// [RenewalService::current_certificate] or a [CurrentCertificate] handle.
///
/// ```rust,no_run
/// # use std::sync::Arc;
/// # use acme_renewal::protocol::AcmeDirectory;
/// # use acme_renewal::stores::DirStore;
/// # use acme_renewal::{PersistenceService, RenewalConfig, RenewalError, RenewalService};
/// # async fn run(directory: Arc<dyn AcmeDirectory>) -> Result<(), RenewalError> {
/// let store = DirStore::new("./certificates");
/// let persistence = PersistenceService::new()
///     .certificate_store(store.clone())
///     .challenge_store(store);
/// let config = RenewalConfig::new(["example.com"]).contact_push("mailto:admin@example.com");
/// let service = RenewalService::new(config, persistence, directory);
/// service.start().await?;
/// service.join().await
/// # }
/// ```
#[derive(Clone)]
pub struct RenewalService {
    inner: Arc<Inner>,
}

struct Inner {
    config: RenewalConfig,
    provider: CertificateProvider,
    hooks: Vec<Arc<dyn RenewalLifecycleHook>>,
    guard: tokio::sync::Mutex<()>,
    current: CurrentCertificate,
    machine: Mutex<StateMachine>,
    wake: Notify,
    control: Mutex<Control>,
}

#[derive(Default)]
struct Control {
    cancel: Option<CancellationToken>,
    task: Option<JoinHandle<Result<(), RenewalError>>>,
}

impl RenewalService {
    pub fn new(
        config: RenewalConfig,
        persistence: PersistenceService,
        directory: Arc<dyn AcmeDirectory>,
    ) -> Self {
        Self::with_hooks(config, persistence, directory, Vec::new())
    }

    pub fn with_hooks(
        config: RenewalConfig,
        persistence: PersistenceService,
        directory: Arc<dyn AcmeDirectory>,
        hooks: Vec<Arc<dyn RenewalLifecycleHook>>,
    ) -> Self {
        let provider = CertificateProvider::new(&config, persistence, directory);
        let machine = StateMachine::new(config.startup_mode);
        Self {
            inner: Arc::new(Inner {
                config,
                provider,
                hooks,
                guard: Default::default(),
                current: Default::default(),
                machine: Mutex::new(machine),
                wake: Notify::new(),
                control: Default::default(),
            }),
        }
    }

    /// Validates the configuration, runs the start hooks and arms the timer.
    /// Must be called from within a tokio runtime. A [Self::stop] issued while
    /// the start hooks run leaves the timer disarmed.
    pub async fn start(&self) -> Result<(), RenewalError> {
        self.inner.config.validate()?;
        self.inner.transition(Trigger::Start)?;
        let cancel = CancellationToken::new();
        self.inner.control().cancel = Some(cancel.clone());
        for hook in &self.inner.hooks {
            hook.on_start().await;
        }
        if cancel.is_cancelled() || self.inner.transition(Trigger::Armed).is_err() {
            log::info!("renewal service stopped while starting");
            return Ok(());
        }

        let task = tokio::spawn(Inner::run(self.inner.clone(), cancel));
        self.inner.control().task = Some(task);
        log::info!(
            "renewal service started for {:?} in {:?} startup mode",
            self.inner.config.domains,
            self.inner.config.startup_mode
        );
        Ok(())
    }

    /// Disarms the timer and cancels the attempt in flight, if any. The
    /// attempt still removes its challenges before it ends. The stop hooks
    /// only run when the service was started.
    pub async fn stop(&self) {
        let cancel = self.inner.control().cancel.take();
        // the transition cannot fail for Stop
        let _ = self.inner.transition(Trigger::Stop);
        let cancel = match cancel {
            Some(cancel) => cancel,
            None => return,
        };
        cancel.cancel();
        for hook in &self.inner.hooks {
            hook.on_stop().await;
        }
        log::info!("renewal service stopped");
    }

    /// Waits for the background task to end, which happens after [Self::stop]
    /// or when an attempt fails in [RenewalFailMode::Unhandled] mode.
    pub async fn join(&self) -> Result<(), RenewalError> {
        let task = self.inner.control().task.take();
        let task = match task {
            Some(task) => task,
            None => return Ok(()),
        };
        match task.await {
            Ok(result) => result,
            Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
            Err(_) => Ok(()),
        }
    }

    /// Runs one renewal attempt now. `Ok(None)` if another attempt is in
    /// flight. Allowed while stopped and, once the startup mode released the
    /// timer, while idle.
    pub async fn run_once(&self) -> Result<Option<RenewalResult>, RenewalError> {
        let cancel = self.inner.control().cancel.clone().unwrap_or_default();
        self.inner.attempt(&cancel).await
    }

    /// Releases the first firing in [crate::StartupMode::Manual] mode.
    pub fn trigger(&self) -> Result<(), RenewalError> {
        self.inner.transition(Trigger::ManualTrigger)?;
        self.inner.wake.notify_one();
        Ok(())
    }

    /// Tells the service the challenge endpoint is serving. Releases the first
    /// firing in [crate::StartupMode::Delayed] mode and is ignored otherwise.
    pub fn signal_ready(&self) -> Result<(), RenewalError> {
        self.inner.transition(Trigger::ReadinessSignal)?;
        self.inner.wake.notify_one();
        Ok(())
    }

    pub fn state(&self) -> ServiceState {
        self.inner.machine().state()
    }

    pub fn current_certificate(&self) -> Option<Arc<SiteCertificate>> {
        self.inner.current.get()
    }

    /// Handle for the TLS layer, see [crate::ResolvesServerCertRenewal].
    pub fn certificate_accessor(&self) -> CurrentCertificate {
        self.inner.current.clone()
    }

    /// Challenges the challenge endpoint has to answer.
    pub async fn persisted_challenges(&self) -> Vec<ChallengeRecord> {
        self.inner.provider.persistence().retrieve_challenges().await
    }

    pub async fn find_challenge(&self, token: &str) -> Option<ChallengeRecord> {
        self.inner.provider.persistence().find_challenge(token).await
    }
}

impl Inner {
    fn machine(&self) -> MutexGuard<'_, StateMachine> {
        self.machine.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn control(&self) -> MutexGuard<'_, Control> {
        self.control.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn transition(&self, trigger: Trigger) -> Result<ServiceState, RenewalError> {
        self.machine().apply(trigger)
    }

    async fn run(self: Arc<Self>, cancel: CancellationToken) -> Result<(), RenewalError> {
        if !self.config.startup_delay.is_zero() {
            log::debug!("delaying first renewal by {:?}", self.config.startup_delay);
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = tokio::time::sleep(self.config.startup_delay) => {}
            }
        }
        loop {
            let released = self.machine().released();
            if released {
                break;
            }
            log::debug!("waiting for {:?} startup", self.config.startup_mode);
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = self.wake.notified() => {}
            }
        }

        loop {
            let next = match self.attempt(&cancel).await {
                Ok(_) => self.config.renewal_period,
                Err(_) if cancel.is_cancelled() => return Ok(()),
                Err(err) => match self.config.fail_mode {
                    RenewalFailMode::Unhandled => {
                        log::error!("renewal failed, stopping renewal service: {}", err);
                        let _ = self.transition(Trigger::Stop);
                        return Err(err);
                    }
                    RenewalFailMode::LogAndContinue => {
                        log::warn!("renewal failed: {}", err);
                        self.config.renewal_period
                    }
                    RenewalFailMode::LogAndRetry => {
                        log::warn!(
                            "renewal failed, retrying in {:?}: {}",
                            self.config.retry_interval,
                            err
                        );
                        self.config.retry_interval
                    }
                },
            };
            if self.sleep(next, &cancel).await {
                return Ok(());
            }
        }
    }

    /// True when cancelled.
    async fn sleep(&self, duration: Duration, cancel: &CancellationToken) -> bool {
        log::trace!("next renewal check in {:?}", duration);
        tokio::select! {
            _ = cancel.cancelled() => true,
            _ = tokio::time::sleep(duration) => false,
        }
    }

    async fn attempt(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Option<RenewalResult>, RenewalError> {
        let _slot = match self.guard.try_lock() {
            Ok(slot) => slot,
            Err(_) => {
                log::info!("renewal already in progress, skipping");
                return Ok(None);
            }
        };
        self.transition(Trigger::TimerFired)?;

        let result = self
            .provider
            .renew_if_needed(self.current.get(), cancel)
            .await;
        self.transition(Trigger::AttemptFinished)?;

        match result {
            Ok(result) => {
                self.current.replace(result.certificate.clone());
                if result.status == RenewalStatus::Renewed {
                    log::info!("certificate renewed");
                    for hook in &self.hooks {
                        hook.on_renewal_succeeded().await;
                    }
                }
                Ok(Some(result))
            }
            Err(RenewalError::Cancelled) => {
                log::info!("renewal attempt cancelled");
                Err(RenewalError::Cancelled)
            }
            Err(err) => {
                for hook in &self.hooks {
                    hook.on_exception(&err).await;
                }
                Err(err)
            }
        }
    }
}
