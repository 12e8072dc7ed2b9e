//! The engine host.
//!
//! A [`VmManager`] is what a front-end talks to, either directly when
//! running standalone or through the service protocol. It owns the state
//! feed, the subscriber set, and the dispatcher.

use std::sync::{Arc, Mutex, PoisonError};

use quickvm_common::config::EngineConfig;
use quickvm_common::types::{CommandOutcome, CommandRequest, SubscriberId, VmId, VmStatus};
use quickvm_core::actions::{self, Action, ActionSet};
use quickvm_core::classifier::StateClassifier;
use quickvm_core::summary::HostSummary;
use quickvm_hypervisor::error::StartupError;
use quickvm_hypervisor::hypervisor::Hypervisor;
use quickvm_hypervisor::source::{EventSink, PollingStateSource, StateSource, WatchHandle};

use crate::bulk::{self, BulkReport};
use crate::dispatcher::CommandDispatcher;
use crate::registry::{Subscriber, SubscriptionRegistry};

/// A running engine bound to one hypervisor.
pub struct VmManager<H> {
    config: EngineConfig,
    source: Box<dyn StateSource>,
    dispatcher: CommandDispatcher<H>,
    registry: Arc<SubscriptionRegistry>,
    watch: Mutex<Option<WatchHandle>>,
}

impl<H: Hypervisor + 'static> VmManager<H> {
    /// Connects to the hypervisor and starts the state feed.
    ///
    /// # Errors
    ///
    /// Returns a [`StartupError`] if the hypervisor is unusable or the feed
    /// cannot be opened. Nothing keeps running in that case.
    pub fn start(config: EngineConfig, hypervisor: Arc<H>) -> Result<Self, StartupError> {
        let classifier = StateClassifier::from_config(&config.classifier);
        let source = PollingStateSource::new(
            Arc::clone(&hypervisor),
            classifier.clone(),
            config.poll_interval(),
        );
        Self::with_source(config, hypervisor, Box::new(source))
    }

    /// Like [`VmManager::start`], with a caller-supplied state source.
    ///
    /// # Errors
    ///
    /// Returns a [`StartupError`] if the hypervisor is unusable or the feed
    /// cannot be opened.
    pub fn with_source(
        config: EngineConfig,
        hypervisor: Arc<H>,
        source: Box<dyn StateSource>,
    ) -> Result<Self, StartupError> {
        tracing::info!(
            provider = ?config.provider,
            namespace = config.namespace(),
            poll_interval_ms = config.poll_interval_ms,
            "starting engine"
        );
        hypervisor.connect()?;

        let classifier = StateClassifier::from_config(&config.classifier);
        let dispatcher = CommandDispatcher::new(hypervisor, classifier, &config);
        let registry = Arc::new(SubscriptionRegistry::new());
        let sink: Arc<dyn EventSink> = Arc::clone(&registry) as Arc<dyn EventSink>;
        let watch = source.watch(sink)?;

        tracing::info!("engine started");
        Ok(Self {
            config,
            source,
            dispatcher,
            registry,
            watch: Mutex::new(Some(watch)),
        })
    }

    /// The configuration this engine was started with.
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The subscriber set fed by the state source.
    #[must_use]
    pub const fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.registry
    }

    /// Current machines, optionally restricted to one name.
    #[must_use]
    pub fn get_vm(&self, filter: Option<&VmId>) -> Vec<VmStatus> {
        self.source.list_vms(filter)
    }

    /// Executes a raw state-change request.
    pub fn request_vm_state_change(&self, request: &CommandRequest) -> CommandOutcome {
        self.dispatcher.dispatch(request)
    }

    /// Asks a guest to shut itself down.
    pub fn shutdown_vm(&self, vm: &VmId) -> CommandOutcome {
        self.dispatcher.shutdown(vm)
    }

    /// Runs one menu action on one machine.
    pub fn perform(&self, vm: &VmId, action: Action) -> CommandOutcome {
        self.dispatcher.perform(vm, action)
    }

    /// Runs one menu action on every machine it applies to.
    pub fn run_bulk(&self, action: Action) -> BulkReport {
        let statuses = self.get_vm(None);
        bulk::run_bulk(&statuses, action, |vm, command| {
            self.dispatcher.execute(vm, command)
        })
    }

    /// Actions offered for one machine, or `None` if it does not exist.
    #[must_use]
    pub fn available_actions(&self, vm: &VmId) -> Option<ActionSet> {
        self.get_vm(Some(vm))
            .into_iter()
            .find(|s| &s.id == vm)
            .map(|s| actions::available_actions(s.state))
    }

    /// Actions offered under "all virtual machines".
    #[must_use]
    pub fn bulk_actions(&self) -> ActionSet {
        actions::bulk_actions(self.get_vm(None).iter().map(|s| s.state))
    }

    /// Counts per category and the resulting tray overlay.
    #[must_use]
    pub fn host_summary(&self) -> HostSummary {
        HostSummary::from_statuses(&self.get_vm(None))
    }

    /// Registers a subscriber. Returns `false` if it already was.
    pub fn subscribe(&self, subscriber: Arc<dyn Subscriber>) -> bool {
        self.registry.subscribe(subscriber)
    }

    /// Unregisters a subscriber. Returns `false` if it was not registered.
    pub fn unsubscribe(&self, id: &SubscriberId) -> bool {
        self.registry.unsubscribe(id)
    }

    /// Stops the state feed. Commands keep working; no further events are
    /// published.
    pub fn stop(&self) {
        let handle = self
            .watch
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.stop();
            tracing::info!("engine stopped");
        }
    }
}
