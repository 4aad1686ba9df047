use std::time::Duration;

use nix::sys::signal::Signal;
use tokio::{sync::mpsc, time};
use tracing::{debug, info, warn};

use crate::{
    config::RelayConfig,
    constants::SEGMENT_CLEANUP_DELAY,
    handle::HandleEvent,
    launcher::Launcher,
    manager::RelayContext,
    registry::StreamRegistry,
    scheduler::Scheduled,
    segment,
    stream::{RelayTarget, StreamIdentity},
};

/// Something the supervisor loop has to react to.
#[derive(Debug)]
pub enum SupervisorEvent {
    /// A relay process ended.
    HandleExited(HandleEvent),
    /// A scheduled start or cleanup came due.
    TimerFired(Scheduled),
}

/// Owner of the stream registry and of everything its managers share.
///
/// All methods run on the supervisor loop; nothing here is shared across threads.
pub struct Supervisor<L: Launcher> {
    registry: StreamRegistry,
    ctx: RelayContext<L>,
    events: mpsc::UnboundedReceiver<HandleEvent>,
}

impl<L: Launcher> Supervisor<L> {
    /// Creates a new supervisor from a loaded configuration.
    pub fn new(config: RelayConfig, launcher: L) -> Self {
        let (tx, events) = mpsc::unbounded_channel();
        Self {
            registry: StreamRegistry::new(),
            ctx: RelayContext::new(config, launcher, tx),
            events,
        }
    }

    pub fn config(&self) -> &RelayConfig {
        &self.ctx.config
    }

    pub fn launcher(&self) -> &L {
        &self.ctx.launcher
    }

    pub fn registry(&self) -> &StreamRegistry {
        &self.registry
    }

    pub fn is_active(&self, identity: &StreamIdentity) -> bool {
        self.registry.contains(identity)
    }

    /// Targets of `identity` with a running relay.
    pub fn running_targets(&self, identity: &StreamIdentity) -> Vec<RelayTarget> {
        self.registry
            .get(identity)
            .map(|manager| manager.running_targets())
            .unwrap_or_default()
    }

    /// Relay processes not yet reaped, across all streams.
    pub fn live_relays(&self) -> usize {
        self.ctx.live()
    }

    /// Registers the stream if needed and starts all of its relays.
    pub fn start_stream(&mut self, identity: &StreamIdentity) {
        let input = self.ctx.config.ingest.input_locator(identity);
        let (manager, created) = self.registry.get_or_create(identity, input);
        if created {
            info!(
                "Stream '{identity}' started; relaying from {}",
                manager.input()
            );
        } else {
            info!("Stream '{identity}' is already active; starting missing relays");
        }

        manager.start_all(&mut self.ctx);
        self.forget_if_idle(identity);
    }

    /// Stops every relay of the stream and unregisters it.
    /// Returns `false` if the stream was not active.
    pub fn stop_stream(&mut self, identity: &StreamIdentity) -> bool {
        let Some(mut manager) = self.registry.remove(identity) else {
            info!("Stream '{identity}' is not active; nothing to stop");
            return false;
        };

        info!("Stream '{identity}' stopped; stopping its relays");
        manager.stop_all(Signal::SIGINT, SEGMENT_CLEANUP_DELAY, &mut self.ctx);
        true
    }

    /// Stops every stream with `signal` and deletes all segmented output right away.
    pub fn shutdown_all(&mut self, signal: Signal) {
        for identity in self.registry.identities() {
            if let Some(mut manager) = self.registry.remove(&identity) {
                manager.stop_all(signal, Duration::ZERO, &mut self.ctx);
            }
        }

        for (identity, dir) in self.ctx.scheduler.take_purges() {
            segment::reclaim(&identity, &dir);
        }
    }

    /// Waits for the next relay exit or timer.
    pub async fn next_event(&mut self) -> SupervisorEvent {
        tokio::select! {
            Some(event) = self.events.recv() => SupervisorEvent::HandleExited(event),
            task = self.ctx.scheduler.next_due() => SupervisorEvent::TimerFired(task),
        }
    }

    pub fn dispatch(&mut self, event: SupervisorEvent) {
        match event {
            SupervisorEvent::HandleExited(event) => self.on_handle_exit(event),
            SupervisorEvent::TimerFired(task) => self.on_timer(task),
        }
    }

    fn on_handle_exit(&mut self, event: HandleEvent) {
        self.ctx.reap();

        let Some(manager) = self.registry.get_mut(&event.identity) else {
            debug!(
                "Relay '{}' of inactive stream '{}' exited",
                event.target, event.identity
            );
            return;
        };
        manager.on_handle_exit(&event, &mut self.ctx);
        self.forget_if_idle(&event.identity);
    }

    fn on_timer(&mut self, task: Scheduled) {
        match task {
            Scheduled::Start {
                identity,
                epoch,
                target,
                reason,
            } => {
                let Some(manager) = self
                    .registry
                    .get_mut(&identity)
                    .filter(|m| m.epoch() == epoch)
                else {
                    debug!(
                        "Skipping {} start of '{target}': stream '{identity}' is no longer active",
                        reason.as_ref()
                    );
                    return;
                };
                manager.fire_start(target, reason, &mut self.ctx);
                self.forget_if_idle(&identity);
            }
            Scheduled::Purge { identity, dir } => segment::reclaim(&identity, &dir),
        }
    }

    /// Unregisters a stream that has no relays and nothing scheduled.
    fn forget_if_idle(&mut self, identity: &StreamIdentity) {
        if self.registry.get(identity).is_some_and(|m| m.is_idle()) {
            info!("Stream '{identity}' has no running relays; removing it");
            self.registry.remove(identity);
        }
    }

    /// Reaps exits until every relay is gone or `grace` elapses.
    pub async fn drain(&mut self, grace: Duration) {
        let deadline = time::Instant::now() + grace;
        while self.ctx.live() > 0 {
            match time::timeout_at(deadline, self.events.recv()).await {
                Ok(Some(event)) => self.on_handle_exit(event),
                Ok(None) | Err(_) => break,
            }
        }

        if self.ctx.live() > 0 {
            warn!(
                "{} relay(s) still running after {}s; exiting anyway",
                self.ctx.live(),
                grace.as_secs()
            );
        } else {
            info!("All relays stopped");
        }
    }
}
