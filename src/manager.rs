//! Destination relay manager: every relay process of one stream.
//!
//! A manager owns at most one [`RelayHandle`] per [`RelayTarget`]. It never sleeps;
//! staggered starts and reconnects are entries in the shared [`Scheduler`], tagged with
//! the manager's epoch so that a stream which stopped and started again ignores timers
//! left over from the earlier session.
use std::{collections::BTreeMap, time::Duration};

use nix::sys::signal::Signal;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::{
    config::RelayConfig,
    constants::{
        LOG_NAME_SEPARATOR, RECONNECT_DELAY, SEGMENT_CLEANUP_DELAY, STAGGER_INTERVAL,
    },
    error::RelayError,
    handle::{HandleEvent, HandleId, HandleSpec, RelayHandle, WatchdogPolicy},
    launcher::{LaunchCommand, Launcher},
    logs::LogSink,
    scheduler::{Scheduled, Scheduler, StartReason},
    segment::{self, SegmentLayout},
    stream::{RelayTarget, StreamIdentity},
};

/// State shared by all managers: configuration, launcher, timers and the exit channel.
pub struct RelayContext<L> {
    pub config: RelayConfig,
    pub launcher: L,
    pub scheduler: Scheduler,
    events: mpsc::UnboundedSender<HandleEvent>,
    next_handle: u64,
    live: usize,
}

impl<L: Launcher> RelayContext<L> {
    pub fn new(
        config: RelayConfig,
        launcher: L,
        events: mpsc::UnboundedSender<HandleEvent>,
    ) -> Self {
        Self {
            config,
            launcher,
            scheduler: Scheduler::new(),
            events,
            next_handle: 0,
            live: 0,
        }
    }

    /// Relay processes spawned and not yet reported as exited, across all streams.
    pub fn live(&self) -> usize {
        self.live
    }

    /// Records one exit report.
    pub fn reap(&mut self) {
        self.live = self.live.saturating_sub(1);
    }

    fn next_id(&mut self) -> HandleId {
        self.next_handle += 1;
        HandleId(self.next_handle)
    }
}

/// Relay processes of one stream.
#[derive(Debug)]
pub struct RelayManager {
    identity: StreamIdentity,
    input: String,
    epoch: u64,
    handles: BTreeMap<RelayTarget, RelayHandle>,
    /// Scheduled starts not yet fired.
    pending: usize,
}

impl RelayManager {
    pub fn new(identity: StreamIdentity, input: String, epoch: u64) -> Self {
        Self {
            identity,
            input,
            epoch,
            handles: BTreeMap::new(),
            pending: 0,
        }
    }

    pub fn identity(&self) -> &StreamIdentity {
        &self.identity
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// URL every relay of this stream reads from.
    pub fn input(&self) -> &str {
        &self.input
    }

    pub fn handle(&self, target: &RelayTarget) -> Option<&RelayHandle> {
        self.handles.get(target)
    }

    /// Targets with a running process, segmenter first.
    pub fn running_targets(&self) -> Vec<RelayTarget> {
        self.handles.keys().cloned().collect()
    }

    pub fn pending_starts(&self) -> usize {
        self.pending
    }

    /// No running process and no start waiting on a timer.
    pub fn is_idle(&self) -> bool {
        self.handles.is_empty() && self.pending == 0
    }

    /// Starts segmentation (if enabled) and every enabled destination.
    ///
    /// Segmentation and the first destination start immediately; destination `i`
    /// starts `i * STAGGER_INTERVAL` later. Targets that are already running are left
    /// alone.
    pub fn start_all<L: Launcher>(&mut self, ctx: &mut RelayContext<L>) {
        if ctx.config.segmentation.enabled {
            self.launch(RelayTarget::Segmenter, ctx);
        }

        let targets: Vec<RelayTarget> = ctx
            .config
            .enabled_destinations()
            .map(|d| RelayTarget::Destination(d.name.clone()))
            .collect();

        for (position, target) in targets.into_iter().enumerate() {
            if self.handles.contains_key(&target) {
                debug!(
                    "Relay '{target}' for stream '{}' already running",
                    self.identity
                );
                continue;
            }

            if position == 0 {
                self.launch(target, ctx);
            } else {
                self.defer(target, StartReason::Stagger, STAGGER_INTERVAL * position as u32, ctx);
            }
        }
    }

    /// Starts one target now. A no-op if it is already running.
    pub fn start_target<L: Launcher>(
        &mut self,
        target: RelayTarget,
        ctx: &mut RelayContext<L>,
    ) -> Result<(), RelayError> {
        if self.handles.contains_key(&target) {
            debug!(
                "Relay '{target}' for stream '{}' already running",
                self.identity
            );
            return Ok(());
        }

        let spawn_error = |source| RelayError::SpawnError {
            stream: self.identity.key().to_string(),
            target: target.name().to_string(),
            source,
        };
        let label = format!("{}{LOG_NAME_SEPARATOR}{target}", self.identity);
        let encoder = &ctx.config.encoder;

        let (command, watchdog) = match &target {
            RelayTarget::Segmenter => {
                let segmentation = &ctx.config.segmentation;
                let layout = SegmentLayout::new(&segmentation.output_dir, &self.identity);
                layout.prepare().map_err(spawn_error)?;
                let command = LaunchCommand::segmenter(
                    label,
                    encoder,
                    &self.input,
                    segmentation,
                    &layout,
                );
                (command, segmentation.watchdog)
            }
            RelayTarget::Destination(name) => {
                let Some(destination) = ctx.config.destination(name).filter(|d| d.enabled) else {
                    warn!(
                        "Destination '{name}' is not configured or disabled; not relaying stream '{}'",
                        self.identity
                    );
                    return Ok(());
                };
                let command =
                    LaunchCommand::relay(label, encoder, &self.input, &destination.url);
                (command, destination.watchdog)
            }
        };

        if target.is_segmenter()
            && ctx.scheduler.cancel_purge(&self.identity).is_some()
        {
            debug!(
                "Cancelled pending cleanup of segmented output for stream '{}'",
                self.identity
            );
        }

        let sink = LogSink::open(&ctx.config.log_dir, &self.identity, &target)
            .map_err(spawn_error)?;
        let spec = HandleSpec {
            id: ctx.next_id(),
            identity: self.identity.clone(),
            target: target.clone(),
            sink,
            watchdog: watchdog.then(WatchdogPolicy::default),
            events: ctx.events.clone(),
        };
        let handle = RelayHandle::spawn(spec, &command, &ctx.launcher)?;

        info!(
            "Started relay '{target}' for stream '{}' (pid {})",
            self.identity,
            handle.pid()
        );
        ctx.live += 1;
        self.handles.insert(target, handle);
        Ok(())
    }

    /// Runs a start whose timer came due. The caller has already checked the epoch.
    pub fn fire_start<L: Launcher>(
        &mut self,
        target: RelayTarget,
        reason: StartReason,
        ctx: &mut RelayContext<L>,
    ) {
        self.pending = self.pending.saturating_sub(1);
        debug!(
            "Running {} start of '{target}' for stream '{}'",
            reason.as_ref(),
            self.identity
        );
        self.launch(target, ctx);
    }

    /// Handles an exit report. Returns `false` for reports about a handle this manager
    /// no longer owns.
    pub fn on_handle_exit<L: Launcher>(
        &mut self,
        event: &HandleEvent,
        ctx: &mut RelayContext<L>,
    ) -> bool {
        if self.handles.get(&event.target).map(RelayHandle::id) != Some(event.id) {
            debug!(
                "Ignoring exit of replaced relay '{}' {} for stream '{}'",
                event.target, event.id, self.identity
            );
            return false;
        }
        self.handles.remove(&event.target);

        match &event.target {
            RelayTarget::Segmenter => {
                let layout =
                    SegmentLayout::new(&ctx.config.segmentation.output_dir, &self.identity);
                ctx.scheduler.schedule_purge(
                    self.identity.clone(),
                    layout.dir().to_path_buf(),
                    SEGMENT_CLEANUP_DELAY,
                );
            }
            RelayTarget::Destination(name) => {
                let reconnect = ctx
                    .config
                    .destination(name)
                    .is_some_and(|d| d.enabled && d.auto_reconnect);
                if !reconnect {
                    return true;
                }

                if self.handles.is_empty() {
                    info!(
                        "Not reconnecting '{name}' for stream '{}': no other relay is running",
                        self.identity
                    );
                } else {
                    info!(
                        "Reconnecting '{name}' for stream '{}' in {}s",
                        self.identity,
                        RECONNECT_DELAY.as_secs()
                    );
                    self.defer(
                        event.target.clone(),
                        StartReason::Reconnect,
                        RECONNECT_DELAY,
                        ctx,
                    );
                }
            }
        }
        true
    }

    /// Signals every relay of the stream, segmenter first, and forgets them.
    ///
    /// The segment directory is purged after `cleanup_delay`, or right away when the
    /// delay is zero. Pending starts are abandoned; their timers fail the epoch check.
    pub fn stop_all<L: Launcher>(
        &mut self,
        signal: Signal,
        cleanup_delay: Duration,
        ctx: &mut RelayContext<L>,
    ) {
        if let Some(handle) = self.handles.remove(&RelayTarget::Segmenter) {
            self.terminate(&handle, signal);

            let layout = SegmentLayout::new(&ctx.config.segmentation.output_dir, &self.identity);
            if cleanup_delay.is_zero() {
                ctx.scheduler.cancel_purge(&self.identity);
                segment::reclaim(&self.identity, layout.dir());
            } else {
                ctx.scheduler.schedule_purge(
                    self.identity.clone(),
                    layout.dir().to_path_buf(),
                    cleanup_delay,
                );
            }
        }

        for handle in std::mem::take(&mut self.handles).into_values() {
            self.terminate(&handle, signal);
        }
        self.pending = 0;
    }

    fn terminate(&self, handle: &RelayHandle, signal: Signal) {
        info!(
            "Stopping relay '{}' for stream '{}' with {signal}",
            handle.target(),
            self.identity
        );
        if !handle.terminate(signal) {
            debug!(
                "Relay '{}' for stream '{}' had already exited",
                handle.target(),
                self.identity
            );
        }
    }

    fn launch<L: Launcher>(&mut self, target: RelayTarget, ctx: &mut RelayContext<L>) {
        if let Err(err) = self.start_target(target, ctx) {
            error!("{err}");
        }
    }

    fn defer<L: Launcher>(
        &mut self,
        target: RelayTarget,
        reason: StartReason,
        delay: Duration,
        ctx: &mut RelayContext<L>,
    ) {
        ctx.scheduler.schedule(
            Scheduled::Start {
                identity: self.identity.clone(),
                epoch: self.epoch,
                target,
                reason,
            },
            delay,
        );
        self.pending += 1;
    }
}
