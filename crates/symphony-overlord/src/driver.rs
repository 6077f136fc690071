//! Event and heartbeat delivery.
//!
//! Each sink gets its own task with its own table subscription, so a slow
//! overlord never holds up the others. A sink that falls behind the event
//! channel is given a heartbeat instead: every overlord re-derives its view
//! from the live table, so missed events only delay a reaction.

use std::sync::Arc;
use std::time::Duration;

use symphony_table::{ConnectionTable, TableEvent};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::config::OverlordConfig;
use crate::error::Result;
use crate::leaf::LeafOverlord;
use crate::near::NearOverlord;
use crate::overlord::{ConnectionOverlord, OverlordContext};
use crate::shortcut::ShortcutOverlord;
use crate::status::NeighborStatusMonitor;

/// Something the driver feeds table events and heartbeats to.
pub trait EventSink: Send + Sync {
    fn label(&self) -> &'static str;

    fn on_event(&self, event: &TableEvent);

    fn on_heartbeat(&self) {}
}

impl<T: ConnectionOverlord + ?Sized> EventSink for T {
    fn label(&self) -> &'static str {
        self.name()
    }

    fn on_event(&self, event: &TableEvent) {
        self.handle_event(event);
    }

    fn on_heartbeat(&self) {
        self.heartbeat();
    }
}

impl EventSink for NeighborStatusMonitor {
    fn label(&self) -> &'static str {
        "status"
    }

    fn on_event(&self, event: &TableEvent) {
        self.handle_event(event);
    }
}

/// Running delivery tasks. Dropping the driver also stops them.
#[derive(Debug)]
pub struct OverlordDriver {
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl OverlordDriver {
    /// Start one task per sink. Must be called from within a tokio runtime.
    pub fn spawn(
        table: &ConnectionTable,
        sinks: Vec<Arc<dyn EventSink>>,
        heartbeat: Duration,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        let tasks = sinks
            .into_iter()
            .map(|sink| {
                // Subscribe before spawning so nothing published from here on is missed.
                let events = table.subscribe();
                let stop = shutdown.subscribe();
                tokio::spawn(run_sink(sink, events, stop, heartbeat))
            })
            .collect::<Vec<_>>();
        info!(local = %table.local_address(), sinks = tasks.len(), "Overlord driver started");
        Self { shutdown, tasks }
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Stop every task and wait for them to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!("Overlord task ended abnormally: {}", e);
            }
        }
        debug!("Overlord driver stopped");
    }
}

async fn run_sink(
    sink: Arc<dyn EventSink>,
    mut events: tokio::sync::broadcast::Receiver<TableEvent>,
    mut stop: watch::Receiver<bool>,
    heartbeat: Duration,
) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + heartbeat, heartbeat);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            changed = stop.changed() => {
                if changed.is_err() || *stop.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                sink.on_heartbeat();
            }
            event = events.recv() => {
                match event {
                    Ok(event) => sink.on_event(&event),
                    Err(RecvError::Lagged(missed)) => {
                        warn!(sink = sink.label(), missed, "Table events dropped; resyncing");
                        sink.on_heartbeat();
                    }
                    Err(RecvError::Closed) => {
                        debug!(sink = sink.label(), "Connection table gone");
                        break;
                    }
                }
            }
        }
    }
}

/// The leaf, near and shortcut overlords of one node, wired together.
#[derive(Debug, Clone)]
pub struct OverlordSet {
    pub leaf: LeafOverlord,
    pub near: NearOverlord,
    pub shortcut: ShortcutOverlord,
    heartbeat: Duration,
}

impl OverlordSet {
    pub fn new(ctx: OverlordContext, config: &OverlordConfig) -> Result<Self> {
        config.validate()?;
        let leaf = LeafOverlord::new(ctx.clone(), config.leaf.clone(), config.seed);
        let near = NearOverlord::new(ctx.clone(), config.near.clone(), config.seed);
        let shortcut = ShortcutOverlord::new(ctx, config.shortcut.clone(), config.seed);
        shortcut.set_ring_gate(Arc::new(near.clone()));
        Ok(Self {
            leaf,
            near,
            shortcut,
            heartbeat: config.heartbeat,
        })
    }

    pub fn overlords(&self) -> [&dyn ConnectionOverlord; 3] {
        [&self.leaf, &self.near, &self.shortcut]
    }

    pub fn set_active(&self, active: bool) {
        for overlord in self.overlords() {
            overlord.set_active(active);
        }
    }

    pub fn start(&self) {
        for overlord in self.overlords() {
            overlord.start();
        }
    }

    pub fn stop(&self) {
        for overlord in self.overlords() {
            overlord.stop();
        }
    }

    /// Whether the node holds its place on the ring.
    pub fn is_connected(&self) -> bool {
        self.near.is_connected()
    }

    pub fn sinks(&self) -> Vec<Arc<dyn EventSink>> {
        vec![
            Arc::new(self.leaf.clone()) as Arc<dyn EventSink>,
            Arc::new(self.near.clone()) as Arc<dyn EventSink>,
            Arc::new(self.shortcut.clone()) as Arc<dyn EventSink>,
        ]
    }

    /// Start the overlords and their delivery tasks.
    pub fn spawn(&self, table: &ConnectionTable) -> OverlordDriver {
        self.start();
        OverlordDriver::spawn(table, self.sinks(), self.heartbeat)
    }
}
