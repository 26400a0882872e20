//! Controller event loop
//!
//! One task owns the dispatcher and the session table. Session tasks feed
//! it through a single channel, so every event runs to completion before
//! the next one starts.

use crate::config::Settings;
use crate::dataplane::{DeviceEvent, Dispatcher};
use crate::southbound::{self, SessionEvent, Sessions};
use crate::telemetry::MetricsRegistry;
use crate::{Error, Result};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Capacity of the session → controller event queue
const EVENT_QUEUE_DEPTH: usize = 1024;

pub struct Controller {
    dispatcher: Dispatcher,
    sessions: Sessions,
}

impl Controller {
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self {
            dispatcher,
            sessions: Sessions::new(),
        }
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn sessions(&self) -> &Sessions {
        &self.sessions
    }

    /// Route one session event through the dispatcher
    pub fn on_session_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Opened {
                device,
                session,
                sender,
            } => {
                if self.sessions.attach(device, session, sender) {
                    info!("device {}: session {} replaces the previous one", device, session);
                }
                self.dispatch(DeviceEvent::Connected(device));
            }
            SessionEvent::Message {
                device,
                session,
                event,
            } => {
                if self.sessions.is_current(device, session) {
                    self.dispatch(event);
                } else {
                    debug!("device {}: dropping event from stale session {}", device, session);
                }
            }
            SessionEvent::Closed { device, session } => {
                if self.sessions.detach(device, session) {
                    self.dispatch(DeviceEvent::Disconnected(device));
                }
            }
        }
    }

    fn dispatch(&mut self, event: DeviceEvent) {
        for command in self.dispatcher.handle(event) {
            self.sessions.deliver(command);
        }
    }

    pub fn log_stats(&self) {
        debug!(
            "{} session(s), {} ready device(s)",
            self.sessions.len(),
            self.dispatcher.ready_devices()
        );
        for (name, value) in self.dispatcher.metrics().export() {
            debug!("{} = {}", name, value);
        }
    }
}

/// Run the controller until interrupted or the listener fails
pub async fn run(settings: Settings) -> Result<()> {
    let metrics = Arc::new(MetricsRegistry::new());
    let dispatcher = Dispatcher::new(
        settings.policy.clone(),
        settings.load_balancer(),
        Arc::clone(&metrics),
    );
    let mut controller = Controller::new(dispatcher);

    info!(
        "virtual IP {} -> {} backend(s), {:?} selection",
        settings.service.virtual_ip(),
        settings.service.backends().len(),
        settings.selection
    );

    let listener = southbound::bind(settings.listen).await?;
    let (events_tx, mut events) = mpsc::channel(EVENT_QUEUE_DEPTH);
    let mut accept = tokio::spawn(southbound::serve(listener, events_tx));

    let mut stats_timer = tokio::time::interval(settings.stats_interval);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("interrupted, shutting down");
                accept.abort();
                return Ok(());
            }
            result = &mut accept => {
                return match result {
                    Ok(result) => result,
                    Err(e) => Err(Error::Southbound(e.to_string())),
                };
            }
            _ = stats_timer.tick() => controller.log_stats(),
            event = events.recv() => match event {
                Some(event) => controller.on_session_event(event),
                None => return Ok(()),
            },
        }
    }
}
