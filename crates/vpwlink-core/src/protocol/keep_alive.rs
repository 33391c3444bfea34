//! Tool-present keep-alive
//!
//! Modules drop out of a programming session when they stop hearing from
//! the tool. Delivery is advisory: failures are logged and never turned
//! into errors.

use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use super::{Message, RequestBuilder, KEEP_ALIVE_INTERVAL};
use crate::device::Device;
use crate::transport::Transport;

/// Longest the worker sleeps between cancellation checks
const POLL_CEILING: Duration = Duration::from_millis(250);

/// Rate-limited tool-present sender
#[derive(Debug, Clone)]
pub struct ToolPresentNotifier {
    message: Message,
    interval: Duration,
    last: Option<Instant>,
}

impl ToolPresentNotifier {
    /// Send `message` at most once per `interval`
    pub fn new(message: Message, interval: Duration) -> Self {
        Self {
            message,
            interval,
            last: None,
        }
    }

    /// Minimum time between notifications
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// When the last notification went out
    pub fn last_sent(&self) -> Option<Instant> {
        self.last
    }

    /// True when a notification is owed at `now`
    pub fn is_due(&self, now: Instant) -> bool {
        match self.last {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.interval,
        }
    }

    /// Send if the interval has elapsed. Returns true when something was
    /// sent successfully.
    pub fn notify<T: Transport>(&mut self, device: &mut Device<T>) -> bool {
        self.notify_at(Instant::now(), device)
    }

    /// [`notify`](Self::notify) with an explicit clock reading
    pub fn notify_at<T: Transport>(&mut self, now: Instant, device: &mut Device<T>) -> bool {
        if !self.is_due(now) {
            return false;
        }
        self.send(now, device)
    }

    /// Send regardless of the interval
    pub fn force_notify<T: Transport>(&mut self, device: &mut Device<T>) -> bool {
        self.send(Instant::now(), device)
    }

    fn send<T: Transport>(&mut self, now: Instant, device: &mut Device<T>) -> bool {
        // the attempt counts even when it fails, so a dead link is not hammered
        self.last = Some(now);
        match device.send_message(&self.message) {
            Ok(()) => true,
            Err(e) => {
                device
                    .logger()
                    .debug(&format!("tool present notification failed: {}", e));
                false
            }
        }
    }
}

impl Default for ToolPresentNotifier {
    fn default() -> Self {
        Self::new(RequestBuilder::default().tool_present(), KEEP_ALIVE_INTERVAL)
    }
}

/// Run `notifier` on a background thread until `cancel` fires
///
/// The device lock is held only while a notification is being sent.
pub fn spawn_keep_alive<T>(
    device: Arc<Mutex<Device<T>>>,
    mut notifier: ToolPresentNotifier,
    cancel: CancellationToken,
) -> JoinHandle<()>
where
    T: Transport + 'static,
{
    let poll = (notifier.interval() / 4).clamp(Duration::from_millis(1), POLL_CEILING);
    thread::spawn(move || {
        tracing::debug!("keep-alive started, interval {:?}", notifier.interval());
        while !cancel.is_cancelled() {
            if notifier.is_due(Instant::now()) {
                match device.lock() {
                    Ok(mut device) => {
                        notifier.notify(&mut device);
                    }
                    Err(_) => {
                        tracing::warn!("device lock poisoned, stopping keep-alive");
                        break;
                    }
                }
            }
            thread::sleep(poll);
        }
        tracing::debug!("keep-alive stopped");
    })
}
