//! User interaction and measurement triggering.
//!
//! Keys reach a session through a cloneable [`UserKeys`] handle. Every
//! suspension point in the session (trigger wait, calibration exchange,
//! acquisition receive) races the device against the key inbox, so an abort
//! or terminate returns control promptly with a classified error.
//!
//! For switch triggering the session lends its port to a background task that
//! polls the instrument switch. The task is cancelled through a oneshot
//! channel and always joined, handing the port back, before the wait returns.

use crate::adapters::Transport;
use crate::error::InstError;
use crate::hardware::{BackendError, SwitchPoller};
use crate::instrument::codes::DeviceCode;
use crate::instrument::options::{TriggerReturn, TriggerStyle};
use std::future::Future;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

/// A key the user pressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserKey {
    /// Abort the current operation
    Abort,
    /// Terminate the whole job
    Terminate,
    /// Take the measurement
    Trigger,
    /// Any other command key
    Command(char),
}

impl UserKey {
    /// Classified error an interrupted operation returns.
    pub fn into_error(self) -> InstError {
        match self {
            Self::Abort => InstError::from_code(DeviceCode::USER_ABORT),
            Self::Terminate => InstError::from_code(DeviceCode::USER_TERM),
            Self::Trigger => InstError::from_code(DeviceCode::USER_TRIG),
            Self::Command(c) => InstError::with_detail(DeviceCode::USER_CMND, c.to_string()),
        }
    }
}

/// Handle for delivering keys to a session.
#[derive(Debug, Clone)]
pub struct UserKeys {
    tx: mpsc::UnboundedSender<UserKey>,
}

impl UserKeys {
    /// Deliver a key. Returns false once the session is gone.
    pub fn press(&self, key: UserKey) -> bool {
        self.tx.send(key).is_ok()
    }
}

/// Receiving end of the key channel, owned by the session.
#[derive(Debug)]
pub(crate) struct KeyInbox {
    tx: mpsc::UnboundedSender<UserKey>,
    rx: mpsc::UnboundedReceiver<UserKey>,
}

impl KeyInbox {
    pub(crate) fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self { tx, rx }
    }

    pub(crate) fn handle(&self) -> UserKeys {
        UserKeys {
            tx: self.tx.clone(),
        }
    }

    /// Drop every queued key, returning how many there were.
    pub(crate) fn clear(&mut self) -> usize {
        let mut dropped = 0;
        while self.rx.try_recv().is_ok() {
            dropped += 1;
        }
        dropped
    }

    /// Next key; pending forever while none arrives.
    pub(crate) async fn next(&mut self) -> UserKey {
        match self.rx.recv().await {
            Some(key) => key,
            // The inbox holds a sender, so the channel never closes.
            None => std::future::pending().await,
        }
    }
}

/// Run `fut` unless a non-trigger key arrives first.
pub(crate) async fn interruptible<F: Future>(
    keys: &mut KeyInbox,
    fut: F,
) -> Result<F::Output, UserKey> {
    tokio::pin!(fut);
    loop {
        tokio::select! {
            biased;
            key = keys.next() => {
                if key != UserKey::Trigger {
                    debug!("operation interrupted by {:?}", key);
                    return Err(key);
                }
            }
            out = &mut fut => return Ok(out),
        }
    }
}

/// Trigger wait parameters.
#[derive(Debug, Clone, Copy)]
pub(crate) struct TriggerSettings {
    pub style: TriggerStyle,
    pub trigger_return: TriggerReturn,
    pub timeout: Duration,
    pub poll_interval: Duration,
}

/// Why a trigger wait ended without a go-ahead.
#[derive(Debug)]
pub(crate) enum TriggerError {
    /// A key ended the wait
    Key(UserKey),
    /// Nothing happened before the timeout
    TimedOut,
    /// Switch polling failed
    Poll(BackendError),
    /// The poll task died and took the port with it
    TaskFailed,
}

fn keyboard_outcome(key: UserKey, trigger_return: TriggerReturn) -> Result<(), TriggerError> {
    match key {
        UserKey::Trigger if trigger_return == TriggerReturn::Return => {
            Err(TriggerError::Key(UserKey::Trigger))
        }
        UserKey::Trigger => Ok(()),
        other => Err(TriggerError::Key(other)),
    }
}

/// Wait until the measurement should start.
pub(crate) async fn wait_for_trigger(
    keys: &mut KeyInbox,
    port: &mut Option<Box<dyn Transport>>,
    poller: Box<dyn SwitchPoller>,
    settings: TriggerSettings,
) -> Result<(), TriggerError> {
    let deadline = tokio::time::sleep(settings.timeout);
    tokio::pin!(deadline);

    match settings.style {
        TriggerStyle::Program => Ok(()),
        TriggerStyle::Keyboard => {
            debug!("waiting for trigger key");
            tokio::select! {
                biased;
                key = keys.next() => keyboard_outcome(key, settings.trigger_return),
                _ = &mut deadline => Err(TriggerError::TimedOut),
            }
        }
        TriggerStyle::KeyboardSwitch => {
            let Some(owned) = port.take() else {
                return Err(TriggerError::TaskFailed);
            };
            debug!("waiting for trigger key or instrument switch");

            let (cancel_tx, cancel_rx) = oneshot::channel::<()>();
            let mut task = tokio::spawn(poll_switch(owned, poller, cancel_rx, settings.poll_interval));

            let outcome = tokio::select! {
                biased;
                key = keys.next() => keyboard_outcome(key, settings.trigger_return),
                joined = &mut task => {
                    return match joined {
                        Ok((owned, polled)) => {
                            *port = Some(owned);
                            match polled {
                                Ok(true) => Ok(()),
                                Ok(false) => Err(TriggerError::TaskFailed),
                                Err(e) => Err(TriggerError::Poll(e)),
                            }
                        }
                        Err(e) => {
                            warn!("switch poll task failed: {}", e);
                            Err(TriggerError::TaskFailed)
                        }
                    };
                }
                _ = &mut deadline => Err(TriggerError::TimedOut),
            };

            // Stop the poller and take the port back before returning.
            let _ = cancel_tx.send(());
            match task.await {
                Ok((owned, _)) => {
                    *port = Some(owned);
                    outcome
                }
                Err(e) => {
                    warn!("switch poll task failed: {}", e);
                    Err(TriggerError::TaskFailed)
                }
            }
        }
    }
}

/// Poll the switch until pressed, failed or cancelled.
async fn poll_switch(
    mut port: Box<dyn Transport>,
    mut poller: Box<dyn SwitchPoller>,
    mut cancel: oneshot::Receiver<()>,
    interval: Duration,
) -> (Box<dyn Transport>, Result<bool, BackendError>) {
    let result = loop {
        tokio::select! {
            biased;
            _ = &mut cancel => break Ok(false),
            polled = poller.poll(port.as_mut()) => match polled {
                Ok(true) => {
                    debug!("instrument switch pressed");
                    break Ok(true);
                }
                Ok(false) => {}
                Err(e) => break Err(e),
            },
        }
        tokio::select! {
            biased;
            _ = &mut cancel => break Ok(false),
            _ = tokio::time::sleep(interval) => {}
        }
    };
    (port, result)
}
