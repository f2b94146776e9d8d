//! Degradations are failures the plugin recovers from but that the host
//! should still hear about: a tap that could not be re-armed, an observer
//! that could not be attached, a message whose payload did not decode.

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use tracing::trace;

use crate::actor::dispatcher::Message;
use crate::model::application::{PayloadError, pid_t};
use crate::sys::accessibility::AxError;
use crate::sys::event_tap::TapError;

const REPORT_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Degradation {
    TapRearmFailed(TapError),
    ObserverAttachFailed { pid: pid_t, name: String, error: AxError },
    MalformedPayload { message: Message, error: PayloadError },
}

/// Cloneable sending half of the degradation channel.
///
/// Reports are dropped rather than blocking when nobody drains the channel.
#[derive(Clone, Debug, Default)]
pub struct Reporter {
    tx: Option<Sender<Degradation>>,
}

impl Reporter {
    pub fn channel() -> (Self, Receiver<Degradation>) {
        let (tx, rx) = bounded(REPORT_CAPACITY);
        (Self { tx: Some(tx) }, rx)
    }

    pub fn disabled() -> Self { Self { tx: None } }

    pub fn report(&self, degradation: Degradation) {
        let Some(tx) = &self.tx else {
            return;
        };
        match tx.try_send(degradation) {
            Ok(()) => {}
            Err(TrySendError::Full(d)) => trace!(?d, "degradation channel full, dropping report"),
            Err(TrySendError::Disconnected(_)) => {}
        }
    }
}
