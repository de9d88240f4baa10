use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::oneshot;

use crate::lock::LockRecovered;
use crate::types::{JsrdbgError, Result};

/// A single-occupancy wait for an out-of-band reply.
///
/// [`ReplySlot::wait`] arms the slot and waits up to `timeout` for a value
/// offered through [`ReplySlot::offer`] or [`ReplySlot::deliver`]. A waiter
/// armed with [`ReplySlot::wait_matching`] only claims values its filter
/// accepts. Values nobody claims are handed back by `offer`; `deliver` falls
/// through to the default handler, which logs and drops them. The slot
/// returns to that default once a wait completes, times out, or is
/// superseded.
pub struct ReplySlot<T> {
    inner: Arc<Mutex<Armed<T>>>,
}

type Filter<T> = Box<dyn Fn(&T) -> bool + Send>;

struct Armed<T> {
    generation: u64,
    waiter: Option<(oneshot::Sender<T>, Filter<T>)>,
}

impl<T> Clone for ReplySlot<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> Default for ReplySlot<T> {
    fn default() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Armed {
                generation: 0,
                waiter: None,
            })),
        }
    }
}

impl<T: Send + 'static> ReplySlot<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_armed(&self) -> bool {
        self.inner.lock_recovered("ReplySlot::is_armed").waiter.is_some()
    }

    /// Arm the slot and wait for the next value.
    ///
    /// A second wait while one is outstanding supersedes it; the earlier
    /// waiter fails with [`JsrdbgError::Cancelled`].
    pub async fn wait(&self, timeout: Duration) -> Result<T> {
        self.wait_matching(timeout, |_| true).await
    }

    /// Like [`ReplySlot::wait`], but only values for which `accept` returns
    /// `true` complete the wait.
    pub async fn wait_matching<F>(&self, timeout: Duration, accept: F) -> Result<T>
    where
        F: Fn(&T) -> bool + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let generation = {
            let mut armed = self.inner.lock_recovered("ReplySlot::wait");
            armed.generation = armed.generation.wrapping_add(1);
            armed.waiter = Some((tx, Box::new(accept)));
            armed.generation
        };

        let outcome = tokio::time::timeout(timeout, rx).await;

        {
            let mut armed = self.inner.lock_recovered("ReplySlot::wait");
            if armed.generation == generation {
                armed.waiter = None;
            }
        }

        match outcome {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(_superseded)) => Err(JsrdbgError::Cancelled),
            Err(_elapsed) => {
                tracing::debug!(
                    target: "jsrdbg.wire",
                    timeout_ms = timeout.as_millis() as u64,
                    "reply wait timed out"
                );
                Err(JsrdbgError::Timeout)
            }
        }
    }

    /// Hand `value` to the armed waiter if it accepts it. Returns the value
    /// when nobody claimed it.
    pub fn offer(&self, value: T) -> Option<T> {
        let mut armed = self.inner.lock_recovered("ReplySlot::offer");
        let accepted = armed
            .waiter
            .as_ref()
            .is_some_and(|(_, accept)| accept(&value));
        if !accepted {
            return Some(value);
        }
        match armed.waiter.take() {
            Some((sender, _)) => sender.send(value).err(),
            None => Some(value),
        }
    }

    /// Hand `value` to the armed waiter. Returns `false` when the default
    /// handler consumed it instead.
    pub fn deliver(&self, value: T) -> bool {
        match self.offer(value) {
            None => true,
            Some(_unclaimed) => {
                tracing::debug!(target: "jsrdbg.wire", "no reply waiter armed; dropping value");
                false
            }
        }
    }
}
