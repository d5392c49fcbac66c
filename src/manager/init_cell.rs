use std::future::Future;
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;

enum InitState<T, E> {
    Uninitialized,
    Initializing,
    Ready(Arc<T>),
    Failed(Arc<E>),
}

/// Run-once initialization: Uninitialized -> Initializing -> Ready | Failed.
///
/// The first caller runs the initializer; concurrent callers wait until it
/// settles and then all observe the same value (or the same error). Nobody
/// sees the value before the initializer has returned.
pub struct InitCell<T, E> {
    state: Mutex<InitState<T, E>>,
    settled: Notify,
}

impl<T, E> Default for InitCell<T, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, E> InitCell<T, E> {
    pub fn new() -> Self {
        Self { state: Mutex::new(InitState::Uninitialized), settled: Notify::new() }
    }

    /// The value, if initialization already succeeded.
    pub fn get(&self) -> Option<Arc<T>> {
        match &*self.state.lock().unwrap_or_else(|e| e.into_inner()) {
            InitState::Ready(v) => Some(v.clone()),
            _ => None,
        }
    }

    pub async fn get_or_init<F, Fut>(&self, init: F) -> Result<Arc<T>, Arc<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Arc<T>, E>>,
    {
        let mut init = Some(init);
        loop {
            // register before looking at the state so a settle in between is not missed
            let notified = self.settled.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let claimed = {
                let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
                match &*state {
                    InitState::Ready(v) => return Ok(v.clone()),
                    InitState::Failed(e) => return Err(e.clone()),
                    InitState::Initializing => false,
                    InitState::Uninitialized => {
                        *state = InitState::Initializing;
                        true
                    }
                }
            };

            if claimed {
                if let Some(f) = init.take() {
                    let settled = match f().await {
                        Ok(v) => InitState::Ready(v),
                        Err(e) => InitState::Failed(Arc::new(e)),
                    };
                    *self.state.lock().unwrap_or_else(|e| e.into_inner()) = settled;
                    self.settled.notify_waiters();
                }
                continue;
            }

            notified.await;
        }
    }
}
