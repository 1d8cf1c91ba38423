//! In-process observer fan-out for committed interactions.
//!
//! Observers are plain values (a name plus an async function) registered at
//! startup. Each notification calls them one after another in registration
//! order; a failing or panicking observer is logged and counted and never
//! reaches the command that triggered it.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use futures::future::BoxFuture;
use futures::FutureExt;
use serde::Serialize;

use crate::models::VideoEvent;

type ObserverFn = dyn Fn(Arc<VideoEvent>) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync;

/// A named event observer
#[derive(Clone)]
pub struct Observer {
    name: String,
    callback: Arc<ObserverFn>,
}

impl Observer {
    pub fn new<F, Fut>(name: impl Into<String>, callback: F) -> Self
    where
        F: Fn(Arc<VideoEvent>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self {
            name: name.into(),
            callback: Arc::new(move |event| callback(event).boxed()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Runs the observer, turning a panic into an error
    async fn update(&self, event: Arc<VideoEvent>) -> anyhow::Result<()> {
        let fut = std::panic::catch_unwind(AssertUnwindSafe(|| (self.callback)(event)))
            .map_err(|panic| anyhow::anyhow!("panicked: {}", panic_message(&*panic)))?;

        match AssertUnwindSafe(fut).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => Err(anyhow::anyhow!("panicked: {}", panic_message(&*panic))),
        }
    }
}

impl std::fmt::Debug for Observer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Observer").field("name", &self.name).finish()
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Outcome of notifying every observer about one event
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FanoutReport {
    pub notified: usize,
    /// Names of observers that failed, in call order
    pub failed: Vec<String>,
}

/// Running totals across all notifications
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FanoutTotals {
    pub notifications: u64,
    pub observer_failures: u64,
}

/// Registry of observers and the broadcast over them
#[derive(Default)]
pub struct EventFanout {
    observers: RwLock<Vec<Observer>>,
    notifications: AtomicU64,
    observer_failures: AtomicU64,
}

impl EventFanout {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, observer: Observer) {
        tracing::info!(observer = observer.name(), "Registered event observer");
        if let Ok(mut observers) = self.observers.write() {
            observers.push(observer);
        }
    }

    /// Removes every observer named `name`; returns whether any was removed
    pub fn unregister(&self, name: &str) -> bool {
        match self.observers.write() {
            Ok(mut observers) => {
                let before = observers.len();
                observers.retain(|o| o.name() != name);
                observers.len() != before
            }
            Err(_) => false,
        }
    }

    pub fn observer_names(&self) -> Vec<String> {
        self.snapshot()
            .iter()
            .map(|o| o.name().to_string())
            .collect()
    }

    fn snapshot(&self) -> Vec<Observer> {
        self.observers
            .read()
            .map(|observers| observers.clone())
            .unwrap_or_default()
    }

    /// Calls every observer with `event` in registration order
    pub async fn notify(&self, event: VideoEvent) -> FanoutReport {
        let event = Arc::new(event);
        let observers = self.snapshot();
        let mut report = FanoutReport::default();

        self.notifications.fetch_add(1, Ordering::Relaxed);

        for observer in &observers {
            match observer.update(Arc::clone(&event)).await {
                Ok(()) => report.notified += 1,
                Err(e) => {
                    self.observer_failures.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(
                        observer = observer.name(),
                        event_type = event.event_type(),
                        user_id = event.user_id(),
                        kind = "OBSERVER_FAILED",
                        error = %e,
                        "Observer failed"
                    );
                    report.failed.push(observer.name().to_string());
                }
            }
        }

        report
    }

    pub fn totals(&self) -> FanoutTotals {
        FanoutTotals {
            notifications: self.notifications.load(Ordering::Relaxed),
            observer_failures: self.observer_failures.load(Ordering::Relaxed),
        }
    }
}
