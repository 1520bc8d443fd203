//! Simple stateless pub-sub event handler
//!
//! This module provides a simple hook system that allows other parts of the shop back office (chat notifications,
//! support case tooling and the like) to subscribe to reconciliation events and react to them. The event handler is
//! stateless, i.e. the handlers have no access to the internal state of the engine. All that is received is the event
//! itself.
//!
//! Handlers are async and may fail. A failing handler is logged and otherwise ignored: the payment it reports on has
//! already been committed and is never rolled back because a notification could not be sent.
use std::{
    future::Future,
    pin::Pin,
    sync::{
        atomic::{AtomicI64, Ordering},
        Arc,
    },
};

use log::*;
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Error)]
#[error("Event hook failed. {0}")]
pub struct HookError(pub String);

impl HookError {
    pub fn new<S: Into<String>>(msg: S) -> Self {
        Self(msg.into())
    }
}

pub type HookResult = Pin<Box<dyn Future<Output = Result<(), HookError>> + Send>>;

pub type Handler<E> = Arc<dyn Fn(E) -> HookResult + Send + Sync>;

pub struct EventHandler<E: Send + Sync + 'static> {
    name: &'static str,
    listener: mpsc::Receiver<E>,
    sender: mpsc::Sender<E>,
    handler: Handler<E>,
}

impl<E: Send + Sync + 'static> EventHandler<E> {
    pub fn new(name: &'static str, buffer_size: usize, handler: Handler<E>) -> Self {
        let (sender, receiver) = mpsc::channel(buffer_size.max(1));
        Self { name, listener: receiver, sender, handler }
    }

    pub fn subscribe(&self) -> EventProducer<E> {
        EventProducer::new(self.sender.clone())
    }

    pub async fn start_handler(mut self) {
        let name = self.name;
        debug!("📬️ Starting {name} event handler");
        // drop the internal sender so that when the last subscriber is dropped, we can automatically shut down the
        // handler
        drop(self.sender);
        let jobs = Arc::new(AtomicI64::new(0));
        while let Some(ev) = self.listener.recv().await {
            trace!("📬️ Handling {name} event");
            let handler = Arc::clone(&self.handler);
            jobs.fetch_add(1, Ordering::SeqCst);
            let job = jobs.clone();
            tokio::spawn(async move {
                match (handler)(ev).await {
                    Ok(()) => trace!("📬️ {name} event handled"),
                    Err(e) => warn!("📬️ {name} hook failed. The event is dropped. {e}"),
                }
                job.fetch_sub(1, Ordering::SeqCst);
            });
        }
        while jobs.load(Ordering::SeqCst) > 0 {
            debug!("📬️ Waiting for {name} jobs to complete");
            tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;
        }
        debug!("📬️ {name} event handler has shut down");
    }
}

#[derive(Clone)]
pub struct EventProducer<E: Send + Sync> {
    sender: mpsc::Sender<E>,
}

impl<E: Send + Sync> EventProducer<E> {
    pub fn new(sender: mpsc::Sender<E>) -> Self {
        Self { sender }
    }

    pub async fn publish_event(&self, event: E) {
        if let Err(e) = self.sender.send(event).await {
            error!("📬️ Failed to send event: {e}");
        }
    }
}

#[cfg(test)]
mod test {
    use std::sync::atomic::AtomicU64;

    use super::*;

    #[tokio::test]
    async fn test_event_handler() {
        let _ = env_logger::try_init();
        let count = Arc::new(AtomicU64::new(0));
        let c2 = count.clone();
        let handler = Arc::new(move |v: u64| {
            let count = count.clone();
            Box::pin(async move {
                debug!("Handler received {v}");
                let _ = count.fetch_add(v, Ordering::SeqCst);
                tokio::time::sleep(tokio::time::Duration::from_millis(20)).await;
                Ok(())
            }) as HookResult
        });
        let event_handler = EventHandler::new("test", 1, handler);
        let producer_1 = event_handler.subscribe();
        let producer_2 = event_handler.subscribe();
        tokio::spawn(async move {
            for i in 0..5 {
                let v = i * 2 + 1;
                producer_1.publish_event(v).await;
                debug!("P1 publishing {v}");
            }
        });
        tokio::spawn(async move {
            for i in 0..5 {
                let v = i * 2;
                producer_2.publish_event(v).await;
                debug!("P2 publishing {v}");
            }
        });

        event_handler.start_handler().await;
        debug!("Handler done");
        assert_eq!(c2.load(Ordering::SeqCst), 45);
    }

    #[tokio::test]
    async fn failing_hooks_do_not_stop_the_handler() {
        let _ = env_logger::try_init();
        let count = Arc::new(AtomicU64::new(0));
        let c2 = count.clone();
        let handler = Arc::new(move |v: u64| {
            let count = count.clone();
            Box::pin(async move {
                if v % 2 == 0 {
                    return Err(HookError::new(format!("{v} is even")));
                }
                count.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }) as HookResult
        });
        let event_handler = EventHandler::new("flaky", 4, handler);
        let producer = event_handler.subscribe();
        tokio::spawn(async move {
            for v in 0..6 {
                producer.publish_event(v).await;
            }
        });
        event_handler.start_handler().await;
        assert_eq!(c2.load(Ordering::SeqCst), 3);
    }
}
