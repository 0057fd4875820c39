//! Scripted connector for tests
//!
//! Counts connect attempts per username, can fail or hold connects behind a
//! gate, keeps each session's event sender for injection and counts
//! disconnects.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

use super::{EventSender, UpstreamConnector, UpstreamError, UpstreamEvent, UpstreamSession};

#[derive(Default)]
struct Script {
    attempts: HashMap<String, usize>,
    failing: HashSet<String>,
    senders: HashMap<String, EventSender>,
    disconnects: HashMap<String, Arc<AtomicUsize>>,
}

/// Test [`UpstreamConnector`]
#[derive(Clone, Default)]
pub struct ScriptedConnector {
    script: Arc<Mutex<Script>>,
    gate: Arc<Notify>,
    gated: Arc<Mutex<HashSet<String>>>,
    waiting: Arc<AtomicUsize>,
}

impl ScriptedConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every connect for `username` fail
    pub fn fail(&self, username: &str) {
        self.script.lock().unwrap().failing.insert(username.to_string());
    }

    /// Hold connects for `username` until [`Self::release`]
    pub fn hold(&self, username: &str) {
        self.gated.lock().unwrap().insert(username.to_string());
    }

    /// Let held connects proceed
    pub fn release(&self) {
        self.gated.lock().unwrap().clear();
        self.gate.notify_waiters();
    }

    /// Number of connects currently parked behind the gate
    pub fn waiting(&self) -> usize {
        self.waiting.load(Ordering::SeqCst)
    }

    pub fn attempts(&self, username: &str) -> usize {
        self.script
            .lock()
            .unwrap()
            .attempts
            .get(username)
            .copied()
            .unwrap_or(0)
    }

    pub fn disconnects(&self, username: &str) -> usize {
        self.script
            .lock()
            .unwrap()
            .disconnects
            .get(username)
            .map(|c| c.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    /// Emit an event on the most recent session for `username`
    pub fn emit(&self, username: &str, event: UpstreamEvent) {
        let script = self.script.lock().unwrap();
        let sender = script
            .senders
            .get(username)
            .unwrap_or_else(|| panic!("no session for {}", username));
        sender.send(event).unwrap();
    }

    /// Wait until `count` connects are parked behind the gate
    pub async fn wait_for_waiting(&self, count: usize) {
        for _ in 0..500 {
            if self.waiting() >= count {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        }
        panic!("connects never reached the gate");
    }
}

#[async_trait]
impl UpstreamConnector for ScriptedConnector {
    async fn connect(
        &self,
        username: &str,
        events: EventSender,
    ) -> Result<Box<dyn UpstreamSession>, UpstreamError> {
        {
            let mut script = self.script.lock().unwrap();
            *script.attempts.entry(username.to_string()).or_insert(0) += 1;
            script.senders.insert(username.to_string(), events);
        }

        loop {
            let notified = self.gate.notified();
            if !self.gated.lock().unwrap().contains(username) {
                break;
            }
            self.waiting.fetch_add(1, Ordering::SeqCst);
            notified.await;
            self.waiting.fetch_sub(1, Ordering::SeqCst);
        }

        let mut script = self.script.lock().unwrap();
        if script.failing.contains(username) {
            return Err(UpstreamError::Connect(format!("{} is offline", username)));
        }

        let counter = Arc::clone(
            script
                .disconnects
                .entry(username.to_string())
                .or_insert_with(|| Arc::new(AtomicUsize::new(0))),
        );
        Ok(Box::new(ScriptedSession { disconnects: counter }))
    }
}

struct ScriptedSession {
    disconnects: Arc<AtomicUsize>,
}

impl UpstreamSession for ScriptedSession {
    fn disconnect(self: Box<Self>) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
    }
}
