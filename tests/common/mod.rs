//! Shared helpers for the integration tests

#![allow(dead_code)]

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use syngraph::net::{Command, Connection, Message, MessageHandler};
use syngraph::Mirror;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Poll `cond` for up to five seconds
pub fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    cond()
}

/// A hand-driven controller that logs everything it receives.
///
/// With `answer` set it follows the handshake like a real controller;
/// without it, it never says HELLO.
pub struct Recorder {
    pub mirror: Mutex<Mirror>,
    pub log: Mutex<Vec<Message>>,
    answer: bool,
}

impl Recorder {
    pub fn new(answer: bool) -> Arc<Self> {
        Arc::new(Self {
            mirror: Mutex::new(Mirror::new()),
            log: Mutex::new(Vec::new()),
            answer,
        })
    }

    pub fn commands(&self) -> Vec<Command> {
        self.log.lock().iter().map(|m| m.command).collect()
    }

    pub fn count(&self, command: Command) -> usize {
        self.log.lock().iter().filter(|m| m.command == command).count()
    }
}

impl MessageHandler for Recorder {
    fn on_message(&self, connection: &Connection, message: Message) {
        self.log.lock().push(message.clone());
        if !self.answer {
            return;
        }
        let replies = self.mirror.lock().apply(&message).unwrap_or_default();
        if message.command == Command::SendId {
            connection.set_id(self.mirror.lock().id());
        }
        for reply in replies {
            connection.send(reply);
        }
    }
}
