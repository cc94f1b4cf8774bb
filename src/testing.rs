//! In-memory transport for tests
//! Records every frame written and lets tests inject notifications and link loss.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedSender;
use uuid::Uuid;

use crate::core::bluetooth::constants::{UUID_LAMP_NOTIFY_CHAR, UUID_LAMP_WRITE_CHAR};
use crate::core::bluetooth::transport::{LampTransport, LinkEvent};
use crate::error::{LampError, Result};
use crate::utils::lock;

struct MockInner {
    characteristics: Vec<Uuid>,
    open: bool,
    open_delay: Duration,
    failing_opens: usize,
    failing_writes: usize,
    opens: usize,
    closes: usize,
    subscribes: usize,
    unsubscribes: usize,
    written: Vec<Vec<u8>>,
    events: Option<UnboundedSender<LinkEvent>>,
}

pub struct MockTransport {
    inner: Mutex<MockInner>,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    /// A lamp exposing both characteristics that accepts every write
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(MockInner {
                characteristics: vec![UUID_LAMP_WRITE_CHAR, UUID_LAMP_NOTIFY_CHAR],
                open: false,
                open_delay: Duration::ZERO,
                failing_opens: 0,
                failing_writes: 0,
                opens: 0,
                closes: 0,
                subscribes: 0,
                unsubscribes: 0,
                written: Vec::new(),
                events: None,
            }),
        }
    }

    pub fn set_characteristics(&self, characteristics: Vec<Uuid>) {
        lock(&self.inner).characteristics = characteristics;
    }

    pub fn set_open_delay(&self, delay: Duration) {
        lock(&self.inner).open_delay = delay;
    }

    /// The next `count` opens fail
    pub fn fail_opens(&self, count: usize) {
        lock(&self.inner).failing_opens = count;
    }

    /// The next `count` writes fail; `usize::MAX` fails them all
    pub fn fail_writes(&self, count: usize) {
        lock(&self.inner).failing_writes = count;
    }

    /// Frames written so far, oldest first
    pub fn written_commands(&self) -> Vec<Vec<u8>> {
        lock(&self.inner).written.clone()
    }

    /// Opcode byte of every frame written so far
    pub fn written_opcodes(&self) -> Vec<u8> {
        lock(&self.inner).written.iter().map(|frame| frame[7]).collect()
    }

    pub fn clear_written(&self) {
        lock(&self.inner).written.clear();
    }

    pub fn open_count(&self) -> usize {
        lock(&self.inner).opens
    }

    pub fn close_count(&self) -> usize {
        lock(&self.inner).closes
    }

    pub fn subscribe_count(&self) -> usize {
        lock(&self.inner).subscribes
    }

    pub fn unsubscribe_count(&self) -> usize {
        lock(&self.inner).unsubscribes
    }

    /// Delivers a buffer as if the lamp had notified it
    pub fn push_notification(&self, data: Vec<u8>) {
        if let Some(events) = lock(&self.inner).events.as_ref() {
            let _ = events.send(LinkEvent::Notification(data));
        }
    }

    /// Drops the link as if the lamp went out of range
    pub fn drop_link(&self) {
        let mut inner = lock(&self.inner);
        inner.open = false;
        if let Some(events) = inner.events.as_ref() {
            let _ = events.send(LinkEvent::Disconnected);
        }
    }
}

#[async_trait]
impl LampTransport for MockTransport {
    async fn open(&self) -> Result<Vec<Uuid>> {
        let delay = lock(&self.inner).open_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut inner = lock(&self.inner);
        inner.opens += 1;
        if inner.failing_opens > 0 {
            inner.failing_opens -= 1;
            return Err(LampError::Transport("connection refused".into()));
        }
        inner.open = true;
        Ok(inner.characteristics.clone())
    }

    async fn subscribe(&self, _characteristic: Uuid, events: UnboundedSender<LinkEvent>) -> Result<()> {
        let mut inner = lock(&self.inner);
        inner.subscribes += 1;
        inner.events = Some(events);
        Ok(())
    }

    async fn unsubscribe(&self) -> Result<()> {
        let mut inner = lock(&self.inner);
        inner.unsubscribes += 1;
        inner.events = None;
        Ok(())
    }

    async fn write(&self, _characteristic: Uuid, data: &[u8]) -> Result<()> {
        let mut inner = lock(&self.inner);
        if !inner.open {
            return Err(LampError::NotConnected);
        }
        if inner.failing_writes > 0 {
            if inner.failing_writes != usize::MAX {
                inner.failing_writes -= 1;
            }
            return Err(LampError::Transport("write rejected".into()));
        }
        inner.written.push(data.to_vec());
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let mut inner = lock(&self.inner);
        inner.closes += 1;
        inner.open = false;
        inner.events = None;
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        lock(&self.inner).open
    }
}

/// A white status notification with the panel on at `brightness_pct`
pub fn white_on_notification(brightness_pct: u8) -> Vec<u8> {
    let mut data = vec![0u8; 11];
    data[8] = 1;
    data[9] = 1;
    data[10] = brightness_pct;
    data
}

/// A full RGB status notification
pub fn rgb_notification(on: bool, brightness_pct: u8, rgb: (u8, u8, u8), effect: u8) -> Vec<u8> {
    let mut data = vec![0u8; 17];
    data[8] = 2;
    data[9] = on as u8;
    data[10] = brightness_pct;
    data[13] = rgb.0;
    data[14] = rgb.1;
    data[15] = rgb.2;
    data[16] = effect;
    data
}

/// The lamp reports it switched itself off
pub fn device_off_notification() -> Vec<u8> {
    let mut data = vec![0u8; 10];
    data[8] = 255;
    data
}
