//! In-memory fakes of the chat, modem and power ports
//!
//! Used by unit and integration tests; they record every call so tests can
//! assert on the exact traffic.

use crate::chat::{ChatTransport, RoomId};
use crate::error::{Error, Result};
use crate::modem::{
    CallId, CallState, LocationFix, LocationSource, Modem, PropertiesChanged, SmsId, SmsState,
};
use crate::power::PowerSource;
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Chat transport recording joins and sends
#[derive(Default)]
pub struct FakeChat {
    sent: Mutex<Vec<(RoomId, String)>>,
    attempts: AtomicUsize,
    joined: Mutex<Vec<RoomId>>,
    failures_left: AtomicUsize,
}

impl FakeChat {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` sends fail
    pub fn fail_next_sends(&self, n: usize) {
        self.failures_left.store(n, Ordering::SeqCst);
    }

    /// Successfully sent messages, in order
    pub fn sent(&self) -> Vec<(RoomId, String)> {
        lock(&self.sent).clone()
    }

    /// Send attempts, including failed ones
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn joined(&self) -> Vec<RoomId> {
        lock(&self.joined).clone()
    }
}

#[async_trait]
impl ChatTransport for FakeChat {
    async fn join_room(&self, room: &RoomId) -> Result<()> {
        lock(&self.joined).push(room.clone());
        Ok(())
    }

    async fn send_text(&self, room: &RoomId, body: &str) -> Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(Error::Transport(format!("send to {} refused", room)));
        }
        lock(&self.sent).push((room.clone(), body.to_string()));
        Ok(())
    }
}

/// A message held in the fake modem store
#[derive(Debug, Clone)]
pub struct FakeSms {
    pub id: SmsId,
    pub number: String,
    pub text: String,
    pub state: SmsState,
}

/// A call known to the fake modem
#[derive(Debug, Clone)]
pub struct FakeCall {
    pub id: CallId,
    pub number: String,
    pub state: CallState,
}

/// Modem with an in-memory SMS store and call list
pub struct FakeModem {
    messages: Mutex<Vec<FakeSms>>,
    calls: Mutex<Vec<FakeCall>>,
    broken: Mutex<HashSet<String>>,
    created_sms: Mutex<Vec<(String, String)>>,
    sent_sms: Mutex<Vec<SmsId>>,
    deleted: Mutex<Vec<SmsId>>,
    created_calls: Mutex<Vec<String>>,
    location_setup: Mutex<Vec<(Vec<LocationSource>, bool)>>,
    location: Mutex<Option<LocationFix>>,
    fail_create_sms: AtomicBool,
    fail_send_sms: AtomicBool,
    fail_delete: AtomicBool,
    fail_create_call: AtomicBool,
    fail_setup_location: AtomicBool,
    next_id: AtomicUsize,
    changes_tx: mpsc::Sender<PropertiesChanged>,
    changes_rx: Mutex<Option<mpsc::Receiver<PropertiesChanged>>>,
}

impl Default for FakeModem {
    fn default() -> Self {
        let (changes_tx, changes_rx) = mpsc::channel(64);
        Self {
            messages: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
            broken: Mutex::new(HashSet::new()),
            created_sms: Mutex::new(Vec::new()),
            sent_sms: Mutex::new(Vec::new()),
            deleted: Mutex::new(Vec::new()),
            created_calls: Mutex::new(Vec::new()),
            location_setup: Mutex::new(Vec::new()),
            location: Mutex::new(None),
            fail_create_sms: AtomicBool::new(false),
            fail_send_sms: AtomicBool::new(false),
            fail_delete: AtomicBool::new(false),
            fail_create_call: AtomicBool::new(false),
            fail_setup_location: AtomicBool::new(false),
            next_id: AtomicUsize::new(100),
            changes_tx,
            changes_rx: Mutex::new(Some(changes_rx)),
        }
    }
}

impl FakeModem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_sms(&self, id: &str, number: &str, text: &str, state: SmsState) {
        lock(&self.messages).push(FakeSms {
            id: SmsId(id.to_string()),
            number: number.to_string(),
            text: text.to_string(),
            state,
        });
    }

    pub fn add_call(&self, id: &str, number: &str, state: CallState) {
        lock(&self.calls).push(FakeCall {
            id: CallId(id.to_string()),
            number: number.to_string(),
            state,
        });
    }

    /// Make every accessor of the given SMS or call id fail
    pub fn break_item(&self, id: &str) {
        lock(&self.broken).insert(id.to_string());
    }

    pub fn set_location(&self, fix: LocationFix) {
        *lock(&self.location) = Some(fix);
    }

    pub fn fail_create_sms(&self, fail: bool) {
        self.fail_create_sms.store(fail, Ordering::SeqCst);
    }

    pub fn fail_send_sms(&self, fail: bool) {
        self.fail_send_sms.store(fail, Ordering::SeqCst);
    }

    pub fn fail_delete(&self, fail: bool) {
        self.fail_delete.store(fail, Ordering::SeqCst);
    }

    pub fn fail_create_call(&self, fail: bool) {
        self.fail_create_call.store(fail, Ordering::SeqCst);
    }

    pub fn fail_setup_location(&self, fail: bool) {
        self.fail_setup_location.store(fail, Ordering::SeqCst);
    }

    /// Emit a property-change notification on the feed
    pub fn notify(&self, change: PropertiesChanged) {
        let _ = self.changes_tx.try_send(change);
    }

    pub fn created_sms(&self) -> Vec<(String, String)> {
        lock(&self.created_sms).clone()
    }

    pub fn sent_sms(&self) -> Vec<SmsId> {
        lock(&self.sent_sms).clone()
    }

    pub fn deleted(&self) -> Vec<SmsId> {
        lock(&self.deleted).clone()
    }

    pub fn created_calls(&self) -> Vec<String> {
        lock(&self.created_calls).clone()
    }

    pub fn location_setup(&self) -> Vec<(Vec<LocationSource>, bool)> {
        lock(&self.location_setup).clone()
    }

    fn check(&self, id: &str) -> Result<()> {
        if lock(&self.broken).contains(id) {
            return Err(Error::ModemAccess(format!("object {} not reachable", id)));
        }
        Ok(())
    }

    fn find_sms(&self, sms: &SmsId) -> Result<FakeSms> {
        self.check(&sms.0)?;
        lock(&self.messages)
            .iter()
            .find(|m| m.id == *sms)
            .cloned()
            .ok_or_else(|| Error::ModemAccess(format!("no sms {}", sms)))
    }

    fn find_call(&self, call: &CallId) -> Result<FakeCall> {
        self.check(&call.0)?;
        lock(&self.calls)
            .iter()
            .find(|c| c.id == *call)
            .cloned()
            .ok_or_else(|| Error::ModemAccess(format!("no call {}", call)))
    }

    fn next_id(&self) -> String {
        self.next_id.fetch_add(1, Ordering::SeqCst).to_string()
    }
}

#[async_trait]
impl Modem for FakeModem {
    fn name(&self) -> String {
        "fake modem".to_string()
    }

    fn properties_changed(&self) -> mpsc::Receiver<PropertiesChanged> {
        match lock(&self.changes_rx).take() {
            Some(rx) => rx,
            None => mpsc::channel(1).1,
        }
    }

    async fn list_sms(&self) -> Result<Vec<SmsId>> {
        Ok(lock(&self.messages).iter().map(|m| m.id.clone()).collect())
    }

    async fn sms_text(&self, sms: &SmsId) -> Result<String> {
        Ok(self.find_sms(sms)?.text)
    }

    async fn sms_number(&self, sms: &SmsId) -> Result<String> {
        Ok(self.find_sms(sms)?.number)
    }

    async fn sms_state(&self, sms: &SmsId) -> Result<SmsState> {
        Ok(self.find_sms(sms)?.state)
    }

    async fn delete_sms(&self, sms: &SmsId) -> Result<()> {
        if self.fail_delete.load(Ordering::SeqCst) {
            return Err(Error::ModemAccess(format!("cannot delete sms {}", sms)));
        }
        lock(&self.messages).retain(|m| m.id != *sms);
        lock(&self.deleted).push(sms.clone());
        Ok(())
    }

    async fn create_sms(&self, destination: &str, text: &str) -> Result<SmsId> {
        lock(&self.created_sms).push((destination.to_string(), text.to_string()));
        if self.fail_create_sms.load(Ordering::SeqCst) {
            return Err(Error::ModemAccess("sms storage full".to_string()));
        }
        let id = SmsId(self.next_id());
        lock(&self.messages).push(FakeSms {
            id: id.clone(),
            number: destination.to_string(),
            text: text.to_string(),
            state: SmsState::Stored,
        });
        Ok(id)
    }

    async fn send_sms(&self, sms: &SmsId) -> Result<()> {
        lock(&self.sent_sms).push(sms.clone());
        if self.fail_send_sms.load(Ordering::SeqCst) {
            return Err(Error::ModemAccess("no network".to_string()));
        }
        for m in lock(&self.messages).iter_mut().filter(|m| m.id == *sms) {
            m.state = SmsState::Sent;
        }
        Ok(())
    }

    async fn list_calls(&self) -> Result<Vec<CallId>> {
        Ok(lock(&self.calls).iter().map(|c| c.id.clone()).collect())
    }

    async fn call_number(&self, call: &CallId) -> Result<String> {
        Ok(self.find_call(call)?.number)
    }

    async fn call_state(&self, call: &CallId) -> Result<CallState> {
        Ok(self.find_call(call)?.state)
    }

    async fn create_call(&self, destination: &str) -> Result<CallId> {
        lock(&self.created_calls).push(destination.to_string());
        if self.fail_create_call.load(Ordering::SeqCst) {
            return Err(Error::ModemAccess("voice not supported".to_string()));
        }
        let id = CallId(self.next_id());
        lock(&self.calls).push(FakeCall {
            id: id.clone(),
            number: destination.to_string(),
            state: CallState::Dialing,
        });
        Ok(id)
    }

    async fn setup_location(&self, sources: &[LocationSource], signal_location: bool) -> Result<()> {
        lock(&self.location_setup).push((sources.to_vec(), signal_location));
        if self.fail_setup_location.load(Ordering::SeqCst) {
            return Err(Error::ModemAccess("location not supported".to_string()));
        }
        Ok(())
    }

    async fn location(&self) -> Result<LocationFix> {
        lock(&self.location)
            .clone()
            .ok_or_else(|| Error::ModemAccess("location not enabled".to_string()))
    }
}

/// Battery returning a scripted reading; `None` makes the query fail
#[derive(Default)]
pub struct FakeBattery {
    reading: Mutex<Option<f64>>,
    queries: AtomicUsize,
}

impl FakeBattery {
    pub fn new(reading: Option<f64>) -> Self {
        Self {
            reading: Mutex::new(reading),
            queries: AtomicUsize::new(0),
        }
    }

    pub fn set(&self, reading: Option<f64>) {
        *lock(&self.reading) = reading;
    }

    pub fn queries(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PowerSource for FakeBattery {
    async fn percentage(&self) -> Result<f64> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        let reading = *lock(&self.reading);
        reading.ok_or_else(|| Error::Power("battery not found".to_string()))
    }
}
