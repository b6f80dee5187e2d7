//! In-memory stand-ins for the cloud API and the SSH shell.

use std::collections::VecDeque;
use std::net::IpAddr;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::DisposableError;
use crate::flow::Event;
use crate::provider::{CreateRequest, Droplet, NetworkAddress, Networks, ResourceManager};
use crate::shell::{ShellConnector, ShellLink};

pub const FAKE_ID: u64 = 31337;
pub const FAKE_V4: &str = "203.0.113.10";
pub const FAKE_V6: &str = "2001:db8::10";

fn api_error(status: u16) -> DisposableError {
    DisposableError::Api {
        status,
        message: format!("fake {status}"),
    }
}

pub fn fake_droplet(name: &str, status: &str) -> Droplet {
    let public = |ip: &str| NetworkAddress {
        ip_address: ip.into(),
        kind: "public".into(),
    };
    Droplet {
        id: FAKE_ID,
        name: name.into(),
        status: status.into(),
        networks: Networks {
            v4: vec![public(FAKE_V4)],
            v6: vec![public(FAKE_V6)],
        },
    }
}

/// Scripted [`ResourceManager`]. Statuses are served in order and the last
/// one repeats; deletes pop one scripted result per call (`None` = success)
/// and succeed once the script runs out.
pub struct FakeProvider {
    create_error: Option<u16>,
    get_error: Option<u16>,
    get_panics: bool,
    statuses: Mutex<VecDeque<&'static str>>,
    deletes: Mutex<VecDeque<Option<u16>>>,
    created: Mutex<Vec<CreateRequest>>,
    get_calls: AtomicUsize,
    delete_calls: AtomicUsize,
}

impl FakeProvider {
    pub fn new() -> Self {
        Self {
            create_error: None,
            get_error: None,
            get_panics: false,
            statuses: Mutex::new(VecDeque::new()),
            deletes: Mutex::new(VecDeque::new()),
            created: Mutex::new(Vec::new()),
            get_calls: AtomicUsize::new(0),
            delete_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_create_error(mut self, status: u16) -> Self {
        self.create_error = Some(status);
        self
    }

    pub fn with_get_error(mut self, status: u16) -> Self {
        self.get_error = Some(status);
        self
    }

    /// Make every status poll panic, as a bug in a client would.
    pub fn with_panicking_get(mut self) -> Self {
        self.get_panics = true;
        self
    }

    pub fn with_statuses(self, statuses: &[&'static str]) -> Self {
        self.statuses.lock().unwrap().extend(statuses.iter().copied());
        self
    }

    pub fn with_deletes(self, results: &[Option<u16>]) -> Self {
        self.deletes.lock().unwrap().extend(results.iter().copied());
        self
    }

    pub fn get_calls(&self) -> usize {
        self.get_calls.load(Ordering::SeqCst)
    }

    pub fn delete_calls(&self) -> usize {
        self.delete_calls.load(Ordering::SeqCst)
    }

    pub fn created(&self) -> Vec<CreateRequest> {
        self.created.lock().unwrap().clone()
    }
}

#[async_trait]
impl ResourceManager for FakeProvider {
    async fn create(&self, request: &CreateRequest) -> Result<Droplet, DisposableError> {
        self.created.lock().unwrap().push(request.clone());
        match self.create_error {
            Some(status) => Err(api_error(status)),
            None => Ok(fake_droplet(&request.name, "new")),
        }
    }

    async fn get(&self, _id: u64) -> Result<Droplet, DisposableError> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        if self.get_panics {
            panic!("fake provider panicked while polling");
        }
        if let Some(status) = self.get_error {
            return Err(api_error(status));
        }
        let mut statuses = self.statuses.lock().unwrap();
        let status = if statuses.len() > 1 {
            statuses.pop_front().unwrap_or("active")
        } else {
            statuses.front().copied().unwrap_or("active")
        };
        Ok(fake_droplet("fake", status))
    }

    async fn delete(&self, _id: u64) -> Result<(), DisposableError> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        match self.deletes.lock().unwrap().pop_front().flatten() {
            Some(status) => Err(api_error(status)),
            None => Ok(()),
        }
    }
}

/// [`ShellConnector`] that hands out a link whose input lands in a channel
/// the test holds.
pub struct FakeShell {
    input: mpsc::UnboundedSender<Vec<u8>>,
    failure: Option<String>,
    end_after: Option<(Duration, Event)>,
    dialed: Mutex<Vec<IpAddr>>,
}

impl FakeShell {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Vec<u8>>) {
        let (input, rx) = mpsc::unbounded_channel();
        let shell = Self {
            input,
            failure: None,
            end_after: None,
            dialed: Mutex::new(Vec::new()),
        };
        (shell, rx)
    }

    pub fn failing(mut self, message: &str) -> Self {
        self.failure = Some(message.into());
        self
    }

    /// Report the remote shell as closed shortly after attaching.
    pub fn closing_after(mut self, delay: Duration) -> Self {
        self.end_after = Some((delay, Event::SessionClosed));
        self
    }

    /// Report a relay fault shortly after attaching.
    pub fn faulting_after(mut self, delay: Duration, message: &str) -> Self {
        self.end_after = Some((delay, Event::Fault(message.into())));
        self
    }

    pub fn dialed(&self) -> Vec<IpAddr> {
        self.dialed.lock().unwrap().clone()
    }
}

#[async_trait]
impl ShellConnector for FakeShell {
    async fn connect(
        &self,
        address: IpAddr,
        cancel: CancellationToken,
        events: mpsc::UnboundedSender<Event>,
    ) -> Result<Option<ShellLink>, DisposableError> {
        self.dialed.lock().unwrap().push(address);
        if cancel.is_cancelled() {
            return Ok(None);
        }
        if let Some(message) = &self.failure {
            return Err(DisposableError::Ssh {
                message: message.clone(),
            });
        }
        if let Some((delay, event)) = self.end_after.clone() {
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let _ = events.send(event);
            });
        }
        Ok(Some(ShellLink::detached(self.input.clone())))
    }
}
