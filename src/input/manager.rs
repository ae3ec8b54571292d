use std::collections::HashMap;

use thiserror::Error;
use tokio::sync::mpsc;

use crate::config::SessionConfig;
use crate::drivers::dualshock4::{
    codec::{OutputRequest, Transport},
    driver::{Driver, DriverError, DriverHandle},
    event::Event,
    session::{ConnectionSession, SessionSnapshot},
    transport::HidTransport,
};

/// Possible errors from the [Manager]
#[derive(Error, Debug)]
pub enum ManagerError {
    #[error("device '{0}' is already attached")]
    AlreadyAttached(String),
    #[error("no device '{0}' is attached")]
    NotFound(String),
    #[error("{0}")]
    Driver(#[from] DriverError),
}

/// Manages all connected controllers
///
/// Every attached device runs its own driver task with its own session. The
/// manager only ever sees the snapshots those sessions publish.
pub struct Manager {
    config: SessionConfig,
    /// Mapping of all currently managed devices by id (e.g. "/dev/hidraw3")
    devices: HashMap<String, DriverHandle>,
}

impl Manager {
    /// Returns a new instance of the controller [Manager]
    pub fn new(config: SessionConfig) -> Manager {
        Manager {
            config,
            devices: HashMap::new(),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Open the controller at the given hidraw path and start driving it
    pub fn attach_path(
        &mut self,
        path: &str,
        events: Option<mpsc::Sender<Event>>,
    ) -> Result<(), ManagerError> {
        self.ensure_free(path)?;
        let driver = Driver::open(path, &self.config)?;
        self.start(path, driver, events);
        Ok(())
    }

    /// Start driving a controller over the given transports. A device that
    /// reconnects always gets a brand-new session.
    pub fn attach<T: HidTransport + 'static>(
        &mut self,
        id: &str,
        transport: Transport,
        reader: T,
        writer: T,
        events: Option<mpsc::Sender<Event>>,
    ) -> Result<(), ManagerError> {
        self.ensure_free(id)?;
        let session = ConnectionSession::new(id, transport, &self.config);
        let driver = Driver::new(session, reader, writer, &self.config);
        self.start(id, driver, events);
        Ok(())
    }

    fn ensure_free(&mut self, id: &str) -> Result<(), ManagerError> {
        match self.devices.get(id) {
            Some(handle) if handle.is_finished() => {
                log::debug!("Replacing finished driver for {id}");
                self.devices.remove(id);
                Ok(())
            }
            Some(_) => Err(ManagerError::AlreadyAttached(id.to_string())),
            None => Ok(()),
        }
    }

    fn start<T: HidTransport + 'static>(
        &mut self,
        id: &str,
        driver: Driver<T>,
        events: Option<mpsc::Sender<Event>>,
    ) {
        log::info!("Attaching DualShock 4 {id}");
        let handle = driver.spawn(events);
        self.devices.insert(id.to_string(), handle);
    }

    /// Set the desired output state of the given device
    pub fn set_output(&self, id: &str, request: OutputRequest) -> Result<(), ManagerError> {
        let handle = self
            .devices
            .get(id)
            .ok_or_else(|| ManagerError::NotFound(id.to_string()))?;
        handle.set_output(request)?;
        Ok(())
    }

    /// Snapshot of the given device
    pub fn snapshot(&self, id: &str) -> Option<SessionSnapshot> {
        self.devices.get(id).map(|handle| handle.snapshot())
    }

    /// Snapshots of all attached devices, ordered by id
    pub fn snapshots(&self) -> Vec<SessionSnapshot> {
        let mut snapshots: Vec<SessionSnapshot> =
            self.devices.values().map(|handle| handle.snapshot()).collect();
        snapshots.sort_by(|a, b| a.id.cmp(&b.id));
        snapshots
    }

    /// Ids of all attached devices
    pub fn devices(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.devices.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Stop driving the given device
    pub async fn detach(&mut self, id: &str) -> Result<SessionSnapshot, ManagerError> {
        let handle = self
            .devices
            .remove(id)
            .ok_or_else(|| ManagerError::NotFound(id.to_string()))?;
        log::info!("Detaching DualShock 4 {id}");
        Ok(handle.stop().await?)
    }

    /// Remove devices whose driver stopped on its own (disconnect or fatal
    /// session error), returning how each one ended.
    pub async fn reap(&mut self) -> Vec<(String, Result<SessionSnapshot, DriverError>)> {
        let finished: Vec<String> = self
            .devices
            .iter()
            .filter(|(_, handle)| handle.is_finished())
            .map(|(id, _)| id.clone())
            .collect();

        let mut results = Vec::with_capacity(finished.len());
        for id in finished {
            let Some(handle) = self.devices.remove(&id) else {
                continue;
            };
            let result = handle.join().await;
            match &result {
                Ok(_) => log::info!("DualShock 4 {id} stopped"),
                Err(e) => log::warn!("DualShock 4 {id} stopped: {e}"),
            }
            results.push((id, result));
        }
        results
    }
}
