#![allow(dead_code)]

use std::sync::Arc;

use anyhow::{Context as _, Result};
use zelite::ipc::IpcTransport;
use zelite::{Context, Device, DevicePtr, Driver, DriverConfig};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

/// A driver instance with one context, as a separate process would hold.
pub struct Peer {
    pub driver: Driver,
    pub ctx: Context,
}

impl Peer {
    pub fn new(config: DriverConfig, transport: Arc<IpcTransport>) -> Result<Self> {
        let driver = Driver::with_transport(config, transport).context("driver")?;
        let ctx = Context::new(&driver);
        Ok(Self { driver, ctx })
    }

    pub fn device(&self, ordinal: usize) -> Device {
        self.driver.devices()[ordinal].clone()
    }

    pub fn shared_buffer(&self, device: &Device, bytes: &[u8]) -> Result<DevicePtr> {
        let ptr = self.ctx.alloc_shared(device, bytes.len() as u64, 64)?;
        self.ctx.write(ptr, bytes)?;
        Ok(ptr)
    }
}

/// Two peers joined by one transport.
pub fn peers(config: DriverConfig) -> Result<(Peer, Peer)> {
    let transport = Arc::new(IpcTransport::new());
    Ok((
        Peer::new(config.clone(), transport.clone())?,
        Peer::new(config, transport)?,
    ))
}
