//! Adapter lifecycle management
//!
//! Owns the libusb context, the registry of live adapters, and the single
//! control loop that serializes hotplug arrivals/removals with shutdown.
//! The transport's event pump runs on its own thread and forwards hotplug
//! callbacks as messages, so add/remove handling never races a teardown.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result};
use rusb::{Context, Device, HotplugBuilder, UsbContext};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::adapter::AdapterWorker;
use crate::config::Config;

/// The adapter hardware's fixed USB identity (what we enumerate by; the
/// identity the virtual pads advertise is configured separately).
const ADAPTER_VENDOR_ID: u16 = 0x057e;
const ADAPTER_PRODUCT_ID: u16 = 0x0337;

/// Bound on one event-pump wait, so the pump thread can observe shutdown.
const PUMP_TIMEOUT: Duration = Duration::from_millis(500);

/// Bus number and address: stable identity of one plugged-in device.
type DeviceKey = (u8, u8);

enum HotplugMessage {
    Arrived(Device<Context>),
    Left(Device<Context>),
}

/// Forwards transport hotplug callbacks into the control loop's channel.
struct HotplugForwarder {
    tx: mpsc::UnboundedSender<HotplugMessage>,
}

impl rusb::Hotplug<Context> for HotplugForwarder {
    fn device_arrived(&mut self, device: Device<Context>) {
        let _ = self.tx.send(HotplugMessage::Arrived(device));
    }

    fn device_left(&mut self, device: Device<Context>) {
        let _ = self.tx.send(HotplugMessage::Left(device));
    }
}

struct AdapterEntry {
    stop: Arc<AtomicBool>,
    worker: tokio::task::JoinHandle<()>,
}

/// Registry of live adapters plus the shared shutdown flag.
pub struct AdapterManager {
    context: Context,
    config: Arc<Config>,
    shutdown: Arc<AtomicBool>,
    adapters: HashMap<DeviceKey, AdapterEntry>,
}

impl AdapterManager {
    pub fn new(config: Arc<Config>) -> Result<Self> {
        let context = Context::new().context("initializing the USB transport")?;
        Ok(Self {
            context,
            config,
            shutdown: Arc::new(AtomicBool::new(false)),
            adapters: HashMap::new(),
        })
    }

    /// Run until a termination signal arrives, then tear everything down.
    pub async fn run(&mut self) -> Result<()> {
        let (tx, mut rx) = mpsc::unbounded_channel();

        let _registration = if rusb::has_hotplug() {
            let registration = HotplugBuilder::new()
                .vendor_id(ADAPTER_VENDOR_ID)
                .product_id(ADAPTER_PRODUCT_ID)
                .enumerate(true)
                .register(&self.context, Box::new(HotplugForwarder { tx }))
                .context("registering the hotplug callback")?;
            Some(registration)
        } else {
            warn!("hotplug not supported by this transport, scanning once");
            drop(tx);
            self.scan_existing()?;
            None
        };

        // the transport needs its events pumped for hotplug callbacks to
        // fire; keep that off the control loop
        let pump_context = self.context.clone();
        let pump_shutdown = self.shutdown.clone();
        let pump = std::thread::spawn(move || {
            while !pump_shutdown.load(Ordering::Relaxed) {
                if let Err(e) = pump_context.handle_events(Some(PUMP_TIMEOUT)) {
                    warn!(error = %e, "USB event pump failed");
                    break;
                }
            }
        });

        let shutdown = shutdown_signal();
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                message = rx.recv() => match message {
                    Some(HotplugMessage::Arrived(device)) => self.add_adapter(&device),
                    Some(HotplugMessage::Left(device)) => self.remove_adapter(&device).await,
                    None => {
                        // no hotplug support: nothing left to wait for but
                        // the termination signal
                        (&mut shutdown).await;
                        break;
                    }
                },
                _ = &mut shutdown => break,
            }
        }

        info!("shutting down");
        self.shutdown.store(true, Ordering::Relaxed);
        let keys: Vec<DeviceKey> = self.adapters.keys().copied().collect();
        for key in keys {
            self.remove_entry(key).await;
        }

        let _ = tokio::task::spawn_blocking(move || pump.join()).await;
        Ok(())
    }

    /// One-shot enumeration for transports without hotplug support.
    fn scan_existing(&mut self) -> Result<()> {
        let devices = self.context.devices().context("listing USB devices")?;
        for device in devices.iter() {
            let Ok(descriptor) = device.device_descriptor() else { continue };
            if descriptor.vendor_id() == ADAPTER_VENDOR_ID
                && descriptor.product_id() == ADAPTER_PRODUCT_ID
            {
                self.add_adapter(&device);
            }
        }
        Ok(())
    }

    fn add_adapter(&mut self, device: &Device<Context>) {
        let key = (device.bus_number(), device.address());
        if self.adapters.contains_key(&key) {
            debug!(bus = key.0, address = key.1, "adapter already registered");
            return;
        }
        let label = format!("{:03}:{:03}", key.0, key.1);

        let handle = match device.open() {
            Ok(handle) => handle,
            Err(e) => {
                warn!(adapter = %label, error = %e, "error opening adapter");
                return;
            }
        };
        if handle.kernel_driver_active(0).unwrap_or(false) {
            info!(adapter = %label, "detaching kernel driver");
            if let Err(e) = handle.detach_kernel_driver(0) {
                warn!(adapter = %label, error = %e, "error detaching kernel driver");
                return;
            }
        }

        let stop = Arc::new(AtomicBool::new(false));
        let worker = AdapterWorker::new(
            handle,
            self.config.clone(),
            stop.clone(),
            self.shutdown.clone(),
            label.clone(),
        );
        let worker = tokio::task::spawn_blocking(move || worker.run());
        self.adapters.insert(key, AdapterEntry { stop, worker });
        info!(adapter = %label, "adapter connected");
    }

    async fn remove_adapter(&mut self, device: &Device<Context>) {
        self.remove_entry((device.bus_number(), device.address())).await;
    }

    /// Signal the worker and wait for it to finish before releasing the
    /// entry, so no two lifecycles of the same device ever overlap.
    async fn remove_entry(&mut self, key: DeviceKey) {
        let Some(entry) = self.adapters.remove(&key) else { return };
        let label = format!("{:03}:{:03}", key.0, key.1);
        entry.stop.store(true, Ordering::Relaxed);
        if let Err(e) = entry.worker.await {
            warn!(adapter = %label, error = %e, "adapter worker panicked");
        }
        info!(adapter = %label, "adapter disconnected");
    }
}

/// Resolves when SIGINT or SIGTERM arrives.
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let ctrl_c = tokio::signal::ctrl_c();
    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = ctrl_c => {}
                _ = term.recv() => {}
            }
        }
        Err(e) => {
            warn!(error = %e, "cannot listen for SIGTERM");
            let _ = ctrl_c.await;
        }
    }
}
