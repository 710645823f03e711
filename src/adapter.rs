//! Per-adapter polling worker
//!
//! One blocking worker per physical adapter: activation handshake, report
//! polling, per-port decoding, and rumble write-back, with cooperative
//! cancellation checked at the top of every cycle.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context as _, Result};
use rusb::{Context, DeviceHandle};
use tracing::{debug, error, info, warn};

use crate::config::{Config, AXIS_COUNT, BUTTON_COUNT};
use crate::ff::FfState;
use crate::mapping::{axis, buttons, PadEvent, SlotState};
use crate::report::{self, ControllerKind, PortRecord, StatusReport, PORT_COUNT};
use crate::uinput::VirtualPad;

/// Bound on one blocking report read; cancellation is observed between
/// reads, so this also caps shutdown latency.
const READ_TIMEOUT: Duration = Duration::from_millis(200);

/// Timeout for outbound command writes.
const WRITE_TIMEOUT: Duration = Duration::from_millis(200);

/// Backoff before retrying after a transfer error.
const RETRY_DELAY: Duration = Duration::from_secs(1);

/// Backoff between attempts to claim the USB interface.
const CLAIM_RETRY_DELAY: Duration = Duration::from_secs(3);

/// Runtime state of one controller slot.
#[derive(Default)]
struct PortState {
    connected: bool,
    kind: ControllerKind,
    extra_power: bool,
    pad: Option<VirtualPad>,
    buttons: u16,
    slots: [SlotState; AXIS_COUNT],
    ff: FfState,
}

impl PortState {
    /// Forget all differ state so the first batch after a connection
    /// carries the full initial controller state.
    fn reset(&mut self) {
        self.buttons = 0;
        self.slots = Default::default();
        self.ff = FfState::default();
        self.extra_power = false;
    }

    /// Decode one record into an event batch. Only called while connected.
    fn decode(&mut self, config: &Config, record: PortRecord<'_>) -> Vec<PadEvent> {
        let mut events = Vec::with_capacity(BUTTON_COUNT + 2 * AXIS_COUNT);
        self.buttons = buttons::diff_buttons(config, self.buttons, record.buttons(), &mut events);
        for slot in 0..AXIS_COUNT {
            axis::process_slot(
                config,
                slot,
                record.axes(),
                self.buttons,
                &mut self.slots[slot],
                &mut events,
            );
        }
        events
    }
}

/// Owns one adapter's USB handle and its four ports.
pub struct AdapterWorker {
    handle: DeviceHandle<Context>,
    config: Arc<Config>,
    stop: Arc<AtomicBool>,
    shutdown: Arc<AtomicBool>,
    label: String,
    ports: [PortState; PORT_COUNT],
    rumble: [u8; 5],
    epoch: Instant,
}

impl AdapterWorker {
    pub fn new(
        handle: DeviceHandle<Context>,
        config: Arc<Config>,
        stop: Arc<AtomicBool>,
        shutdown: Arc<AtomicBool>,
        label: String,
    ) -> Self {
        Self {
            handle,
            config,
            stop,
            shutdown,
            label,
            ports: Default::default(),
            rumble: report::RUMBLE_IDLE,
            epoch: Instant::now(),
        }
    }

    fn cancelled(&self) -> bool {
        self.stop.load(Ordering::Relaxed) || self.shutdown.load(Ordering::Relaxed)
    }

    /// Run the worker to completion. Blocking; call from a dedicated
    /// thread or blocking task.
    pub fn run(mut self) {
        if let Err(e) = self.activate() {
            error!(adapter = %self.label, error = %e, "adapter activation failed");
            return;
        }
        self.poll_loop();
        // close any pads still open before the handle goes away
        for port in self.ports.iter_mut() {
            if port.connected {
                port.pad = None;
                port.connected = false;
            }
        }
        debug!(adapter = %self.label, "worker exited");
    }

    /// Claim the interface when configured to, then send the activation
    /// command that makes the adapter start reporting.
    fn activate(&mut self) -> Result<()> {
        if self.config.claim_interface {
            let mut attempts = 0u32;
            while let Err(e) = self.handle.claim_interface(0) {
                if self.cancelled() {
                    bail!("cancelled while claiming interface 0");
                }
                attempts += 1;
                warn!(adapter = %self.label, attempts, error = %e, "claiming interface 0 failed, retrying");
                std::thread::sleep(CLAIM_RETRY_DELAY);
            }
        }
        let written = self
            .handle
            .write_interrupt(report::ENDPOINT_OUT, &report::HANDSHAKE, WRITE_TIMEOUT)
            .context("activation handshake")?;
        if written != report::HANDSHAKE.len() {
            bail!("activation handshake wrote {written}/{} bytes", report::HANDSHAKE.len());
        }
        Ok(())
    }

    fn poll_loop(&mut self) {
        let mut buffer = [0u8; report::REPORT_LEN];
        while !self.cancelled() {
            let size = match self
                .handle
                .read_interrupt(report::ENDPOINT_IN, &mut buffer, READ_TIMEOUT)
            {
                Ok(size) => size,
                // the read is bounded on purpose; a timeout only means
                // "re-check cancellation"
                Err(rusb::Error::Timeout) => continue,
                Err(e) => {
                    warn!(adapter = %self.label, error = %e, "report transfer failed");
                    if self.config.quit_on_interrupt {
                        break;
                    }
                    std::thread::sleep(RETRY_DELAY);
                    continue;
                }
            };
            let Some(status) = StatusReport::parse(&buffer[..size]) else {
                debug!(adapter = %self.label, size, "discarding malformed report");
                continue;
            };
            let now_ms = self.epoch.elapsed().as_millis() as u64;

            let mut rumble = report::RUMBLE_IDLE;
            for index in 0..PORT_COUNT {
                self.poll_port(index, status.port(index), now_ms);
                let port = &mut self.ports[index];
                // only a wired, externally powered controller can rumble
                let powered = port.extra_power && port.kind == ControllerKind::Standard;
                if powered && port.ff.rumble_active(now_ms) {
                    rumble[index + 1] = 1;
                }
            }

            if rumble != self.rumble {
                self.rumble = rumble;
                debug!(adapter = %self.label, vector = ?&rumble[1..], "rumble update");
                if let Err(e) =
                    self.handle
                        .write_interrupt(report::ENDPOINT_OUT, &self.rumble, WRITE_TIMEOUT)
                {
                    warn!(adapter = %self.label, error = %e, "rumble transfer failed");
                    if self.config.quit_on_interrupt {
                        break;
                    }
                    std::thread::sleep(RETRY_DELAY);
                }
            }
        }
        if self.config.claim_interface {
            let _ = self.handle.release_interface(0);
        }
    }

    /// Drive one port's state machine for this poll.
    fn poll_port(&mut self, index: usize, record: PortRecord<'_>, now_ms: u64) {
        let kind = record.kind();
        let config = &self.config;
        let port = &mut self.ports[index];

        if kind.is_connected() && !port.connected {
            info!(adapter = %self.label, port = index + 1, ?kind, "controller connected");
            match VirtualPad::open(index, config) {
                Ok(pad) => {
                    port.reset();
                    port.pad = Some(pad);
                    port.connected = true;
                    port.kind = kind;
                }
                Err(e) => {
                    // localized failure: the port stays disconnected and
                    // the next poll tries again
                    warn!(adapter = %self.label, port = index + 1, error = %e, "virtual pad open failed");
                }
            }
        } else if !kind.is_connected() && port.connected {
            info!(adapter = %self.label, port = index + 1, "controller disconnected");
            port.pad = None;
            port.connected = false;
            port.kind = ControllerKind::None;
            port.extra_power = false;
            port.ff = FfState::default();
        }

        if !port.connected {
            return;
        }
        port.extra_power = record.extra_power();
        if kind != port.kind {
            // tolerated; reopening the device would drop state over what
            // is probably a glitch
            warn!(adapter = %self.label, port = index + 1, old = ?port.kind, new = ?kind, "controller changed type mid-session");
            port.kind = kind;
        }

        let events = port.decode(config, record);
        if !events.is_empty() {
            if let Some(pad) = port.pad.as_mut() {
                if let Err(e) = pad.write_events(&events) {
                    warn!(adapter = %self.label, port = index + 1, error = %e, "writing input events failed");
                }
            }
        }
        if let Some(pad) = port.pad.as_mut() {
            if let Err(e) = pad.service_force_feedback(&mut port.ff, now_ms) {
                warn!(adapter = %self.label, port = index + 1, error = %e, "force feedback servicing failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::Cli;
    use crate::report::{REPORT_LEN, REPORT_MARKER};
    use clap::Parser;

    fn config_from(args: &[&str]) -> Config {
        let mut argv = vec!["gcadapter-gw"];
        argv.extend_from_slice(args);
        Config::from_cli(&Cli::parse_from(argv))
    }

    fn raw_report(status: u8, buttons: u16, axes: [u8; 6]) -> [u8; REPORT_LEN] {
        let mut raw = [0u8; REPORT_LEN];
        raw[0] = REPORT_MARKER;
        raw[1] = status;
        raw[2..4].copy_from_slice(&buttons.to_be_bytes());
        raw[4..10].copy_from_slice(&axes);
        raw
    }

    #[test]
    fn test_first_batch_after_connection_is_full_state() {
        let config = config_from(&[]);
        let mut port = PortState::default();
        port.reset();
        port.connected = true;
        port.kind = ControllerKind::Standard;

        let raw = raw_report(0x10, 0, [128; 6]);
        let status = StatusReport::parse(&raw).unwrap();
        let events = port.decode(&config, status.port(0));
        assert!(!events.is_empty(), "initial neutral state must still sync the axes");

        // an identical poll right after is completely quiet
        let events = port.decode(&config, status.port(0));
        assert!(events.is_empty());
    }

    #[test]
    fn test_decode_orders_buttons_before_axes() {
        let config = config_from(&[]);
        let mut port = PortState::default();
        port.reset();
        port.connected = true;
        port.kind = ControllerKind::Standard;

        let raw = raw_report(0x10, 1 << crate::config::button_bit::A, [128; 6]);
        let status = StatusReport::parse(&raw).unwrap();
        let events = port.decode(&config, status.port(0));
        assert!(matches!(events[0], PadEvent::Key { .. }));
        assert!(events.iter().skip_while(|e| matches!(e, PadEvent::Key { .. })).all(|e| matches!(e, PadEvent::Abs { .. })));
    }

    #[test]
    fn test_shoulder_state_feeds_same_poll_nand() {
        // the L click bit lands in the state before the trigger slot runs,
        // so NAND masks the trigger within a single poll
        let config = config_from(&["--triggers", "buttons", "--shoulder", "nand-trigger"]);
        let mut port = PortState::default();
        port.reset();
        port.connected = true;

        let mut axes = [128u8; 6];
        axes[crate::config::TRIGGER_L] = 230;
        let raw = raw_report(0x14, 1 << crate::config::button_bit::L, axes);
        let status = StatusReport::parse(&raw).unwrap();
        let events = port.decode(&config, status.port(0));
        assert!(
            !events
                .iter()
                .any(|e| matches!(e, PadEvent::Key { code, pressed: true } if *code == crate::uinput::sys::BTN_TL2)),
            "NAND must keep the trigger button released while the shoulder is clicked"
        );
    }
}
