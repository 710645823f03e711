//! Virtual pad provisioner
//!
//! Creates one uinput gamepad per connected port, advertising only the
//! capabilities the configuration actually routes to, and services the
//! force-feedback control channel the kernel runs over the same fd.

pub mod sys;

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::mem;
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;

use anyhow::{Context, Result};
use libc::{c_int, c_ulong, c_void};
use tracing::{debug, info, warn};

use crate::config::{Config, TriggerMode};
use crate::ff::{EffectUpload, FfState, MAX_EFFECTS};
use crate::mapping::{dpad, PadEvent};

/// One virtual gamepad, destroyed on drop.
pub struct VirtualPad {
    file: File,
    port: usize,
}

impl VirtualPad {
    /// Create the device for a port, advertising capabilities derived from
    /// the configuration.
    pub fn open(port: usize, config: &Config) -> Result<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(sys::UINPUT_PATH)
            .with_context(|| format!("opening {}", sys::UINPUT_PATH))?;
        let fd = file.as_raw_fd();

        // digital capabilities: the button table plus whatever the axis
        // pipeline synthesizes
        set_bit(fd, sys::UI_SET_EVBIT, sys::EV_KEY).context("enabling EV_KEY")?;
        for code in config.buttons.iter().flatten() {
            set_bit(fd, sys::UI_SET_KEYBIT, *code)?;
        }
        if config.trigger_left == TriggerMode::Binary {
            set_bit(fd, sys::UI_SET_KEYBIT, sys::BTN_TL2)?;
        }
        if config.trigger_right == TriggerMode::Binary {
            set_bit(fd, sys::UI_SET_KEYBIT, sys::BTN_TR2)?;
        }
        if config.thumb_left.emulates_dpad() || config.thumb_right.emulates_dpad() {
            for code in dpad::DPAD_CODES {
                set_bit(fd, sys::UI_SET_KEYBIT, code)?;
            }
        }

        // analog capabilities: only destinations some slot routes to
        set_bit(fd, sys::UI_SET_EVBIT, sys::EV_ABS).context("enabling EV_ABS")?;
        for pair in config.axes {
            for code in [pair.lo, pair.hi].into_iter().flatten() {
                set_bit(fd, sys::UI_SET_ABSBIT, code)?;
            }
        }

        // fixed force-feedback surface
        set_bit(fd, sys::UI_SET_EVBIT, sys::EV_FF).context("enabling EV_FF")?;
        for waveform in [sys::FF_PERIODIC, sys::FF_SQUARE, sys::FF_TRIANGLE, sys::FF_SINE, sys::FF_RUMBLE] {
            set_bit(fd, sys::UI_SET_FFBIT, waveform)?;
        }

        let mut device: sys::UinputUserDev = unsafe { mem::zeroed() };
        let name = config.name_for_port(port);
        let name_bytes = name.as_bytes();
        let len = name_bytes.len().min(sys::UINPUT_MAX_NAME_SIZE - 1);
        device.name[..len].copy_from_slice(&name_bytes[..len]);
        device.id.bustype = sys::BUS_USB;
        device.id.vendor = config.vendor_id;
        device.id.product = config.product_id;
        device.ff_effects_max = MAX_EFFECTS as u32;
        device.absmin = config.absinfo.min;
        device.absmax = config.absinfo.max;
        device.absfuzz = config.absinfo.fuzz;
        device.absflat = config.absinfo.flat;

        let bytes = unsafe {
            std::slice::from_raw_parts(
                &device as *const sys::UinputUserDev as *const u8,
                mem::size_of::<sys::UinputUserDev>(),
            )
        };
        file.write_all(bytes).context("writing uinput device settings")?;

        if unsafe { libc::ioctl(fd, sys::UI_DEV_CREATE) } < 0 {
            return Err(std::io::Error::last_os_error()).context("creating uinput device");
        }

        info!(port = port + 1, name = %name, "virtual pad created");
        Ok(Self { file, port })
    }

    /// Write an event batch terminated by a sync marker as one operation.
    pub fn write_events(&mut self, events: &[PadEvent]) -> Result<()> {
        let mut raw: Vec<sys::InputEvent> = Vec::with_capacity(events.len() + 1);
        for event in events {
            let (type_, code, value) = match *event {
                PadEvent::Key { code, pressed } => (sys::EV_KEY, code, i32::from(pressed)),
                PadEvent::Abs { code, value } => (sys::EV_ABS, code, value),
            };
            raw.push(input_event(type_, code, value));
        }
        raw.push(input_event(sys::EV_SYN, sys::SYN_REPORT, 0));

        let bytes = unsafe {
            std::slice::from_raw_parts(
                raw.as_ptr() as *const u8,
                raw.len() * mem::size_of::<sys::InputEvent>(),
            )
        };
        self.file.write_all(bytes).context("writing input events")?;
        Ok(())
    }

    /// Service at most one force-feedback control message. Uploads and
    /// erases are bracketed transactions; play requests carry the
    /// repetition count in the event value.
    pub fn service_force_feedback(&mut self, ff: &mut FfState, now_ms: u64) -> Result<()> {
        let fd = self.file.as_raw_fd();
        let mut event: sys::InputEvent = unsafe { mem::zeroed() };
        let wanted = mem::size_of::<sys::InputEvent>();
        let got = unsafe { libc::read(fd, &mut event as *mut sys::InputEvent as *mut c_void, wanted) };
        if got != wanted as isize {
            // nothing pending (EAGAIN) or a short read; either way skip
            return Ok(());
        }

        if event.type_ == sys::EV_UINPUT {
            match event.code {
                sys::UI_FF_UPLOAD => self.handle_upload(ff, event.value)?,
                sys::UI_FF_ERASE => self.handle_erase(ff, event.value)?,
                _ => {}
            }
        } else if event.type_ == sys::EV_FF {
            debug!(port = self.port + 1, effect = event.code, count = event.value, "ff play");
            ff.play(event.code as usize, event.value, now_ms);
        }
        Ok(())
    }

    fn handle_upload(&mut self, ff: &mut FfState, request_id: i32) -> Result<()> {
        let fd = self.file.as_raw_fd();
        let mut upload: sys::UinputFfUpload = unsafe { mem::zeroed() };
        upload.request_id = request_id as u32;
        ioctl_ptr(fd, sys::UI_BEGIN_FF_UPLOAD, &mut upload as *mut _ as *mut c_void)
            .context("UI_BEGIN_FF_UPLOAD")?;

        let stop = match upload.effect.type_ {
            sys::FF_PERIODIC => unsafe { upload.effect.u.periodic.magnitude == 0 },
            sys::FF_RUMBLE => unsafe {
                upload.effect.u.rumble.strong_magnitude == 0 && upload.effect.u.rumble.weak_magnitude == 0
            },
            _ => false,
        };
        let request = EffectUpload {
            replaces: (upload.old.type_ != 0).then_some(upload.old.id as usize),
            stop,
            length_ms: upload.effect.replay.length as u32,
            delay_ms: upload.effect.replay.delay as u32,
        };
        match ff.upload(&request) {
            Some(id) => {
                upload.retval = 0;
                upload.effect.id = id as i16;
                debug!(port = self.port + 1, effect = id, "ff upload");
            }
            None => {
                // TODO: find the proper error code for a full effect table
                upload.retval = -1;
                warn!(port = self.port + 1, "ff upload rejected, no free effect slot");
            }
        }
        ioctl_ptr(fd, sys::UI_END_FF_UPLOAD, &mut upload as *mut _ as *mut c_void)
            .context("UI_END_FF_UPLOAD")?;
        Ok(())
    }

    fn handle_erase(&mut self, ff: &mut FfState, request_id: i32) -> Result<()> {
        let fd = self.file.as_raw_fd();
        let mut erase: sys::UinputFfErase = unsafe { mem::zeroed() };
        erase.request_id = request_id as u32;
        ioctl_ptr(fd, sys::UI_BEGIN_FF_ERASE, &mut erase as *mut _ as *mut c_void)
            .context("UI_BEGIN_FF_ERASE")?;
        ff.erase(erase.effect_id as usize);
        debug!(port = self.port + 1, effect = erase.effect_id, "ff erase");
        ioctl_ptr(fd, sys::UI_END_FF_ERASE, &mut erase as *mut _ as *mut c_void)
            .context("UI_END_FF_ERASE")?;
        Ok(())
    }
}

impl Drop for VirtualPad {
    fn drop(&mut self) {
        info!(port = self.port + 1, "virtual pad destroyed");
        unsafe {
            libc::ioctl(self.file.as_raw_fd(), sys::UI_DEV_DESTROY);
        }
    }
}

fn input_event(type_: u16, code: u16, value: i32) -> sys::InputEvent {
    sys::InputEvent {
        time: libc::timeval { tv_sec: 0, tv_usec: 0 },
        type_,
        code,
        value,
    }
}

fn set_bit(fd: c_int, request: c_ulong, bit: u16) -> Result<()> {
    if unsafe { libc::ioctl(fd, request, bit as c_int) } < 0 {
        return Err(std::io::Error::last_os_error())
            .with_context(|| format!("uinput ioctl {request:#x} bit {bit:#x}"));
    }
    Ok(())
}

fn ioctl_ptr(fd: c_int, request: c_ulong, argument: *mut c_void) -> std::io::Result<()> {
    if unsafe { libc::ioctl(fd, request, argument) } < 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}
