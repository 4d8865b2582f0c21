//! The device session: owns the dumps, drives transfers and keeps the device
//! in sync with local edits.

use std::path::Path;
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use thiserror::Error;

use crate::config::Config;
use crate::dump::{ArpDump, Dump, DumpError, DumpKind, PresetDump, SetupDump};
use crate::history::{Edit, EditOrigin};
use crate::idmap::Variant;
use crate::midi::{Link, LinkError};
use crate::params::{self, LAYER_SELECT, NO_LAYER, PRESET_NAME, PRESET_NAME_LEN};
use crate::sysex::{self, CopyOp, HardwareConfig, Identity, Message, ObjectKind, ParseError,
    TransferMode};
use crate::transfer::{Download, State, TransferError, Upload};

/// Preset number that addresses the edit buffer.
pub const EDIT_BUFFER: i32 = -1;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("no {0} loaded")]
    NoDump(DumpKind),
    #[error("a transfer is already in progress")]
    Busy,
    #[error(transparent)]
    Link(#[from] LinkError),
    #[error(transparent)]
    Dump(#[from] DumpError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Receives decoded device state. Every method has a no-op default.
pub trait Listener {
    /// A human-readable progress or error message.
    fn status(&mut self, _message: &str) {}

    fn transfer_failed(&mut self, _kind: DumpKind, _error: &TransferError) {}

    fn upload_done(&mut self, _kind: DumpKind) {}

    /// A dump was received or loaded and is now active.
    fn dump_loaded(&mut self, _kind: DumpKind) {}

    fn value_changed(&mut self, _edit: Edit, _origin: EditOrigin) {}

    fn name_received(&mut self, _kind: ObjectKind, _number: i32, _rom: i32, _name: &str) {}

    fn hardware_config(&mut self, _config: &HardwareConfig) {}

    fn identity(&mut self, _identity: &Identity) {}

    /// Asked before activating a dump with bad checksums. Returning false
    /// discards it.
    fn accept_corrupt_dump(&mut self, _kind: DumpKind, _bad_packets: &[u16]) -> bool {
        false
    }
}

pub struct Session<L: Link, N: Listener> {
    link: L,
    listener: N,
    device: u8,
    mode: TransferMode,
    timeout: Duration,
    /// Decided by the first preset received; later ones are converted.
    variant: Option<Variant>,
    preset: Option<PresetDump>,
    setup: Option<SetupDump>,
    arp: Option<ArpDump>,
    upload: Option<Upload>,
    download: Option<Download>,
    identity: Option<Identity>,
    hardware: Option<HardwareConfig>,
}

impl<L: Link, N: Listener> Session<L, N> {
    pub fn new(link: L, listener: N, config: &Config) -> Self {
        Self {
            link,
            listener,
            device: config.device_id,
            mode: config.transfer_mode,
            timeout: config.ack_timeout(),
            variant: None,
            preset: None,
            setup: None,
            arp: None,
            upload: None,
            download: None,
            identity: None,
            hardware: None,
        }
    }

    pub fn listener(&self) -> &N {
        &self.listener
    }

    pub fn listener_mut(&mut self) -> &mut N {
        &mut self.listener
    }

    pub fn link_mut(&mut self) -> &mut L {
        &mut self.link
    }

    pub fn variant(&self) -> Option<Variant> {
        self.variant
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    pub fn hardware_config(&self) -> Option<&HardwareConfig> {
        self.hardware.as_ref()
    }

    pub fn preset(&self) -> Option<&PresetDump> {
        self.preset.as_ref()
    }

    pub fn setup(&self) -> Option<&SetupDump> {
        self.setup.as_ref()
    }

    pub fn arp(&self) -> Option<&ArpDump> {
        self.arp.as_ref()
    }

    pub fn dump(&self, kind: DumpKind) -> Option<&dyn Dump> {
        match kind {
            DumpKind::Preset => self.preset.as_ref().map(|d| d as &dyn Dump),
            DumpKind::Setup => self.setup.as_ref().map(|d| d as &dyn Dump),
            DumpKind::Arp => self.arp.as_ref().map(|d| d as &dyn Dump),
        }
    }

    fn dump_mut(&mut self, kind: DumpKind) -> Option<&mut dyn Dump> {
        match kind {
            DumpKind::Preset => self.preset.as_mut().map(|d| d as &mut dyn Dump),
            DumpKind::Setup => self.setup.as_mut().map(|d| d as &mut dyn Dump),
            DumpKind::Arp => self.arp.as_mut().map(|d| d as &mut dyn Dump),
        }
    }

    fn preset_mut(&mut self) -> Result<&mut PresetDump, SessionError> {
        self.preset.as_mut().ok_or(SessionError::NoDump(DumpKind::Preset))
    }

    /// True while an upload or download is running.
    pub fn is_busy(&self) -> bool {
        self.upload.is_some() || self.download.is_some()
    }

    fn send(&mut self, message: &Message) -> Result<(), SessionError> {
        self.link.send(message.encode(self.device))?;
        Ok(())
    }

    fn send_raw(&mut self, messages: Vec<Vec<u8>>) -> Result<(), SessionError> {
        for m in messages {
            self.link.send(m)?;
        }
        Ok(())
    }

    /// Sends an applied preset edit to the device and tells the listener.
    fn sync(&mut self, edit: Edit, origin: EditOrigin) -> Result<(), SessionError> {
        let pairs = if params::is_layer_param(edit.id) {
            vec![(LAYER_SELECT, edit.layer), (edit.id, edit.value)]
        } else {
            vec![(edit.id, edit.value)]
        };
        self.send(&Message::ParamEdit(pairs))?;
        self.listener.value_changed(edit, origin);
        Ok(())
    }

    /// Value of a preset parameter, or [`params::ABSENT`].
    pub fn get_value(&self, id: i32, layer: i32) -> i32 {
        self.preset.as_ref().map_or(params::ABSENT, |p| p.get_value(id, layer))
    }

    /// Edits a preset parameter and sends it to the device. Returns false if
    /// the parameter isn't present or already has this value.
    pub fn set_value(&mut self, id: i32, value: i32, layer: i32) -> Result<bool, SessionError> {
        let preset = self.preset_mut()?;
        if !preset.set_value(id, value, layer) {
            return Ok(false)
        }
        let value = preset.get_value(id, layer);
        self.sync(Edit { id, layer, value }, EditOrigin::User)?;
        Ok(true)
    }

    /// Edits a setup or arp parameter. These go to the device with the next
    /// upload of their dump.
    pub fn set_dump_value(&mut self, kind: DumpKind, id: i32, value: i32, layer: i32)
        -> Result<bool, SessionError> {
        if kind == DumpKind::Preset {
            return self.set_value(id, value, layer)
        }
        let dump = self.dump_mut(kind).ok_or(SessionError::NoDump(kind))?;
        if !dump.set_value(id, value, layer) {
            return Ok(false)
        }
        let value = dump.get_value(id, layer);
        self.listener.value_changed(Edit { id, layer, value }, EditOrigin::User);
        Ok(true)
    }

    /// Writes the preset name, padded with spaces.
    pub fn set_name(&mut self, name: &str) -> Result<bool, SessionError> {
        let mut chars: Vec<u8> = name.bytes().take(PRESET_NAME_LEN).collect();
        chars.resize(PRESET_NAME_LEN, b' ');
        let mut changed = false;
        for (id, c) in PRESET_NAME.zip(chars) {
            changed |= self.set_value(id, c as i32, NO_LAYER)?;
        }
        Ok(changed)
    }

    pub fn undo(&mut self) -> Result<bool, SessionError> {
        let edits = self.preset_mut()?.undo();
        for &edit in &edits {
            self.sync(edit, EditOrigin::Undo)?;
        }
        Ok(!edits.is_empty())
    }

    pub fn redo(&mut self) -> Result<bool, SessionError> {
        let edits = self.preset_mut()?.redo();
        for &edit in &edits {
            self.sync(edit, EditOrigin::Redo)?;
        }
        Ok(!edits.is_empty())
    }

    pub fn is_changed(&self, kind: DumpKind) -> bool {
        self.dump(kind).is_some_and(|d| d.is_changed())
    }

    pub fn accept_changes(&mut self, kind: DumpKind) {
        if let Some(dump) = self.dump_mut(kind) {
            dump.accept_changes();
        }
    }

    pub fn begin_bulk_edit(&mut self) -> Result<(), SessionError> {
        self.preset_mut()?.begin_bulk_edit();
        Ok(())
    }

    pub fn end_bulk_edit(&mut self) -> Result<(), SessionError> {
        self.preset_mut()?.end_bulk_edit();
        Ok(())
    }

    /// Copies one preset layer over another, locally and on the device.
    pub fn copy_layer(&mut self, src: i32, dst: i32) -> Result<(), SessionError> {
        let edits = self.preset_mut()?.copy_layer(src, dst);
        for edit in edits {
            self.sync(edit, EditOrigin::User)?;
        }
        Ok(())
    }

    /// Retargets the preset to another slot, for the next upload.
    pub fn move_preset(&mut self, number: i32, rom: i32) -> Result<(), SessionError> {
        self.preset_mut()?.move_to(number, rom);
        Ok(())
    }

    /// Starts sending a dump to the device. Setup and arp dumps are single
    /// messages and are always sent without handshake.
    pub fn upload(&mut self, kind: DumpKind, mode: TransferMode, now: Instant)
        -> Result<(), SessionError> {
        if self.is_busy() {
            return Err(SessionError::Busy)
        }
        let device = self.device;
        let dump = self.dump_mut(kind).ok_or(SessionError::NoDump(kind))?;
        dump.set_device(device);
        dump.update_checksums();
        let mode = if kind == DumpKind::Preset { mode } else { TransferMode::OpenLoop };
        let messages = dump.messages(mode);

        let mut upload = Upload::new(kind, device, messages, mode, self.timeout);
        let out = upload.start(now);
        self.upload = Some(upload);
        self.send_raw(out)?;
        self.finish_transfers();
        Ok(())
    }

    /// Uploads with the configured transfer mode.
    pub fn upload_default(&mut self, kind: DumpKind, now: Instant) -> Result<(), SessionError> {
        self.upload(kind, self.mode, now)
    }

    fn start_download(&mut self, kind: DumpKind, request: Message, now: Instant)
        -> Result<(), SessionError> {
        if self.is_busy() {
            return Err(SessionError::Busy)
        }
        let mut download = Download::new(kind, self.device, self.timeout);
        download.start(now);
        self.download = Some(download);
        self.send(&request)
    }

    /// Asks the device for a preset; [`EDIT_BUFFER`] fetches the one being
    /// played.
    pub fn request_preset(&mut self, number: i32, rom: i32, mode: TransferMode, now: Instant)
        -> Result<(), SessionError> {
        self.start_download(DumpKind::Preset,
            Message::PresetRequest { mode, number, rom }, now)
    }

    pub fn request_setup(&mut self, now: Instant) -> Result<(), SessionError> {
        self.start_download(DumpKind::Setup, Message::SetupRequest, now)
    }

    pub fn request_arp(&mut self, number: i32, rom: i32, now: Instant)
        -> Result<(), SessionError> {
        self.start_download(DumpKind::Arp, Message::ArpRequest { number, rom }, now)
    }

    pub fn request_name(&mut self, kind: ObjectKind, number: i32, rom: i32)
        -> Result<(), SessionError> {
        self.send(&Message::NameRequest { kind, number, rom })
    }

    pub fn request_hardware_config(&mut self) -> Result<(), SessionError> {
        self.send(&Message::HardwareConfigRequest)
    }

    /// Sends a universal device inquiry to every unit.
    pub fn request_identity(&mut self) -> Result<(), SessionError> {
        self.link.send(Message::DeviceInquiry.encode(sysex::ALL_DEVICES))?;
        Ok(())
    }

    /// Asks the device to copy an object internally.
    pub fn copy_on_device(&mut self, op: CopyOp) -> Result<(), SessionError> {
        self.send(&Message::Copy(op))
    }

    /// Abandons any transfer in progress. Local edits stay as they are.
    pub fn cancel(&mut self) -> Result<(), SessionError> {
        let mut out = Vec::new();
        if let Some(mut upload) = self.upload.take() {
            out.extend(upload.cancel());
        }
        if let Some(mut download) = self.download.take() {
            out.extend(download.cancel());
        }
        if !out.is_empty() {
            self.listener.status("Transfer cancelled");
        }
        self.send_raw(out)
    }

    /// Processes everything received so far and checks transfer watchdogs.
    pub fn poll(&mut self, now: Instant) -> Result<(), SessionError> {
        while let Some(bytes) = self.link.receive() {
            self.handle_bytes(&bytes, now)?;
        }
        if let Some(upload) = &mut self.upload {
            upload.poll(now);
        }
        if let Some(download) = &mut self.download {
            download.poll(now);
        }
        self.finish_transfers();
        Ok(())
    }

    fn handle_bytes(&mut self, bytes: &[u8], now: Instant) -> Result<(), SessionError> {
        let parsed = match Message::parse(bytes) {
            Ok(p) => p,
            Err(ParseError::Foreign) => {
                debug!("ignoring foreign SysEx");
                return Ok(())
            }
            Err(e) => {
                if let Some(device) = addressee(bytes) {
                    if device != self.device && device != sysex::ALL_DEVICES {
                        debug!("ignoring bad message for device {device}: {e}");
                        return Ok(())
                    }
                }
                warn!("bad message from device: {e}");
                return self.abort(TransferError::Protocol(e))
            }
        };

        let for_us = parsed.device == self.device || parsed.device == sysex::ALL_DEVICES;
        if !for_us && !matches!(parsed.message, Message::Identity(_)) {
            debug!("ignoring message for device {}", parsed.device);
            return Ok(())
        }

        let message = parsed.message;
        match &message {
            Message::Ack(_) | Message::Nak(_) => {
                if let Some(upload) = &mut self.upload {
                    let out = upload.handle(&message, now);
                    self.send_raw(out)?;
                }
            }
            Message::Wait | Message::Cancel => {
                let mut out = Vec::new();
                if let Some(upload) = &mut self.upload {
                    out.extend(upload.handle(&message, now));
                }
                if let Some(download) = &mut self.download {
                    out.extend(download.handle(&message, now));
                }
                self.send_raw(out)?;
            }
            Message::PresetHeader { .. } | Message::PresetData { .. }
            | Message::SetupDump(_) | Message::ArpDump(_) => {
                let kind = match message {
                    Message::SetupDump(_) => DumpKind::Setup,
                    Message::ArpDump(_) => DumpKind::Arp,
                    _ => DumpKind::Preset,
                };
                let unsolicited = matches!(message,
                    Message::PresetHeader { .. } | Message::SetupDump(_) | Message::ArpDump(_));
                if self.download.is_none() && unsolicited {
                    info!("receiving unrequested {kind} dump");
                    let mut download = Download::new(kind, self.device, self.timeout);
                    download.start(now);
                    self.download = Some(download);
                }
                if let Some(download) = &mut self.download {
                    let out = download.handle(&message, now);
                    self.send_raw(out)?;
                }
            }
            Message::ParamEdit(pairs) => self.apply_remote(pairs),
            Message::HardwareConfig(config) => {
                info!("device has {} user presets, {} ROMs", config.user_presets,
                    config.roms.len());
                self.listener.hardware_config(config);
                self.hardware = Some(config.clone());
            }
            Message::Name { kind, number, rom, name } => {
                self.listener.name_received(*kind, *number, *rom, name);
            }
            Message::Identity(identity) => {
                info!("found device family {} member {} on id {}", identity.family,
                    identity.member, parsed.device);
                self.listener.identity(identity);
                self.identity = Some(identity.clone());
            }
            _ => debug!("ignoring {message:?}"),
        }
        Ok(())
    }

    /// Cancels whatever transfer is running and reports `error` for it.
    fn abort(&mut self, error: TransferError) -> Result<(), SessionError> {
        let kind = match (&self.upload, &self.download) {
            (Some(u), _) => u.kind(),
            (None, Some(d)) => d.kind(),
            (None, None) => {
                self.listener.status(&error.to_string());
                return Ok(())
            }
        };
        let mut out = Vec::new();
        if let Some(mut upload) = self.upload.take() {
            out.extend(upload.cancel());
        }
        if let Some(mut download) = self.download.take() {
            out.extend(download.cancel());
        }
        self.listener.status(&format!("{kind} transfer aborted: {error}"));
        self.listener.transfer_failed(kind, &error);
        self.send_raw(out)
    }

    /// Applies parameter changes made on the device itself.
    fn apply_remote(&mut self, pairs: &[(i32, i32)]) {
        let Some(preset) = &mut self.preset else {
            return
        };
        let mut layer = NO_LAYER;
        let mut applied = Vec::new();
        preset.begin_bulk_edit();
        for &(id, value) in pairs {
            if id == LAYER_SELECT {
                layer = value;
                continue
            }
            let layer = if params::is_layer_param(id) { layer } else { NO_LAYER };
            if preset.set_value(id, value, layer) {
                applied.push(Edit { id, layer, value: preset.get_value(id, layer) });
            }
        }
        preset.end_bulk_edit();
        for edit in applied {
            self.listener.value_changed(edit, EditOrigin::Remote);
        }
    }

    fn finish_transfers(&mut self) {
        if let Some(upload) = &self.upload {
            match upload.state() {
                State::Done => {
                    let kind = upload.kind();
                    self.upload = None;
                    self.listener.status(&format!("Sent {kind}"));
                    self.listener.upload_done(kind);
                }
                State::Failed => {
                    let kind = upload.kind();
                    let error = upload.error().cloned().unwrap_or(TransferError::Timeout);
                    self.upload = None;
                    self.listener.status(&format!("Sending {kind} failed: {error}"));
                    self.listener.transfer_failed(kind, &error);
                }
                State::Cancelled => self.upload = None,
                _ => (),
            }
        }

        let finished = self.download.as_ref().is_some_and(|d| d.state().is_finished());
        if !finished {
            return
        }
        if let Some(mut download) = self.download.take() {
            let kind = download.kind();
            match download.state() {
                State::Done => if let Some(bytes) = download.take() {
                    if let Err(e) = self.load_dump(bytes) {
                        warn!("received {kind} not loaded: {e}");
                        let error = TransferError::Unusable(e.to_string());
                        self.listener.status(&format!("Receiving {kind} failed: {error}"));
                        self.listener.transfer_failed(kind, &error);
                    }
                }
                State::Cancelled => {
                    self.listener.status(&format!("Receiving {kind} cancelled"));
                    if let Some(e) = download.error() {
                        self.listener.transfer_failed(kind, e);
                    }
                }
                _ => {
                    let error = download.error().cloned().unwrap_or(TransferError::Timeout);
                    self.listener.status(&format!("Receiving {kind} failed: {error}"));
                    self.listener.transfer_failed(kind, &error);
                }
            }
        }
    }

    /// Activates a dump from raw bytes, converting presets to the session's
    /// variant. Dumps with bad checksums are only loaded if the listener
    /// accepts them.
    pub fn load_dump(&mut self, bytes: Vec<u8>) -> Result<DumpKind, SessionError> {
        let kind = DumpKind::from_bytes(&bytes).ok_or(DumpError::UnknownKind)?;
        match kind {
            DumpKind::Preset => {
                let dump = PresetDump::from_bytes(bytes)?;
                self.check_integrity(&dump)?;
                let dump = match self.variant {
                    Some(target) if target != dump.variant() =>
                        PresetDump::with_variant(dump.as_bytes().to_vec(), target)?,
                    _ => dump,
                };
                if self.variant.is_none() {
                    info!("using {:?} preset layout", dump.variant());
                    self.variant = Some(dump.variant());
                }
                info!("loaded preset {} \"{}\"", dump.number(), dump.name());
                self.preset = Some(dump);
            }
            DumpKind::Setup => {
                let dump = SetupDump::from_bytes(bytes)?;
                self.check_integrity(&dump)?;
                info!("loaded setup \"{}\"", dump.name());
                self.setup = Some(dump);
            }
            DumpKind::Arp => {
                let dump = ArpDump::from_bytes(bytes)?;
                self.check_integrity(&dump)?;
                info!("loaded arp pattern \"{}\"", dump.name());
                self.arp = Some(dump);
            }
        }
        self.listener.dump_loaded(kind);
        Ok(kind)
    }

    fn check_integrity(&mut self, dump: &dyn Dump) -> Result<(), SessionError> {
        let bad = dump.validate();
        if bad.is_empty() {
            return Ok(())
        }
        warn!("{} has bad checksums in packet(s) {bad:?}", dump.kind());
        if self.listener.accept_corrupt_dump(dump.kind(), &bad) {
            Ok(())
        } else {
            self.listener.status(&format!("Discarded corrupt {}", dump.kind()));
            Err(DumpError::Checksum(bad).into())
        }
    }

    /// Loads a dump file of any kind.
    pub fn load_file(&mut self, path: impl AsRef<Path>) -> Result<DumpKind, SessionError> {
        let bytes = std::fs::read(path.as_ref())?;
        debug!("read {} bytes from {}", bytes.len(), path.as_ref().display());
        self.load_dump(bytes)
    }

    /// Writes a dump to a file exactly as it would be sent.
    pub fn save_file(&mut self, kind: DumpKind, path: impl AsRef<Path>)
        -> Result<(), SessionError> {
        let dump = self.dump_mut(kind).ok_or(SessionError::NoDump(kind))?;
        dump.update_checksums();
        std::fs::write(path, dump.as_bytes())?;
        Ok(())
    }
}

/// Device id a SysEx message is addressed to, if it can be read.
fn addressee(bytes: &[u8]) -> Option<u8> {
    match bytes.get(1)? {
        &sysex::MANUFACTURER => bytes.get(sysex::DEVICE_ID_OFFSET).copied(),
        &sysex::UNIVERSAL_NON_REALTIME => bytes.get(2).copied(),
        _ => None,
    }
}
