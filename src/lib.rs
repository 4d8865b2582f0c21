//! SysEx editor core for ROM-based sound modules: dump buffers, parameter
//! mapping, undo history and the transfer protocols that keep them in sync
//! with the device.

use std::error::Error;
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use log::{error, info, warn};

use config::Config;
use dump::DumpKind;
use midi::MidiLink;
use session::{Listener, Session, EDIT_BUFFER};
use sysex::{HardwareConfig, Identity, ObjectKind};
use transfer::TransferError;

pub mod codec;
pub mod checksum;
pub mod params;
pub mod idmap;
pub mod sysex;
pub mod history;
pub mod dump;
pub mod transfer;
pub mod midi;
pub mod session;
pub mod config;

/// Application name, for MIDI client names, etc.
pub const APP_NAME: &str = "Patchwire";

const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Reports session events through the log.
#[derive(Default)]
struct Console {
    failure: Option<TransferError>,
}

impl Listener for Console {
    fn status(&mut self, message: &str) {
        info!("{message}");
    }

    fn transfer_failed(&mut self, kind: DumpKind, error: &TransferError) {
        error!("{kind} transfer failed: {error}");
        self.failure = Some(error.clone());
    }

    fn name_received(&mut self, kind: ObjectKind, number: i32, rom: i32, name: &str) {
        info!("{kind:?} {rom}:{number} is \"{name}\"");
    }

    fn hardware_config(&mut self, config: &HardwareConfig) {
        for rom in &config.roms {
            info!("ROM {} with {} presets", rom.id, rom.presets);
        }
    }

    fn identity(&mut self, identity: &Identity) {
        let r = identity.revision;
        info!("firmware revision {}.{}{}{}", r[0], r[1], r[2], r[3]);
    }

    fn accept_corrupt_dump(&mut self, kind: DumpKind, bad_packets: &[u16]) -> bool {
        warn!("not loading {kind}: bad packets {bad_packets:?}");
        false
    }
}

struct Args {
    list: bool,
    save: Option<PathBuf>,
    upload: Option<PathBuf>,
}

fn parse_args(args: Vec<String>) -> Result<Args, Box<dyn Error>> {
    let mut parsed = Args { list: false, save: None, upload: None };
    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--list" => parsed.list = true,
            "--save" => parsed.save = Some(args.next().ok_or("--save needs a path")?.into()),
            _ if arg.starts_with("--") => return Err(format!("unknown option: {arg}").into()),
            _ => parsed.upload = Some(arg.into()),
        }
    }
    Ok(parsed)
}

/// Polls until `done` holds or `limit` passes.
fn wait_for<N: Listener>(session: &mut Session<MidiLink, N>, limit: Duration,
    done: impl Fn(&Session<MidiLink, N>) -> bool) -> Result<(), Box<dyn Error>> {
    let start = Instant::now();
    loop {
        session.poll(Instant::now())?;
        if done(session) || start.elapsed() >= limit {
            return Ok(())
        }
        thread::sleep(POLL_INTERVAL);
    }
}

/// Application entry point.
///
/// With a file argument, uploads that dump to the device. Otherwise fetches
/// the edit buffer preset, optionally saving it with `--save`.
pub fn run(args: Vec<String>) -> Result<(), Box<dyn Error>> {
    let args = parse_args(args)?;
    if args.list {
        println!("Inputs:");
        for name in midi::input_names() {
            println!("  {name}");
        }
        println!("Outputs:");
        for name in midi::output_names() {
            println!("  {name}");
        }
        return Ok(())
    }

    let mut config = match Config::load() {
        Ok(c) => c,
        Err(e) => {
            warn!("using default config: {e}");
            Config::default()
        }
    };

    let link = MidiLink::open(config.midi_input.as_deref(), config.midi_output.as_deref())?;
    let mut session = Session::new(link, Console::default(), &config);

    session.request_identity()?;
    session.request_hardware_config()?;
    wait_for(&mut session, config.ack_timeout(), |s| s.hardware_config().is_some())?;
    if session.hardware_config().is_none() {
        warn!("no reply from device {}", config.device_id);
    }

    if let Some(path) = &args.upload {
        let kind = session.load_file(path)?;
        session.upload_default(kind, Instant::now())?;
    } else {
        session.request_preset(EDIT_BUFFER, 0, config.transfer_mode, Instant::now())?;
    }
    wait_for(&mut session, Duration::MAX, |s| !s.is_busy())?;

    if let Some(e) = session.listener().failure.clone() {
        return Err(e.into())
    }

    if args.upload.is_none() {
        let preset = session.preset().ok_or("no preset received")?;
        println!("{}", preset.name());
        if let Some(path) = &args.save {
            session.save_file(DumpKind::Preset, path)?;
            info!("saved {}", path.display());
            config.dump_folder = config::dir_as_string(path);
            if let Err(e) = config.save() {
                warn!("could not save config: {e}");
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(a: &[&str]) -> Vec<String> {
        a.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_args() {
        let a = parse_args(args(&["--save", "out.syx"])).unwrap();
        assert!(!a.list);
        assert_eq!(a.save, Some(PathBuf::from("out.syx")));
        assert_eq!(a.upload, None);

        let a = parse_args(args(&["piano.syx", "--list"])).unwrap();
        assert!(a.list);
        assert_eq!(a.upload, Some(PathBuf::from("piano.syx")));

        assert!(parse_args(args(&["--save"])).is_err());
        assert!(parse_args(args(&["--bogus"])).is_err());
    }
}
