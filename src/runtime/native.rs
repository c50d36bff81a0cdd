//! Desktop runtime: engine and audio thread, instruments from the config,
//! MIDI and keyboard front ends.

use super::Controller;
use crate::audio::{self, AudioHandle, CpalDevice, EngineStatus, NullDevice};
#[cfg(feature = "keyboard")]
use crate::input::KeyboardHandler;
use crate::input::MidiHandler;
use crate::synth::Engine;
use crate::EngineConfig;
use std::time::Duration;

const POLL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Render into a paced null device instead of the sound card.
    pub null_device: bool,
    pub no_midi: bool,
}

/// Runs until the audio thread stops or loses its device.
pub fn run(config: EngineConfig, options: RunOptions) -> anyhow::Result<()> {
    config.validate()?;
    let (engine, inputs, events) = Engine::with_channels(&config);
    let mut controller = Controller::new(&config, inputs, events);
    let audio = start_audio(engine, &config, &options)?;
    controller.observe(audio.status_cell());

    let mut ids = Vec::with_capacity(config.instruments.len());
    for instrument in &config.instruments {
        ids.push(controller.hello(instrument)?);
    }

    let _midi = if options.no_midi {
        None
    } else {
        match MidiHandler::connect(config.midi_port, controller.sender()) {
            Ok(midi) => Some(midi),
            Err(e) => {
                log::warn!("MIDI input disabled: {e}");
                None
            }
        }
    };

    #[cfg(feature = "keyboard")]
    let mut keyboard = match (ids.first(), config.instruments.first()) {
        (Some(id), Some(instrument)) => Some(KeyboardHandler::new(instrument.channel, *id, controller.sender())),
        _ => None,
    };

    loop {
        #[cfg(feature = "keyboard")]
        if let Some(keyboard) = keyboard.as_mut() {
            keyboard.update();
        }
        match controller.status() {
            EngineStatus::Fatal => anyhow::bail!("audio device lost"),
            EngineStatus::Stopped => break,
            _ => std::thread::sleep(POLL),
        }
    }

    for id in ids {
        if let Err(e) = controller.exit(id) {
            log::debug!("instrument {id} not retired: {e}");
        }
    }
    Ok(())
}

fn start_audio(engine: Engine, config: &EngineConfig, options: &RunOptions) -> anyhow::Result<AudioHandle> {
    let handle = if options.null_device {
        audio::spawn(engine, || Ok(NullDevice::new(true)), config)?
    } else {
        let wanted = config.output_device.clone();
        let depth = config.preload_blocks + 2;
        audio::spawn(engine, move || Ok(CpalDevice::new(wanted, depth)), config)?
    };
    let format = handle.format();
    log::info!(
        "audio running: {} Hz, {} frames per block, {} channels",
        format.sample_rate,
        format.frames,
        format.channels
    );
    Ok(handle)
}
