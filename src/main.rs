use clap::Parser;
use opsynth::audio::CpalDevice;
use opsynth::input::MidiHandler;
use opsynth::runtime::{self, RunOptions};
use opsynth::synth::InstrumentKind;
use opsynth::EngineConfig;

#[derive(Parser, Debug, Default)]
#[clap(author, about, long_about = None)]
struct Args {
    /// JSON engine config; built-in defaults when omitted
    config: Option<String>,

    #[clap(long)]
    sample_rate: Option<u32>,

    /// Frames per block
    #[clap(short = 'b', long)]
    block_size: Option<usize>,

    /// Voices for every configured instrument
    #[clap(long)]
    voices: Option<usize>,

    /// Replace the configured instruments with one of this kind
    #[clap(short = 'i', long)]
    instrument: Option<InstrumentKind>,

    /// MIDI channel (1-16) for the instrument given with --instrument
    #[clap(short = 'c', long, default_value_t = 1)]
    channel: u8,

    /// MIDI input port index
    #[clap(short = 'm', long)]
    midi_port: Option<usize>,

    /// Substring of the output device name
    #[clap(short = 'o', long)]
    output_device: Option<String>,

    /// Render to a null device instead of the sound card
    #[clap(long)]
    null: bool,

    /// Do not open MIDI input
    #[clap(long)]
    no_midi: bool,

    /// List audio outputs and MIDI inputs, then exit
    #[clap(short = 'l', long)]
    list: bool,
}

impl Args {
    fn apply(&self, config: &mut EngineConfig) {
        if let Some(sample_rate) = self.sample_rate {
            config.sample_rate = sample_rate;
        }
        if let Some(block_size) = self.block_size {
            config.block_size = block_size;
        }
        if let Some(kind) = self.instrument {
            let mut instrument = config.instruments.first().cloned().unwrap_or_default();
            instrument.kind = kind;
            instrument.channel = self.channel.saturating_sub(1);
            config.instruments = vec![instrument];
        }
        if let Some(voices) = self.voices {
            for instrument in config.instruments.iter_mut() {
                instrument.voices = voices;
                instrument.max_voices = instrument.max_voices.max(voices);
            }
        }
        if self.midi_port.is_some() {
            config.midi_port = self.midi_port;
        }
        if self.output_device.is_some() {
            config.output_device = self.output_device.clone();
        }
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    if args.list {
        for name in CpalDevice::list() {
            println!("output: {name}");
        }
        for (index, name) in MidiHandler::ports()?.iter().enumerate() {
            println!("midi {index}: {name}");
        }
        return Ok(());
    }

    let mut config = match &args.config {
        Some(path) => EngineConfig::from_path(path)?,
        None => EngineConfig::default(),
    };
    args.apply(&mut config);
    config.validate()?;

    runtime::run(
        config,
        RunOptions {
            null_device: args.null,
            no_midi: args.no_midi,
        },
    )
}
