use crate::synth::dispatch::ControlEvent;
use crate::synth::engine::EngineInput;
use crate::synth::pipeline::InstrumentId;
use crossbeam_channel::Sender;
use midir::{MidiInput, MidiInputConnection, MidiInputPort};

/// Manufacturer id for non-commercial use; the vendor operator message is
/// `F0 7D <instrument> <operator> <param> <value msb> <value lsb> F7`.
pub const VENDOR_ID: u8 = 0x7d;

/// Decodes one complete MIDI message. Running status, realtime and system
/// messages other than the vendor parameter message are not handled.
pub fn decode(message: &[u8]) -> Option<ControlEvent> {
    let (&status, data) = message.split_first()?;
    if status == 0xf0 {
        return decode_sysex(data);
    }
    let channel = status & 0x0f;
    let data1 = data.first().map(|d| d & 0x7f);
    let data2 = data.get(1).map(|d| d & 0x7f);
    let event = match (status & 0xf0, data1, data2) {
        (0x80, Some(key), Some(_)) => ControlEvent::NoteOff { channel, key },
        (0x90, Some(key), Some(0)) => ControlEvent::NoteOff { channel, key },
        (0x90, Some(key), Some(velocity)) => ControlEvent::NoteOn {
            channel,
            key,
            velocity,
            offset: 0,
        },
        (0xa0, Some(key), Some(value)) => ControlEvent::PolyPressure { channel, key, value },
        (0xb0, Some(index), Some(value)) => ControlEvent::Controller {
            channel,
            index,
            value: (value as u16) << 7,
        },
        (0xd0, Some(value), _) => ControlEvent::ChannelPressure { channel, value },
        (0xe0, Some(lsb), Some(msb)) => ControlEvent::PitchBend {
            channel,
            value: ((msb as u16) << 7) | lsb as u16,
        },
        _ => return None,
    };
    Some(event)
}

fn decode_sysex(data: &[u8]) -> Option<ControlEvent> {
    match data {
        [VENDOR_ID, instrument, operator, param, msb, lsb, 0xf7] => Some(ControlEvent::OperatorParam {
            instrument: InstrumentId(*instrument as u16 & 0x7f),
            operator: operator & 0x7f,
            param: param & 0x7f,
            value: ((*msb as u16 & 0x7f) << 7) | (*lsb as u16 & 0x7f),
        }),
        _ => None,
    }
}

/// Keeps a midir connection open and forwards decoded events.
pub struct MidiHandler {
    // dropping the connection closes the port
    #[allow(dead_code)]
    connection: MidiInputConnection<()>,
    port_name: String,
}

impl MidiHandler {
    /// Connects to input port `index`, or the first one available.
    pub fn connect(index: Option<usize>, events: Sender<EngineInput>) -> anyhow::Result<Self> {
        let midi_in = MidiInput::new("opsynth input")?;
        let port = Self::select_input_port(&midi_in, index)?;
        let port_name = midi_in.port_name(&port)?;

        let connection = midi_in
            .connect(
                &port,
                "opsynth-read-input",
                move |_, message, _| {
                    if let Some(event) = decode(message) {
                        if events.try_send(EngineInput::Control(event)).is_err() {
                            log::warn!("control queue full, dropped {event:?}");
                        }
                    }
                },
                (),
            )
            .map_err(|e| anyhow::anyhow!("could not connect to {port_name}: {e}"))?;

        log::info!("opened MIDI port: {port_name}");
        Ok(Self {
            connection,
            port_name,
        })
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    /// Names of the available input ports, by index.
    pub fn ports() -> anyhow::Result<Vec<String>> {
        let midi_in = MidiInput::new("opsynth port list")?;
        let names = midi_in
            .ports()
            .iter()
            .filter_map(|port| midi_in.port_name(port).ok())
            .collect();
        Ok(names)
    }

    fn select_input_port(midi_in: &MidiInput, index: Option<usize>) -> anyhow::Result<MidiInputPort> {
        let in_ports = midi_in.ports();
        if in_ports.is_empty() {
            anyhow::bail!("no MIDI input ports found");
        }
        for (i, port) in in_ports.iter().enumerate() {
            log::debug!("MIDI input {i}: {}", midi_in.port_name(port).unwrap_or_default());
        }
        let index = index.unwrap_or(0);
        in_ports
            .get(index)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no MIDI input port {index}, {} available", in_ports.len()))
    }
}
