//! In-memory bootloader used by the unit tests.
//!
//! [`SimTarget`] implements [`Port`]. Every frame written to it is decoded and
//! logged, and an answer is queued the way the ROM would send it. A
//! [`SimHandle`] keeps access to the log after the target has been moved into
//! a session or flasher.

use {
    crate::{
        error::Result,
        port::Port,
        protocol::{
            CommandType,
            frame::{Decoded, decode, encode},
        },
        target::{CHIP_MAGIC_REG, ChipFamily},
    },
    byteorder::{ByteOrder, LittleEndian},
    std::{
        collections::{HashMap, HashSet, VecDeque},
        io::{self, Read, Write},
        sync::{Arc, Mutex, MutexGuard},
        thread,
        time::Duration,
    },
};

type BlockHook = Box<dyn FnMut(u32) + Send>;

#[derive(Default)]
struct SimState {
    pending: VecDeque<u8>,
    written: Vec<u8>,
    frames: Vec<(u8, Vec<u8>)>,
    control_lines: Vec<(bool, bool)>,
    dtr: bool,
    rts: bool,
    closed: usize,
    silent: bool,
    ignore_syncs: u32,
    nacks: HashMap<u8, (u8, u8)>,
    failing_sequences: HashSet<u32>,
    dropped_sequences: HashSet<u32>,
    magic: u32,
}

impl SimState {
    /// Decode every complete frame written so far and queue the answers.
    /// Returns the sequence numbers of FlashData frames seen.
    fn process(&mut self) -> Vec<u32> {
        let mut blocks = Vec::new();
        loop {
            match decode(&self.written) {
                Decoded::Incomplete => break,
                Decoded::Malformed { consumed, .. } => {
                    self.written.drain(..consumed);
                },
                Decoded::Frame { frame, consumed } => {
                    self.written.drain(..consumed);
                    let command = frame.command();
                    let payload = frame.into_payload();
                    let sequence = (command == CommandType::FlashData as u8 && payload.len() >= 8)
                        .then(|| LittleEndian::read_u32(&payload[4..8]));
                    let address = (payload.len() >= 4).then(|| LittleEndian::read_u32(&payload[0..4]));
                    self.frames.push((command, payload));

                    if let Some(sequence) = sequence {
                        blocks.push(sequence);
                    }
                    self.answer(command, sequence, address);
                },
            }
        }
        blocks
    }

    #[allow(clippy::unwrap_used)]
    fn answer(&mut self, command: u8, sequence: Option<u32>, address: Option<u32>) {
        if self.silent {
            return;
        }
        if command == CommandType::Sync as u8 && self.ignore_syncs > 0 {
            self.ignore_syncs -= 1;
            return;
        }

        let (mut status, mut error) = self
            .nacks
            .get(&command)
            .copied()
            .unwrap_or((0, 0));
        if let Some(sequence) = sequence {
            if self.dropped_sequences.contains(&sequence) {
                return;
            }
            if self.failing_sequences.contains(&sequence) {
                (status, error) = (1, 0x07);
            }
        }

        let value = if command == CommandType::ReadRegister as u8 && address == Some(CHIP_MAGIC_REG) {
            self.magic
        } else {
            0
        };

        let mut payload = value.to_le_bytes().to_vec();
        payload.extend_from_slice(&[status, error]);
        let reply = encode(command, &payload).unwrap();

        // The ROM answers a sync burst several times.
        let copies = if command == CommandType::Sync as u8 { 3 } else { 1 };
        for _ in 0..copies {
            self.pending.extend(&reply);
        }
    }
}

/// Simulated ROM bootloader behind a [`Port`].
pub struct SimTarget {
    name: String,
    state: Arc<Mutex<SimState>>,
    timeout: Duration,
    baud_rate: u32,
    control_lines: bool,
    on_block: Option<BlockHook>,
}

impl SimTarget {
    /// An ESP8266 that acknowledges everything.
    pub fn new(name: &str) -> Self {
        let state = SimState {
            magic: ChipFamily::Esp8266
                .magic()
                .unwrap_or_default(),
            ..SimState::default()
        };
        Self {
            name: name.to_string(),
            state: Arc::new(Mutex::new(state)),
            timeout: Duration::from_millis(100),
            baud_rate: 115_200,
            control_lines: true,
            on_block: None,
        }
    }

    /// Inspection handle sharing this target's state.
    pub fn handle(&self) -> SimHandle {
        SimHandle {
            state: Arc::clone(&self.state),
        }
    }

    /// Never answer.
    pub fn silent(self) -> Self {
        self.lock().silent = true;
        self
    }

    /// Leave the first `count` sync bursts unanswered.
    pub fn ignore_syncs(self, count: u32) -> Self {
        self.lock().ignore_syncs = count;
        self
    }

    /// Reject every `command` with the given status bytes.
    pub fn nack(self, command: CommandType, status: u8, error: u8) -> Self {
        self.lock()
            .nacks
            .insert(command as u8, (status, error));
        self
    }

    /// Reject the FlashData block with this sequence number.
    pub fn fail_sequence(self, sequence: u32) -> Self {
        self.lock()
            .failing_sequences
            .insert(sequence);
        self
    }

    /// Never answer the FlashData block with this sequence number.
    pub fn drop_sequence(self, sequence: u32) -> Self {
        self.lock()
            .dropped_sequences
            .insert(sequence);
        self
    }

    /// Value returned for the chip magic register.
    pub fn with_magic(self, magic: u32) -> Self {
        self.lock().magic = magic;
        self
    }

    /// Report no DTR/RTS support.
    pub fn without_control_lines(mut self) -> Self {
        self.control_lines = false;
        self
    }

    /// Run `hook` with the sequence number after each FlashData frame.
    pub fn on_block(mut self, hook: impl FnMut(u32) + Send + 'static) -> Self {
        self.on_block = Some(Box::new(hook));
        self
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl Read for SimTarget {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = {
            let mut state = self.lock();
            let n = buf
                .len()
                .min(state.pending.len());
            for (slot, byte) in buf
                .iter_mut()
                .zip(state.pending.drain(..n))
            {
                *slot = byte;
            }
            n
        };

        if n == 0 {
            thread::sleep(self.timeout);
            return Err(io::Error::new(io::ErrorKind::TimedOut, "simulated timeout"));
        }
        Ok(n)
    }
}

impl Write for SimTarget {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let blocks = {
            let mut state = self.lock();
            state
                .written
                .extend_from_slice(buf);
            state.process()
        };
        if let Some(hook) = self
            .on_block
            .as_mut()
        {
            for sequence in blocks {
                hook(sequence);
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Port for SimTarget {
    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.timeout = timeout;
        Ok(())
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn set_baud_rate(&mut self, baud_rate: u32) -> Result<()> {
        self.baud_rate = baud_rate;
        Ok(())
    }

    fn baud_rate(&self) -> u32 {
        self.baud_rate
    }

    fn clear_buffers(&mut self) -> Result<()> {
        let mut state = self.lock();
        state
            .pending
            .clear();
        state
            .written
            .clear();
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn supports_control_lines(&self) -> bool {
        self.control_lines
    }

    fn set_dtr(&mut self, level: bool) -> Result<()> {
        let mut state = self.lock();
        state.dtr = level;
        let lines = (state.dtr, state.rts);
        state
            .control_lines
            .push(lines);
        Ok(())
    }

    fn set_rts(&mut self, level: bool) -> Result<()> {
        let mut state = self.lock();
        state.rts = level;
        let lines = (state.dtr, state.rts);
        state
            .control_lines
            .push(lines);
        Ok(())
    }

    fn set_control_lines(&mut self, dtr: bool, rts: bool) -> Result<()> {
        let mut state = self.lock();
        state.dtr = dtr;
        state.rts = rts;
        state
            .control_lines
            .push((dtr, rts));
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.lock().closed += 1;
        Ok(())
    }
}

/// Shared view of a [`SimTarget`]'s log.
#[derive(Clone)]
pub struct SimHandle {
    state: Arc<Mutex<SimState>>,
}

impl SimHandle {
    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Command ids of every frame received, in order.
    pub fn commands(&self) -> Vec<u8> {
        self.lock()
            .frames
            .iter()
            .map(|(command, _)| *command)
            .collect()
    }

    /// Number of frames received for `command`.
    pub fn count(&self, command: CommandType) -> usize {
        self.payloads(command)
            .len()
    }

    /// Payloads received for `command`, in order.
    pub fn payloads(&self, command: CommandType) -> Vec<Vec<u8>> {
        self.lock()
            .frames
            .iter()
            .filter(|(id, _)| *id == command as u8)
            .map(|(_, payload)| payload.clone())
            .collect()
    }

    /// Sequence numbers of the FlashData frames received.
    pub fn sequences(&self) -> Vec<u32> {
        self.payloads(CommandType::FlashData)
            .iter()
            .map(|payload| LittleEndian::read_u32(&payload[4..8]))
            .collect()
    }

    /// Data carried by the FlashData frames, sub-headers stripped.
    pub fn written_data(&self) -> Vec<u8> {
        self.payloads(CommandType::FlashData)
            .iter()
            .flat_map(|payload| payload[16..].to_vec())
            .collect()
    }

    /// (DTR, RTS) after every control-line change.
    pub fn control_lines(&self) -> Vec<(bool, bool)> {
        self.lock()
            .control_lines
            .clone()
    }

    /// Number of `close` calls.
    pub fn close_count(&self) -> usize {
        self.lock().closed
    }

    /// Queue raw bytes for the host to read, ahead of any later answer.
    pub fn inject(&self, bytes: &[u8]) {
        self.lock()
            .pending
            .extend(bytes);
    }
}
