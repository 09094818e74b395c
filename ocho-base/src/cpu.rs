use std::{
    convert::TryFrom,
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use rand::random;
use thiserror::Error;
use tracing::{debug, warn};

use crate::{
    font,
    instruction::{Instruction, UnknownOpcodeError},
    machine::{Key, KeyState, Machine, Register, RomTooLargeError, CALL_STACK_DEPTH},
    screen::Screen,
    timer,
};


/// Default delay inserted between execution cycles.
///
/// A plain throttle, not a cycle-accurate clock.
pub const DEFAULT_CYCLE_INTERVAL: Duration = Duration::from_millis(5);

/// Fatal interpreter errors. Every one halts the instruction stream;
/// they signal a malformed ROM or a ROM/interpreter mismatch, so there
/// is no retry or recovery.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CpuError {
    #[error("unrecognized opcode {opcode:#06X} at {program_counter:#05X}")]
    UnknownOpcode { program_counter: u16, opcode: u16 },
    #[error("call at {program_counter:#05X} exceeds the {}-level call stack", CALL_STACK_DEPTH)]
    StackOverflow { program_counter: u16 },
    #[error("return at {program_counter:#05X} with an empty call stack")]
    StackUnderflow { program_counter: u16 },
}

/// What a single execution cycle did beyond mutating machine state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// Nothing to report.
    Continue,
    /// The framebuffer changed; a snapshot should go out to the renderer.
    ScreenUpdated,
    /// The instruction stream is parked until a key-down event arrives.
    WaitingForKeyPress,
}

/// Input edge events fed into the interpreter thread by the frontend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputEvent {
    KeyStateChange { key: Key, state: KeyState },
}

/// Events published by the interpreter thread for the frontend.
#[derive(Debug, Clone, PartialEq)]
pub enum CpuEvent {
    /// The framebuffer changed; `screen` is a snapshot of the new contents.
    ScreenUpdated { screen: Screen },
    /// The interpreter is parked waiting for a key press.
    WaitingForKeyPress,
    /// The sound timer became nonzero.
    SoundStarted,
    /// The sound timer ran out.
    SoundStopped,
    /// A fatal error halted the interpreter.
    Halted { error: CpuError },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyWait {
    Idle,
    Waiting { target: Register },
}

/// The fetch/decode/execute engine.
///
/// Owns its [`Machine`] exclusively; the frontend talks to a running
/// interpreter only through the channels returned by [`Cpu::start`].
#[derive(Debug)]
pub struct Cpu {
    machine: Machine,
    key_wait: KeyWait,
    cycle_interval: Duration,
}

impl Cpu {
    pub fn builder() -> CpuBuilder {
        CpuBuilder::new()
    }

    /// Current framebuffer contents, for an initial draw before [`Cpu::start`].
    pub fn screen(&self) -> &Screen {
        &self.machine.screen
    }

    /// Whether the instruction stream is parked on a key wait.
    pub fn is_waiting_for_key_press(&self) -> bool {
        self.key_wait != KeyWait::Idle
    }

    /// Record a key edge. A key-down fulfills a pending key wait.
    pub fn set_key_state(&mut self, key: Key, state: KeyState) {
        if let KeyWait::Waiting { target } = self.key_wait {
            if state == KeyState::Pressed {
                self.machine.set_register(target, key.code());
                self.key_wait = KeyWait::Idle;
            }
        }
        self.machine.key_states[key.code() as usize] = state;
    }

    /// Execute one fetch/decode/execute cycle.
    pub fn step(&mut self) -> Result<StepOutcome, CpuError> {
        let instruction_address = self.machine.program_counter;
        let opcode = [
            self.machine.read_byte(instruction_address),
            self.machine.read_byte(instruction_address.wrapping_add(1)),
        ];
        self.machine.program_counter = instruction_address.wrapping_add(2);

        let instruction = Instruction::try_from(opcode).map_err(|UnknownOpcodeError(opcode)| {
            CpuError::UnknownOpcode {
                program_counter: instruction_address,
                opcode,
            }
        })?;

        self.execute(instruction, instruction_address)
    }

    fn execute(
        &mut self,
        instruction: Instruction,
        instruction_address: u16,
    ) -> Result<StepOutcome, CpuError> {
        let machine = &mut self.machine;
        let mut outcome = StepOutcome::Continue;

        match instruction {
            Instruction::ClearScreen => {
                if machine.screen.clear() {
                    outcome = StepOutcome::ScreenUpdated;
                }
            }
            Instruction::Return => {
                machine.program_counter =
                    machine
                        .call_stack
                        .pop()
                        .ok_or(CpuError::StackUnderflow {
                            program_counter: instruction_address,
                        })?;
            }
            Instruction::Jump { address } => machine.program_counter = address.into_u16(),
            Instruction::Call { address } => {
                machine
                    .call_stack
                    .push(machine.program_counter)
                    .map_err(|_| CpuError::StackOverflow {
                        program_counter: instruction_address,
                    })?;
                machine.program_counter = address.into_u16();
            }
            Instruction::SkipIfEqualConst { register, value } => {
                if machine.register(register) == value {
                    machine.skip_next_instruction();
                }
            }
            Instruction::SkipIfNotEqualConst { register, value } => {
                if machine.register(register) != value {
                    machine.skip_next_instruction();
                }
            }
            Instruction::SkipIfEqual {
                register1,
                register2,
            } => {
                if machine.register(register1) == machine.register(register2) {
                    machine.skip_next_instruction();
                }
            }
            Instruction::LoadConst { register, value } => machine.set_register(register, value),
            Instruction::AddConst { register, value } => {
                machine.set_register(register, machine.register(register).wrapping_add(value))
            }
            Instruction::Copy { target, source } => {
                machine.set_register(target, machine.register(source))
            }
            Instruction::Or { target, source } => {
                machine.set_register(target, machine.register(target) | machine.register(source))
            }
            Instruction::And { target, source } => {
                machine.set_register(target, machine.register(target) & machine.register(source))
            }
            Instruction::Xor { target, source } => {
                machine.set_register(target, machine.register(target) ^ machine.register(source))
            }
            Instruction::AddWithCarry { target, source } => {
                let (sum, carried) = machine
                    .register(target)
                    .overflowing_add(machine.register(source));
                machine.set_register(target, sum);
                machine.set_register(Register::VF, carried as u8);
            }
            Instruction::Subtract { target, source } => {
                let minuend = machine.register(target);
                let subtrahend = machine.register(source);
                machine.set_register(target, minuend.wrapping_sub(subtrahend));
                machine.set_register(Register::VF, (minuend >= subtrahend) as u8);
            }
            Instruction::ShiftRight { register } => {
                let value = machine.register(register);
                machine.set_register(register, value >> 1);
                machine.set_register(Register::VF, value & 0b1);
            }
            Instruction::SubtractReversed { target, source } => {
                let minuend = machine.register(source);
                let subtrahend = machine.register(target);
                machine.set_register(target, minuend.wrapping_sub(subtrahend));
                machine.set_register(Register::VF, (minuend >= subtrahend) as u8);
            }
            Instruction::ShiftLeft { register } => {
                let value = machine.register(register);
                machine.set_register(register, value << 1);
                machine.set_register(Register::VF, value >> 7);
            }
            Instruction::SkipIfNotEqual {
                register1,
                register2,
            } => {
                if machine.register(register1) != machine.register(register2) {
                    machine.skip_next_instruction();
                }
            }
            Instruction::LoadIndex { address } => machine.index_register = address.into_u16(),
            Instruction::JumpWithOffset { address } => {
                machine.program_counter = address
                    .into_u16()
                    .wrapping_add(machine.register(Register::V0) as u16);
            }
            Instruction::RandomMasked { register, mask } => {
                machine.set_register(register, random::<u8>() & mask);
            }
            Instruction::DrawSprite {
                x_register,
                y_register,
                row_count,
            } => {
                let mut rows = [0; 0xF];
                let rows = &mut rows[..row_count.into_u8() as usize];
                for (row, byte) in rows.iter_mut().enumerate() {
                    *byte = machine.read_byte(machine.index_register.wrapping_add(row as u16));
                }

                let drawn = machine.screen.draw_sprite(
                    machine.register(x_register),
                    machine.register(y_register),
                    rows,
                );

                machine.set_register(Register::VF, drawn.collision as u8);
                if drawn.changed {
                    outcome = StepOutcome::ScreenUpdated;
                }
            }
            Instruction::SkipIfKeyPressed { key_register } => {
                let key = Key::from_code(machine.register(key_register));
                if machine.key_state(key) == KeyState::Pressed {
                    machine.skip_next_instruction();
                }
            }
            Instruction::SkipIfKeyNotPressed { key_register } => {
                let key = Key::from_code(machine.register(key_register));
                if machine.key_state(key) == KeyState::Released {
                    machine.skip_next_instruction();
                }
            }
            Instruction::ReadDelayTimer { target } => {
                machine.set_register(target, machine.timers.delay())
            }
            Instruction::WaitForKeyPress { target } => {
                self.key_wait = KeyWait::Waiting { target };
                outcome = StepOutcome::WaitingForKeyPress;
            }
            Instruction::SetDelayTimer { source } => {
                machine.timers.set_delay(machine.register(source))
            }
            Instruction::SetSoundTimer { source } => {
                machine.timers.set_sound(machine.register(source))
            }
            Instruction::AddToIndex { source } => {
                // VF is deliberately untouched here, unlike on some
                // interpreters for the same instruction set.
                machine.index_register = machine
                    .index_register
                    .wrapping_add(machine.register(source) as u16);
            }
            Instruction::LoadGlyphAddress { digit_register } => {
                machine.index_register = font::glyph_address(machine.register(digit_register));
            }
            Instruction::StoreDecimalDigits { source } => {
                let value = machine.register(source);
                let digits = [value / 100, value / 10 % 10, value % 10];
                for (offset, digit) in digits.iter().copied().enumerate() {
                    machine.write_byte(machine.index_register.wrapping_add(offset as u16), digit);
                }
            }
            Instruction::StoreRegisters { last_register } => {
                for index in 0..=u8::from(last_register) {
                    machine.write_byte(
                        machine.index_register.wrapping_add(index as u16),
                        machine.registers[index as usize],
                    );
                }
            }
            Instruction::LoadRegisters { last_register } => {
                for index in 0..=u8::from(last_register) {
                    machine.registers[index as usize] =
                        machine.read_byte(machine.index_register.wrapping_add(index as u16));
                }
            }
        }

        Ok(outcome)
    }

    /// Start the interpreter and timer driver threads.
    ///
    /// Returns the input event sender, the interpreter event receiver
    /// and the interpreter thread's join handle. Dropping the sender
    /// stops the interpreter even while it is parked in a key wait, and
    /// the timer driver with it.
    pub fn start(
        self,
    ) -> (
        flume::Sender<InputEvent>,
        flume::Receiver<CpuEvent>,
        JoinHandle<Result<(), CpuError>>,
    ) {
        let (input_sender, input_receiver) = flume::unbounded();
        let (event_sender, event_receiver) = flume::unbounded();

        let join_handle = thread::Builder::new()
            .name("interpreter".to_owned())
            .spawn(move || {
                // Dropped when run returns, stopping the driver thread.
                let (_timer_shutdown, _timer_driver) =
                    timer::start_driver(self.machine.timers.clone());
                self.run(&input_receiver, &event_sender)
            })
            .expect("could not spawn interpreter thread");

        (input_sender, event_receiver, join_handle)
    }

    #[tracing::instrument(skip_all, fields(cycle_interval = ?self.cycle_interval))]
    fn run(
        mut self,
        input: &flume::Receiver<InputEvent>,
        events: &flume::Sender<CpuEvent>,
    ) -> Result<(), CpuError> {
        let sleeper = spin_sleep::SpinSleeper::default();
        let mut sound_playing = false;

        loop {
            loop {
                match input.try_recv() {
                    Ok(event) => self.apply_input_event(event),
                    Err(flume::TryRecvError::Empty) => break,
                    Err(flume::TryRecvError::Disconnected) => {
                        debug!("input channel disconnected, stopping");
                        return Ok(());
                    }
                }
            }

            let outcome = match self.step() {
                Ok(outcome) => outcome,
                Err(error) => {
                    warn!(%error, "halting");
                    let _ = events.send(CpuEvent::Halted {
                        error: error.clone(),
                    });
                    return Err(error);
                }
            };

            match outcome {
                StepOutcome::Continue => (),
                StepOutcome::ScreenUpdated => {
                    let screen = self.machine.screen;
                    if events.send(CpuEvent::ScreenUpdated { screen }).is_err() {
                        // Event receiver gone: the frontend shut down.
                        return Ok(());
                    }
                }
                StepOutcome::WaitingForKeyPress => {
                    if events.send(CpuEvent::WaitingForKeyPress).is_err() {
                        return Ok(());
                    }
                    while self.is_waiting_for_key_press() {
                        // The timers keep running while parked, so keep
                        // reporting sound edges at timer rate.
                        match input.recv_deadline(Instant::now() + timer::TICK_PERIOD) {
                            Ok(event) => self.apply_input_event(event),
                            Err(flume::RecvTimeoutError::Timeout) => {
                                self.report_sound_edge(events, &mut sound_playing);
                            }
                            Err(flume::RecvTimeoutError::Disconnected) => {
                                debug!("input channel disconnected during key wait, stopping");
                                return Ok(());
                            }
                        }
                    }
                }
            }

            self.report_sound_edge(events, &mut sound_playing);

            sleeper.sleep(self.cycle_interval);
        }
    }

    fn apply_input_event(&mut self, event: InputEvent) {
        match event {
            InputEvent::KeyStateChange { key, state } => self.set_key_state(key, state),
        }
    }

    fn report_sound_edge(&self, events: &flume::Sender<CpuEvent>, sound_playing: &mut bool) {
        let sounding = self.machine.timers.sound() > 0;
        if sounding != *sound_playing {
            *sound_playing = sounding;
            let _ = events.send(if sounding {
                CpuEvent::SoundStarted
            } else {
                CpuEvent::SoundStopped
            });
        }
    }
}

impl Default for Cpu {
    fn default() -> Self {
        CpuBuilder::new().build()
    }
}

/// Builder for a [`Cpu`] with a ROM loaded and the throttle configured.
pub struct CpuBuilder {
    cpu: Cpu,
}

impl CpuBuilder {
    pub fn new() -> Self {
        Self {
            cpu: Cpu {
                machine: Machine::new(),
                key_wait: KeyWait::Idle,
                cycle_interval: DEFAULT_CYCLE_INTERVAL,
            },
        }
    }

    /// Load a ROM image at the standard load address.
    pub fn rom(mut self, rom: &[u8]) -> Result<Self, RomTooLargeError> {
        self.cpu.machine.load_rom(rom)?;
        Ok(self)
    }

    /// Delay inserted between execution cycles.
    pub fn cycle_interval(mut self, cycle_interval: Duration) -> Self {
        self.cpu.cycle_interval = cycle_interval;
        self
    }

    pub fn build(self) -> Cpu {
        self.cpu
    }
}

impl Default for CpuBuilder {
    fn default() -> Self {
        Self::new()
    }
}
