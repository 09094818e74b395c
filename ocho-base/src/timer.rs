use std::{
    sync::{
        atomic::{AtomicU8, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

/// Period of one timer decrement, roughly 60 Hz.
pub const TICK_PERIOD: Duration = Duration::from_micros(16_667);

#[derive(Debug, Default)]
struct TimerCells {
    delay: AtomicU8,
    sound: AtomicU8,
}

/// Handle to the delay and sound timer registers.
///
/// The timer driver thread and the interpreter each hold a clone of the
/// same pair, so updates need no locking beyond the atomics themselves.
#[derive(Debug, Clone, Default)]
pub struct Timers {
    cells: Arc<TimerCells>,
}

impl Timers {
    pub fn delay(&self) -> u8 {
        self.cells.delay.load(Ordering::Acquire)
    }

    pub fn set_delay(&self, value: u8) {
        self.cells.delay.store(value, Ordering::Release);
    }

    pub fn sound(&self) -> u8 {
        self.cells.sound.load(Ordering::Acquire)
    }

    pub fn set_sound(&self, value: u8) {
        self.cells.sound.store(value, Ordering::Release);
    }

    /// Decrement both timers by one, clamped at zero.
    pub fn tick(&self) {
        Self::decrement(&self.cells.delay);
        Self::decrement(&self.cells.sound);
    }

    fn decrement(cell: &AtomicU8) {
        // checked_sub leaves an expired timer at zero instead of wrapping
        let _ = cell.fetch_update(Ordering::AcqRel, Ordering::Acquire, |value| {
            value.checked_sub(1)
        });
    }
}

impl PartialEq for Timers {
    fn eq(&self, other: &Self) -> bool {
        (self.delay(), self.sound()) == (other.delay(), other.sound())
    }
}

impl Eq for Timers {}

/// Start the fixed-rate timer driver thread.
///
/// Decrements `timers` every [`TICK_PERIOD`] until the returned sender
/// is dropped, independently of how fast the interpreter is cycling.
pub fn start_driver(timers: Timers) -> (flume::Sender<()>, JoinHandle<()>) {
    let (shutdown_sender, shutdown_receiver) = flume::bounded(0);

    let join_handle = thread::Builder::new()
        .name("timer driver".to_owned())
        .spawn(move || {
            let mut next_tick = Instant::now() + TICK_PERIOD;
            loop {
                match shutdown_receiver.recv_deadline(next_tick) {
                    Err(flume::RecvTimeoutError::Timeout) => {
                        timers.tick();
                        next_tick += TICK_PERIOD;
                    }
                    Ok(()) | Err(flume::RecvTimeoutError::Disconnected) => break,
                }
            }
        })
        .expect("could not spawn timer driver thread");

    (shutdown_sender, join_handle)
}
