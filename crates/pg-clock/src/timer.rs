//! The coarse timer task.
//!
//! A dedicated thread whose only job is to send [`TimerSignal::TickOccurred`]
//! every interval while started. It knows nothing about pulses; the
//! consumer samples the playback clock when a signal arrives. Messages in
//! both directions are fire-and-forget. If either side goes away the other
//! simply stops hearing from it.
//!
//! At most one signal waits unread; further ticks fold into it.

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Messages into the timer thread.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimerCommand {
    /// Begin sending signals.
    Start,
    /// Stop sending signals; the thread stays alive.
    Stop,
    /// Change the interval between signals.
    SetInterval(Duration),
    /// End the thread.
    Quit,
}

/// Messages out of the timer thread.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimerSignal {
    TickOccurred,
}

/// Handle to a running timer thread.
///
/// Dropping the handle quits the thread.
#[derive(Debug)]
pub struct Timer {
    commands: Sender<TimerCommand>,
    signals: Receiver<TimerSignal>,
    thread: Option<JoinHandle<()>>,
}

impl Timer {
    /// Spawn a stopped timer with the given interval.
    pub fn spawn(interval: Duration) -> Self {
        let (commands, command_rx) = crossbeam_channel::unbounded();
        let (signal_tx, signals) = crossbeam_channel::bounded(1);
        let thread = std::thread::Builder::new()
            .name("pg-timer".into())
            .spawn(move || timer_thread(command_rx, signal_tx, interval));
        let thread = match thread {
            Ok(handle) => Some(handle),
            Err(err) => {
                log::warn!("timer thread unavailable, no signals will arrive: {}", err);
                None
            }
        };
        Self {
            commands,
            signals,
            thread,
        }
    }

    pub fn start(&self) {
        self.send(TimerCommand::Start);
    }

    pub fn stop(&self) {
        self.send(TimerCommand::Stop);
    }

    pub fn set_interval(&self, interval: Duration) {
        self.send(TimerCommand::SetInterval(interval));
    }

    /// The receiving side of the signal channel.
    pub fn signals(&self) -> &Receiver<TimerSignal> {
        &self.signals
    }

    fn send(&self, command: TimerCommand) {
        if self.commands.send(command).is_err() {
            log::debug!("timer is gone, dropped {:?}", command);
        }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.send(TimerCommand::Quit);
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                log::debug!("timer thread panicked before quitting");
            }
        }
    }
}

fn timer_thread(commands: Receiver<TimerCommand>, signals: Sender<TimerSignal>, mut interval: Duration) {
    let mut deadline: Option<Instant> = None;
    loop {
        let command = match deadline {
            Some(at) => match commands.recv_deadline(at) {
                Ok(command) => command,
                Err(RecvTimeoutError::Timeout) => {
                    match signals.try_send(TimerSignal::TickOccurred) {
                        Ok(()) | Err(TrySendError::Full(_)) => {}
                        Err(TrySendError::Disconnected(_)) => {
                            log::debug!("timer consumer is gone, exiting");
                            return;
                        }
                    }
                    let next = at + interval;
                    let now = Instant::now();
                    // Fell behind: resume the cadence from now rather than
                    // bursting.
                    deadline = Some(if next < now { now + interval } else { next });
                    continue;
                }
                Err(RecvTimeoutError::Disconnected) => return,
            },
            None => match commands.recv() {
                Ok(command) => command,
                Err(_) => return,
            },
        };

        match command {
            TimerCommand::Start => {
                if deadline.is_none() {
                    deadline = Some(Instant::now() + interval);
                }
            }
            TimerCommand::Stop => deadline = None,
            TimerCommand::SetInterval(new) => {
                interval = new.max(Duration::from_millis(1));
                if deadline.is_some() {
                    deadline = Some(Instant::now() + interval);
                }
            }
            TimerCommand::Quit => return,
        }
    }
}
