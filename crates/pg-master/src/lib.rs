//! Headless transport for pulsegrid.
//!
//! Owns the playback clock, the coarse timer thread, the pulse registry
//! and the scheduler, and exposes one API for adding tracks, retuning
//! them and playing. All hierarchy mutation and all fan-out happen on the
//! thread that owns the [`Transport`]; the timer thread only sends
//! signals.

mod config;
mod track;

use crossbeam_channel::RecvTimeoutError;
use pg_clock::{ClockError, PlaybackClock, Timer};
use pg_engine::{EventQueue, LookaheadScheduler, PulseRegistry};
use std::time::{Duration, Instant};
use thiserror::Error;
use track::{Track, Tracks};

// Re-export common types so callers don't need pg-core/pg-clock directly.
pub use config::{TransportConfig, DEFAULT_LOOKAHEAD, DEFAULT_TIMER_INTERVAL};
pub use pg_clock::{ManualClock, SystemClock};
pub use pg_core::{Period, PulseError, ScheduledTick, StepTick, Tempo};
pub use track::{TickListener, TrackId};

/// Error type for transport operations.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error(transparent)]
    Pulse(#[from] PulseError),
    #[error(transparent)]
    Clock(#[from] ClockError),
    #[error("no track with id {0:?}")]
    UnknownTrack(TrackId),
    #[error("invalid transport config: {0}")]
    InvalidConfig(String),
}

/// Headless step transport: owns the tracks and drives them in sync.
pub struct Transport<C: PlaybackClock> {
    clock: C,
    config: TransportConfig,
    registry: PulseRegistry,
    scheduler: LookaheadScheduler,
    tracks: Tracks,
    timer: Option<Timer>,
    playing: bool,
}

impl<C: PlaybackClock> Transport<C> {
    pub fn new(clock: C, config: TransportConfig) -> Result<Self, TransportError> {
        config.validate()?;
        Ok(Self {
            clock,
            config,
            registry: PulseRegistry::new(),
            scheduler: LookaheadScheduler::new(config.lookahead),
            tracks: Tracks::default(),
            timer: None,
            playing: false,
        })
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn registry(&self) -> &PulseRegistry {
        &self.registry
    }

    pub fn scheduler(&self) -> &LookaheadScheduler {
        &self.scheduler
    }

    // --- Tracks ---

    /// Add a track of `steps` steps per cycle.
    pub fn add_track(
        &mut self,
        steps: u32,
        listener: impl TickListener + 'static,
    ) -> Result<TrackId, TransportError> {
        let id = self.tracks.0.insert(Track {
            steps,
            registered: false,
            listener: Box::new(listener),
        });
        match self.registry.register(id, steps) {
            Ok(derivations) => {
                self.scheduler.apply(&derivations);
                if let Some(track) = self.tracks.0.get_mut(id) {
                    track.registered = true;
                }
                log::debug!("track {:?} added at {} steps", id, steps);
                Ok(id)
            }
            Err(err) => {
                self.tracks.0.remove(id);
                Err(err.into())
            }
        }
    }

    /// Remove a track, handing its listener back.
    pub fn remove_track(&mut self, id: TrackId) -> Result<Box<dyn TickListener>, TransportError> {
        let track = self.tracks.0.remove(id).ok_or(TransportError::UnknownTrack(id))?;
        if track.registered {
            let derivations = self.registry.deregister(id, track.steps);
            self.scheduler.apply(&derivations);
        }
        Ok(track.listener)
    }

    /// Change a track's step count.
    ///
    /// If the new count cannot be registered the track stays in the
    /// transport but receives no ticks until
    /// [`register_track`](Self::register_track) succeeds.
    pub fn set_track_steps(&mut self, id: TrackId, steps: u32) -> Result<(), TransportError> {
        let track = self.tracks.0.get(id).ok_or(TransportError::UnknownTrack(id))?;
        if !track.registered {
            return self.register_track(id, steps);
        }
        let old = track.steps;
        match self.registry.update(id, old, steps) {
            Ok(derivations) => {
                self.scheduler.apply(&derivations);
                if let Some(track) = self.tracks.0.get_mut(id) {
                    track.steps = steps;
                }
                Ok(())
            }
            Err(err) => {
                self.scheduler.detach(id);
                if let Some(track) = self.tracks.0.get_mut(id) {
                    track.registered = false;
                }
                log::warn!("track {:?} left unregistered: {}", id, err);
                Err(err.into())
            }
        }
    }

    /// Register a track that is currently unregistered, at `steps`.
    pub fn register_track(&mut self, id: TrackId, steps: u32) -> Result<(), TransportError> {
        let track = self.tracks.0.get(id).ok_or(TransportError::UnknownTrack(id))?;
        if track.registered {
            return self.set_track_steps(id, steps);
        }
        let derivations = self.registry.register(id, steps)?;
        self.scheduler.apply(&derivations);
        if let Some(track) = self.tracks.0.get_mut(id) {
            track.steps = steps;
            track.registered = true;
        }
        Ok(())
    }

    pub fn track_steps(&self, id: TrackId) -> Option<u32> {
        self.tracks.0.get(id).map(|t| t.steps)
    }

    pub fn is_registered(&self, id: TrackId) -> bool {
        self.tracks.0.get(id).is_some_and(|t| t.registered)
    }

    pub fn track_count(&self) -> usize {
        self.tracks.0.len()
    }

    /// Periods currently running their own clock, largest first.
    pub fn lead_periods(&self) -> Vec<u32> {
        self.registry.lead_periods().iter().map(|p| p.get()).collect()
    }

    /// Periods deriving from the lead at `steps`, largest first.
    pub fn children_of(&self, steps: u32) -> Vec<u32> {
        let Ok(period) = Period::new(steps) else {
            return Vec::new();
        };
        let mut children: Vec<u32> = self
            .registry
            .pulse(period)
            .map(|p| p.children().iter().map(|c| c.get()).collect())
            .unwrap_or_default();
        children.sort_unstable_by(|a, b| b.cmp(a));
        children
    }

    // --- Playback ---

    pub fn play(&mut self) -> Result<(), TransportError> {
        if self.playing {
            return Ok(());
        }
        self.clock.resume()?;
        let now = self.clock.now();
        self.scheduler.start(now, &self.config.tempo, &mut self.registry);
        let interval = self.config.timer_interval;
        self.timer.get_or_insert_with(|| Timer::spawn(interval)).start();
        self.playing = true;
        log::info!("playing {} tracks on {:?} leads", self.track_count(), self.lead_periods());
        Ok(())
    }

    /// Stop playback. A signal already being handled finishes; later
    /// signals are ignored.
    pub fn stop(&mut self) -> Result<(), TransportError> {
        if let Some(timer) = &self.timer {
            timer.stop();
        }
        if !self.playing {
            return Ok(());
        }
        self.playing = false;
        self.scheduler.stop();
        self.clock.suspend()?;
        log::info!("stopped at {:.3}s", self.clock.now());
        Ok(())
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn set_interval(&mut self, interval: Duration) -> Result<(), TransportError> {
        let config = self.config.with_timer_interval(interval);
        config.validate()?;
        self.config = config;
        if let Some(timer) = &self.timer {
            timer.set_interval(interval);
        }
        Ok(())
    }

    /// Change the tempo; it takes effect on the next signal.
    pub fn set_tempo(&mut self, tempo: Tempo) -> Result<(), TransportError> {
        let config = self.config.with_tempo(tempo);
        config.validate()?;
        self.config = config;
        Ok(())
    }

    pub fn set_lookahead(&mut self, seconds: f64) -> Result<(), TransportError> {
        let config = self.config.with_lookahead(seconds);
        config.validate()?;
        self.config = config;
        self.scheduler.set_lookahead(seconds);
        Ok(())
    }

    /// Handle one coarse signal now. Returns the number of lead steps
    /// emitted.
    pub fn process_signal(&mut self) -> usize {
        if !self.playing {
            return 0;
        }
        let now = self.clock.now();
        self.scheduler
            .on_signal(now, &self.config.tempo, &mut self.registry, &mut self.tracks)
    }

    /// Handle every timer signal that has already arrived, without
    /// blocking.
    pub fn pump(&mut self) -> usize {
        let Some(signals) = self.timer.as_ref().map(|t| t.signals().clone()) else {
            return 0;
        };
        signals.try_iter().map(|_| self.process_signal()).sum()
    }

    /// Consume timer signals for `duration`, or until stopped.
    pub fn run_for(&mut self, duration: Duration) -> usize {
        let Some(signals) = self.timer.as_ref().map(|t| t.signals().clone()) else {
            log::debug!("run_for without a timer; call play() first");
            return 0;
        };
        let deadline = Instant::now() + duration;
        let mut emitted = 0;
        while self.playing {
            match signals.recv_deadline(deadline) {
                Ok(_) => emitted += self.process_signal(),
                Err(RecvTimeoutError::Timeout) => break,
                Err(RecvTimeoutError::Disconnected) => {
                    log::debug!("timer disconnected; no further signals");
                    break;
                }
            }
        }
        emitted
    }

    /// The presentation queue.
    pub fn events(&mut self) -> &mut EventQueue {
        self.scheduler.events()
    }
}

impl<C: PlaybackClock> Drop for Transport<C> {
    fn drop(&mut self) {
        if let Err(err) = self.stop() {
            log::debug!("stop on drop failed: {}", err);
        }
    }
}
