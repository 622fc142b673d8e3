//! Frame loop glue between a channel, the latency probe and lockstep
//!
//! The host calls [`Session::advance`] once per rendered frame with the wall
//! time that passed. Incoming messages are drained first, then the fixed
//! steps run, then the reference world catches up.

use super::NetError;
use super::channel::Channel;
use super::codec::is_time_sync;
use super::input::Input;
use super::lockstep::Lockstep;
use super::timesync::{SyncMessage, TimeSync};
use crate::sim::{FixedStep, World};

pub struct Session<C: Channel> {
    pub lockstep: Lockstep,
    timesync: TimeSync,
    clock: FixedStep,
    channel: C,
    latency_ms: Option<f64>,
}

impl<C: Channel> Session<C> {
    pub fn new(world: World, player: u8, channel: C) -> Self {
        let timesync = TimeSync::new(&world.settings);
        let clock = FixedStep::new(world.settings.sim_dt, world.settings.max_substeps);
        Self {
            lockstep: Lockstep::new(world, player),
            timesync,
            clock,
            channel,
            latency_ms: None,
        }
    }

    /// Send the latency probe burst
    pub fn start(&mut self, now_ms: f64) -> Result<(), NetError> {
        for message in self.timesync.start(now_ms) {
            self.send_sync(message)?;
        }
        Ok(())
    }

    /// One-way latency once the probe has finished
    pub fn latency(&self) -> Option<f64> {
        self.latency_ms
    }

    pub fn channel(&self) -> &C {
        &self.channel
    }

    fn send_sync(&mut self, message: SyncMessage) -> Result<(), NetError> {
        self.channel.send(message.encode().to_vec())
    }

    /// Drain everything the channel has delivered
    pub fn pump(&mut self, now_ms: f64) -> Result<(), NetError> {
        while let Some(bytes) = self.channel.recv()? {
            if is_time_sync(&bytes) {
                let message = match SyncMessage::decode(&bytes) {
                    Ok(message) => message,
                    Err(err) => {
                        log::warn!("dropping time sync message: {}", err);
                        continue;
                    }
                };
                if let Some(reply) = self.timesync.handle(message, now_ms) {
                    self.send_sync(reply)?;
                }
                continue;
            }
            match self.lockstep.receive(&bytes) {
                Err(err) if !err.is_fatal() => log::warn!("dropping packet: {}", err),
                other => other?,
            }
        }

        if self.latency_ms.is_none()
            && let Some(latency) = self.timesync.poll(now_ms)?
        {
            log::info!("latency {:.1} ms", latency);
            self.latency_ms = Some(latency);
        }
        for message in self.timesync.take_outbox() {
            self.send_sync(message)?;
        }
        Ok(())
    }

    /// Advance by `elapsed` seconds of wall time
    ///
    /// `inputs` are recorded for the next simulated frame. Returns the render
    /// interpolation alpha. Nothing is simulated until the latency probe has
    /// finished.
    pub fn advance(
        &mut self,
        elapsed: f64,
        now_ms: f64,
        inputs: &[Input],
    ) -> Result<f64, NetError> {
        self.pump(now_ms)?;
        if self.latency_ms.is_none() {
            return Ok(0.0);
        }

        for input in inputs {
            self.lockstep.record_input(*input)?;
        }
        let steps = self.clock.advance(elapsed);
        for _ in 0..steps.count {
            self.lockstep.step_game();
            if let Some(packet) = self.lockstep.flush()? {
                self.channel.send(packet)?;
            }
        }
        self.lockstep.update();
        Ok(steps.alpha)
    }
}
