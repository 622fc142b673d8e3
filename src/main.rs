//! Lockstep Pong headless demo
//!
//! Runs two peers over an in-process channel with artificial delay. Each
//! paddle is driven by a simple tracker so the reconciliation path is
//! exercised. Usage: `lockstep-pong [settings.json] [seed] [frames]`.

#[cfg(not(target_arch = "wasm32"))]
fn main() {
    env_logger::init();
    if let Err(err) = native::run() {
        log::error!("{}", err);
        std::process::exit(1);
    }
}

#[cfg(target_arch = "wasm32")]
fn main() {
    // The library is driven by the host page; there is no native loop here
}

#[cfg(not(target_arch = "wasm32"))]
mod native {
    use lockstep_pong::net::{Input, MemoryChannel, Session};
    use lockstep_pong::{Settings, World};

    /// Packets are held back this many polls, roughly one frame each
    const CHANNEL_DELAY: usize = 4;
    const MAX_NUDGE: f64 = 8.0;

    fn track(world: &World, player: u8) -> Option<Input> {
        let puck = world.pucks.get(world.primary_puck()?).ok()?;
        let paddle = world.paddles.get(world.paddle_of(player)?).ok()?;
        let dx = (puck.current.x - paddle.current.x).clamp(-MAX_NUDGE, MAX_NUDGE);
        (dx.abs() > 0.5).then_some(Input::Move { player, dx })
    }

    pub fn run() -> Result<(), Box<dyn std::error::Error>> {
        let mut args = std::env::args().skip(1);
        let settings = match args.next() {
            Some(path) if path != "-" => Settings::load(&path)?,
            _ => Settings::default(),
        };
        settings.validate()?;
        let seed: u64 = args.next().map(|s| s.parse()).transpose()?.unwrap_or(42);
        let frames: u32 = args.next().map(|s| s.parse()).transpose()?.unwrap_or(3600);

        log::info!("Lockstep Pong (headless) seed {} for {} frames", seed, frames);

        let mut world = World::new(seed, settings.clone());
        world.start()?;

        let (left, right) = MemoryChannel::pair_with_delay(CHANNEL_DELAY);
        let mut peers = [
            Session::new(world.clone(), 0, left),
            Session::new(world, 1, right),
        ];
        for peer in &mut peers {
            peer.start(0.0)?;
        }

        let dt = settings.sim_dt;
        for i in 0..frames {
            let now = i as f64 * dt * 1000.0;
            for (player, peer) in peers.iter_mut().enumerate() {
                let inputs: Vec<Input> = track(&peer.lockstep.game, player as u8)
                    .into_iter()
                    .collect();
                if let Err(err) = peer.advance(dt, now, &inputs) {
                    if err.is_fatal() {
                        log::error!("peer {}: connection lost", player);
                    }
                    return Err(err.into());
                }
                for event in peer.lockstep.game.take_events() {
                    log::trace!("peer {}: {:?}", player, event);
                }
            }

            if i % 600 == 0 {
                let game = &peers[0].lockstep.game;
                log::info!(
                    "frame {} phase {:?} score {}:{} level {} ahead {}",
                    game.frame,
                    game.phase,
                    game.score[0],
                    game.score[1],
                    game.level,
                    peers[0].lockstep.ahead()
                );
            }
        }

        let [a, b] = &peers;
        log::info!(
            "latency {:?} / {:?} ms",
            a.latency().map(|l| l.round()),
            b.latency().map(|l| l.round())
        );
        let (sa, sb) = (&a.lockstep.sync, &b.lockstep.sync);
        if sa.frame == sb.frame {
            log::info!(
                "sync frame {}: {:016x} / {:016x} {}",
                sa.frame,
                sa.hash(),
                sb.hash(),
                if sa.hash() == sb.hash() { "in sync" } else { "DESYNC" }
            );
        } else {
            log::info!(
                "sync frames {} / {}: {:016x} / {:016x}",
                sa.frame,
                sb.frame,
                sa.hash(),
                sb.hash()
            );
        }
        println!("{}", a.lockstep.game.to_json()?);
        Ok(())
    }
}
