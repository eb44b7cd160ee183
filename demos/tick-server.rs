//! A tick-driven server answering a small command set, as a render loop would host it.
//!
//! Connect with any WebSocket client to `ws://localhost:5050` and send `LISTAPPS`.

use std::{
    thread,
    time::{Duration, Instant},
};

use log::{info, warn};
use tickws::{Config, Message, Outbox, Router, Server, TickEvent};

const FRAME_TIME: Duration = Duration::from_millis(16);
const FRAMEBUFFER_LEN: usize = 400 * 240 * 4;

fn router() -> Router {
    let mut router = Router::new();
    router
        .on_text_command("LISTAPPS", |_: &Message<'_>, outbox: &mut Outbox| {
            outbox.text("clock\nweather\nsnake");
        })
        .on_text(|msg: &Message<'_>, outbox: &mut Outbox| {
            info!("text received: {}", msg.text_lossy());
            outbox.text(msg.payload().to_vec());
        })
        .on_binary_len(FRAMEBUFFER_LEN, |msg: &Message<'_>, _: &mut Outbox| {
            let lit = msg.payload().iter().filter(|&&b| b != 0).count();
            info!("framebuffer received: {lit} of {FRAMEBUFFER_LEN} bytes set");
        });
    router
}

fn main() -> std::io::Result<()> {
    env_logger::init();

    let mut server = Server::bind(Config::default())?;
    let mut router = router();
    let mut frame = 0u64;

    loop {
        let started = Instant::now();
        match server.tick(&mut router) {
            TickEvent::Idle | TickEvent::Pumped => {}
            TickEvent::Connected(addr) => info!("frame {frame}: {addr} connected"),
            TickEvent::HandshakeFailed(err) => warn!("frame {frame}: handshake failed: {err}"),
            TickEvent::Disconnected => info!("frame {frame}: peer left"),
            TickEvent::Failed(err) => warn!("frame {frame}: session failed: {err}"),
        }

        if frame % 600 == 599 {
            if let Some(session) = server.session_mut() {
                if let Err(err) = session.send_text(format!("frame {frame}")) {
                    warn!("Status update dropped: {err}");
                }
            }
        }

        frame += 1;
        thread::sleep(FRAME_TIME.saturating_sub(started.elapsed()));
    }
}
