#![no_main]
#[macro_use] extern crate libfuzzer_sys;
extern crate tickws;

use std::io::{self, Read};

use tickws::{
    protocol::{FrameCodec, Message, Step},
    Config, Outbox,
};

struct Peer<'a>(&'a [u8]);

impl Read for Peer<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.0.is_empty() {
            return Err(io::ErrorKind::WouldBlock.into());
        }
        self.0.read(buf)
    }
}

fuzz_target!(|data: &[u8]| {
    let config = Config::default().max_message_size(Some(1 << 20)).max_frame_size(Some(1 << 20));
    let mut codec = FrameCodec::new(&config);
    let mut peer = Peer(data);
    while let Ok(Step::Progress) = codec.recv(&mut peer, |msg: Message<'_>, outbox: &mut Outbox| {
        outbox.binary(msg.payload().to_vec());
    }) {}
    let _ = codec.send(&mut io::sink());
});
