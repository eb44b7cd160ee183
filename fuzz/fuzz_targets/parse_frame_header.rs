#![no_main]
#[macro_use] extern crate libfuzzer_sys;
extern crate tickws;

fuzz_target!(|data: &[u8]| {
    if let Ok(Some((_, _, consumed))) = tickws::protocol::frame::FrameHeader::parse(data) {
        assert!(consumed <= data.len());
    }
});
