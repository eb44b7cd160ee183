#![no_main]
#[macro_use] extern crate libfuzzer_sys;
extern crate tickws;

use tickws::handshake::{HandshakeRequest, ACCEPT_KEY_LEN};

fuzz_target!(|data: &[u8]| {
    if let Ok(request) = HandshakeRequest::parse(data) {
        if let Ok(key) = request.validate() {
            assert_eq!(tickws::derive_accept_key(key).len(), ACCEPT_KEY_LEN);
        }
    }
});
