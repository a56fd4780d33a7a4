#![no_main]

use std::sync::Arc;

use bytes::BytesMut;
use framewire::protocol::{echo, MessageRegistry};
use framewire::FrameCodec;
use libfuzzer_sys::fuzz_target;
use tokio_util::codec::Decoder;

fuzz_target!(|data: &[u8]| {
    // Feed arbitrary bytes through the buffered decoder until it stalls or fails
    let mut builder = MessageRegistry::builder();
    if echo::register(&mut builder).is_err() {
        return;
    }
    let mut codec = FrameCodec::new(Arc::new(builder.build()));
    let mut buf = BytesMut::from(data);

    while let Ok(Some(_)) = codec.decode(&mut buf) {}
});
