//! Benchmarks for read performance.
use criterion::{BatchSize, Criterion};
use std::io::{self, Read};
use tickws::{
    protocol::{
        frame::{
            coding::{Data, OpCode},
            Frame,
        },
        FrameCodec, Message, Step,
    },
    Config, Outbox,
};

/// Mock stream handing out a prepared buffer in bounded reads.
struct MockIo {
    data: Vec<u8>,
    pos: usize,
}

impl Read for MockIo {
    fn read(&mut self, to: &mut [u8]) -> io::Result<usize> {
        let rest = &self.data[self.pos..];
        if rest.is_empty() {
            return Err(io::Error::new(io::ErrorKind::WouldBlock, "not ready"));
        }
        let len = rest.len().min(to.len());
        to[..len].copy_from_slice(&rest[..len]);
        self.pos += len;
        Ok(len)
    }
}

/// Client traffic: masked frames, a mix of binary and text messages.
fn client_frames(count: u64) -> (Vec<u8>, u64) {
    let mut out = Vec::new();
    let mut sum = 0;
    for i in 0..count {
        let mut frame = match i {
            _ if i % 3 == 0 => Frame::message(i.to_le_bytes().to_vec(), OpCode::Data(Data::Binary), true),
            _ => Frame::message(format!("{{\"id\":{i}}}"), OpCode::Data(Data::Text), true),
        };
        frame.set_mask((i as u32).to_le_bytes());
        frame.format(&mut out);
        sum += i;
    }
    (out, sum)
}

fn benchmark(c: &mut Criterion) {
    let config = Config::default();

    /// Benchmark reading 100k mix of binary & text messages.
    fn read_100k(config: &Config, b: &mut criterion::Bencher<'_>) {
        let (data, expected_sum) = client_frames(100_000);
        b.iter_batched(
            || MockIo { data: data.clone(), pos: 0 },
            |mut io| {
                let mut codec = FrameCodec::new(config);
                let mut sum = 0;
                loop {
                    let step = codec
                        .recv(&mut io, |msg: Message<'_>, _: &mut Outbox| match msg {
                            Message::Binary(v) => {
                                let a: [u8; 8] = v.try_into().unwrap();
                                sum += u64::from_le_bytes(a);
                            }
                            Message::Text(t) => {
                                let i: u64 = std::str::from_utf8(&t[6..t.len() - 1]).unwrap().parse().unwrap();
                                sum += i;
                            }
                        })
                        .unwrap();
                    if step == Step::WouldBlock {
                        break;
                    }
                }
                assert_eq!(sum, expected_sum);
            },
            BatchSize::SmallInput,
        );
    }

    /// Benchmark reading one framebuffer-sized binary message split into fragments.
    fn read_fragmented_image(config: &Config, b: &mut criterion::Bencher<'_>) {
        const IMAGE: usize = 400 * 240 * 4;
        let mut data = Vec::new();
        let chunks: Vec<_> = vec![0x5au8; IMAGE].chunks(IMAGE / 8).map(<[u8]>::to_vec).collect();
        let last = chunks.len() - 1;
        for (i, chunk) in chunks.into_iter().enumerate() {
            let opcode = if i == 0 { Data::Binary } else { Data::Continue };
            let mut frame = Frame::message(chunk, OpCode::Data(opcode), i == last);
            frame.set_mask([1, 2, 3, 4]);
            frame.format(&mut data);
        }

        b.iter_batched(
            || MockIo { data: data.clone(), pos: 0 },
            |mut io| {
                let mut codec = FrameCodec::new(config);
                let mut received = 0;
                while codec.recv(&mut io, |msg: Message<'_>, _: &mut Outbox| received += msg.len()).unwrap()
                    != Step::WouldBlock
                {}
                assert_eq!(received, IMAGE);
            },
            BatchSize::LargeInput,
        );
    }

    c.bench_function("read+unmask 100k small messages", |b| read_100k(&config, b));
    c.bench_function("read+unmask fragmented 384000 byte message", |b| read_fragmented_image(&config, b));
}

criterion::criterion_group!(read_benches, benchmark);
criterion::criterion_main!(read_benches);
