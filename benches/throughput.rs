//! Throughput Benchmark for respite
//!
//! This benchmark measures the RESP decoder and encoder on the frame shapes
//! a server sees most: short commands, pipelines and large bulk strings.

use bytes::BytesMut;
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use respite::commands::{Command, CommandHandler, Dispatcher};
use respite::protocol::{encode_into, RespParser, RespValue};

const PING: &[u8] = b"*1\r\n$4\r\nPING\r\n";

fn set_command(value_len: usize) -> Vec<u8> {
    let mut frame = format!("*3\r\n$3\r\nSET\r\n$3\r\nkey\r\n${}\r\n", value_len).into_bytes();
    frame.extend(std::iter::repeat(b'x').take(value_len));
    frame.extend_from_slice(b"\r\n");
    frame
}

/// Decodes every frame in `buf`, the way a connection drains its input.
fn decode_all(parser: &RespParser, buf: &[u8]) -> usize {
    let mut cursor = 0;
    let mut frames = 0;
    while let Ok(Some((_, consumed))) = parser.feed(buf, cursor) {
        cursor += consumed;
        frames += 1;
    }
    frames
}

/// Benchmark decoding single frames
fn bench_decode(c: &mut Criterion) {
    let parser = RespParser::new();

    let mut group = c.benchmark_group("decode");
    group.throughput(Throughput::Elements(1));

    group.bench_function("ping", |b| {
        b.iter(|| black_box(parser.feed(black_box(PING), 0)));
    });

    let small = set_command(16);
    group.bench_function("set_small", |b| {
        b.iter(|| black_box(parser.feed(black_box(&small), 0)));
    });

    let large = set_command(64 * 1024);
    group.throughput(Throughput::Bytes(large.len() as u64));
    group.bench_function("set_large", |b| {
        b.iter(|| black_box(parser.feed(black_box(&large), 0)));
    });

    group.finish();
}

/// Benchmark a pipeline of commands in one buffer
fn bench_pipeline(c: &mut Criterion) {
    let parser = RespParser::new();
    let pipeline = PING.repeat(1000);

    let mut group = c.benchmark_group("pipeline");
    group.throughput(Throughput::Elements(1000));

    group.bench_function("decode_1000_pings", |b| {
        b.iter(|| black_box(decode_all(&parser, black_box(&pipeline))));
    });

    group.bench_function("incomplete_tail", |b| {
        // Every retry re-scans the partial frame from its start.
        let partial = &pipeline[..pipeline.len() - 3];
        b.iter(|| black_box(decode_all(&parser, black_box(partial))));
    });

    group.finish();
}

/// Benchmark the full decode, dispatch, encode cycle
fn bench_round_trip(c: &mut Criterion) {
    let parser = RespParser::new();
    let mut handler = CommandHandler::new();
    let mut out = BytesMut::with_capacity(4096);

    let mut group = c.benchmark_group("round_trip");
    group.throughput(Throughput::Elements(1));

    group.bench_function("ping", |b| {
        b.iter(|| {
            out.clear();
            if let Ok(Some((frame, _))) = parser.feed(PING, 0) {
                if let Ok(command) = Command::try_from(frame) {
                    encode_into(&handler.handle(command), &mut out);
                }
            }
            black_box(out.len())
        });
    });

    group.finish();
}

/// Benchmark encoding replies
fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode");
    group.throughput(Throughput::Elements(1));

    let pong = RespValue::pong();
    group.bench_function("pong", |b| {
        b.iter(|| black_box(black_box(&pong).serialize()));
    });

    let array = RespValue::bulk_array((0..100).map(|i| format!("value:{}", i)));
    group.bench_function("array_100", |b| {
        let mut out = BytesMut::with_capacity(4096);
        b.iter(|| {
            out.clear();
            encode_into(black_box(&array), &mut out);
            black_box(out.len())
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_decode,
    bench_pipeline,
    bench_round_trip,
    bench_encode,
);

criterion_main!(benches);
