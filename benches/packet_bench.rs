use bytes::BytesMut;
use criterion::{criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use rand::Rng;
use sessionnet::core::buffer::WireBuffer;
use sessionnet::core::codec::FrameCodec;
use sessionnet::core::packet::{packet_validator, Packet};
use sessionnet::core::secure::SecurePacket;
use sessionnet::transport::receive::ReceiveBuffer;
use tokio_util::codec::{Decoder, Encoder};

const KEY: [u8; 16] = *b"0123456789abcdef";
const IV: [u8; 16] = *b"fedcba9876543210";

#[allow(clippy::unwrap_used)]
fn bench_packet_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("packet_build");
    let body_sizes = [16usize, 256, 4096, 60_000];

    for &size in &body_sizes {
        let body = vec![0x5Au8; size];
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_function(format!("scalars_{size}b"), |b| {
            b.iter(|| {
                let mut packet = Packet::with_capacity(1, size);
                for chunk in body.chunks(8) {
                    if chunk.len() == 8 {
                        packet.put_u64(u64::from_le_bytes(chunk.try_into().unwrap())).unwrap();
                    } else {
                        packet.write(chunk).unwrap();
                    }
                }
                packet
            })
        });
        group.bench_function(format!("codec_roundtrip_{size}b"), |b| {
            let mut codec = FrameCodec::default();
            b.iter_batched(
                || {
                    let mut packet = Packet::new(2);
                    packet.write(&body).unwrap();
                    packet
                },
                |packet| {
                    let mut buf = BytesMut::with_capacity(size + 8);
                    codec.encode(packet, &mut buf).unwrap();
                    codec.decode(&mut buf).unwrap().unwrap()
                },
                BatchSize::SmallInput,
            )
        });
    }

    group.finish();
}

#[allow(clippy::unwrap_used)]
fn bench_secure_packet(c: &mut Criterion) {
    let mut group = c.benchmark_group("secure_packet");
    let body_sizes = [16usize, 256, 4096, 60_000];

    let mut rng = rand::rng();

    for &size in &body_sizes {
        let mut body = vec![0u8; size];
        rng.fill(&mut body[..]);
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_function(format!("encrypt_{size}b"), |b| {
            b.iter_batched(
                || {
                    let mut packet = SecurePacket::new(3);
                    packet.write(&body).unwrap();
                    packet
                },
                |mut packet| {
                    packet.encrypt(&IV, &KEY).unwrap();
                    packet
                },
                BatchSize::SmallInput,
            )
        });

        let mut sealed = SecurePacket::new(3);
        sealed.write(&body).unwrap();
        sealed.encrypt(&IV, &KEY).unwrap();
        let wire = sealed.as_bytes().to_vec();
        group.bench_function(format!("decrypt_{size}b"), |b| {
            b.iter_batched(
                || SecurePacket::from_bytes(&wire).unwrap(),
                |mut packet| {
                    assert!(packet.decrypt(&IV, &KEY).unwrap());
                    packet
                },
                BatchSize::SmallInput,
            )
        });
    }

    group.finish();
}

#[allow(clippy::unwrap_used)]
fn bench_receive_framing(c: &mut Criterion) {
    let mut group = c.benchmark_group("receive_framing");
    let validator = packet_validator();

    for &frames in &[1usize, 16, 256] {
        let mut stream = Vec::new();
        for i in 0..frames {
            let mut packet = Packet::new(i as u16);
            packet.write(&[0u8; 120]).unwrap();
            stream.extend_from_slice(packet.as_bytes());
        }
        group.throughput(Throughput::Bytes(stream.len() as u64));
        group.bench_function(format!("drain_{frames}_frames"), |b| {
            let mut buffer = ReceiveBuffer::new(stream.len());
            b.iter(|| {
                let spare = buffer.spare_mut();
                spare[..stream.len()].copy_from_slice(&stream);
                buffer.commit(stream.len());
                let drained = buffer.drain_frames(&validator).unwrap();
                assert_eq!(drained.len(), frames);
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_packet_build, bench_secure_packet, bench_receive_framing);
criterion_main!(benches);
