use criterion::{black_box, criterion_group, criterion_main, Criterion};
use relay_codec::filter::{advanced_packet_filter, basic_packet_filter, generate_chonkle, generate_pittle};

const MAGIC: [u8; 8] = [1, 2, 3, 4, 5, 6, 7, 8];
const FROM: [u8; 4] = [10, 0, 0, 1];
const TO: [u8; 4] = [203, 0, 113, 9];

fn stamped_packet() -> Vec<u8> {
    let mut packet = vec![0u8; 1 + 15 + 1200 + 2];
    packet[0] = 9;

    let packet_length = packet.len() as u32;
    let chonkle = generate_chonkle(&MAGIC, &FROM, 40000, &TO, 50000, packet_length);
    packet[1..16].copy_from_slice(&chonkle);

    let pittle = generate_pittle(&FROM, 40000, &TO, 50000, packet_length);
    let tail = packet.len() - 2;
    packet[tail..].copy_from_slice(&pittle);

    packet
}

fn bench_filters(c: &mut Criterion) {
    let packet = stamped_packet();

    c.bench_function("basic_packet_filter", |b| {
        b.iter(|| basic_packet_filter(black_box(&packet)))
    });

    c.bench_function("advanced_packet_filter", |b| {
        b.iter(|| {
            advanced_packet_filter(
                black_box(&packet),
                black_box(&MAGIC),
                black_box(&FROM),
                black_box(40000),
                black_box(&TO),
                black_box(50000),
            )
        })
    });
}

criterion_group!(benches, bench_filters);
criterion_main!(benches);
