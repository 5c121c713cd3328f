use pedkit_core::KeyAlgorithm;
use pedkit_crypto::dukpt::{self, KeyVariant};
use pedkit_crypto::{compute_kcv, open, seal, WrappingKey};

#[divan::bench(args = [16, 24, 32])]
fn bench_kcv(bencher: divan::Bencher, len: usize) {
    let key = vec![0x5Au8; len];
    bencher.bench(|| compute_kcv(divan::black_box(&key), None).unwrap());
}

#[divan::bench]
fn bench_kcv_aes128(bencher: divan::Bencher) {
    let key = [0x5Au8; 16];
    bencher.bench(|| compute_kcv(divan::black_box(&key), Some(KeyAlgorithm::Aes128)).unwrap());
}

#[divan::bench(args = [0x000001, 0x0003FF, 0x1FF800])]
fn bench_dukpt_pin_key(bencher: divan::Bencher, count: u32) {
    let ipek = [0x6Au8; 16];
    let mut ksn = hex_ksn();
    ksn[7] = (count >> 16) as u8 & 0x1F | 0xE0;
    ksn[8] = (count >> 8) as u8;
    ksn[9] = count as u8;
    bencher.bench(|| {
        dukpt::working_key(divan::black_box(&ipek), divan::black_box(&ksn), KeyVariant::Pin)
            .unwrap()
    });
}

fn hex_ksn() -> [u8; 10] {
    [0xFF, 0xFF, 0x98, 0x76, 0x54, 0x32, 0x10, 0xE0, 0x00, 0x00]
}

#[divan::bench]
fn bench_seal_open(bencher: divan::Bencher) {
    let key = WrappingKey::from_bytes([7u8; 32]);
    let material = [0x11u8; 24];
    bencher.bench(|| {
        let sealed = seal(divan::black_box(&key), divan::black_box(&material)).unwrap();
        open(&key, &sealed).unwrap()
    });
}

fn main() {
    divan::main();
}
