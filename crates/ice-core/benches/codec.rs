use criterion::{black_box, criterion_group, criterion_main, Criterion};
use ice_core::encoding::{ClassFactoryRegistry, InputStream, OutputStream, ENCODING_VERSION};
use std::sync::Arc;

/// Round-trips a string sequence through `OutputStream`/`InputStream`,
/// the hot path spec.md §4.1 describes for every Request/Reply body.
fn bench_string_sequence_roundtrip(c: &mut Criterion) {
    let items: Vec<String> = (0..64).map(|i| format!("widget-{i}")).collect();
    let factories = Arc::new(ClassFactoryRegistry::new());

    c.bench_function("string_sequence_roundtrip", |b| {
        b.iter(|| {
            let mut out = OutputStream::with_default_encoding();
            out.write_sequence(&items, |s, item| s.write_string(item));
            let bytes = out.into_bytes();

            let mut input = InputStream::new(bytes, ENCODING_VERSION, 1 << 20, factories.clone());
            let len = input.begin_sequence(1).unwrap();
            let mut decoded = Vec::with_capacity(len);
            for _ in 0..len {
                decoded.push(input.read_string().unwrap());
            }
            black_box(decoded)
        });
    });
}

criterion_group!(codec_benches, bench_string_sequence_roundtrip);
criterion_main!(codec_benches);
