use criterion::{black_box, criterion_group, criterion_main, Criterion};
use derg_codec::parse;

fn section(id: u8, payload: &[u8]) -> Vec<u8> {
    let mut v = vec![id];
    leb128::write::unsigned(&mut v, payload.len() as u64).unwrap();
    v.extend_from_slice(payload);
    v
}

/// A module with `count` copies of a small looping function.
fn synthetic_module(count: u64) -> Vec<u8> {
    let body: &[u8] = &[
        1, 1, 0x7f, // one i32 local
        0x02, 0x40, // block
        0x03, 0x40, // loop
        0x20, 0x00, 0x41, 0x01, 0x6a, 0x21, 0x01, // local.get 0 i32.const 1 i32.add local.set 1
        0x20, 0x01, 0x41, 0x0a, 0x48, 0x0d, 0x00, // local.get 1 i32.const 10 i32.lt_s br_if 0
        0x0b, 0x0b, // end end
        0x20, 0x01, 0x0b, // local.get 1 end
    ];

    let mut funcs = Vec::new();
    leb128::write::unsigned(&mut funcs, count).unwrap();
    funcs.extend(std::iter::repeat(0u8).take(count as usize));

    let mut code = Vec::new();
    leb128::write::unsigned(&mut code, count).unwrap();
    for _ in 0..count {
        leb128::write::unsigned(&mut code, body.len() as u64).unwrap();
        code.extend_from_slice(body);
    }

    let mut module = b"\0asm\x01\0\0\0".to_vec();
    module.extend(section(0x1, &[1, 0x60, 1, 0x7f, 1, 0x7f]));
    module.extend(section(0x3, &funcs));
    module.extend(section(0xa, &code));
    module
}

pub fn decode(criterion: &mut Criterion) {
    let wasm = synthetic_module(1000);

    let mut group = criterion.benchmark_group("decode");
    group.throughput(criterion::Throughput::Bytes(wasm.len() as u64));
    group.bench_function("synthetic_1000_funcs", |bench| {
        bench.iter(|| {
            let module = parse(black_box(&wasm)).unwrap();
            black_box(module);
        })
    });
    group.finish();
}

criterion_group!(benches, decode);
criterion_main!(benches);
