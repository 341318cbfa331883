//! Body transfer benchmarks
//!
//! Measures the pieces every exchange goes through:
//! - Chunked framing of outgoing bodies
//! - Request, status and header line parsing
//! - Field table updates
//! - gzip and deflate content coding in both directions
//!
//! Run with: cargo bench --bench transfer

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use ipphttp::http::chunked::{encode_chunked_body, parse_chunk_size, ChunkedEncoder};
use ipphttp::http::parser::{parse_header_line, parse_request_line, parse_status_line};
use ipphttp::http::{ContentCoding, Field, FieldTable, MAX_SBUFFER};
use std::time::Duration;

fn document(size: usize) -> Vec<u8> {
    b"%!PS-Adobe-3.0\n/Times-Roman findfont 12 scalefont setfont\n72 720 moveto (job) show\n"
        .iter()
        .copied()
        .cycle()
        .take(size)
        .collect()
}

// ========== Chunked Framing ==========

fn bench_chunked_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("chunked_encode");

    for size in [1024usize, 64 * 1024, 1024 * 1024] {
        let data = document(size);
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &data, |b, data| {
            b.iter(|| encode_chunked_body(black_box(data), 32768).unwrap());
        });
    }

    group.bench_function("encoder_small_writes", |b| {
        let data = document(256);
        b.iter(|| {
            let mut encoder = ChunkedEncoder::new(Vec::with_capacity(64 * 1024));
            for _ in 0..200 {
                encoder.write_chunk(black_box(&data)).unwrap();
            }
            encoder.finish().unwrap();
            black_box(encoder.into_inner());
        });
    });

    group.bench_function("parse_chunk_size", |b| {
        b.iter(|| parse_chunk_size(black_box("8000;name=value")).unwrap());
    });

    group.finish();
}

// ========== Message Head Parsing ==========

fn bench_parsing(c: &mut Criterion) {
    let mut group = c.benchmark_group("parsing");

    group.bench_function("request_line", |b| {
        b.iter(|| parse_request_line(black_box("POST /ipp/print HTTP/1.1")).unwrap());
    });

    group.bench_function("status_line", |b| {
        b.iter(|| parse_status_line(black_box("HTTP/1.1 426 Upgrade Required")).unwrap());
    });

    group.bench_function("header_line", |b| {
        b.iter(|| parse_header_line(black_box("Content-Type: application/ipp")).unwrap());
    });

    group.bench_function("field_table", |b| {
        b.iter(|| {
            let mut fields = FieldTable::new();
            fields.set(Field::Host, "printer.local:631");
            fields.set(Field::ContentType, "application/ipp");
            fields.set(Field::AcceptEncoding, "gzip");
            fields.set(Field::AcceptEncoding, "deflate");
            fields.set(Field::WwwAuthenticate, "Digest realm=\"CUPS\", nonce=\"abc\"");
            black_box(fields.sub_field(Field::WwwAuthenticate, "nonce"));
        });
    });

    group.finish();
}

// ========== Content Coding ==========

fn compress(name: &str, data: &[u8]) -> Vec<u8> {
    let mut coding = ContentCoding::for_encoding(name, true).unwrap();
    let mut out = Vec::new();

    for piece in data.chunks(MAX_SBUFFER) {
        coding.push(piece).unwrap();
        while let Some(slice) = coding.take_slice() {
            out.extend_from_slice(&slice);
        }
    }

    out.extend(coding.finish().unwrap());
    out
}

fn decompress(name: &str, data: &[u8]) -> Vec<u8> {
    let mut coding = ContentCoding::for_encoding(name, false).unwrap();
    let mut out = Vec::new();
    let mut buf = vec![0u8; 8192];

    for piece in data.chunks(8192) {
        coding.push(piece).unwrap();
        loop {
            let n = coding.read_output(&mut buf);
            if n == 0 {
                break;
            }
            out.extend_from_slice(&buf[..n]);
        }
    }

    out.extend(coding.finish().unwrap());
    out
}

fn bench_content_coding(c: &mut Criterion) {
    let data = document(1024 * 1024);

    for name in ["gzip", "deflate"] {
        let mut group = c.benchmark_group(format!("{}_1mb", name));
        group.throughput(Throughput::Bytes(data.len() as u64));

        group.bench_function("compress", |b| {
            b.iter(|| compress(name, black_box(&data)));
        });

        let coded = compress(name, &data);
        group.bench_function("decompress", |b| {
            b.iter(|| decompress(name, black_box(&coded)));
        });

        group.finish();
    }
}

criterion_group! {
    name = framing;
    config = Criterion::default()
        .measurement_time(Duration::from_secs(10))
        .sample_size(200);
    targets = bench_chunked_encode, bench_parsing
}

criterion_group! {
    name = coding;
    config = Criterion::default()
        .measurement_time(Duration::from_secs(15))
        .sample_size(50);
    targets = bench_content_coding
}

criterion_main!(framing, coding);
