//! Request/reply round-trip benchmark suite.
//!
//! Measures `communicate` + `communicate_receive` against an in-process
//! echo peer at different pool sizes and batch sizes.
//!
//! Run with: cargo bench --bench round_trip
//! Results saved to: target/criterion/

use std::time::Duration;

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio::runtime::Runtime;

use communication_stack::protocol::{DEFAULT_MAX_FRAME_SIZE, encode_frame, read_frame};
use communication_stack::{Communicator, Envelope};

// ============================================================================
// Benchmark Parameters
// ============================================================================

const POOL_SIZES: &[usize] = &[1, 4];
const BATCH_SIZES: &[usize] = &[1, 64];

// ============================================================================
// Echo Peer
// ============================================================================

/// Answers every envelope with its own payload. Returns the port.
async fn spawn_echo_peer() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let _ = stream.set_nodelay(true);
            tokio::spawn(async move {
                let (mut reader, mut writer) = stream.into_split();
                while let Ok(Some(body)) = read_frame(&mut reader, DEFAULT_MAX_FRAME_SIZE).await {
                    let Ok(request) = Envelope::decode(&body) else {
                        continue;
                    };
                    let reply = Envelope::reply_to(&request, request.payload().to_vec());
                    let frame = encode_frame(&reply.encode().unwrap()).unwrap();
                    if writer.write_all(&frame).await.is_err() {
                        break;
                    }
                }
            });
        }
    });

    port
}

async fn connected(port: u16, pool_size: usize) -> Communicator {
    let com = Communicator::new(pool_size, "127.0.0.1", port, true).unwrap();
    com.connect().unwrap();

    // Warm up until every slot carries traffic.
    while com.ready_count() < pool_size {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    com
}

// ============================================================================
// Benchmark: Round Trip
// ============================================================================

fn bench_round_trip(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let payload = vec![0xAB_u8; 256];

    let mut group = c.benchmark_group("round_trip");
    group.measurement_time(Duration::from_secs(10));

    for &pool_size in POOL_SIZES {
        let com = rt.block_on(async {
            let port = spawn_echo_peer().await;
            connected(port, pool_size).await
        });

        for &batch in BATCH_SIZES {
            group.throughput(Throughput::Elements(batch as u64));
            group.bench_with_input(
                BenchmarkId::new(format!("pool_{pool_size}"), batch),
                &batch,
                |b, &batch| {
                    let com = &com;
                    let payload = &payload;
                    b.to_async(&rt).iter(move || async move {
                        let mut pending: Vec<_> = (0..batch)
                            .map(|_| com.communicate(payload.clone()).unwrap())
                            .collect();
                        for reply in &mut pending {
                            com.communicate_receive(reply).await.unwrap();
                        }
                    });
                },
            );
        }

        com.close();
    }

    group.finish();
}

criterion_group!(benches, bench_round_trip);
criterion_main!(benches);
