//! ポンプの性質テスト
//!
//! 任意のペイロードとチャンクサイズで、送った順序のまま欠落も重複もなく届くこと

use proptest::prelude::*;
use tcp_relay::common::types::Side;
use tcp_relay::relay::Pump;
use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt};

fn pump_through(payload: Vec<u8>, chunk_size: usize, pipe_size: usize) -> (Vec<u8>, u64) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();

    runtime.block_on(async move {
        let (mut producer, source) = duplex(pipe_size);
        let (sink, mut consumer) = duplex(pipe_size);

        let pump = tokio::spawn(Pump::new(Side::Client, source, sink, chunk_size).run());
        let send = tokio::spawn(async move {
            for piece in payload.chunks(777) {
                producer.write_all(piece).await.unwrap();
            }
        });

        let mut received = Vec::new();
        consumer.read_to_end(&mut received).await.unwrap();
        send.await.unwrap();
        let moved = pump.await.unwrap().unwrap();
        (received, moved)
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_pump_is_loss_free(
        payload in proptest::collection::vec(any::<u8>(), 0..65_536),
        chunk_size in 1usize..9000,
        pipe_size in 1usize..4096,
    ) {
        let (received, moved) = pump_through(payload.clone(), chunk_size, pipe_size);
        prop_assert_eq!(moved, payload.len() as u64);
        prop_assert_eq!(received, payload);
    }
}
