//! One end-to-end exchange over real sockets and the real event loop.

use scenecast::{RelayConfig, RelayServer};
use scenecast_core::TokioProviders;
use scenecast_core::wire::{self, ForwardAddress};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

async fn read_frame(stream: &mut tokio::net::TcpStream) -> Vec<u8> {
    let mut prefix = [0u8; 2];
    stream.read_exact(&mut prefix).await.expect("length field");
    let rest_len = u16::from_be_bytes(prefix) as usize;
    let mut frame = prefix.to_vec();
    frame.resize(2 + rest_len, 0);
    stream.read_exact(&mut frame[2..]).await.expect("frame body");
    frame
}

fn request(args: &[&str]) -> Vec<u8> {
    wire::encode_arguments(ForwardAddress::default(), args).expect("frame")
}

#[tokio::test]
async fn enter_and_ping_over_real_sockets() {
    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            let config = RelayConfig {
                bind_addr: "127.0.0.1".to_string(),
                ..RelayConfig::default()
            };
            let mut server = RelayServer::bind(TokioProviders::new(), config)
                .await
                .expect("bind");
            let addr = server.local_addr().expect("local addr");
            let shutdown = server.shutdown_handle();
            let server_task = tokio::task::spawn_local(async move { server.run().await });

            let mut client = tokio::net::TcpStream::connect(addr).await.expect("connect");
            client
                .write_all(&request(&[
                    "RQ", "100", "aaaaaaa0", "ENTER", "NNM", "Alice", "SCN", "Room", "SCU",
                    "rid://r1",
                ]))
                .await
                .expect("send ENTER");

            let reply = read_frame(&mut client).await;
            let args = wire::parse_arguments(&reply[wire::DATA_OFFSET..]);
            assert_eq!(args[0], "AN");
            assert_eq!(args[1], "100");
            assert_eq!(args[2].len(), 8);
            assert_eq!(args[3], "HI");
            assert_eq!(args[4], "CLID");
            assert_eq!(args[5].len(), 8);
            assert_eq!(args[6], "SCID");
            assert_eq!(args[9], "Alice");

            let conn_id = args[2].clone();
            client
                .write_all(&request(&["RQ", "101", &conn_id, "PING"]))
                .await
                .expect("send PING");

            let reply = read_frame(&mut client).await;
            let args = wire::parse_arguments(&reply[wire::DATA_OFFSET..]);
            assert_eq!(args, ["AN", "101", conn_id.as_str(), "PONG"]);

            shutdown.set(true);
            server_task.await.expect("server task");
        })
        .await;
}
