/// Returns true when the sandbox cannot bind a localhost port for an httpmock server.
pub fn should_skip_httpmock() -> bool {
    match std::net::TcpListener::bind(("127.0.0.1", 0)) {
        Ok(_) => false,
        Err(err) if err.kind() == std::io::ErrorKind::PermissionDenied => {
            eprintln!("skipping httpmock test: binding to localhost is not permitted");
            true
        }
        Err(err) => panic!("failed to bind localhost for httpmock tests: {err}"),
    }
}

/// Serves `response` verbatim to every connection on an ephemeral localhost port, then
/// holds the socket open without sending anything else.
pub async fn spawn_stalled_upstream(response: &'static [u8]) -> std::net::SocketAddr {
    use tokio::io::{AsyncReadExt as _, AsyncWriteExt as _};

    let listener = tokio::net::TcpListener::bind(("127.0.0.1", 0))
        .await
        .expect("bind stalled upstream");
    let addr = listener.local_addr().expect("stalled upstream addr");
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut request = Vec::new();
                let mut buf = [0u8; 4096];
                while !request.windows(4).any(|window| window == b"\r\n\r\n") {
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => request.extend_from_slice(&buf[..n]),
                    }
                }
                if socket.write_all(response).await.is_err() {
                    return;
                }
                let _ = socket.flush().await;
                tokio::time::sleep(std::time::Duration::from_secs(300)).await;
            });
        }
    });
    addr
}
