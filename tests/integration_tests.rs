use color_eyre::eyre::Result;
use http::header::CONTENT_TYPE;
use http::{Method, StatusCode};
use httpecho::common::create_test_server;
use httpecho::{EchoClient, HttpConfig, HttpEchoClient};

#[tokio::test]
async fn test_json_round_trip() -> Result<()> {
    let server = create_test_server(HttpConfig::default()).await?;
    let mut client = HttpEchoClient::connect(server.addr).await?;

    let response = client
        .request(
            Method::POST,
            "/api/echo",
            Some("application/json"),
            Some(br#"{"a":1}"#),
        )
        .await?;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[CONTENT_TYPE], "application/json");
    assert_eq!(&response.body()[..], br#"{"a":1}"#);

    server.stop().await?;
    Ok(())
}

#[tokio::test]
async fn test_missing_content_type_echoes_empty_value() -> Result<()> {
    let server = create_test_server(HttpConfig::default()).await?;
    let mut client = HttpEchoClient::connect(server.addr).await?;

    let response = client
        .request(Method::POST, "/api/echo", None, Some(b"no type here"))
        .await?;

    assert_eq!(response.status(), StatusCode::OK);
    // Present but empty, not omitted and not defaulted
    assert_eq!(response.headers().get_all(CONTENT_TYPE).iter().count(), 1);
    assert_eq!(response.headers()[CONTENT_TYPE], "");
    assert_eq!(&response.body()[..], b"no type here");

    server.stop().await?;
    Ok(())
}

#[tokio::test]
async fn test_empty_body() -> Result<()> {
    let server = create_test_server(HttpConfig::default()).await?;
    let mut client = HttpEchoClient::connect(server.addr).await?;

    // No body framing at all
    let response = client
        .request(Method::POST, "/api/echo", Some("text/plain"), None)
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[CONTENT_TYPE], "text/plain");
    assert!(response.body().is_empty());

    // Explicit zero-length body, no content-type
    let response = client
        .request(Method::POST, "/api/echo", None, Some(b""))
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[CONTENT_TYPE], "");
    assert!(response.body().is_empty());

    server.stop().await?;
    Ok(())
}

#[tokio::test]
async fn test_get_and_post_are_identical() -> Result<()> {
    let server = create_test_server(HttpConfig::default()).await?;
    let mut client = HttpEchoClient::connect(server.addr).await?;

    let body = b"same for both";
    let get = client
        .request(Method::GET, "/api/echo", Some("text/plain"), Some(body))
        .await?;
    let post = client
        .request(Method::POST, "/api/echo", Some("text/plain"), Some(body))
        .await?;

    assert_eq!(get.status(), post.status());
    assert_eq!(get.headers()[CONTENT_TYPE], post.headers()[CONTENT_TYPE]);
    assert_eq!(get.body(), post.body());
    assert_eq!(&get.body()[..], body);

    server.stop().await?;
    Ok(())
}

#[tokio::test]
async fn test_large_body() -> Result<()> {
    let server = create_test_server(HttpConfig::default()).await?;
    let mut client = HttpEchoClient::connect(server.addr).await?;

    // 8 MiB with a non-repeating byte pattern so truncation or reordering shows
    let data: Vec<u8> = (0..8 * 1024 * 1024u32)
        .map(|i| (i.wrapping_mul(2_654_435_761) >> 24) as u8)
        .collect();

    let response = client
        .request(
            Method::POST,
            "/api/echo",
            Some("application/octet-stream"),
            Some(&data),
        )
        .await?;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.body().len(), data.len());
    assert!(response.body()[..] == data[..]);

    server.stop().await?;
    Ok(())
}

#[tokio::test]
async fn test_large_chunked_body() -> Result<()> {
    let server = create_test_server(HttpConfig::default()).await?;
    let mut client = HttpEchoClient::connect(server.addr).await?;

    let data: Vec<u8> = (0..3 * 1024 * 1024u32).map(|i| (i % 251) as u8).collect();
    let mut request =
        b"POST /api/echo HTTP/1.1\r\nHost: test\r\nTransfer-Encoding: chunked\r\n\r\n".to_vec();
    for piece in data.chunks(100_000) {
        request.extend_from_slice(format!("{:x}\r\n", piece.len()).as_bytes());
        request.extend_from_slice(piece);
        request.extend_from_slice(b"\r\n");
    }
    request.extend_from_slice(b"0\r\n\r\n");

    let response = client.send_raw(&request).await?;

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.body()[..] == data[..]);

    server.stop().await?;
    Ok(())
}

#[tokio::test]
async fn test_multiple_concurrent_clients() -> Result<()> {
    let server = create_test_server(HttpConfig::default()).await?;

    let client_count = 32;
    let mut handles = Vec::new();

    for i in 0..client_count {
        let addr = server.addr;
        let handle = tokio::spawn(async move {
            let mut client = HttpEchoClient::connect(addr).await?;
            let content_type = format!("application/x-client-{i}");
            let body = format!("Message from client {i}").repeat(i + 1);

            let response = client
                .request(
                    Method::POST,
                    "/api/echo",
                    Some(content_type.as_str()),
                    Some(body.as_bytes()),
                )
                .await?;

            assert_eq!(response.headers()[CONTENT_TYPE], content_type.as_str());
            assert_eq!(&response.body()[..], body.as_bytes());
            Ok::<(), httpecho::EchoError>(())
        });
        handles.push(handle);
    }

    // Wait for all clients to complete
    for handle in handles {
        handle.await??;
    }

    server.stop().await?;
    Ok(())
}

#[tokio::test]
async fn test_echo_client_trait() -> Result<()> {
    let server = create_test_server(HttpConfig::default()).await?;
    let mut client = HttpEchoClient::connect(server.addr).await?;

    let response = client.echo_string("Hello, HTTP echo!").await?;
    assert_eq!(response, "Hello, HTTP echo!");

    let response = client.echo(&[0u8, 159, 146, 150, 255]).await?;
    assert_eq!(response, vec![0u8, 159, 146, 150, 255]);

    server.stop().await?;
    Ok(())
}
