//! Integration tests for AbsHttpClient against a minimal local HTTP server

use bridge_desktop::AbsHttpClient;
use bridge_traits::{BridgeError, ContentSource, ProgressSink, ProgressUpdate};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// Accept one connection, answer it with `status` and `body`, and hand back
/// the raw request.
async fn serve_once(status: &'static str, body: Vec<u8>) -> (String, JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base_url = format!("http://{}", listener.local_addr().unwrap());

    let handle = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let request = read_request(&mut socket).await;

        let head = format!(
            "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            status,
            body.len()
        );
        socket.write_all(head.as_bytes()).await.unwrap();
        socket.write_all(&body).await.unwrap();
        socket.shutdown().await.unwrap();
        request
    });

    (base_url, handle)
}

async fn read_request(socket: &mut tokio::net::TcpStream) -> String {
    let mut raw = Vec::new();
    let mut buffer = [0u8; 4096];

    let header_end = loop {
        let read = socket.read(&mut buffer).await.unwrap();
        raw.extend_from_slice(&buffer[..read]);
        if let Some(position) = raw.windows(4).position(|w| w == b"\r\n\r\n") {
            break position + 4;
        }
        if read == 0 {
            break raw.len();
        }
    };

    let head = String::from_utf8_lossy(&raw[..header_end]).to_lowercase();
    let body_len = head
        .lines()
        .find_map(|line| line.strip_prefix("content-length:"))
        .and_then(|value| value.trim().parse::<usize>().ok())
        .unwrap_or(0);

    while raw.len() < header_end + body_len {
        let read = socket.read(&mut buffer).await.unwrap();
        if read == 0 {
            break;
        }
        raw.extend_from_slice(&buffer[..read]);
    }

    String::from_utf8_lossy(&raw).to_string()
}

#[tokio::test]
async fn test_fetch_playable_book_opens_session() {
    let body = br#"{
        "id": "play_9",
        "libraryItemId": "li_9",
        "displayTitle": "Served Book",
        "displayAuthor": "Server",
        "duration": 1800.0,
        "chapters": [{"id": 0, "start": 0, "end": 1800, "title": "All"}],
        "audioTracks": [{"index": 1, "duration": 1800.0, "contentUrl": "/api/items/li_9/file/1", "metadata": {"size": 4096}}],
        "currentTime": 12.5
    }"#;
    let (base_url, server) = serve_once("200 OK", body.to_vec()).await;
    let client = AbsHttpClient::new(base_url).unwrap().with_token("tok");

    let book = client.fetch_playable_book("li_9").await.unwrap();

    assert_eq!(book.id, "play_9");
    assert_eq!(book.audio_tracks[0].byte_len(), 4096);
    assert_eq!(book.current_time, 12.5);

    let request = server.await.unwrap();
    assert!(request.starts_with("POST /api/items/li_9/play "));
    assert!(request.to_lowercase().contains("authorization: bearer tok"));
    assert!(request.contains("\"supportedMimeTypes\""));
}

#[tokio::test]
async fn test_download_stream_reads_body() {
    let payload = vec![3u8; 10_000];
    let (base_url, server) = serve_once("200 OK", payload.clone()).await;
    let client = AbsHttpClient::new(base_url).unwrap().with_token("tok");

    let mut stream = client
        .download_stream("/api/items/li_9/file/1")
        .await
        .unwrap();
    let mut received = Vec::new();
    stream.reader.read_to_end(&mut received).await.unwrap();

    assert_eq!(stream.content_length, Some(10_000));
    assert_eq!(received, payload);
    assert!(server
        .await
        .unwrap()
        .starts_with("GET /api/items/li_9/file/1 "));
}

#[tokio::test]
async fn test_http_errors_carry_status() {
    let (base_url, _server) = serve_once("503 Service Unavailable", b"busy".to_vec()).await;
    let client = AbsHttpClient::new(base_url).unwrap().with_token("tok");

    let err = client.download_stream("/api/items/li_9/file/1").await.unwrap_err();

    match err {
        BridgeError::Http { status, message } => {
            assert_eq!(status, 503);
            assert!(message.contains("busy"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_report_posts_local_session() {
    let (base_url, server) = serve_once("200 OK", b"{}".to_vec()).await;
    let client = AbsHttpClient::new(base_url).unwrap().with_token("tok");

    client
        .report(ProgressUpdate {
            session_id: "play_9".to_string(),
            library_item_id: "li_9".to_string(),
            current_time: 99.0,
            time_listening: 30.0,
            duration: 1800.0,
            updated_at: 1_700_000_000_000,
        })
        .await
        .unwrap();

    let request = server.await.unwrap();
    assert!(request.starts_with("POST /api/session/local "));
    assert!(request.contains("\"libraryItemId\":\"li_9\""));
    assert!(request.contains("\"currentTime\":99.0"));
}

#[tokio::test]
async fn test_login_stores_token() {
    let (base_url, server) =
        serve_once("200 OK", br#"{"user": {"token": "fresh"}}"#.to_vec()).await;
    let client = AbsHttpClient::new(base_url).unwrap();
    assert!(!client.is_authenticated());

    client.login("reader", "pw").await.unwrap();

    assert!(client.is_authenticated());
    assert!(server.await.unwrap().starts_with("POST /login "));
}

#[tokio::test]
async fn test_unauthenticated_requests_fail_fast() {
    let client = AbsHttpClient::new("http://127.0.0.1:9").unwrap();

    let err = client.fetch_playable_book("li_9").await.unwrap_err();

    assert!(matches!(err, BridgeError::NotAvailable(_)));
}
