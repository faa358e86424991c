//! Client against a real server, over loopback WebSockets and in-process pipes

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tempfile::tempdir;
use tokio::sync::{broadcast, mpsc};
use url::Url;

use sockexec_client::{
    factory_fn, run_handler, CallbackHandler, ClientConfig, ConnectionEvent, ConnectionManager,
    ConnectionStatus, ReconnectPolicy, TransportFactory, WebSocketFactory,
};
use sockexec_protocol::{Message, MessageType, Transport};
use sockexec_server::{serve_connection, Server, ServerConfig, ServerContext, ShutdownHandle};

const TIMEOUT: Duration = Duration::from_secs(30);

/// Next message event, skipping status changes
async fn next_message(rx: &mut mpsc::UnboundedReceiver<ConnectionEvent>) -> Message {
    loop {
        let event = tokio::time::timeout(TIMEOUT, rx.recv())
            .await
            .expect("timed out waiting for an event")
            .expect("event channel closed");
        if let ConnectionEvent::Message(msg) = event {
            return msg;
        }
    }
}

async fn start_server(workspace: &Path) -> (String, ShutdownHandle) {
    let config = ServerConfig {
        listen: "127.0.0.1:0".into(),
        workspace_dir: workspace.to_path_buf(),
        ..ServerConfig::default()
    };
    let server = Server::bind(config).await.unwrap();
    let url = format!("ws://{}", server.local_addr().unwrap());
    let handle = server.shutdown_handle();
    tokio::spawn(server.run());
    (url, handle)
}

/// Manager whose transports are pipes into `serve_connection`
fn piped_manager(
    workspace: &Path,
) -> (ConnectionManager, mpsc::UnboundedReceiver<ConnectionEvent>) {
    let ctx = Arc::new(ServerContext::new(ServerConfig {
        workspace_dir: workspace.to_path_buf(),
        ..ServerConfig::default()
    }));
    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let factory: Arc<dyn TransportFactory> = Arc::new(factory_fn(move |_url: Url| {
        let (client, server) = tokio::io::duplex(256 * 1024);
        tokio::spawn(serve_connection(
            Transport::from_io(server),
            Arc::clone(&ctx),
            shutdown_tx.subscribe(),
        ));
        async move { Ok(Transport::from_io(client)) }
    }));
    ConnectionManager::new(factory, ReconnectPolicy::default())
}

#[cfg(unix)]
#[tokio::test]
async fn websocket_command_output_and_status() {
    let dir = tempdir().unwrap();
    let (url, shutdown) = start_server(dir.path()).await;

    let (manager, mut rx) = ConnectionManager::new(
        Arc::new(WebSocketFactory::new()),
        ReconnectPolicy::default(),
    );
    manager.connect(&url).await.unwrap();
    assert_eq!(manager.status(), ConnectionStatus::Connected);

    let welcome = next_message(&mut rx).await;
    assert_eq!(welcome.kind, MessageType::Status);
    assert!(welcome.data.starts_with("Connected to sockexec server. Client ID: Client-"));

    manager.send_command("echo A && echo B 1>&2").unwrap();

    let mut stdout = String::new();
    let mut stderr = String::new();
    let status = loop {
        let msg = next_message(&mut rx).await;
        match msg.kind {
            MessageType::Stdout => stdout.push_str(&msg.data),
            MessageType::Stderr => stderr.push_str(&msg.data),
            MessageType::Status => break msg,
            other => panic!("unexpected {} message: {}", other, msg.data),
        }
    };

    assert_eq!(stdout, "A\n");
    assert_eq!(stderr, "B\n");
    assert_eq!(
        status.data,
        "Process \"echo A && echo B 1>&2\" exited with code 0"
    );

    manager.disconnect();
    shutdown.shutdown().await;
}

#[tokio::test]
async fn websocket_upload_download_and_list() {
    let dir = tempdir().unwrap();
    let workspace = dir.path().join("files");
    let (url, shutdown) = start_server(&workspace).await;

    let (manager, mut rx) = ConnectionManager::new(
        Arc::new(WebSocketFactory::new()),
        ReconnectPolicy::default(),
    );
    manager.connect(&url).await.unwrap();
    next_message(&mut rx).await;

    let local = dir.path().join("notes.txt");
    std::fs::write(&local, "hello\nworld").unwrap();
    let name = manager.upload_file(&local, None).await.unwrap();
    assert_eq!(name, "notes.txt");

    let status = next_message(&mut rx).await;
    assert_eq!(status.kind, MessageType::Status);
    assert_eq!(status.data, "File uploaded successfully: notes.txt (11 bytes)");
    assert_eq!(
        std::fs::read_to_string(workspace.join("notes.txt")).unwrap(),
        "hello\nworld"
    );

    manager.request_file_download("notes.txt").unwrap();
    let data = next_message(&mut rx).await;
    assert_eq!(data.kind, MessageType::FileData);
    assert_eq!(data.data, "hello\nworld");
    assert_eq!(data.file_size, Some(11));
    assert!(!data.is_base64());

    manager.request_file_list().unwrap();
    let list = next_message(&mut rx).await;
    let entries = list.file_entries().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].name, "notes.txt");
    assert_eq!(entries[0].size, 11);

    manager.request_file_download("ghost.txt").unwrap();
    let missing = next_message(&mut rx).await;
    assert_eq!(missing.kind, MessageType::Error);
    assert_eq!(missing.data, "File not found: ghost.txt");

    manager.disconnect();
    shutdown.shutdown().await;
}

#[tokio::test]
async fn websocket_binary_larger_than_default_frame_limit() {
    let dir = tempdir().unwrap();
    let workspace = dir.path().join("files");
    let (url, shutdown) = start_server(&workspace).await;

    let config = ClientConfig::default();
    let factory = WebSocketFactory::new().with_max_message_size(config.max_message_size());
    let (manager, mut rx) = ConnectionManager::new(Arc::new(factory), ReconnectPolicy::default());
    manager.connect(&url).await.unwrap();
    next_message(&mut rx).await;

    // Base64 inflates this well past tungstenite's 16 MiB default
    let bytes: Vec<u8> = (0..=255u8).cycle().take(20 * 1024 * 1024).collect();
    let local = dir.path().join("blob.bin");
    std::fs::write(&local, &bytes).unwrap();
    manager.upload_file(&local, None).await.unwrap();

    let status = next_message(&mut rx).await;
    assert_eq!(status.kind, MessageType::Status, "{}", status.data);

    manager.request_file_download("blob.bin").unwrap();
    let data = next_message(&mut rx).await;
    assert_eq!(data.kind, MessageType::FileData);
    assert!(data.is_base64());
    assert_eq!(data.file_size, Some(bytes.len() as u64));
    assert_eq!(manager.status(), ConnectionStatus::Connected);

    let target = dir.path().join("downloaded.bin");
    sockexec_client::files::save_download(&data, &target)
        .await
        .unwrap();
    assert!(std::fs::read(&target).unwrap() == bytes);

    manager.disconnect();
    shutdown.shutdown().await;
}

#[cfg(unix)]
#[tokio::test]
async fn websocket_events_through_run_handler() {
    let dir = tempdir().unwrap();
    let (url, shutdown) = start_server(dir.path()).await;

    let (manager, events) = ConnectionManager::new(
        Arc::new(WebSocketFactory::new()),
        ReconnectPolicy::default(),
    );
    let (tx, mut messages) = mpsc::unbounded_channel();
    let handler = tokio::spawn(run_handler(
        events,
        CallbackHandler::new(move |msg: Message| {
            let _ = tx.send(msg);
        }),
    ));

    manager.connect(&url).await.unwrap();
    manager.send_command("echo handled").unwrap();

    let mut seen = Vec::new();
    loop {
        let msg = tokio::time::timeout(TIMEOUT, messages.recv())
            .await
            .expect("timed out waiting for a message")
            .expect("handler stopped");
        let done = msg.kind == MessageType::Status && msg.data.starts_with("Process");
        seen.push(msg);
        if done {
            break;
        }
    }

    assert!(seen[0].data.starts_with("Connected to sockexec server."));
    assert!(seen
        .iter()
        .any(|m| m.kind == MessageType::Stdout && m.data == "handled\n"));
    assert_eq!(
        seen.last().unwrap().data,
        "Process \"echo handled\" exited with code 0"
    );

    manager.disconnect();
    drop(manager);
    tokio::time::timeout(TIMEOUT, handler)
        .await
        .expect("run_handler did not finish")
        .unwrap();
    shutdown.shutdown().await;
}

#[tokio::test]
async fn piped_cjk_text_round_trip() {
    let dir = tempdir().unwrap();
    let (manager, mut rx) = piped_manager(dir.path());
    manager.connect("ws://pipe.test").await.unwrap();
    next_message(&mut rx).await;

    let text = "你好，世界\nこんにちは\n";
    manager
        .send_file_upload("greeting.txt", text, false)
        .unwrap();
    let status = next_message(&mut rx).await;
    assert_eq!(
        status.data,
        format!("File uploaded successfully: greeting.txt ({} bytes)", text.len())
    );

    manager.request_file_download("greeting.txt").unwrap();
    let data = next_message(&mut rx).await;
    assert_eq!(data.kind, MessageType::FileData);
    assert_eq!(data.data, text);
    assert!(!data.is_base64());
}

#[tokio::test]
async fn piped_binary_round_trip() {
    let dir = tempdir().unwrap();
    let (manager, mut rx) = piped_manager(dir.path());
    manager.connect("ws://pipe.test").await.unwrap();
    next_message(&mut rx).await;

    let bytes: Vec<u8> = (0..=255u8).cycle().take(4096).collect();
    let local = dir.path().join("blob.bin");
    std::fs::write(&local, &bytes).unwrap();
    manager
        .upload_file(&local, Some("copy.bin"))
        .await
        .unwrap();
    assert_eq!(next_message(&mut rx).await.kind, MessageType::Status);
    assert_eq!(std::fs::read(dir.path().join("copy.bin")).unwrap(), bytes);

    manager.request_file_download("copy.bin").unwrap();
    let data = next_message(&mut rx).await;
    assert!(data.is_base64());

    let target = dir.path().join("downloaded.bin");
    let written = sockexec_client::files::save_download(&data, &target)
        .await
        .unwrap();
    assert_eq!(written, 4096);
    assert_eq!(std::fs::read(&target).unwrap(), bytes);
}

#[tokio::test]
async fn piped_upload_rejects_traversal() {
    let dir = tempdir().unwrap();
    let workspace = dir.path().join("ws");
    std::fs::create_dir(&workspace).unwrap();
    let (manager, mut rx) = piped_manager(&workspace);
    manager.connect("ws://pipe.test").await.unwrap();
    next_message(&mut rx).await;

    manager.send_file_upload("../escape.txt", "x", false).unwrap();
    let reply = next_message(&mut rx).await;
    assert_eq!(reply.kind, MessageType::Error);
    assert!(reply.data.starts_with("Upload failed:"));
    assert!(!dir.path().join("escape.txt").exists());
}

#[cfg(unix)]
#[tokio::test]
async fn piped_new_command_replaces_running_one() {
    let dir = tempdir().unwrap();
    let (manager, mut rx) = piped_manager(dir.path());
    manager.connect("ws://pipe.test").await.unwrap();
    next_message(&mut rx).await;

    manager.send_command("sleep 5; echo late").unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    manager.send_command("echo now").unwrap();

    let first = next_message(&mut rx).await;
    assert_eq!(first.kind, MessageType::Status);
    assert!(first.data.contains("terminated by signal"), "{}", first.data);

    let out = next_message(&mut rx).await;
    assert_eq!(out.kind, MessageType::Stdout);
    assert_eq!(out.data, "now\n");

    let second = next_message(&mut rx).await;
    assert_eq!(second.data, "Process \"echo now\" exited with code 0");
}

#[cfg(unix)]
#[tokio::test]
async fn piped_stdin_reaches_running_command() {
    let dir = tempdir().unwrap();
    let (manager, mut rx) = piped_manager(dir.path());
    manager.connect("ws://pipe.test").await.unwrap();
    next_message(&mut rx).await;

    manager.send_command("read line; echo got:$line").unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    manager.send_stdin("ping\n").unwrap();

    let out = next_message(&mut rx).await;
    assert_eq!(out.kind, MessageType::Stdout);
    assert_eq!(out.data, "got:ping\n");
    let status = next_message(&mut rx).await;
    assert!(status.data.ends_with("exited with code 0"));
}
