//! End-to-end sessions against a live server.
//!
//! # Test Strategy
//!
//! 1. **Scenarios**: publish/lookup, unpublish, missing key, disconnect, fence
//! 2. **Robustness**: malformed headers, pipelined and waited requests
//! 3. **Fatal paths**: rejected credential, truncated payload (strict and lenient)
//! 4. **Binding**: stale sockets are replaced, other files are not

use std::collections::HashMap;
use tempfile::TempDir;

use corelib::{Info, ProcId, Scope, Status, Value};
use server::{
    Client, ClientError, FatalSessionError, HandshakeError, Phase, ServerConfig, ServerError,
    ServerState,
};
use wire::{Header, MessageType, ReplyBody, Request};

fn config(dir: &TempDir, session: &str) -> ServerConfig {
    ServerConfig {
        session: session.to_owned(),
        runtime_dir: dir.path().to_owned(),
        ..ServerConfig::default()
    }
}

fn client_proc() -> ProcId {
    ProcId::new("job", 0).unwrap()
}

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test]
async fn test_publish_then_lookup() {
    // The published value comes back unchanged
    let dir = TempDir::new().unwrap();
    let mut server = ServerState::from_config(config(&dir, "s1")).unwrap();
    let path = server.socket_path().to_owned();

    let (result, ()) = tokio::join!(server.run(), async move {
        let mut client = Client::connect(&path, "T35T", client_proc()).await.unwrap();
        let status = client.publish(vec![Info::new("color", "red")]).await.unwrap();
        assert_eq!(status, Status::Success);

        let (status, slots) = client.lookup(&["color"]).await.unwrap();
        assert_eq!(status, Status::Success);
        let found = slots[0].as_ref().unwrap();
        assert_eq!(found.key, "color");
        assert_eq!(found.value, Value::from("red"));
        assert_eq!(found.proc, client_proc());
    });

    assert!(result.is_ok());
    assert_eq!(server.module().published().len(), 1);
}

#[tokio::test]
async fn test_unpublish_subset_then_all() {
    let dir = TempDir::new().unwrap();
    let mut server = ServerState::from_config(config(&dir, "s7")).unwrap();
    let path = server.socket_path().to_owned();

    let (result, ()) = tokio::join!(server.run(), async move {
        let mut client = Client::connect(&path, "T35T", client_proc()).await.unwrap();
        let infos = vec![Info::new("a", 1i64), Info::new("b", 2i64), Info::new("c", 3i64)];
        assert_eq!(client.publish(infos).await.unwrap(), Status::Success);

        assert_eq!(client.unpublish(Some(&["a"][..])).await.unwrap(), Status::Success);
        let (status, _) = client.lookup(&["a"]).await.unwrap();
        assert_eq!(status, Status::NotFound);
        let (status, slots) = client.lookup(&["b", "c"]).await.unwrap();
        assert_eq!(status, Status::Success);
        assert!(slots.iter().all(Option::is_some));

        assert_eq!(client.unpublish(None).await.unwrap(), Status::Success);
        let (status, slots) = client.lookup(&["b", "c"]).await.unwrap();
        assert_eq!(status, Status::NotFound);
        assert!(slots.iter().all(Option::is_none));
    });

    assert!(result.is_ok());
    assert!(server.module().published().is_empty());
}

#[tokio::test]
async fn test_lookup_missing_key() {
    let dir = TempDir::new().unwrap();
    let mut server = ServerState::from_config(config(&dir, "s2")).unwrap();
    let path = server.socket_path().to_owned();

    let (result, ()) = tokio::join!(server.run(), async move {
        let mut client = Client::connect(&path, "T35T", client_proc()).await.unwrap();
        let (status, slots) = client.lookup(&["nothing"]).await.unwrap();
        assert_eq!(status, Status::NotFound);
        assert_eq!(slots.len(), 1);
        assert!(slots[0].is_none());
    });
    assert!(result.is_ok());
}

#[tokio::test]
async fn test_disconnect_ends_run_and_shutdown_removes_socket() {
    let dir = TempDir::new().unwrap();
    let mut server = ServerState::from_config(config(&dir, "s3")).unwrap();
    let path = server.socket_path().to_owned();
    assert!(path.exists());

    let client_path = path.clone();
    let (result, ()) = tokio::join!(server.run(), async move {
        let client = Client::connect(&client_path, "T35T", client_proc()).await.unwrap();
        drop(client);
    });

    assert!(result.is_ok());
    assert!(!server.is_running());
    assert!(server.peer().is_none());
    assert_eq!(server.phase(), Some(Phase::Closed));
    server.shutdown().unwrap();
    assert!(!path.exists());
}

#[tokio::test]
async fn test_fence_echoes_data() {
    let dir = TempDir::new().unwrap();
    let mut server = ServerState::from_config(config(&dir, "s4")).unwrap();
    let path = server.socket_path().to_owned();

    let (result, ()) = tokio::join!(server.run(), async move {
        let mut client = Client::connect(&path, "T35T", client_proc()).await.unwrap();
        let (status, data) = client.fence(b"abc".to_vec()).await.unwrap();
        assert_eq!(status, Status::Success);
        assert_eq!(data, b"abc");
    });
    assert!(result.is_ok());
}

#[tokio::test]
async fn test_finalize_tears_down_store() {
    let dir = TempDir::new().unwrap();
    let mut server = ServerState::from_config(config(&dir, "s5")).unwrap();
    let path = server.socket_path().to_owned();

    let (result, ()) = tokio::join!(server.run(), async move {
        let mut client = Client::connect(&path, "T35T", client_proc()).await.unwrap();
        client.publish(vec![Info::new("k", 1i64)]).await.unwrap();
        assert_eq!(client.finalize().await.unwrap(), Status::Success);
        // A second finalize is reported server-side but still acknowledged
        assert_eq!(client.finalize().await.unwrap(), Status::Success);
    });

    assert!(result.is_ok());
    assert!(server.module().published().is_empty());
    assert!(server.module().peers().all_finalized());
}

#[tokio::test]
async fn test_simulated_already_connected() {
    let dir = TempDir::new().unwrap();
    let mut config = config(&dir, "s6");
    config.module.simulate_already_connected = true;
    let mut server = ServerState::from_config(config).unwrap();
    let path = server.socket_path().to_owned();

    let (result, ()) = tokio::join!(server.run(), async move {
        let mut client = Client::connect(&path, "T35T", client_proc()).await.unwrap();
        let procs = vec![ProcId::new("other", 0).unwrap()];
        let reply = client.call(&Request::Connect { procs: procs.clone() }).await.unwrap();
        assert_eq!(reply.status, Status::Exists);
        let reply = client.call(&Request::Disconnect { procs }).await.unwrap();
        assert_eq!(reply.status, Status::Success);
    });
    assert!(result.is_ok());
}

// ============================================================================
// Robustness
// ============================================================================

#[tokio::test]
async fn test_malformed_header_keeps_connection() {
    let dir = TempDir::new().unwrap();
    let mut server = ServerState::from_config(config(&dir, "r1")).unwrap();
    let path = server.socket_path().to_owned();

    let (result, ()) = tokio::join!(server.run(), async move {
        let mut client = Client::connect(&path, "T35T", client_proc()).await.unwrap();
        let mut garbage = Header::new(MessageType::Lookup, 99, 0).encode();
        garbage[0] = 0;
        client.send_raw(&garbage).await.unwrap();

        let status = client.publish(vec![Info::new("after", true)]).await.unwrap();
        assert_eq!(status, Status::Success);
    });

    assert!(result.is_ok());
    assert!(server.module().published().get("after").is_some());
}

#[tokio::test]
async fn test_waited_lookup_satisfied_by_pipelined_publish() {
    let dir = TempDir::new().unwrap();
    let mut server = ServerState::from_config(config(&dir, "r2")).unwrap();
    let path = server.socket_path().to_owned();

    let (result, ()) = tokio::join!(server.run(), async move {
        let mut client = Client::connect(&path, "T35T", client_proc()).await.unwrap();
        let lookup_tag = client
            .send(&Request::Lookup {
                scope: Scope::Global,
                wait: true,
                keys: vec!["late".into()],
            })
            .await
            .unwrap();
        let publish_tag = client
            .send(&Request::Publish {
                scope: Scope::Global,
                persistence: Default::default(),
                infos: vec![Info::new("late", 7u64)],
            })
            .await
            .unwrap();

        // Replies may arrive in either order; match them up by tag
        let mut replies = HashMap::new();
        for _ in 0..2 {
            let (tag, reply) = client.recv_reply().await.unwrap();
            replies.insert(tag, reply);
        }

        assert_eq!(replies[&publish_tag].status, Status::Success);
        let lookup = &replies[&lookup_tag];
        assert_eq!(lookup.status, Status::Success);
        match &lookup.body {
            ReplyBody::Lookup(slots) => {
                assert_eq!(slots[0].as_ref().unwrap().value, Value::UInt(7));
            }
            other => panic!("unexpected body {:?}", other),
        }
    });
    assert!(result.is_ok());
}

#[tokio::test]
async fn test_parked_lookup_released_on_disconnect() {
    let dir = TempDir::new().unwrap();
    let mut server = ServerState::from_config(config(&dir, "r3")).unwrap();
    let path = server.socket_path().to_owned();

    let (result, ()) = tokio::join!(server.run(), async move {
        let mut client = Client::connect(&path, "T35T", client_proc()).await.unwrap();
        client
            .send(&Request::Lookup {
                scope: Scope::Global,
                wait: true,
                keys: vec!["never".into()],
            })
            .await
            .unwrap();
        // Round trip so the lookup is known to be parked before closing
        let (status, _) = client.fence(Vec::new()).await.unwrap();
        assert_eq!(status, Status::Success);
    });

    assert!(result.is_ok());
    assert_eq!(server.module().waiting_lookups(), 0);
}

// ============================================================================
// Fatal Paths
// ============================================================================

#[tokio::test]
async fn test_rejected_credential_is_fatal() {
    let dir = TempDir::new().unwrap();
    let mut server = ServerState::from_config(config(&dir, "f1")).unwrap();
    let path = server.socket_path().to_owned();

    let (result, client) = tokio::join!(server.run(), async move {
        Client::connect(&path, "wrong", client_proc()).await.map(|_| ())
    });

    assert!(matches!(client, Err(ClientError::Rejected(Status::AuthFailed))));
    match result {
        Err(err) => {
            assert!(matches!(
                err,
                ServerError::Fatal(FatalSessionError::Handshake(HandshakeError::Rejected(_)))
            ));
            assert!(err.is_fatal_session());
            assert_eq!(err.exit_code(), 0);
        }
        other => panic!("expected fatal handshake error, got {:?}", other),
    }
}

async fn truncated_session(strict: bool, session: &str) -> Result<(), ServerError> {
    let dir = TempDir::new().unwrap();
    let mut config = config(&dir, session);
    config.strict = strict;
    let mut server = ServerState::from_config(config).unwrap();
    let path = server.socket_path().to_owned();

    let (result, ()) = tokio::join!(server.run(), async move {
        let mut client = Client::connect(&path, "T35T", client_proc()).await.unwrap();
        let header = Header::new(MessageType::Publish, 5, 32).encode();
        client.send_raw(&header).await.unwrap();
        client.send_raw(&[0u8; 4]).await.unwrap();
    });
    result
}

#[tokio::test]
async fn test_truncated_payload_is_fatal_when_strict() {
    let result = truncated_session(true, "f2").await;
    assert!(matches!(
        result,
        Err(ServerError::Fatal(FatalSessionError::PayloadTransfer { .. }))
    ));
}

#[tokio::test]
async fn test_truncated_payload_is_disconnect_when_lenient() {
    assert!(truncated_session(false, "f3").await.is_ok());
}

// ============================================================================
// Binding
// ============================================================================

#[tokio::test]
async fn test_stale_socket_is_replaced() {
    let dir = TempDir::new().unwrap();
    let first = ServerState::from_config(config(&dir, "b1")).unwrap();
    let path = first.socket_path().to_owned();
    // Dropping without shutdown leaves the socket file behind
    drop(first);
    assert!(path.exists());

    let second = ServerState::from_config(config(&dir, "b1")).unwrap();
    assert_eq!(second.socket_path(), path.as_path());
    second.shutdown().unwrap();
}

#[tokio::test]
async fn test_bind_refuses_to_remove_regular_file() {
    let dir = TempDir::new().unwrap();
    let config = config(&dir, "b2");
    let path = config.socket_path();
    std::fs::write(&path, b"keep me").unwrap();

    match ServerState::from_config(config) {
        Err(ServerError::Bind { path: failed, source }) => {
            assert_eq!(failed, path);
            assert_eq!(source.kind(), std::io::ErrorKind::AlreadyExists);
        }
        Err(other) => panic!("expected bind error, got {:?}", other),
        Ok(_) => panic!("bind should fail over a regular file"),
    }
    assert_eq!(std::fs::read(&path).unwrap(), b"keep me");
}
