//! Config flow against a fake satellite on loopback

use hassmic::config::{
    validate_connection_params, ConfigFlow, EntryData, EntryRegistry, FlowResult,
};
use hassmic::HassMicError;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;

/// Accept connections and greet each one with `greeting`
async fn fake_satellite(greeting: &'static [u8]) -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let _ = socket.write_all(greeting).await;
            // Hold the socket so the client decides when it closes
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(5)).await;
                drop(socket);
            });
        }
    });
    port
}

const CLIENT_INFO: &[u8] = b"{\"type\":\"client-info\",\"data\":{\"uuid\":\"3d9a0f6e\",\"version\":\"0.9\"}}\n";

#[tokio::test]
async fn test_validate_returns_device_uuid() {
    let port = fake_satellite(CLIENT_INFO).await;
    let uuid = validate_connection_params("127.0.0.1", port, Duration::from_secs(2))
        .await
        .unwrap();
    assert_eq!(uuid, "3d9a0f6e");
}

#[tokio::test]
async fn test_validate_rejects_other_first_message() {
    let port = fake_satellite(b"{\"type\":\"ping\"}\n").await;
    let err = validate_connection_params("127.0.0.1", port, Duration::from_secs(2))
        .await
        .unwrap_err();
    assert!(matches!(err, HassMicError::BadClientInfo(_)), "{:?}", err);
}

#[tokio::test]
async fn test_validate_rejects_client_info_without_uuid() {
    let port = fake_satellite(b"{\"type\":\"client-info\",\"data\":{}}\n").await;
    let err = validate_connection_params("127.0.0.1", port, Duration::from_secs(2))
        .await
        .unwrap_err();
    assert!(matches!(err, HassMicError::BadClientInfo(_)));
}

#[tokio::test]
async fn test_validate_times_out_on_silent_device() {
    let port = fake_satellite(b"").await;
    let started = std::time::Instant::now();
    let err = validate_connection_params("127.0.0.1", port, Duration::from_millis(200))
        .await
        .unwrap_err();
    assert!(matches!(err, HassMicError::BadClientInfo(_)));
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn test_user_step_creates_entry_then_aborts_duplicate() {
    let port = fake_satellite(CLIENT_INFO).await;
    let registry = EntryRegistry::new();
    let input = EntryData::new("Bedroom", "127.0.0.1", port);

    let mut flow = ConfigFlow::new(registry.clone());
    let FlowResult::CreateEntry(entry) = flow.step_user(Some(input.clone())).await else {
        panic!("expected a new entry");
    };
    assert_eq!(entry.title, "Bedroom");
    assert_eq!(entry.unique_id, "3d9a0f6e");
    assert_eq!(entry.data, input);
    assert_eq!(flow.unique_id(), Some("3d9a0f6e"));
    assert_eq!(registry.len(), 1);

    let mut again = ConfigFlow::new(registry.clone());
    match again.step_user(Some(input)).await {
        FlowResult::Abort { reason, entry: Some(existing), reload } => {
            assert_eq!(reason, "already_configured");
            assert_eq!(existing.entry_id, entry.entry_id);
            assert!(!reload);
        }
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(registry.len(), 1);
}

#[tokio::test]
async fn test_user_step_reshows_form_on_failure() {
    // Nothing listens on this port once the listener is dropped
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    };

    let mut flow = ConfigFlow::new(EntryRegistry::new()).with_validation_timeout(Duration::from_millis(500));
    let input = EntryData::new("Garage", "127.0.0.1", port);
    match flow.step_user(Some(input.clone())).await {
        FlowResult::Form {
            step_id,
            suggested,
            errors,
            ..
        } => {
            assert_eq!(step_id, "user");
            assert_eq!(suggested, Some(input));
            assert_eq!(errors.len(), 1);
            assert!(errors[0].contains("Connection error"), "{}", errors[0]);
        }
        other => panic!("unexpected {:?}", other),
    }
}
