//! Failures must stay local: no bad datagram crashes the listener or
//! disturbs a session it does not name.

use crate::*;

use parley_core::wire::Cookie;

#[tokio::test]
async fn test_tampered_list_leaves_other_sessions_alone() -> Result<()> {
    let server = start_server().await;
    let (alice_peer, mut alice) = login(&server, "alice", "wonderland").await?;
    let (bob_peer, mut bob) = login(&server, "bob", "builder").await?;

    let Request::List { cookie, mut sealed } = alice.list_request() else {
        bail!("list_request did not build a LIST");
    };
    sealed.ciphertext[0] ^= 0x01;
    let tampered = Request::List { cookie, sealed };
    assert_eq!(alice_peer.exchange(&tampered).await?, Reply::Error);

    // Both sessions still work, including the one that was targeted.
    let reply = bob_peer.exchange(&bob.list_request()).await?;
    assert_eq!(bob.open_list(&reply)?, vec!["alice", "bob"]);
    let reply = alice_peer.exchange(&alice.list_request()).await?;
    assert_eq!(alice.open_list(&reply)?.len(), 2);
    Ok(())
}

#[tokio::test]
async fn test_unknown_cookie_does_not_touch_pending() -> Result<()> {
    let server = start_server().await;
    let peer = Peer::connect(server.addr).await?;
    let mut client = new_client("alice", "wonderland");
    let reply = peer.exchange(&client.init()).await?;

    let stranger = Peer::connect(server.addr).await?;
    for request in [
        Request::LoginResponse {
            cookie: Cookie::generate(),
            payload: vec![0; 16],
        },
        Request::LoginSubmit {
            cookie: Cookie::generate(),
            public_key: vec![0; 128],
            payload: vec![0; 128],
        },
    ] {
        assert_eq!(stranger.exchange(&request).await?, Reply::Error);
    }

    // The honest handshake carries on unaffected.
    let submit = client.on_cookie(&reply)?;
    let reply = peer.exchange(&submit).await?;
    let response = client.on_challenge(&reply)?;
    let reply = peer.exchange(&response).await?;
    client.on_accepted(&reply)?;
    Ok(())
}

#[tokio::test]
async fn test_garbage_is_dropped_and_listener_survives() -> Result<()> {
    let server = start_server().await;
    let peer = Peer::connect(server.addr).await?;

    let mistyped = serde_json::json!({
        "kind": "LOGIN",
        "context": "SUBMIT",
        "cookie": 42,
    })
    .to_string();
    for datagram in [
        &b""[..],
        b"\xff\xfe\x00",
        b"[]",
        br#"{"kind":"LOGIN","context":"CHALLENGE"}"#,
        br#"{"kind":"LIST","cookie":"0000"}"#,
        mistyped.as_bytes(),
    ] {
        assert_eq!(peer.send_raw(datagram).await?, None);
    }

    // Still serving.
    assert!(matches!(
        peer.exchange(&Request::LoginInit).await?,
        Reply::Cookie { .. }
    ));
    Ok(())
}

#[tokio::test]
async fn test_silent_mode_sends_nothing_on_failure() -> Result<()> {
    let server = start_server_with(Limits::default(), false).await;
    let peer = Peer::connect(server.addr).await?;
    let stray = Request::LoginResponse {
        cookie: Cookie::generate(),
        payload: vec![0; 16],
    };
    assert_eq!(peer.send(&stray).await?, None);
    Ok(())
}
