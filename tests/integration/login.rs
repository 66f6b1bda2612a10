use crate::*;

use parley_core::crypto::{random_iv, random_key, symmetric_encrypt};
use parley_core::wire::Cookie;
use parley_services::{ClientError, SessionState};

fn cookie_of(reply: &Reply) -> Cookie {
    match reply {
        Reply::Cookie { cookie } => cookie.clone(),
        other => panic!("expected COOKIE, got {other:?}"),
    }
}

/// INIT → SUBMIT → RESPONSE with the right password ends Authenticated.
#[tokio::test]
async fn test_login_authenticates() -> Result<()> {
    let server = start_server().await;
    let peer = Peer::connect(server.addr).await?;
    let mut client = new_client("alice", "wonderland");

    let reply = peer.exchange(&client.init()).await?;
    let cookie = cookie_of(&reply);
    assert_eq!(
        server.server.pending().state_of(&cookie),
        Some(SessionState::AwaitingSubmit)
    );

    let submit = client.on_cookie(&reply)?;
    let reply = peer.exchange(&submit).await?;
    assert!(matches!(reply, Reply::Challenge(_)), "got {reply:?}");
    assert_eq!(
        server.server.pending().state_of(&cookie),
        Some(SessionState::AwaitingResponse)
    );

    let response = client.on_challenge(&reply)?;
    let reply = peer.exchange(&response).await?;
    let session = client.on_accepted(&reply)?;

    assert_eq!(session.username(), "alice");
    assert_eq!(session.cookie(), &cookie);
    assert!(!server.server.pending().contains(&cookie));
    let stored = server.server.users().get(&cookie).context("not promoted")?;
    assert_eq!(stored.state(), SessionState::Authenticated);
    assert_eq!(stored.username(), "alice");
    Ok(())
}

#[tokio::test]
async fn test_wrong_password_is_rejected() -> Result<()> {
    let server = start_server().await;
    let err = login(&server, "alice", "looking-glass").await.unwrap_err();
    let client_err = err.downcast_ref::<ClientError>().context("not a client error")?;
    assert!(matches!(client_err, ClientError::Rejected), "got {client_err:?}");
    assert!(server.server.pending().is_empty());
    assert!(server.server.users().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_unknown_user_is_indistinguishable_from_bad_password() -> Result<()> {
    let server = start_server().await;
    let peer = Peer::connect(server.addr).await?;

    let mut replies = Vec::new();
    for (user, password) in [("alice", "nope"), ("mallory", "wonderland")] {
        let mut client = new_client(user, password);
        let reply = peer.exchange(&client.init()).await?;
        let submit = client.on_cookie(&reply)?;
        replies.push(peer.exchange(&submit).await?.encode());
    }
    assert_eq!(replies[0], replies[1]);
    assert_eq!(replies[0], Reply::Error.encode());
    Ok(())
}

/// A wrong nonce answer discards the record; sending it again is rejected
/// the same way, not a crash.
#[tokio::test]
async fn test_bad_response_discards_record() -> Result<()> {
    let server = start_server().await;
    let peer = Peer::connect(server.addr).await?;
    let mut client = new_client("alice", "wonderland");

    let reply = peer.exchange(&client.init()).await?;
    let cookie = cookie_of(&reply);
    let submit = client.on_cookie(&reply)?;
    peer.exchange(&submit).await?;

    let bogus = Request::LoginResponse {
        cookie: cookie.clone(),
        payload: symmetric_encrypt(&random_key(), &random_iv(), b"guess"),
    };
    assert_eq!(peer.exchange(&bogus).await?, Reply::Error);
    assert!(!server.server.pending().contains(&cookie));
    assert!(!server.server.users().contains(&cookie));

    assert_eq!(peer.exchange(&bogus).await?, Reply::Error);
    assert!(server.server.users().is_empty());
    Ok(())
}

/// Out-of-order delivery: RESPONSE before SUBMIT ends the attempt.
#[tokio::test]
async fn test_out_of_order_phase_ends_attempt() -> Result<()> {
    let server = start_server().await;
    let peer = Peer::connect(server.addr).await?;
    let mut client = new_client("alice", "wonderland");

    let reply = peer.exchange(&client.init()).await?;
    let cookie = cookie_of(&reply);
    let early = Request::LoginResponse {
        cookie: cookie.clone(),
        payload: vec![0; 16],
    };
    assert_eq!(peer.exchange(&early).await?, Reply::Error);

    // The real SUBMIT now finds nothing to advance.
    let submit = client.on_cookie(&reply)?;
    assert_eq!(peer.exchange(&submit).await?, Reply::Error);
    assert!(server.server.pending().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_concurrent_inits_get_distinct_cookies() -> Result<()> {
    let server = start_server().await;
    let a = Peer::connect(server.addr).await?;
    let b = Peer::connect(server.addr).await?;

    let (ra, rb) = tokio::join!(a.exchange(&Request::LoginInit), b.exchange(&Request::LoginInit));
    let (ca, cb) = (cookie_of(&ra?), cookie_of(&rb?));
    assert_ne!(ca, cb);
    assert_eq!(server.server.pending().len(), 2);
    Ok(())
}

/// The same user may hold two sessions at once.
#[tokio::test]
async fn test_same_user_twice() -> Result<()> {
    let server = start_server().await;
    let (_p1, s1) = login(&server, "alice", "wonderland").await?;
    let (_p2, s2) = login(&server, "alice", "wonderland").await?;
    assert_ne!(s1.cookie(), s2.cookie());
    assert_eq!(server.server.users().len(), 2);
    Ok(())
}

#[tokio::test]
async fn test_abandoned_handshake_is_swept() -> Result<()> {
    let limits = Limits {
        pending_ttl: Duration::from_millis(100),
        ..Limits::default()
    };
    let server = start_server_with(limits, true).await;
    let peer = Peer::connect(server.addr).await?;

    let cookie = cookie_of(&peer.exchange(&Request::LoginInit).await?);
    assert!(server.server.pending().contains(&cookie));

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(!server.server.pending().contains(&cookie));
    Ok(())
}

#[tokio::test]
async fn test_pending_cap() -> Result<()> {
    let limits = Limits {
        max_pending: 3,
        ..Limits::default()
    };
    let server = start_server_with(limits, true).await;
    let peer = Peer::connect(server.addr).await?;

    for _ in 0..3 {
        assert!(matches!(peer.exchange(&Request::LoginInit).await?, Reply::Cookie { .. }));
    }
    assert_eq!(peer.exchange(&Request::LoginInit).await?, Reply::Error);
    assert_eq!(server.server.pending().len(), 3);
    Ok(())
}
