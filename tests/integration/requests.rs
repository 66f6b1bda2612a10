use crate::*;

use parley_core::wire::Sealed;

#[tokio::test]
async fn test_list_shows_online_users() -> Result<()> {
    let server = start_server().await;
    let (alice_peer, mut alice) = login(&server, "alice", "wonderland").await?;
    let (_bob_peer, _bob) = login(&server, "bob", "builder").await?;

    let reply = alice_peer.exchange(&alice.list_request()).await?;
    let users = alice.open_list(&reply)?;
    assert_eq!(users, vec!["alice", "bob"]);
    Ok(())
}

#[tokio::test]
async fn test_list_reply_is_encrypted() -> Result<()> {
    let server = start_server().await;
    let (peer, mut alice) = login(&server, "alice", "wonderland").await?;

    let reply = peer.exchange(&alice.list_request()).await?;
    let wire = String::from_utf8(reply.encode())?;
    assert!(!wire.contains("alice"), "username leaked in {wire}");
    alice.open_list(&reply)?;
    Ok(())
}

#[tokio::test]
async fn test_logout_ends_session() -> Result<()> {
    let server = start_server().await;
    let (peer, mut alice) = login(&server, "alice", "wonderland").await?;
    let (_bob_peer, _bob) = login(&server, "bob", "builder").await?;
    let cookie = alice.cookie().clone();

    let reply = peer.exchange(&alice.logout_request()).await?;
    alice.open_logout_ack(&reply)?;
    assert!(!server.server.users().contains(&cookie));
    assert_eq!(server.server.users().usernames(), vec!["bob"]);

    // The cookie no longer authorizes anything.
    let reply = peer.exchange(&alice.list_request()).await?;
    assert_eq!(reply, Reply::Error);
    Ok(())
}

#[tokio::test]
async fn test_replayed_logout_after_logout_is_rejected() -> Result<()> {
    let server = start_server().await;
    let (peer, mut alice) = login(&server, "alice", "wonderland").await?;

    let logout = alice.logout_request();
    alice.open_logout_ack(&peer.exchange(&logout).await?)?;
    assert_eq!(peer.exchange(&logout).await?, Reply::Error);
    Ok(())
}

/// LIST sealed under one session cannot be replayed under another cookie.
#[tokio::test]
async fn test_sealed_body_is_bound_to_its_session() -> Result<()> {
    let server = start_server().await;
    let (peer, mut alice) = login(&server, "alice", "wonderland").await?;
    let (_bob_peer, bob) = login(&server, "bob", "builder").await?;

    let Request::List { sealed, .. } = alice.list_request() else {
        bail!("list_request did not build a LIST");
    };
    let swapped = Request::List {
        cookie: bob.cookie().clone(),
        sealed,
    };
    assert_eq!(peer.exchange(&swapped).await?, Reply::Error);
    assert_eq!(server.server.users().len(), 2);
    Ok(())
}

#[tokio::test]
async fn test_unsigned_request_is_rejected() -> Result<()> {
    let server = start_server().await;
    let (peer, mut alice) = login(&server, "alice", "wonderland").await?;

    let Request::List { cookie, sealed } = alice.list_request() else {
        bail!("list_request did not build a LIST");
    };
    let unsigned = Request::List {
        cookie,
        sealed: Sealed {
            ciphertext: sealed.ciphertext,
            signature: Vec::new(),
        },
    };
    assert_eq!(peer.exchange(&unsigned).await?, Reply::Error);
    Ok(())
}
