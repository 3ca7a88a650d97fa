//! Integration test: buying sessions.
//!
//! Covers the paid path, a duplicated confirmation and a purchase where one
//! relay was never paid.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use strata_integration_tests::{reply_channel, test_config, wait, Cluster};
use strata_onion::layers::confirm::Confirm;
use strata_onion::layers::Layer;
use strata_onion::onion::Skins;
use strata_transport::sim::SimNetwork;

#[tokio::test]
async fn purchase_installs_sessions_on_both_sides() {
    let cluster = Cluster::start(SimNetwork::new(), 6, 22_000, test_config(1)).expect("cluster");
    let ids = cluster.buy_circuit(0, 5_000).await.expect("circuit");

    let client = &cluster.node(0).engine;
    for (hop, id) in ids.iter().enumerate() {
        let ours = client.manager().session(id).expect("client session");
        assert_eq!(usize::from(ours.hop), hop);
        assert_eq!(ours.remaining, 5_000);

        let relay = cluster.by_addr(ours.node.addr).expect("relay");
        let theirs = relay.engine.manager().session(id).expect("relay session");
        assert_eq!(theirs.hop, ours.hop);
        assert_eq!(theirs.header_pub, ours.header_pub);
        assert_eq!(theirs.preimage, ours.preimage);
        assert_eq!(relay.engine.manager().pending_payment_count(), 0);
    }

    cluster.shutdown().await;
}

#[tokio::test]
async fn duplicate_confirmation_is_ignored() {
    // =========================================================
    // Step 1: Pay and send a purchase, counting callbacks
    // =========================================================
    let cluster = Cluster::start(SimNetwork::new(), 6, 22_100, test_config(1)).expect("cluster");
    let client = cluster.node(0);
    let purchase = client.engine.prepare_purchase(1_000).expect("purchase");
    for invoice in &purchase.invoices {
        let relay = cluster.by_addr(invoice.node.addr).expect("relay");
        let (payment, ack) = invoice.payment().with_confirm();
        relay.handles.payments.send(payment).await.expect("pay");
        assert!(ack.await.expect("ack"));
    }

    let calls = Arc::new(AtomicUsize::new(0));
    let (done_tx, done_rx) = tokio::sync::oneshot::channel();
    let counter = Arc::clone(&calls);
    let id = client
        .engine
        .send_purchase(
            purchase,
            Box::new(move |_, _| {
                counter.fetch_add(1, Ordering::SeqCst);
                let _ = done_tx.send(());
            }),
        )
        .expect("send");
    tokio::time::timeout(Duration::from_secs(5), done_rx)
        .await
        .expect("confirmed in time")
        .expect("callback");
    let sessions = client.engine.manager().session_count();

    // =========================================================
    // Step 2: Replay the confirmation
    // =========================================================
    let replay = Skins::new()
        .crypt(&client.engine.identity(), None)
        .layer(Layer::Confirm(Confirm { id, load: 0 }))
        .assemble()
        .expect("onion")
        .onion
        .encode()
        .bytes;
    client.handles.inbound.send(replay).await.expect("inject");
    tokio::time::sleep(Duration::from_millis(200)).await;

    // =========================================================
    // Step 3: Nothing ran twice
    // =========================================================
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(client.engine.manager().session_count(), sessions);

    cluster.shutdown().await;
}

#[tokio::test]
async fn unpaid_relay_breaks_the_purchase() {
    let mut config = test_config(1);
    config.pending_timeout = Duration::from_millis(400);
    let cluster = Cluster::start(SimNetwork::new(), 6, 22_200, config).expect("cluster");
    let client = cluster.node(0);

    // =========================================================
    // Step 1: Pay every relay except the one at hop 2
    // =========================================================
    let purchase = client.engine.prepare_purchase(1_000).expect("purchase");
    let invoices = purchase.invoices.clone();
    for invoice in invoices.iter().filter(|i| i.node.addr != invoices[2].node.addr) {
        let relay = cluster.by_addr(invoice.node.addr).expect("relay");
        let (payment, ack) = invoice.payment().with_confirm();
        relay.handles.payments.send(payment).await.expect("pay");
        assert!(ack.await.expect("ack"));
    }

    // =========================================================
    // Step 2: The confirmation never arrives; the request expires
    // =========================================================
    let (callback, reply) = reply_channel();
    client.engine.send_purchase(purchase, callback).expect("send");
    let (_, body) = wait(reply).await.expect("expiry callback");
    assert!(body.is_empty());

    // =========================================================
    // Step 3: Only the relays before the gap installed sessions
    // =========================================================
    for (hop, invoice) in invoices.iter().enumerate() {
        assert!(client.engine.manager().session(&invoice.payment_id).is_none());
        let relay = cluster.by_addr(invoice.node.addr).expect("relay");
        let installed = relay.engine.manager().session(&invoice.payment_id).is_some();
        assert_eq!(installed, hop < 2, "hop {hop}");
    }
    let unpaid = cluster.by_addr(invoices[3].node.addr).expect("relay");
    assert_eq!(unpaid.engine.manager().pending_payment_count(), 1);

    cluster.shutdown().await;
}
