mod support;

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context as _, Result};
use rust_decimal::Decimal;
use tonic::Code;
use tonic::transport::{Channel, Server};

use support::port::get_available_port;
use support::wait::wait_for;
use support::{
    BUYER_ADDRESS, SELLER_ADDRESS, delayed_payout_tx, deposit_txs, envelope, signature_request,
    signature_response,
};
use trade_protocol::offer::{OpenOffer, OpenOfferBook};
use trade_protocol::proto::v1::daemon_client::DaemonClient;
use trade_protocol::proto::v1::daemon_server::DaemonServer;
use trade_protocol::proto::v1::{
    DeliverMessageRequest, DispatchOutcome, EditOfferRequest, EditType, GetTradeRequest,
    GetVersionRequest, RegisterTradeRequest,
};
use trade_protocol::rpc::DaemonService;
use trade_protocol::trade::controller::{ControllerConfig, TradeProtocolController};
use trade_protocol::trade::model::TradeProcessModel;
use trade_protocol::trade::persistence::QueuedTradePersister;
use trade_protocol::trade::store::SqliteTradeStore;
use trade_protocol::trade::{TradePhase, TradeRole};
use trade_protocol::wallet::BitcoinTradeWallet;

struct Daemon {
    client: DaemonClient<Channel>,
    store: Arc<Mutex<SqliteTradeStore>>,
    shutdown: tokio::sync::oneshot::Sender<()>,
    _dir: tempfile::TempDir,
}

async fn start_daemon() -> Result<Daemon> {
    trade_protocol::logging::init().ok();
    let dir = tempfile::tempdir().context("create tempdir")?;
    let store = Arc::new(Mutex::new(
        SqliteTradeStore::open(dir.path().join("trades.sqlite3")).context("open store")?,
    ));
    let persister = QueuedTradePersister::spawn(store.clone());
    let controller = TradeProtocolController::new(ControllerConfig::new(
        Arc::new(BitcoinTradeWallet::new()),
        Arc::new(persister),
    ));
    controller.register_trade(
        TradeProcessModel::new("trade-rpc", TradeRole::Seller)
            .with_prepared_deposit_tx(deposit_txs().seller_signed),
    )?;

    let offers = Arc::new(OpenOfferBook::open(store.clone())?);
    offers.add_offer(OpenOffer::fixed("offer-1", Decimal::new(30_000, 0)))?;
    offers.add_offer(OpenOffer::market_based("offer-2", 1.0, 0))?;

    let svc = DaemonService::new(controller, offers);
    let port = get_available_port().context("select gRPC port")?;
    let listen_addr: SocketAddr = format!("127.0.0.1:{port}").parse()?;
    let (shutdown, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    tokio::spawn(async move {
        let _ = Server::builder()
            .add_service(DaemonServer::new(svc))
            .serve_with_shutdown(listen_addr, async move {
                let _ = shutdown_rx.await;
            })
            .await;
    });

    let url = format!("http://{listen_addr}");
    let client = wait_for("daemon accepting connections", Duration::from_secs(10), || {
        let url = url.clone();
        async move { Ok(DaemonClient::connect(url).await.ok()) }
    })
    .await?;

    Ok(Daemon {
        client,
        store,
        shutdown,
        _dir: dir,
    })
}

fn edit_request(id: &str, edit_type: EditType) -> EditOfferRequest {
    EditOfferRequest {
        id: id.to_string(),
        price: "0".to_string(),
        use_market_based_price: false,
        market_price_margin_pct: 0.0,
        trigger_price: 0,
        enable: -1,
        edit_type: edit_type as i32,
    }
}

#[tokio::test]
async fn daemon_reports_version() -> Result<()> {
    let mut daemon = start_daemon().await?;
    let reply = daemon
        .client
        .get_version(GetVersionRequest {})
        .await
        .context("GetVersion")?
        .into_inner();
    assert_eq!(reply.version, trade_protocol::VERSION);
    let _ = daemon.shutdown.send(());
    Ok(())
}

#[tokio::test]
async fn daemon_delivers_messages_and_reports_trades() -> Result<()> {
    let mut daemon = start_daemon().await?;
    let txs = deposit_txs();
    let envelope_json = envelope(
        BUYER_ADDRESS,
        signature_response("trade-rpc", &txs.buyer_signed),
    )
    .to_json()?;

    let reply = daemon
        .client
        .deliver_message(DeliverMessageRequest {
            envelope_json: envelope_json.clone(),
        })
        .await
        .context("DeliverMessage")?
        .into_inner();
    assert_eq!(reply.outcome, DispatchOutcome::Applied as i32);
    assert_eq!(reply.phase, TradePhase::PayoutSignaturesExchanged.to_string());

    let reply = daemon
        .client
        .deliver_message(DeliverMessageRequest { envelope_json })
        .await
        .context("DeliverMessage duplicate")?
        .into_inner();
    assert_eq!(reply.outcome, DispatchOutcome::Duplicate as i32);

    let trade = daemon
        .client
        .get_trade(GetTradeRequest {
            trade_id: "trade-rpc".to_string(),
        })
        .await
        .context("GetTrade")?
        .into_inner();
    assert_eq!(trade.role, "seller");
    assert_eq!(trade.phase, TradePhase::PayoutSignaturesExchanged.to_string());
    assert_eq!(trade.counterparty_address, BUYER_ADDRESS);
    assert_eq!(
        trade.deposit_txid,
        txs.fully_signed.compute_txid().to_string()
    );
    assert!(trade.has_peer_delayed_payout_tx_signature);
    assert!(trade.payout_txid.is_empty());

    let store = daemon.store.clone();
    wait_for("trade persisted", Duration::from_secs(5), || {
        let store = store.clone();
        async move {
            let record = store
                .lock()
                .expect("store mutex poisoned")
                .get_trade("trade-rpc")?;
            Ok(record
                .filter(|r| r.phase == TradePhase::PayoutSignaturesExchanged)
                .map(|_| ()))
        }
    })
    .await?;

    let status = daemon
        .client
        .get_trade(GetTradeRequest {
            trade_id: "missing".to_string(),
        })
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::NotFound);

    let status = daemon
        .client
        .deliver_message(DeliverMessageRequest {
            envelope_json: "{not json".to_string(),
        })
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::InvalidArgument);

    let _ = daemon.shutdown.send(());
    Ok(())
}

#[tokio::test]
async fn daemon_edits_offers() -> Result<()> {
    let mut daemon = start_daemon().await?;

    let mut req = edit_request("offer-1", EditType::FixedPriceAndActivationState);
    req.price = "31000.5".to_string();
    req.enable = 0;
    let offer = daemon
        .client
        .edit_offer(req)
        .await
        .context("EditOffer fixed price")?
        .into_inner();
    assert_eq!(offer.price, "31000.5");
    assert!(!offer.use_market_based_price);
    assert!(!offer.is_activated);

    let mut req = edit_request("offer-1", EditType::MktPriceMarginAndTriggerPrice);
    req.use_market_based_price = true;
    req.market_price_margin_pct = 2.5;
    req.trigger_price = 29_000;
    let offer = daemon
        .client
        .edit_offer(req)
        .await
        .context("EditOffer margin")?
        .into_inner();
    assert!(offer.use_market_based_price);
    assert_eq!(offer.market_price_margin_pct, 2.5);
    assert_eq!(offer.trigger_price, 29_000);
    assert_eq!(offer.price, "0");
    let stored = daemon
        .store
        .lock()
        .expect("store mutex poisoned")
        .get_offer("offer-1")?
        .context("offer-1 not stored")?;
    assert!(stored.use_market_based_price);
    assert_eq!(stored.trigger_price, 29_000);

    let mut req = edit_request("offer-2", EditType::ActivationStateOnly);
    req.price = "5".to_string();
    req.enable = 1;
    let status = daemon.client.edit_offer(req).await.unwrap_err();
    assert_eq!(status.code(), Code::InvalidArgument);
    assert!(status.message().contains("offer-2"));

    let mut req = edit_request("offer-2", EditType::TriggerPriceOnly);
    req.use_market_based_price = true;
    req.trigger_price = -1;
    let status = daemon.client.edit_offer(req).await.unwrap_err();
    assert_eq!(status.code(), Code::InvalidArgument);

    let mut req = edit_request("offer-2", EditType::ActivationStateOnly);
    req.edit_type = 42;
    let status = daemon.client.edit_offer(req).await.unwrap_err();
    assert_eq!(status.code(), Code::InvalidArgument);

    let status = daemon
        .client
        .edit_offer(edit_request("offer-9", EditType::ActivationStateOnly))
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::NotFound);

    let _ = daemon.shutdown.send(());
    Ok(())
}

#[tokio::test]
async fn daemon_registers_trades() -> Result<()> {
    let mut daemon = start_daemon().await?;
    let txs = deposit_txs();
    let request = RegisterTradeRequest {
        trade_id: "trade-new".to_string(),
        role: "buyer".to_string(),
        prepared_deposit_tx_hex: bitcoin::consensus::encode::serialize_hex(&txs.buyer_signed),
        counterparty_address: String::new(),
    };

    let trade = daemon
        .client
        .register_trade(request.clone())
        .await
        .context("RegisterTrade")?
        .into_inner();
    assert_eq!(trade.trade_id, "trade-new");
    assert_eq!(trade.role, "buyer");
    assert_eq!(trade.phase, TradePhase::Init.to_string());
    assert!(trade.counterparty_address.is_empty());

    let status = daemon
        .client
        .register_trade(request.clone())
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::AlreadyExists);

    let dpt = delayed_payout_tx(&txs.buyer_signed);
    let reply = daemon
        .client
        .deliver_message(DeliverMessageRequest {
            envelope_json: envelope(SELLER_ADDRESS, signature_request("trade-new", &dpt))
                .to_json()?,
        })
        .await
        .context("DeliverMessage to registered trade")?
        .into_inner();
    assert_eq!(reply.outcome, DispatchOutcome::Applied as i32);
    assert_eq!(reply.phase, TradePhase::PayoutSignaturesExchanged.to_string());

    let mut bad_role = request.clone();
    bad_role.trade_id = "trade-bad-role".to_string();
    bad_role.role = "arbitrator".to_string();
    let status = daemon.client.register_trade(bad_role).await.unwrap_err();
    assert_eq!(status.code(), Code::InvalidArgument);

    let mut bad_tx = request;
    bad_tx.trade_id = "trade-bad-tx".to_string();
    bad_tx.prepared_deposit_tx_hex = "zz".to_string();
    let status = daemon.client.register_trade(bad_tx).await.unwrap_err();
    assert_eq!(status.code(), Code::InvalidArgument);

    let status = daemon
        .client
        .get_trade(GetTradeRequest {
            trade_id: "trade-bad-tx".to_string(),
        })
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::NotFound);

    let _ = daemon.shutdown.send(());
    Ok(())
}
