use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{Context as _, Result};
use clap::Parser as _;
use tonic::transport::Server;
use trade_protocol::offer::{OpenOffer, OpenOfferBook};
use trade_protocol::proto::v1::daemon_server::DaemonServer;
use trade_protocol::rpc::DaemonService;
use trade_protocol::trade::controller::{ControllerConfig, TradeProtocolController};
use trade_protocol::trade::model::TradeProcessModel;
use trade_protocol::trade::persistence::QueuedTradePersister;
use trade_protocol::trade::store::SqliteTradeStore;
use trade_protocol::wallet::BitcoinTradeWallet;

#[derive(Debug, clap::Parser)]
struct Args {
    #[arg(long, default_value = "127.0.0.1:9998")]
    listen_addr: String,

    #[arg(long)]
    store_path: PathBuf,

    /// JSON array of open offers to serve edits for.
    #[arg(long)]
    offers_path: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    trade_protocol::logging::init().ok();

    let args = Args::parse();
    let listen_addr: SocketAddr = args.listen_addr.parse().context("parse listen_addr")?;

    let store = SqliteTradeStore::open(args.store_path).context("open sqlite store")?;
    let records = store.list_trades().context("list stored trades")?;
    let store = Arc::new(Mutex::new(store));
    let persister = QueuedTradePersister::spawn(store.clone());

    let controller = TradeProtocolController::new(ControllerConfig::new(
        Arc::new(BitcoinTradeWallet::new()),
        Arc::new(persister.clone()),
    ));
    for record in records {
        let trade_id = record.trade_id.clone();
        let model = TradeProcessModel::from_record(record)
            .with_context(|| format!("restore trade {trade_id}"))?;
        controller
            .register_trade(model)
            .with_context(|| format!("register trade {trade_id}"))?;
    }
    tracing::info!(
        trades = controller.trade_ids().len(),
        active = controller.active_trade_ids().len(),
        "restored trades"
    );

    let offers = Arc::new(OpenOfferBook::open(store).context("load stored offers")?);
    if let Some(path) = &args.offers_path {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read offers {}", path.display()))?;
        let loaded: Vec<OpenOffer> = serde_json::from_str(&raw).context("parse offers json")?;
        tracing::info!(offers = loaded.len(), "loaded open offers");
        for offer in loaded {
            if offers.get_offer(&offer.id).is_none() {
                offers.add_offer(offer)?;
            }
        }
    }

    let svc = DaemonService::new(controller, offers);

    tracing::info!(%listen_addr, "starting trade daemon gRPC server");

    Server::builder()
        .add_service(DaemonServer::new(svc))
        .serve_with_shutdown(listen_addr, async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::warn!(error = %err, "listen for ctrl-c failed");
            }
            tracing::info!("shutting down");
        })
        .await
        .context("serve gRPC")?;

    persister.flush().await.context("flush pending trade writes")?;
    Ok(())
}
