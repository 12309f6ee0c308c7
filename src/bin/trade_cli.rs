use std::path::PathBuf;

use anyhow::{Context as _, Result};
use clap::{Parser as _, Subcommand};
use rust_decimal::Decimal;
use serde_json::json;
use trade_protocol::offer::{EditOfferRequest, EditOfferValidator, EditType, OpenOffer};
use trade_protocol::proto::v1::daemon_client::DaemonClient;
use trade_protocol::proto::v1::{
    self as pb, DeliverMessageRequest, GetTradeRequest, GetVersionRequest, RegisterTradeRequest,
};

#[derive(Debug, clap::Parser)]
struct Args {
    #[arg(long, default_value = "http://127.0.0.1:9998")]
    grpc_url: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Version,
    GetTrade {
        #[arg(long)]
        trade_id: String,
    },
    /// Starts tracking a trade whose deposit tx this node has prepared.
    RegisterTrade {
        #[arg(long)]
        trade_id: String,

        /// `buyer` or `seller`.
        #[arg(long)]
        role: String,

        #[arg(long)]
        prepared_deposit_tx_hex: String,

        #[arg(long)]
        counterparty_address: Option<String>,
    },
    EditOffer {
        #[arg(long)]
        offer_id: String,

        #[command(flatten)]
        edit: EditArgs,
    },
    /// Hands a JSON network envelope to the daemon's trade controller.
    Deliver {
        #[arg(long)]
        envelope_file: PathBuf,
    },
    /// Checks an offer edit locally without contacting the daemon.
    ValidateEdit {
        #[arg(long, default_value = "offer")]
        offer_id: String,

        #[arg(long)]
        offer_market_based: bool,

        #[arg(long, default_value = "0")]
        offer_price: Decimal,

        #[arg(long, allow_hyphen_values = true, default_value_t = 0.0)]
        offer_margin_pct: f64,

        #[arg(long, default_value_t = 0)]
        offer_trigger_price: i64,

        #[command(flatten)]
        edit: EditArgs,
    },
}

#[derive(Debug, clap::Args)]
struct EditArgs {
    /// e.g. `fixed-price-only` or `mkt-price-margin-and-trigger-price`.
    #[arg(long)]
    edit_type: EditType,

    #[arg(long, default_value = "0")]
    price: String,

    #[arg(long)]
    use_market_based_price: bool,

    #[arg(long, allow_hyphen_values = true, default_value_t = 0.0)]
    market_price_margin_pct: f64,

    #[arg(long, allow_hyphen_values = true, default_value_t = 0)]
    trigger_price: i64,

    #[arg(long)]
    enable: Option<bool>,
}

impl EditArgs {
    fn to_request(&self) -> EditOfferRequest {
        EditOfferRequest {
            edit_type: self.edit_type,
            edited_fixed_price_text: self.price.clone(),
            edited_use_market_based_price: self.use_market_based_price,
            edited_market_price_margin: self.market_price_margin_pct,
            edited_trigger_price: self.trigger_price,
            enable: self.enable,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    trade_protocol::logging::init().ok();
    let args = Args::parse();

    let out = match args.command {
        Command::ValidateEdit {
            offer_id,
            offer_market_based,
            offer_price,
            offer_margin_pct,
            offer_trigger_price,
            edit,
        } => {
            let offer = if offer_market_based {
                OpenOffer::market_based(offer_id, offer_margin_pct, offer_trigger_price)
            } else {
                OpenOffer::fixed(offer_id, offer_price)
            };
            let request = edit.to_request();
            let validator = EditOfferValidator::new(&offer, &request)?;
            validator.validate()?;
            let edited = validator.apply()?;

            json!({
              "accepted": true,
              "offer": edited,
            })
        }
        command => {
            let mut client = DaemonClient::connect(args.grpc_url)
                .await
                .context("connect gRPC")?;
            remote(&mut client, command).await?
        }
    };

    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}

async fn remote(
    client: &mut DaemonClient<tonic::transport::Channel>,
    command: Command,
) -> Result<serde_json::Value> {
    let out = match command {
        Command::Version => {
            let reply = client
                .get_version(GetVersionRequest {})
                .await
                .context("GetVersion")?
                .into_inner();

            json!({ "version": reply.version })
        }
        Command::GetTrade { trade_id } => {
            let trade = client
                .get_trade(GetTradeRequest { trade_id })
                .await
                .context("GetTrade")?
                .into_inner();

            trade_json(trade)
        }
        Command::RegisterTrade {
            trade_id,
            role,
            prepared_deposit_tx_hex,
            counterparty_address,
        } => {
            let trade = client
                .register_trade(RegisterTradeRequest {
                    trade_id,
                    role,
                    prepared_deposit_tx_hex,
                    counterparty_address: counterparty_address.unwrap_or_default(),
                })
                .await
                .context("RegisterTrade")?
                .into_inner();

            trade_json(trade)
        }
        Command::EditOffer { offer_id, edit } => {
            let offer = client
                .edit_offer(pb::EditOfferRequest {
                    id: offer_id,
                    price: edit.price,
                    use_market_based_price: edit.use_market_based_price,
                    market_price_margin_pct: edit.market_price_margin_pct,
                    trigger_price: edit.trigger_price,
                    enable: match edit.enable {
                        None => -1,
                        Some(false) => 0,
                        Some(true) => 1,
                    },
                    edit_type: edit.edit_type as i32,
                })
                .await
                .context("EditOffer")?
                .into_inner();

            json!({
              "id": offer.id,
              "use_market_based_price": offer.use_market_based_price,
              "price": offer.price,
              "market_price_margin_pct": offer.market_price_margin_pct,
              "trigger_price": offer.trigger_price,
              "is_activated": offer.is_activated,
            })
        }
        Command::Deliver { envelope_file } => {
            let envelope_json = std::fs::read_to_string(&envelope_file)
                .with_context(|| format!("read {}", envelope_file.display()))?;
            let reply = client
                .deliver_message(DeliverMessageRequest { envelope_json })
                .await
                .context("DeliverMessage")?
                .into_inner();

            let outcome = pb::DispatchOutcome::try_from(reply.outcome)
                .ok()
                .map(|o| format!("{o:?}"))
                .unwrap_or_else(|| format!("UNKNOWN({})", reply.outcome));
            json!({
              "outcome": outcome,
              "phase": reply.phase,
            })
        }
        Command::ValidateEdit { .. } => anyhow::bail!("validate-edit runs locally"),
    };
    Ok(out)
}

fn trade_json(trade: pb::Trade) -> serde_json::Value {
    json!({
      "trade_id": trade.trade_id,
      "role": trade.role,
      "phase": trade.phase,
      "counterparty_address": trade.counterparty_address,
      "deposit_txid": trade.deposit_txid,
      "has_peer_delayed_payout_tx_signature": trade.has_peer_delayed_payout_tx_signature,
      "payout_txid": trade.payout_txid,
      "error_message": trade.error_message,
    })
}
