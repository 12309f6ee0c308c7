pub mod logging;
pub mod offer;
pub mod rpc;
pub mod trade;
pub mod wallet;

pub mod proto {
    pub mod v1 {
        tonic::include_proto!("trade_protocol.v1");
    }
}

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
