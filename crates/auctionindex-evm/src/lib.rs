//! auctionindex-evm: EVM chain source, auction event decoder and listener
//! supervisor.

pub mod builder;
pub mod decoder;
pub mod fetcher;
pub mod fingerprint;
pub mod metrics;
pub mod source;
pub mod supervisor;
pub mod ws;

pub use builder::ListenerBuilder;
pub use decoder::{AuctionEventDecoder, DecodeError};
pub use fetcher::{HttpRpcClient, RawLog, RpcLog};
pub use fingerprint::AuctionTopics;
pub use metrics::ListenerMetrics;
pub use source::{ChainSource, JsonRpcSource, JsonRpcSourceConfig, LogStream};
pub use supervisor::{ListenerHandle, Supervisor};
