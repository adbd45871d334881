//! Discovery workers: everything that feeds `cid.discovered`.
//!
//! - [`PubsubWorker`] - scans configured pubsub topics for CID-like tokens
//! - [`DhtWorker`] - DHT server mode with datastore + provider-store sniffing
//! - [`IpnsDhtWorker`] - DHT server mode with datastore sniffing only
//! - [`IpnsPubsubWorker`] - polls seed IPNS names via the pubsub router
//! - [`IpnsResolverWorker`] - resolves `/ipns/...` entries back to `/ipfs/...`

mod dht;
mod ipns_dht;
mod ipns_pubsub;
mod pubsub;
mod resolver;

pub use dht::DhtWorker;
pub use ipns_dht::IpnsDhtWorker;
pub use ipns_pubsub::IpnsPubsubWorker;
pub use pubsub::PubsubWorker;
pub use resolver::IpnsResolverWorker;
