//! Oracle relayer - collects signed prices and submits on-chain updates
//!
//! Features:
//! - Collector loop feeding per-pair price stores from the transport
//! - Scheduler loop deciding when an on-chain poke is justified
//! - In-process gossip transport
//! - Read-retrying median client decorator
//! - Feeder-side signed price publishing

pub mod errors;
pub mod transport;
pub mod median;
pub mod feeder;
pub mod relayer;
pub mod settings;
pub mod telemetry;

pub use errors::{RelayError, RelayEvent, RelayResult, TransportError, TransportResult};
pub use transport::{LocalBus, LocalTransport, Transport};
pub use median::{Median, RetryingMedian};
pub use feeder::Feeder;
pub use relayer::{PokeReceipt, Relayer};
