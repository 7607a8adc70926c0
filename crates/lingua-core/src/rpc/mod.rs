//! Worker protocol: wire types, client transport, worker side and spawning.

pub mod protocol;
pub mod spawner;
pub mod transport;
pub mod worker;

pub use protocol::{TranslateRequest, TranslateResponse, WorkerCall};
pub use spawner::{InProcessSpawner, ProcessSpawner, Worker, WorkerLifetime, WorkerSpawner};
pub use transport::RpcTransport;
pub use worker::{serve, TranslationEngine};
