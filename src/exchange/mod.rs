pub mod error;
pub mod gateway;
pub mod order;
pub mod transport;
pub mod types;

pub use error::ExchangeError;
pub use gateway::Gateway;
pub use transport::{BinanceHttpTransport, Endpoint, ExchangeTransport};
pub use types::{Balance, CloseOutcome, Position, PositionSide, SymbolCloseResult};
