//! Client wrappers for the external engine

pub mod engine_client;
pub mod engine_protocol;

pub use engine_client::{
    EngineApi, EngineClient, EngineConnection, EngineConnector, LinkState, LinkStatus,
    TcpConnector,
};
pub use engine_protocol::{
    AccountSnapshot, CancelAck, EnginePosition, EngineRequest, Movers, OrderAck, OrderRequest,
    OrderStatus, OrderType, Side,
};
