pub mod gateway;

pub use gateway::ReqwestGateway;
