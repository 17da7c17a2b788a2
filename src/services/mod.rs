pub mod order_service;
pub mod position_service;

pub use order_service::OrderService;
pub use position_service::PositionService;
