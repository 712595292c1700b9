use std::sync::Arc;

pub mod service;

pub type Coordinator = Arc<service::DeliveryCoordinator>;
