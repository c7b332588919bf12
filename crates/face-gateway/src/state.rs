use std::sync::Arc;

use crate::service::GatewayService;

#[derive(Clone)]
pub struct GatewayState {
    service: Arc<GatewayService>,
}

impl GatewayState {
    pub fn new(service: Arc<GatewayService>) -> Self {
        Self { service }
    }

    pub fn service(&self) -> &GatewayService {
        &self.service
    }
}
