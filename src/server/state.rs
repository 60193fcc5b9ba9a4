use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use crate::balancer::Balancer;
use crate::outbound::ClientPool;
use crate::scheduler::Scheduler;
use crate::server::auth::RateLimiter;

#[derive(Clone)]
pub struct AppState {
    pub listen_addr: SocketAddr,
    pub db_path: Arc<PathBuf>,
    pub clients: Arc<ClientPool>,
    pub balancer: Arc<Balancer>,
    pub rate_limiter: Arc<RateLimiter>,
    pub scheduler: Arc<Scheduler>,
}

impl AppState {
    pub(crate) fn db_path(&self) -> PathBuf {
        self.db_path.as_ref().clone()
    }
}
