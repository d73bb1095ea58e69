mod docs;
mod dto;
mod error;
mod router;
mod routes;
mod state;

pub use error::ServerError;
pub use state::ServerState;

use std::net::SocketAddr;
use std::sync::Arc;

pub async fn serve(state: Arc<ServerState>, addr: SocketAddr) -> Result<(), ServerError> {
    router::serve(state, addr).await
}
