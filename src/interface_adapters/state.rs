// Shared axum state: the connection/game hub, the outbound auth client, and
// the pieces of config the socket endpoint needs at request time.

use crate::interface_adapters::clients::auth::AuthClient;
use crate::use_cases::hub::Hub;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<Hub>,
    pub auth_client: Arc<AuthClient>,
    // Exact frontend origin accepted on upgrade.
    pub frontend_origin: String,
    // When false, common localhost origins are also accepted.
    pub is_production: bool,
}
