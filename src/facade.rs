//! One call surface wiring the store, device registry, collection
//! ledger, and ping bus behind a single handle, the way an embedding
//! HTTP front end would construct this crate.

use crate::router::{EasRequest, EasResponse, Router};
use crate::store::Store;
use crate::sync::Item;
use crate::ServerConfig;
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::info;

/// The assembled EAS core: a [`Router`] over a concrete [`Store`].
pub struct EasServer<S: Store> {
    router: Router<S>,
}

impl<S: Store> EasServer<S> {
    #[must_use]
    pub fn new(store: Arc<S>, config: ServerConfig) -> Self {
        Self {
            router: Router::new(store, config),
        }
    }

    /// Handle one decoded EAS request.
    pub async fn handle(&self, req: &EasRequest, cancel: &Notify) -> EasResponse {
        self.router.handle(req, cancel).await
    }

    /// The SMTP ingress notification hook (`spec.md` §6): call after a
    /// durable insert to wake any parked `Ping` for this user.
    pub fn notify_new_mail(&self, user_id: u64, collection_id: &str) {
        info!(user_id, collection_id, "new mail notification");
        self.router.ping_bus().notify(user_id, collection_id);
    }

    #[must_use]
    pub const fn config(&self) -> &ServerConfig {
        self.router.config()
    }
}

/// Insert a freshly delivered item and wake any parked `Ping`
/// subscribers for its collection in one step — the composition an
/// SMTP ingress worker needs, per `spec.md` §6.
///
/// # Errors
///
/// Propagates any error the backing store returns.
pub async fn deliver<S: Store>(
    server: &EasServer<S>,
    store: &S,
    user_id: u64,
    collection_id: &str,
    item: Item,
) -> crate::Result<String> {
    let server_id = store.insert_item(user_id, collection_id, item).await?;
    server.notify_new_mail(user_id, collection_id);
    Ok(server_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemStore;
    use chrono::Utc;

    fn test_config() -> ServerConfig {
        ServerConfig {
            listen_addr: "0.0.0.0:443".to_string(),
            store_url: "mem://".to_string(),
            log_dir: "logs".to_string(),
            debug: false,
            log_split: false,
            redact: false,
            rate_limit_per_min: 60,
        }
    }

    fn item() -> Item {
        Item {
            server_id: String::new(),
            subject: "hi".to_string(),
            from: "a@example.com".to_string(),
            to: "b@example.com".to_string(),
            received_at: Utc::now(),
            read: false,
            mime_bytes: Vec::new(),
            body_plain: Some("hi".to_string()),
            body_html: None,
            conversation_id: "conv".to_string(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn deliver_wakes_a_parked_ping() {
        let store = Arc::new(MemStore::new());
        store.seed_user(1, "alice@example.com");
        let server = Arc::new(EasServer::new(store.clone(), test_config()));

        let server2 = server.clone();
        let cancel = Notify::new();
        let handle = tokio::spawn(async move {
            crate::ping::ping(server2.router.ping_bus(), 1, vec!["1".to_string()], 3540, &cancel).await
        });

        tokio::time::advance(std::time::Duration::from_millis(10)).await;
        tokio::task::yield_now().await;

        let server_id = deliver(&server, store.as_ref(), 1, "1", item()).await.unwrap();
        assert!(!server_id.is_empty());

        let outcome = handle.await.unwrap();
        assert_eq!(
            outcome,
            crate::ping::PingOutcome::Completed {
                status: crate::ping::PingStatus::ChangesAvailable,
                folders: vec!["1".to_string()],
            }
        );
    }
}
