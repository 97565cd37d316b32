//! Application state wiring

use std::sync::Arc;

use librecast::config::Config;
use librecast::credentials::{CredentialManager, OAuthRefreshClient};
use librecast::db::Store;
use librecast::platforms::linkedin::LinkedInPublisher;
use librecast::platforms::messaging::MessagingPublisher;
use librecast::platforms::PublisherRegistry;
use librecast::resync::{HostedFeedFetcher, ResyncGuard};
use librecast::scheduler::PublishWorker;
use librecast::types::Provider;

#[derive(Clone)]
pub struct AppState {
    pub store: Store,
    pub credentials: Arc<CredentialManager>,
    pub publishers: Arc<PublisherRegistry>,
    pub worker: Arc<PublishWorker>,
    /// Present only when a feed host is configured.
    pub resync: Option<Arc<ResyncGuard>>,
    pub cron_secret: Option<String>,
}

impl AppState {
    /// Build the full pipeline from configuration. Platforms without a
    /// config section simply have no adapter registered; enqueueing for
    /// them is rejected at the API boundary.
    pub async fn from_config(config: &Config) -> librecast::Result<Self> {
        let store = Store::new(&config.database.path).await?;
        let policy = config.retry.policy();

        let mut manager = CredentialManager::new(store.clone(), policy.clone());
        if let Some(social) = &config.platforms.social_post {
            manager.register_refresher(
                Provider::SocialPost,
                Arc::new(OAuthRefreshClient::new(
                    social.token_url.clone(),
                    social.client_id.clone(),
                    social.client_secret.clone(),
                )),
            );
        }
        if let Some(feed) = &config.platforms.feed_host {
            manager.register_refresher(
                Provider::FeedHost,
                Arc::new(OAuthRefreshClient::new(
                    feed.token_url.clone(),
                    feed.client_id.clone(),
                    feed.client_secret.clone(),
                )),
            );
        }
        let credentials = Arc::new(manager);

        let mut registry = PublisherRegistry::new();
        if let Some(social) = &config.platforms.social_post {
            registry.register(Arc::new(LinkedInPublisher::new(
                social.api_base.clone(),
                policy.clone(),
            )));
        }
        if let Some(messaging) = &config.platforms.messaging {
            registry.register(Arc::new(MessagingPublisher::new(
                messaging.api_base.clone(),
                messaging.from_number.clone(),
                policy.clone(),
            )));
        }
        let publishers = Arc::new(registry);

        let worker = Arc::new(PublishWorker::new(
            store.clone(),
            Arc::clone(&credentials),
            Arc::clone(&publishers),
            config.scheduler.worker_settings(),
        ));

        let resync = config.platforms.feed_host.as_ref().map(|feed| {
            Arc::new(ResyncGuard::new(
                store.clone(),
                Arc::clone(&credentials),
                Arc::new(HostedFeedFetcher::new(feed.api_base.clone())),
                policy.clone(),
                config.resync.cooldown_secs,
            ))
        });

        Ok(Self {
            store,
            credentials,
            publishers,
            worker,
            resync,
            cron_secret: config.server.cron_secret.clone(),
        })
    }
}
