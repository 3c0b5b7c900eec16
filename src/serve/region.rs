//! Regional handler selection.
//!
//! A deployment can receive deliveries from more than one queue region.
//! Each region has its own token and signing keys, read from
//! region-prefixed environment variables (`EU_CENTRAL_1_QSTASH_TOKEN`,
//! `US_EAST_1_QSTASH_CURRENT_SIGNING_KEY`, ...). Multi-region mode is on
//! when `QSTASH_REGION` names a known region and no client was passed in
//! [`ServeOptions::client`].

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::client::{QStashClient, SharedQueueClient};
use crate::config::{env_keys, ReceiverSource, ServeOptions, WorkflowEnv};
use crate::error::WorkflowError;
use crate::receiver::{SharedReceiver, SigningKeyReceiver};

/// Queue regions the endpoint can be configured for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QStashRegion {
    /// `eu-central-1`
    EuCentral1,
    /// `us-east-1`
    UsEast1,
}

impl QStashRegion {
    /// Every known region.
    pub const ALL: [QStashRegion; 2] = [QStashRegion::EuCentral1, QStashRegion::UsEast1];

    /// Parses a region name, ignoring case and accepting `-` or `_`.
    ///
    /// # Examples
    ///
    /// ```
    /// use upstash_workflow::QStashRegion;
    ///
    /// assert_eq!(QStashRegion::parse("us-east-1"), Some(QStashRegion::UsEast1));
    /// assert_eq!(QStashRegion::parse(" US_EAST_1 "), Some(QStashRegion::UsEast1));
    /// assert_eq!(QStashRegion::parse("ap-south-1"), None);
    /// ```
    pub fn parse(value: &str) -> Option<Self> {
        let normalized = value.trim().replace('-', "_").to_ascii_uppercase();
        Self::ALL
            .into_iter()
            .find(|region| region.env_prefix() == normalized)
    }

    /// Prefix of the region's environment variables.
    pub fn env_prefix(&self) -> &'static str {
        match self {
            Self::EuCentral1 => "EU_CENTRAL_1",
            Self::UsEast1 => "US_EAST_1",
        }
    }

    /// Region name as the queue spells it.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EuCentral1 => "eu-central-1",
            Self::UsEast1 => "us-east-1",
        }
    }
}

impl fmt::Display for QStashRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Client and receiver used for one invocation.
#[derive(Clone)]
pub struct RegionalHandler {
    /// Region this handler belongs to; `None` in single-region mode
    pub region: Option<QStashRegion>,
    /// Queue client
    pub client: SharedQueueClient,
    /// Signature verifier; `None` disables verification
    pub receiver: Option<SharedReceiver>,
}

impl fmt::Debug for RegionalHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegionalHandler")
            .field("region", &self.region)
            .field("base_url", &self.client.base_url())
            .field("receiver", &self.receiver.is_some())
            .finish()
    }
}

/// The handlers an endpoint picks from.
#[derive(Debug, Clone)]
pub enum RegionalHandlers {
    /// One client for every delivery
    Single(RegionalHandler),
    /// One client per region, chosen by the `Upstash-Region` header
    Multi {
        /// Region used when the header is missing or unknown
        default_region: QStashRegion,
        /// Handlers of the regions that could be built
        handlers: HashMap<QStashRegion, RegionalHandler>,
    },
}

impl RegionalHandlers {
    /// Builds the handlers from the options and the environment.
    ///
    /// In multi-region mode the default region must be buildable. Other
    /// regions that fail to build are logged and left out.
    pub fn build(options: &ServeOptions, env: &WorkflowEnv) -> Result<Self, WorkflowError> {
        if let Some(client) = &options.client {
            return Ok(Self::Single(RegionalHandler {
                region: None,
                client: client.clone(),
                receiver: build_receiver(&options.receiver, env, None),
            }));
        }

        let default_region = match env.get(env_keys::QSTASH_REGION) {
            None => None,
            Some(raw) => {
                let parsed = QStashRegion::parse(raw);
                if parsed.is_none() {
                    tracing::warn!(
                        region = raw,
                        "Unknown QSTASH_REGION, falling back to single-region mode"
                    );
                }
                parsed
            }
        };

        let Some(default_region) = default_region else {
            let client: SharedQueueClient = Arc::new(QStashClient::from_env(env, None)?);
            return Ok(Self::Single(RegionalHandler {
                region: None,
                client,
                receiver: build_receiver(&options.receiver, env, None),
            }));
        };

        let mut handlers = HashMap::new();
        for region in QStashRegion::ALL {
            let prefix = region.env_prefix();
            match QStashClient::from_env(env, Some(prefix)) {
                Ok(client) => {
                    handlers.insert(
                        region,
                        RegionalHandler {
                            region: Some(region),
                            client: Arc::new(client),
                            receiver: build_receiver(&options.receiver, env, Some(prefix)),
                        },
                    );
                }
                Err(error) if region == default_region => return Err(error),
                Err(error) => {
                    tracing::warn!(
                        region = %region,
                        error = %error,
                        "Skipping region that could not be configured"
                    );
                }
            }
        }
        tracing::debug!(
            default_region = %default_region,
            regions = handlers.len(),
            "Multi-region mode enabled"
        );
        Ok(Self::Multi {
            default_region,
            handlers,
        })
    }

    /// Picks the handler for an invocation.
    ///
    /// First invocations always use the default region: the region header
    /// only shows up once a message has gone through the queue.
    pub fn select(&self, region_header: Option<&str>, first_invocation: bool) -> &RegionalHandler {
        self.resolve(region_header, first_invocation).0
    }

    /// Like [`select`](Self::select), also returning a warning when a
    /// region header was present but the default region had to be used.
    pub fn resolve(
        &self,
        region_header: Option<&str>,
        first_invocation: bool,
    ) -> (&RegionalHandler, Option<String>) {
        let (default_region, handlers) = match self {
            Self::Single(handler) => return (handler, None),
            Self::Multi {
                default_region,
                handlers,
            } => (*default_region, handlers),
        };
        let raw = match region_header {
            Some(raw) if !first_invocation => raw,
            // the default region is always present after `build`
            _ => return (&handlers[&default_region], None),
        };
        match QStashRegion::parse(raw) {
            Some(region) => match handlers.get(&region) {
                Some(handler) => (handler, None),
                None => (
                    &handlers[&default_region],
                    Some(format!(
                        "Region {} is not configured, using default region {}",
                        region, default_region
                    )),
                ),
            },
            None => (
                &handlers[&default_region],
                Some(format!(
                    "Unsupported region header '{}', using default region {}",
                    raw, default_region
                )),
            ),
        }
    }
}

fn build_receiver(
    source: &ReceiverSource,
    env: &WorkflowEnv,
    prefix: Option<&str>,
) -> Option<SharedReceiver> {
    match source {
        ReceiverSource::Disabled => None,
        ReceiverSource::Custom(receiver) => Some(receiver.clone()),
        ReceiverSource::FromEnv => {
            let receiver = SigningKeyReceiver::from_env(env, prefix);
            if receiver.is_none() {
                tracing::debug!(
                    prefix = ?prefix,
                    "No signing keys found, signature verification disabled"
                );
            }
            receiver.map(|r| Arc::new(r) as SharedReceiver)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn multi_region_env() -> WorkflowEnv {
        WorkflowEnv::from_pairs([
            ("QSTASH_REGION", "eu-central-1"),
            ("EU_CENTRAL_1_QSTASH_TOKEN", "eu-token"),
            ("EU_CENTRAL_1_QSTASH_URL", "https://eu.qstash.test"),
            ("US_EAST_1_QSTASH_TOKEN", "us-token"),
            ("US_EAST_1_QSTASH_URL", "https://us.qstash.test"),
        ])
    }

    #[test]
    fn test_region_normalization() {
        assert_eq!(QStashRegion::parse("us-east-1"), Some(QStashRegion::UsEast1));
        assert_eq!(QStashRegion::parse("US_EAST_1"), Some(QStashRegion::UsEast1));
        assert_eq!(QStashRegion::parse("Eu-Central_1"), Some(QStashRegion::EuCentral1));
        assert_eq!(QStashRegion::parse("ap-south-1"), None);
        assert_eq!(QStashRegion::parse(""), None);
    }

    #[test]
    fn test_multi_region_selection() {
        let handlers = RegionalHandlers::build(&ServeOptions::default(), &multi_region_env()).unwrap();

        let lower = handlers.select(Some("us-east-1"), false);
        let upper = handlers.select(Some("US_EAST_1"), false);
        assert_eq!(lower.region, Some(QStashRegion::UsEast1));
        assert_eq!(upper.region, Some(QStashRegion::UsEast1));
        assert_eq!(lower.client.base_url(), "https://us.qstash.test");

        let unsupported = handlers.select(Some("ap-south-1"), false);
        assert_eq!(unsupported.region, Some(QStashRegion::EuCentral1));
    }

    #[test]
    fn test_fallback_to_default_region_carries_a_warning() {
        let handlers = RegionalHandlers::build(&ServeOptions::default(), &multi_region_env()).unwrap();

        let (handler, warning) = handlers.resolve(Some("ap-south-1"), false);
        assert_eq!(handler.region, Some(QStashRegion::EuCentral1));
        assert!(warning.unwrap().contains("ap-south-1"));

        let (_, warning) = handlers.resolve(Some("us-east-1"), false);
        assert!(warning.is_none());
        let (_, warning) = handlers.resolve(Some("ap-south-1"), true);
        assert!(warning.is_none());
    }

    #[test]
    fn test_first_invocation_uses_default_region() {
        let handlers = RegionalHandlers::build(&ServeOptions::default(), &multi_region_env()).unwrap();
        let handler = handlers.select(Some("us-east-1"), true);
        assert_eq!(handler.region, Some(QStashRegion::EuCentral1));
    }

    #[test]
    fn test_missing_secondary_region_is_skipped() {
        let env = WorkflowEnv::from_pairs([
            ("QSTASH_REGION", "US_EAST_1"),
            ("US_EAST_1_QSTASH_TOKEN", "us-token"),
        ]);
        let handlers = RegionalHandlers::build(&ServeOptions::default(), &env).unwrap();
        match &handlers {
            RegionalHandlers::Multi { handlers, .. } => {
                assert_eq!(handlers.len(), 1);
                assert!(handlers.contains_key(&QStashRegion::UsEast1));
            }
            other => panic!("expected multi-region handlers, got {:?}", other),
        }
        assert_eq!(
            handlers.select(Some("eu-central-1"), false).region,
            Some(QStashRegion::UsEast1)
        );
    }

    #[test]
    fn test_missing_default_region_fails() {
        let env = WorkflowEnv::from_pairs([
            ("QSTASH_REGION", "eu-central-1"),
            ("US_EAST_1_QSTASH_TOKEN", "us-token"),
        ]);
        let err = RegionalHandlers::build(&ServeOptions::default(), &env).unwrap_err();
        assert!(err.to_string().contains("EU_CENTRAL_1_QSTASH_TOKEN"));
    }

    #[test]
    fn test_explicit_client_disables_regions() {
        let env = multi_region_env();
        let options = ServeOptions {
            client: Some(Arc::new(QStashClient::with_token("token"))),
            ..Default::default()
        };
        let handlers = RegionalHandlers::build(&options, &env).unwrap();
        assert!(matches!(handlers, RegionalHandlers::Single(_)));
        assert_eq!(handlers.select(Some("us-east-1"), false).region, None);
    }

    #[test]
    fn test_receiver_per_region() {
        let env = multi_region_env()
            .with("US_EAST_1_QSTASH_CURRENT_SIGNING_KEY", "cur")
            .with("US_EAST_1_QSTASH_NEXT_SIGNING_KEY", "next");
        let handlers = RegionalHandlers::build(&ServeOptions::default(), &env).unwrap();
        assert!(handlers.select(Some("us-east-1"), false).receiver.is_some());
        assert!(handlers.select(Some("eu-central-1"), false).receiver.is_none());
    }
}
