pub mod billing;
pub mod credentials;
pub mod domain;
pub mod gateway;
pub mod policy;
pub mod ports;
pub mod prompt;
pub mod session;

#[cfg(test)]
mod testing;

pub use billing::{PriceTable, SubscriptionSynchronizer, SyncOutcome, WebhookEvent};
pub use credentials::{CredentialError, CredentialService};
pub use domain::{
    AnalyticsEvent, AuthSession, CanonDocument, Identity, Message, MessageRole, NewCanonDocument,
    Plan, Project, Subscriber, Subscription, SubscriptionStatus, UsageStats, User, UserCredentials,
};
pub use gateway::{GatewayError, GatewaySettings, GenerateCommand, GenerateOutcome, GenerationGateway};
pub use policy::{evaluate_access, AccessDenied, AccessGrant};
pub use ports::{
    BillingService, CheckoutRequest, CheckoutSession, DatabaseService, ImageGenerationService,
    ImageRequest, PasswordScheme, PortError, PortResult, TextGenerationService,
};
pub use session::SessionManager;
