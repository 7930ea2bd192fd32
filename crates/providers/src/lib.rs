//! `polyform-providers` — contracts for the external collaborators.
//!
//! Normalizes each generation provider into submit / poll / parse-webhook
//! over one update shape, and the payment processor into create-order /
//! verify-signature / parse-webhook. Concrete vendor SDKs live behind these
//! ports; mocks ship here for dev wiring and tests.

pub mod adapter;
pub mod error;
pub mod mock;
pub mod payment;
pub mod signature;

pub use adapter::{ExternalPhase, GenerationProvider, ProviderUpdate};
pub use error::{ProviderError, WebhookError};
pub use mock::{MockGenerationProvider, MockPaymentProvider};
pub use payment::{PaymentEvent, PaymentEventType, PaymentProvider};
