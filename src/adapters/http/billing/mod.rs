//! HTTP adapter for club billing endpoints.
//!
//! - `POST /api/clubs/:club_id/memberships/free` - Join a free club
//! - `POST /api/clubs/:club_id/memberships/checkout` - Start paid checkout
//! - `POST /api/clubs/:club_id/payment-enforcement` - Enforce payment
//! - `POST /api/webhooks/payments` - Payment gateway events
//! - `GET /health` - Liveness

pub mod dto;
pub mod handlers;
pub mod routes;

pub use dto::*;
pub use handlers::{ApiError, AuthenticatedUser, BillingAppState};
pub use routes::{app, billing_router};
