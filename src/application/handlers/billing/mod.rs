//! Host billing handlers.

mod evaluate_all_club_billing;

pub use evaluate_all_club_billing::{
    ClubFailure, EvaluateAllClubBillingCommand, EvaluateAllClubBillingHandler, EvaluationSummary,
};
