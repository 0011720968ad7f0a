//! Page Lifecycle Controller
//!
//! A per-page state machine plus the navigation stack. Navigation returns a
//! [`NavigationPlan`]; transitions return the [`PageNotice`]s to fan out.

mod controller;
mod state;

pub use controller::*;
pub use state::*;
