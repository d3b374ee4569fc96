//! Stage-progression engine for business-development opportunities.
//!
//! Opportunity types declare ordered stage templates. Creating an opportunity
//! materializes one [`stage::StageInstance`] per template; the [`Engine`]
//! moves instances through their state machine, gates completion on the
//! action/document ledger, and scores deadline risk.

pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod event;
pub mod instantiate;
pub mod io;
pub mod ledger;
pub mod opportunity;
pub mod paths;
pub mod report;
pub mod risk;
pub mod stage;
pub mod store;
pub mod sweep;
pub mod template;
pub mod types;

pub use engine::{Engine, TransitionRequest};
pub use error::{OppflowError, Result};
