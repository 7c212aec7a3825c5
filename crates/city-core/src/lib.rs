//! Deterministic Harberger-tax city kernel: valuation ledger, tax accrual,
//! buyout settlement, quadratic voting, and governance lifecycle behind a
//! single tick-driven world aggregate.

pub mod economy;
pub mod governance;
pub mod identity;
pub mod ledger;
pub mod settlement;
pub mod tax;
pub mod votes;
pub mod world;

pub use world::{CityWorld, StepMetrics};
