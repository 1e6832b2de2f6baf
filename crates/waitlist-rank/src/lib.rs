//! Position and referral ranking engine for referral-driven waitlists.
//!
//! Entrants hold a strictly ordered position inside their campaign. Verified referrals
//! move the referrer (and optionally the referred entrant) toward the front while the
//! engine keeps live positions unique and, after every recompute, dense.

pub mod config;
pub mod error;
pub mod telemetry;
pub mod waitlist;
