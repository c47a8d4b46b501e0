pub mod answer;
pub mod candidate;
pub mod ledger;
pub mod message;
pub mod normalize;
pub mod payload;
pub mod ranking;
pub mod session;
