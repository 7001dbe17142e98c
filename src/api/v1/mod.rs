pub mod account;
pub mod auth;
pub mod benefit;
pub mod bid;
pub mod load;
pub mod token;
