pub mod account;
pub mod attribution;
pub mod error;
pub mod event;
pub mod id;
pub mod ledger;
pub mod money;
pub mod payload;
pub mod ports;
pub mod reference;
pub mod signature;
