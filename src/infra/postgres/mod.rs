pub mod account_repo;
pub mod ledger_repo;
pub mod promo_repo;
