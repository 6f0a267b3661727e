pub mod account;
pub mod config;
pub mod currency;
pub mod deployment;
pub mod error;
pub mod ledger;
pub mod registry;
pub mod roles;
pub mod view;
pub mod wallets;
