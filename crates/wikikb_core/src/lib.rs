pub mod client;
pub mod collect;
pub mod config;
pub mod export;
pub mod fetch;
pub mod filter;
pub mod ledger;
pub mod markup;
pub mod run;

#[cfg(test)]
pub(crate) mod testing;
