pub mod api;
pub mod catalog;
pub mod config;
pub mod export;
pub mod hierarchy;
pub mod rate_limit;
pub mod runtime;
pub mod staleness;

#[cfg(test)]
mod test_support;
