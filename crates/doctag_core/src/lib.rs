pub mod checkpoint;
pub mod classify;
pub mod client;
pub mod config;
pub mod crawl;
pub mod enumerate;
pub mod mutate;
pub mod title;

#[cfg(test)]
mod test_support;
