pub mod account;
pub mod admin;
pub mod crawl;
pub mod extract;
pub mod health;
pub mod map;
pub mod scrape;
pub mod search;
pub mod websocket;
