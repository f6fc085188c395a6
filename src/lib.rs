pub mod configure;
pub mod logger;
pub mod sweep;
pub mod wallets;
