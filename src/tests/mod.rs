mod common;
mod proxy_integration;
