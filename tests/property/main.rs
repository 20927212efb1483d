// tests/property/main.rs

mod retry_policy;
