// tests/integration/main.rs

mod config_loading;
mod runtime_loop;
mod update_pipeline;
