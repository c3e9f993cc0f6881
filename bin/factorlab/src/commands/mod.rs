pub mod context;
pub mod explore_cmd;
pub mod run_cmd;
pub mod status;
pub mod versions_cmd;
