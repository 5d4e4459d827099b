pub mod lib_duckdb;
pub mod send_email;
